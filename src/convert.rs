//! Mapping of a remote thread snapshot into the archive entity graph.
//!
//! Pure and deterministic: the same snapshot always converts to the same
//! graph. Authors and the forum are de-duplicated by id so every post
//! referencing the same author shares one `Arc<Author>`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{ArchiveError, Result};
use crate::models::{ArchiveThread, Author, ContentSpan, Forum, Post, SubReply, ThreadInfo};
use crate::remote::{RemoteSpan, RemoteSubReply, RemoteThreadInfo, RemoteThreadSnapshot, RemoteUser};

/// Convert a fetched snapshot into an [`ArchiveThread`].
///
/// # Errors
///
/// Returns [`ArchiveError::ConversionInconsistent`] if the snapshot references
/// users or posts it does not contain, repeats ids, or carries malformed spans.
pub fn convert(snapshot: &RemoteThreadSnapshot) -> Result<ArchiveThread> {
    let mut authors = AuthorCache::default();
    let thread = thread_info(&snapshot.thread, &snapshot.users, &mut authors)?;

    let post_ids: HashSet<i64> = snapshot.posts.iter().map(|post| post.id).collect();
    if post_ids.len() != snapshot.posts.len() {
        return Err(inconsistent(format!(
            "thread {} contains duplicate post ids",
            thread.id
        )));
    }
    if let Some(orphan) = snapshot.sub_replies.keys().find(|id| !post_ids.contains(*id)) {
        return Err(inconsistent(format!(
            "sub-replies reference post {orphan}, which is not in the thread"
        )));
    }

    let mut posts = Vec::with_capacity(snapshot.posts.len());
    for remote in &snapshot.posts {
        let user = snapshot.users.get(&remote.author_id).ok_or_else(|| {
            inconsistent(format!(
                "post {} references unknown author {}",
                remote.id, remote.author_id
            ))
        })?;

        let sub_replies = match snapshot.sub_replies.get(&remote.id) {
            Some(replies) => convert_sub_replies(remote.id, replies, &mut authors)?,
            None => Vec::new(),
        };

        posts.push(Post {
            id: remote.id,
            floor: remote.floor,
            author: authors.get(user),
            content: convert_spans(&remote.content)?,
            created_at: timestamp(remote.created_at, remote.id)?,
            sub_replies,
        });
    }

    Ok(ArchiveThread { thread, posts })
}

/// Convert just the thread identity.
///
/// # Errors
///
/// Fails if the thread author is not among `users`.
pub(crate) fn convert_thread_info(
    thread: &RemoteThreadInfo,
    users: &BTreeMap<i64, RemoteUser>,
) -> Result<ThreadInfo> {
    thread_info(thread, users, &mut AuthorCache::default())
}

fn thread_info(
    thread: &RemoteThreadInfo,
    users: &BTreeMap<i64, RemoteUser>,
    authors: &mut AuthorCache,
) -> Result<ThreadInfo> {
    let author = users.get(&thread.author_id).ok_or_else(|| {
        inconsistent(format!(
            "thread {} references unknown author {}",
            thread.id, thread.author_id
        ))
    })?;

    Ok(ThreadInfo {
        id: thread.id,
        title: thread.title.clone(),
        forum: Arc::new(Forum {
            id: thread.forum.id,
            name: thread.forum.name.clone(),
        }),
        author: authors.get(author),
    })
}

fn convert_sub_replies(
    post_id: i64,
    replies: &[RemoteSubReply],
    authors: &mut AuthorCache,
) -> Result<Vec<SubReply>> {
    let mut seen = HashSet::new();
    replies
        .iter()
        .map(|reply| {
            if !seen.insert(reply.id) {
                return Err(inconsistent(format!(
                    "post {post_id} contains sub-reply {} twice",
                    reply.id
                )));
            }
            Ok(SubReply {
                id: reply.id,
                author: authors.get(&reply.author),
                content: convert_spans(&reply.content)?,
                created_at: timestamp(reply.created_at, reply.id)?,
            })
        })
        .collect()
}

fn convert_spans(spans: &[RemoteSpan]) -> Result<Vec<ContentSpan>> {
    spans.iter().map(convert_span).collect()
}

fn convert_span(span: &RemoteSpan) -> Result<ContentSpan> {
    let text = span.text.clone();
    let url = || {
        span.url
            .clone()
            .ok_or_else(|| inconsistent(format!("{} span without url", span.kind)))
    };

    Ok(match span.kind.as_str() {
        "link" => ContentSpan::Link { text, url: url()? },
        "emoticon" => ContentSpan::Emoticon {
            id: span.id.clone().unwrap_or_default(),
            text,
        },
        "mention" => ContentSpan::Mention {
            user_id: span
                .user_id
                .ok_or_else(|| inconsistent("mention span without user_id".to_string()))?,
            text,
        },
        "image" => ContentSpan::Image {
            url: url()?,
            width: span.width,
            height: span.height,
        },
        "audio" => ContentSpan::Audio {
            url: url()?,
            duration_ms: span.duration_ms,
        },
        "video" => ContentSpan::Video {
            url: url()?,
            thumbnail_url: span.thumbnail_url.clone(),
        },
        // Plain text and kinds this archive has no richer form for keep their text.
        _ => ContentSpan::Text { text },
    })
}

fn timestamp(secs: i64, id: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| inconsistent(format!("record {id} has out-of-range timestamp {secs}")))
}

fn inconsistent(message: String) -> ArchiveError {
    ArchiveError::ConversionInconsistent(message)
}

/// First-seen record wins for each author id.
#[derive(Default)]
struct AuthorCache {
    by_id: BTreeMap<i64, Arc<Author>>,
}

impl AuthorCache {
    fn get(&mut self, user: &RemoteUser) -> Arc<Author> {
        Arc::clone(self.by_id.entry(user.id).or_insert_with(|| {
            Arc::new(Author {
                id: user.id,
                name: user.name.clone(),
                display_name: user.display_name.clone().unwrap_or_else(|| user.name.clone()),
                portrait: user.portrait.clone(),
            })
        }))
    }
}
