//! Paginated acquisition of a whole remote thread.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::constants::PREVIEW_PAGE_SIZE;
use crate::convert::convert_thread_info;
use crate::error::{ArchiveError, Result};
use crate::models::ThreadInfo;
use crate::progress::{ProgressHook, ProgressReporter, SharedHook, Step};

use super::api::{RemotePost, RemoteSubReply, RemoteThreadInfo, RemoteUser, ThreadApi};

/// Everything fetched for one thread, before conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteThreadSnapshot {
    pub thread: RemoteThreadInfo,
    /// Users seen on any posts page, by id.
    pub users: BTreeMap<i64, RemoteUser>,
    /// Top-level posts in page order. Their embedded previews are moved into `sub_replies`.
    pub posts: Vec<RemotePost>,
    /// Complete nested replies, keyed by parent post id.
    pub sub_replies: BTreeMap<i64, Vec<RemoteSubReply>>,
}

/// Pulls a thread page by page, one request at a time.
pub struct RemoteThreadFetcher {
    api: Arc<dyn ThreadApi>,
    page_size: u32,
    sub_reply_page_size: u32,
    hooks: Vec<SharedHook>,
}

impl RemoteThreadFetcher {
    #[must_use]
    pub fn new(api: Arc<dyn ThreadApi>, page_size: u32, sub_reply_page_size: u32) -> Self {
        Self {
            api,
            page_size: page_size.max(1),
            sub_reply_page_size: sub_reply_page_size.max(1),
            hooks: Vec::new(),
        }
    }

    /// Register a hook; every hook receives every event in emission order.
    pub fn add_progress_hook(&mut self, hook: impl ProgressHook + 'static) {
        self.hooks.push(Arc::new(hook));
    }

    pub fn add_shared_hook(&mut self, hook: SharedHook) {
        self.hooks.push(hook);
    }

    /// Fetch every post and nested reply of `thread_id`.
    ///
    /// Top-level pages are requested until one returns fewer posts than
    /// requested or reports no more pages. Posts declaring more nested
    /// replies than their page embedded get follow-up paginated requests.
    ///
    /// # Errors
    ///
    /// Fails on the first page that cannot be fetched or decoded; no partial
    /// snapshot is returned. A thread that does not exist fails with
    /// [`ArchiveError::ThreadNotFound`].
    pub async fn fetch(&self, thread_id: i64) -> Result<RemoteThreadSnapshot> {
        info!(thread_id, page_size = self.page_size, "Fetching remote thread");

        let (thread, users, mut posts) = self.fetch_posts(thread_id).await?;
        let sub_replies = self.fetch_all_sub_replies(thread_id, &mut posts).await?;

        info!(
            thread_id,
            posts = posts.len(),
            sub_replies = sub_replies.values().map(Vec::len).sum::<usize>(),
            "Remote thread fetched"
        );

        Ok(RemoteThreadSnapshot {
            thread,
            users,
            posts,
            sub_replies,
        })
    }

    async fn fetch_posts(
        &self,
        thread_id: i64,
    ) -> Result<(RemoteThreadInfo, BTreeMap<i64, RemoteUser>, Vec<RemotePost>)> {
        let mut reporter = ProgressReporter::begin(&self.hooks, Step::Posts, 0);
        let mut thread = None;
        let mut users = BTreeMap::new();
        let mut posts = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1;

        loop {
            let batch = self
                .api
                .get_posts(thread_id, page, self.page_size)
                .await
                .map_err(|e| ArchiveError::remote(Step::Posts, page, None, e))?;

            let received = batch.posts.len();
            debug!(thread_id, page, received, has_more = batch.has_more, "Fetched posts page");

            if thread.is_none() {
                reporter.grow_total(batch.total_posts);
                thread = Some(batch.thread);
            }
            users.extend(batch.users.into_iter().map(|user| (user.id, user)));

            let mut new_in_page = 0;
            for post in batch.posts {
                if seen.insert(post.id) {
                    posts.push(post);
                    new_in_page += 1;
                }
            }
            reporter.advance_to(posts.len() as u64);

            if received < self.page_size as usize || !batch.has_more {
                break;
            }
            if new_in_page == 0 {
                warn!(thread_id, page, "Page repeated already seen posts, stopping pagination");
                break;
            }
            page += 1;
        }
        reporter.finish();

        // The loop runs at least once, so a thread is always set here.
        let thread = thread.ok_or(ArchiveError::ThreadNotFound { thread_id })?;
        Ok((thread, users, posts))
    }

    async fn fetch_all_sub_replies(
        &self,
        thread_id: i64,
        posts: &mut [RemotePost],
    ) -> Result<BTreeMap<i64, Vec<RemoteSubReply>>> {
        let needs_follow_up =
            |post: &RemotePost| post.sub_reply_count as usize > post.sub_replies.len();

        let declared: u64 = posts
            .iter()
            .filter(|post| needs_follow_up(post))
            .map(|post| u64::from(post.sub_reply_count))
            .sum();
        let mut reporter =
            (declared > 0).then(|| ProgressReporter::begin(&self.hooks, Step::SubReplies, declared));

        let mut sub_replies = BTreeMap::new();
        for post in posts.iter_mut() {
            let follow_up = needs_follow_up(post);
            let preview = std::mem::take(&mut post.sub_replies);
            let replies = match reporter.as_mut() {
                Some(reporter) if follow_up => {
                    self.fetch_sub_replies(thread_id, post, reporter).await?
                }
                _ => preview,
            };
            if !replies.is_empty() {
                sub_replies.insert(post.id, replies);
            }
        }

        if let Some(reporter) = reporter {
            reporter.finish();
        }
        Ok(sub_replies)
    }

    async fn fetch_sub_replies(
        &self,
        thread_id: i64,
        post: &RemotePost,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<Vec<RemoteSubReply>> {
        let mut replies = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1;

        loop {
            let batch = self
                .api
                .get_sub_replies(thread_id, post.id, page, self.sub_reply_page_size)
                .await
                .map_err(|e| ArchiveError::remote(Step::SubReplies, page, Some(post.id), e))?;

            let received = batch.sub_replies.len();
            debug!(thread_id, post_id = post.id, page, received, "Fetched sub-replies page");

            let mut new_in_page = 0;
            for reply in batch.sub_replies {
                if seen.insert(reply.id) {
                    replies.push(reply);
                    new_in_page += 1;
                }
            }
            reporter.advance_by(new_in_page);

            if received < self.sub_reply_page_size as usize || !batch.has_more || new_in_page == 0
            {
                break;
            }
            page += 1;
        }

        Ok(replies)
    }
}

/// Fetch a small first page and return the remote thread identity, to let a
/// caller confirm a thread before archiving it.
///
/// # Errors
///
/// Fails if the page cannot be fetched or the thread author is missing from it.
pub async fn preview_thread(api: &dyn ThreadApi, thread_id: i64) -> Result<ThreadInfo> {
    let page = api
        .get_posts(thread_id, 1, PREVIEW_PAGE_SIZE)
        .await
        .map_err(|e| ArchiveError::remote(Step::Posts, 1, None, e))?;

    let users: BTreeMap<_, _> = page.users.into_iter().map(|user| (user.id, user)).collect();
    convert_thread_info(&page.thread, &users)
}
