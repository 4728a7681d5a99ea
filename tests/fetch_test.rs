//! Integration tests for remote thread fetching over HTTP.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use thread_archiver::config::Config;
use thread_archiver::error::{ArchiveError, RemoteError};
use thread_archiver::progress::{Progress, Step};
use thread_archiver::remote::{preview_thread, HttpThreadApi, RemoteThreadFetcher};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_config(api_base_url: &str, page_size: u32) -> Config {
    Config {
        api_base_url: api_base_url.to_string(),
        page_size,
        sub_reply_page_size: page_size,
        ..Config::for_testing()
    }
}

fn fetcher(config: &Config) -> (RemoteThreadFetcher, Arc<Mutex<Vec<Progress>>>) {
    let api = HttpThreadApi::new(config).expect("Failed to build client");
    let mut fetcher =
        RemoteThreadFetcher::new(Arc::new(api), config.page_size, config.sub_reply_page_size);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    fetcher.add_progress_hook(move |p: Progress| sink.lock().unwrap().push(p));
    (fetcher, events)
}

fn post(id: i64, sub_reply_count: u32, preview: &[i64]) -> Value {
    json!({
        "id": id,
        "floor": id,
        "author_id": 1,
        "content": [{ "type": "text", "text": format!("post {id}") }],
        "created_at": 1_700_000_000 + id,
        "sub_reply_count": sub_reply_count,
        "sub_replies": preview.iter().map(|&reply| sub_reply(reply)).collect::<Vec<_>>(),
    })
}

fn sub_reply(id: i64) -> Value {
    json!({
        "id": id,
        "author": { "id": 2, "name": "replier" },
        "content": [{ "type": "text", "text": format!("reply {id}") }],
        "created_at": 1_700_001_000 + id,
    })
}

fn posts_page(total: u64, has_more: bool, posts: Vec<Value>) -> Value {
    json!({
        "thread": {
            "id": 100,
            "title": "Test thread",
            "forum": { "id": 7, "name": "rust" },
            "author_id": 1,
        },
        "total_posts": total,
        "has_more": has_more,
        "users": [
            { "id": 1, "name": "op", "display_name": "Original Poster" },
            { "id": 2, "name": "replier" },
        ],
        "posts": posts,
    })
}

async fn mount_posts_page(server: &MockServer, page: u32, body: Value) {
    Mock::given(method("GET"))
        .and(path("/threads/100/posts"))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_paginates_until_short_page() {
    let server = MockServer::start().await;
    mount_posts_page(
        &server,
        1,
        posts_page(3, true, vec![post(1, 0, &[]), post(2, 0, &[])]),
    )
    .await;
    mount_posts_page(&server, 2, posts_page(3, false, vec![post(3, 0, &[])])).await;

    let config = create_test_config(&server.uri(), 2);
    let (fetcher, events) = fetcher(&config);

    let snapshot = fetcher.fetch(100).await.unwrap();

    let ids: Vec<i64> = snapshot.posts.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(snapshot.thread.title, "Test thread");
    assert!(snapshot.sub_replies.is_empty());
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            Progress::new(Step::Posts, 2, 3),
            Progress::new(Step::Posts, 3, 3),
        ]
    );
}

#[tokio::test]
async fn test_fetch_follows_up_on_truncated_sub_replies() {
    let server = MockServer::start().await;
    mount_posts_page(
        &server,
        1,
        posts_page(2, false, vec![post(1, 3, &[10]), post(2, 1, &[20])]),
    )
    .await;
    for (page, body) in [
        (1, json!({ "total": 3, "has_more": true, "sub_replies": [sub_reply(10), sub_reply(11)] })),
        (2, json!({ "total": 3, "has_more": false, "sub_replies": [sub_reply(12)] })),
    ] {
        Mock::given(method("GET"))
            .and(path("/threads/100/posts/1/sub-replies"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = create_test_config(&server.uri(), 2);
    let (fetcher, events) = fetcher(&config);

    let snapshot = fetcher.fetch(100).await.unwrap();

    let replies = |post_id: i64| -> Vec<i64> {
        snapshot.sub_replies[&post_id].iter().map(|r| r.id).collect()
    };
    assert_eq!(replies(1), vec![10, 11, 12]);
    // Post 2 embedded its only reply, so no follow-up request was made.
    assert_eq!(replies(2), vec![20]);
    assert!(snapshot.posts.iter().all(|p| p.sub_replies.is_empty()));

    let sub_reply_events: Vec<Progress> = events
        .lock()
        .unwrap()
        .iter()
        .copied()
        .filter(|p| p.step == Step::SubReplies)
        .collect();
    assert_eq!(
        sub_reply_events,
        vec![
            Progress::new(Step::SubReplies, 2, 3),
            Progress::new(Step::SubReplies, 3, 3),
        ]
    );
}

#[tokio::test]
async fn test_missing_thread_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/threads/100/posts"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), 2);
    let (fetcher, _events) = fetcher(&config);

    let err = fetcher.fetch(100).await.unwrap_err();
    assert!(matches!(err, ArchiveError::ThreadNotFound { thread_id: 100 }));
}

#[tokio::test]
async fn test_api_error_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/threads/100/posts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "error_code": 4, "error_msg": "busy" })),
        )
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), 2);
    let (fetcher, _events) = fetcher(&config);

    let err = fetcher.fetch(100).await.unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::RemoteFetchFailed {
            phase: Step::Posts,
            page: 1,
            post_id: None,
            source: RemoteError::Api { code: 4, .. },
        }
    ));
}

#[tokio::test]
async fn test_failure_on_later_page_reports_page() {
    let server = MockServer::start().await;
    mount_posts_page(
        &server,
        1,
        posts_page(4, true, vec![post(1, 0, &[]), post(2, 0, &[])]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/threads/100/posts"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), 2);
    let (fetcher, _events) = fetcher(&config);

    let err = fetcher.fetch(100).await.unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::RemoteFetchFailed {
            page: 2,
            source: RemoteError::Status { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_unreachable_api_is_transport_failure() {
    // Nothing listens on the testing config's port.
    let config = Config::for_testing();
    let (fetcher, events) = fetcher(&config);

    let err = fetcher.fetch(100).await.unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::RemoteFetchFailed {
            source: RemoteError::Http(_),
            ..
        }
    ));
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_preview_thread() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/threads/100/posts"))
        .and(query_param("page", "1"))
        .and(query_param("page_size", "3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(posts_page(40, true, vec![post(1, 0, &[])])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), 30);
    let api = HttpThreadApi::new(&config).unwrap();

    let thread = preview_thread(&api, 100).await.unwrap();
    assert_eq!(thread.id, 100);
    assert_eq!(thread.title, "Test thread");
    assert_eq!(thread.forum.name, "rust");
    assert_eq!(thread.author.display_name, "Original Poster");
}

#[tokio::test]
async fn test_missing_post_is_not_a_missing_thread() {
    let server = MockServer::start().await;
    mount_posts_page(&server, 1, posts_page(1, false, vec![post(5, 9, &[])])).await;
    Mock::given(method("GET"))
        .and(path("/threads/100/posts/5/sub-replies"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), 2);
    let (fetcher, _events) = fetcher(&config);

    let err = fetcher.fetch(100).await.unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::RemoteFetchFailed {
            phase: Step::SubReplies,
            page: 1,
            post_id: Some(5),
            source: RemoteError::PostNotFound {
                thread_id: 100,
                post_id: 5,
            },
        }
    ));
}

#[tokio::test]
async fn test_sub_reply_failure_on_later_page_reports_post() {
    let server = MockServer::start().await;
    mount_posts_page(&server, 1, posts_page(1, false, vec![post(1, 5, &[])])).await;
    Mock::given(method("GET"))
        .and(path("/threads/100/posts/1/sub-replies"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 5,
            "has_more": true,
            "sub_replies": [sub_reply(10), sub_reply(11)],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/threads/100/posts/1/sub-replies"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), 2);
    let (fetcher, events) = fetcher(&config);

    let err = fetcher.fetch(100).await.unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::RemoteFetchFailed {
            phase: Step::SubReplies,
            page: 2,
            post_id: Some(1),
            source: RemoteError::Status { .. },
        }
    ));
    assert_eq!(
        events.lock().unwrap().last(),
        Some(&Progress::new(Step::SubReplies, 2, 5))
    );
}
