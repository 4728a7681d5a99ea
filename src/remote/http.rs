//! JSON-over-HTTP implementation of [`ThreadApi`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::trace;

use crate::config::Config;
use crate::error::RemoteError;

use super::api::{PostsPage, SubRepliesPage, ThreadApi};

/// Error envelope the API returns with a 200 status.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

#[derive(Debug, Clone)]
pub struct HttpThreadApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpThreadApi {
    /// Build a client for the API at `config.api_base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        page: u32,
        page_size: u32,
        not_found: RemoteError,
    ) -> Result<T, RemoteError> {
        trace!(url, page, page_size, "GET");

        let response = self
            .client
            .get(url)
            .query(&[("page", page), ("page_size", page_size)])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(not_found);
        }
        if !status.is_success() {
            return Err(RemoteError::Status {
                status,
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;

        if let Ok(err) = serde_json::from_slice::<ApiErrorBody>(&body) {
            if err.error_code != 0 {
                return Err(RemoteError::Api {
                    code: err.error_code,
                    message: err.error_msg,
                });
            }
        }

        serde_json::from_slice(&body).map_err(|source| RemoteError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl ThreadApi for HttpThreadApi {
    async fn get_posts(
        &self,
        thread_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<PostsPage, RemoteError> {
        let url = format!("{}/threads/{thread_id}/posts", self.base_url);
        self.get_json(&url, page, page_size, RemoteError::ThreadNotFound { thread_id })
            .await
    }

    async fn get_sub_replies(
        &self,
        thread_id: i64,
        post_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<SubRepliesPage, RemoteError> {
        let url = format!(
            "{}/threads/{thread_id}/posts/{post_id}/sub-replies",
            self.base_url
        );
        self.get_json(
            &url,
            page,
            page_size,
            RemoteError::PostNotFound { thread_id, post_id },
        )
        .await
    }
}
