//! Remote thread acquisition.

mod api;
mod fetcher;
mod http;

pub use api::{
    PostsPage, RemoteForum, RemotePost, RemoteSpan, RemoteSubReply, RemoteThreadInfo, RemoteUser,
    SubRepliesPage, ThreadApi,
};
pub use fetcher::{preview_thread, RemoteThreadFetcher, RemoteThreadSnapshot};
pub use http::HttpThreadApi;
