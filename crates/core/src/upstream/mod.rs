//! Upstream access: raw page transport plus the site-specific client.

mod client;
mod http;
mod types;

pub use client::{EhClient, TorrentListFilter};
pub use http::HttpFetcher;
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;

/// Phrase the upstream uses on its IP ban notice.
pub const BAN_PHRASE: &str = "temporarily banned";

/// The ban notice is served as a short plain-text body.
const BAN_NOTICE_MAX_LEN: usize = 1024;

/// Whether `body` is the upstream's ban notice rather than a page that merely
/// mentions the phrase (titles and tags are user text).
pub fn is_ban_notice(body: &str) -> bool {
    let body = body.trim();
    body.len() <= BAN_NOTICE_MAX_LEN
        && !body.starts_with('<')
        && !body.starts_with('{')
        && body.contains(BAN_PHRASE)
}

/// Errors from upstream requests.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected status code {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Upstream ban notice: {0}")]
    Banned(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid client configuration: {0}")]
    Config(String),
}

/// Raw page transport.
///
/// Implementations return the response body of a successful request and map
/// ban notices to [`FetchError::Banned`].
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<String, FetchError>;

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<String, FetchError>;
}

/// First `max` characters of a body, for error messages.
pub(crate) fn preview(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ギャラリー情報", 3), "ギャラ...");
    }
}
