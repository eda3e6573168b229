//! reqwest-based page transport.

use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, DNT, REFERER,
    UPGRADE_INSECURE_REQUESTS,
};
use reqwest::{Client, Proxy, Response, StatusCode};
use tracing::debug;

use super::{is_ban_notice, preview, FetchError, PageFetcher};
use crate::config::CrawlerConfig;

/// Page fetcher that talks to the real upstream.
pub struct HttpFetcher {
    client: Client,
    cookies: Option<String>,
}

impl HttpFetcher {
    /// Build a fetcher with browser-like headers, the configured timeout and
    /// optional proxy.
    pub fn new(config: &CrawlerConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(DNT, HeaderValue::from_static("1"));
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        let referer = HeaderValue::from_str(&format!("https://{}/", config.host))
            .map_err(|e| FetchError::Config(format!("invalid host: {}", e)))?;
        headers.insert(REFERER, referer);

        let mut builder = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .default_headers(headers);

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            cookies: config.cookies.clone().filter(|c| !c.is_empty()),
        })
    }

    async fn read_body(url: &str, response: Response) -> Result<String, FetchError> {
        let status = response.status();
        let body = response.text().await?;
        debug!(url = url, status = status.as_u16(), bytes = body.len(), "Upstream response");
        check_body(status, body)
    }
}

fn check_body(status: StatusCode, body: String) -> Result<String, FetchError> {
    if is_ban_notice(&body) {
        return Err(FetchError::Banned(preview(body.trim(), 1000)));
    }

    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            body: preview(&body, 200),
        });
    }

    Ok(body)
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        let mut request = self.client.get(url);
        if let Some(cookies) = &self.cookies {
            request = request.header(COOKIE, cookies);
        }
        let response = request.send().await?;
        Self::read_body(url, response).await
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<String, FetchError> {
        let response = self.client.post(url).json(body).send().await?;
        Self::read_body(url, response).await
    }
}
