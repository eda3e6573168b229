//! Site client: URL building, request accounting and page parsing.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use super::{preview, FetchError, GalleryMetadata, MetadataResponse, PageFetcher};
use crate::config::CrawlerConfig;
use crate::metrics;
use crate::parser::{
    GalleryListParser, GalleryListing, PageParser, TorrentListParser, TorrentListing, TorrentPage,
    TorrentPageParser,
};
use crate::store::GalleryRef;

/// Filters for the torrent listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorrentListFilter {
    /// Free-text search.
    pub search: Option<String>,
    /// Upstream status filter (`s=` parameter).
    pub status: Option<String>,
}

/// Client for the upstream site and its metadata API.
#[derive(Clone)]
pub struct EhClient {
    fetcher: Arc<dyn PageFetcher>,
    host: String,
    api_url: String,
}

impl std::fmt::Debug for EhClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EhClient")
            .field("host", &self.host)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl EhClient {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        host: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            host: host.into(),
            api_url: api_url.into(),
        }
    }

    pub fn from_config(fetcher: Arc<dyn PageFetcher>, config: &CrawlerConfig) -> Self {
        Self::new(fetcher, config.host.clone(), config.api_url.clone())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Listing URL, starting after `after` (exclusive) when set.
    pub fn gallery_list_url(&self, after: Option<u64>, expunged: bool) -> String {
        let next = after.map(|gid| gid.to_string()).unwrap_or_default();
        let mut url = format!(
            "https://{}/?next={}&f_cats=0&advsearch=1&f_sname=on&f_stags=on",
            self.host, next
        );
        if expunged {
            url.push_str("&f_sh=on");
        }
        url.push_str("&f_spf=&f_spt=&f_sfl=on&f_sfu=on&f_sft=on");
        url
    }

    pub fn torrent_list_url(&self, page: u32, filter: &TorrentListFilter) -> String {
        let mut params = Vec::new();
        if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
            params.push(format!("search={}", urlencoding::encode(search)));
        }
        if let Some(status) = filter.status.as_deref().filter(|s| !s.is_empty()) {
            params.push(format!("s={}", urlencoding::encode(status)));
        }
        if page > 0 {
            params.push(format!("page={}", page));
        }

        let mut url = format!("https://{}/torrents.php", self.host);
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }

    pub fn torrent_page_url(&self, gallery: &GalleryRef) -> String {
        format!(
            "https://{}/gallerytorrents.php?gid={}&t={}",
            self.host, gallery.gid, gallery.token
        )
    }

    /// One page of the gallery listing.
    pub async fn gallery_page(
        &self,
        after: Option<u64>,
        expunged: bool,
    ) -> Result<Vec<GalleryListing>, FetchError> {
        let url = self.gallery_list_url(after, expunged);
        let body = self.get("gallery_list", &url).await?;
        Ok(GalleryListParser.parse(&body))
    }

    /// One page of the torrent listing.
    pub async fn torrent_list_page(
        &self,
        page: u32,
        filter: &TorrentListFilter,
    ) -> Result<Vec<TorrentListing>, FetchError> {
        let url = self.torrent_list_url(page, filter);
        let body = self.get("torrent_list", &url).await?;
        Ok(TorrentListParser.parse(&body))
    }

    /// A gallery's torrent page, classified.
    pub async fn torrent_page(&self, gallery: &GalleryRef) -> Result<TorrentPage, FetchError> {
        let url = self.torrent_page_url(gallery);
        let body = self.get("torrent_page", &url).await?;
        Ok(TorrentPageParser.parse(&body))
    }

    /// Metadata for a batch of galleries via the JSON API.
    pub async fn metadata(&self, refs: &[GalleryRef]) -> Result<Vec<GalleryMetadata>, FetchError> {
        let gidlist: Vec<serde_json::Value> =
            refs.iter().map(|r| json!([r.gid, r.token])).collect();
        let request = json!({
            "method": "gdata",
            "gidlist": gidlist,
            "namespace": 1,
        });

        let result = self.fetcher.post_json(&self.api_url, &request).await;
        record_request("metadata", &result);
        let body = result?;

        let response: MetadataResponse = serde_json::from_str(&body).map_err(|e| {
            FetchError::Decode(format!(
                "{} (response body: {})",
                e,
                preview(&body, 500)
            ))
        })?;
        if let Some(error) = response.error {
            return Err(FetchError::Decode(format!("metadata API error: {}", error)));
        }

        debug!(
            requested = refs.len(),
            received = response.gmetadata.len(),
            "Fetched gallery metadata"
        );
        Ok(response.gmetadata)
    }

    async fn get(&self, endpoint: &str, url: &str) -> Result<String, FetchError> {
        let result = self.fetcher.get(url).await;
        record_request(endpoint, &result);
        result
    }
}

fn record_request<T>(endpoint: &str, result: &Result<T, FetchError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(FetchError::Banned(_)) => "banned",
        Err(FetchError::Status { .. }) => "status",
        Err(_) => "error",
    };
    metrics::UPSTREAM_REQUESTS
        .with_label_values(&[endpoint, outcome])
        .inc();
}
