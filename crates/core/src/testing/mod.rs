//! Testing utilities: a scripted upstream, a fault-injecting store and
//! fixture builders.
//!
//! # Example
//!
//! ```rust,ignore
//! use ehdb_core::testing::{fixtures, MockFetcher};
//!
//! let fetcher = Arc::new(MockFetcher::new());
//! fetcher
//!     .route("?next=", fixtures::gallery_list_page(&[(2, 2000), (1, 1000)]))
//!     .await;
//! fetcher
//!     .route("api.php", fixtures::metadata_response(&[fixtures::metadata(2, 2000)]))
//!     .await;
//!
//! let client = fixtures::client(fetcher.clone());
//! ```

mod flaky_store;
mod mock_fetcher;

pub use flaky_store::FlakyStore;
pub use mock_fetcher::{MockFetcher, MockResponse, RecordedRequest};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use chrono::DateTime;

    use super::MockFetcher;
    use crate::store::{GalleryRecord, TorrentRecord};
    use crate::upstream::{EhClient, GalleryMetadata};

    pub const HOST: &str = "e-hentai.org";
    pub const API_URL: &str = "https://api.e-hentai.org/api.php";

    /// Deterministic 10-hex-digit token for a gid.
    pub fn token(gid: u64) -> String {
        format!("{:010x}", gid)
    }

    /// Client talking to the mock.
    pub fn client(fetcher: Arc<MockFetcher>) -> EhClient {
        EhClient::new(fetcher, HOST, API_URL)
    }

    /// A valid metadata entry.
    pub fn metadata(gid: u64, posted: i64) -> GalleryMetadata {
        GalleryMetadata {
            gid,
            token: token(gid),
            archiver_key: format!("{}--archiver", gid),
            title: format!("Gallery {}", gid),
            title_jpn: String::new(),
            category: "Doujinshi".to_string(),
            thumb: format!("https://ehgt.org/t/{}.jpg", gid),
            uploader: Some("uploader".to_string()),
            posted: posted.to_string(),
            filecount: "20".to_string(),
            filesize: 1_048_576,
            expunged: false,
            rating: "4.50".to_string(),
            torrentcount: "1".to_string(),
            tags: vec!["language:english".to_string(), "f:glasses".to_string()],
            error: None,
        }
    }

    /// An entry the upstream rejected.
    pub fn metadata_error(gid: u64) -> GalleryMetadata {
        GalleryMetadata {
            gid,
            error: Some("Key missing, or incorrect key provided.".to_string()),
            ..Default::default()
        }
    }

    /// Metadata API response body.
    pub fn metadata_response(entries: &[GalleryMetadata]) -> String {
        serde_json::json!({ "gmetadata": entries }).to_string()
    }

    /// A stored gallery row.
    pub fn record(gid: u64, posted: i64) -> GalleryRecord {
        GalleryRecord {
            gid,
            token: token(gid),
            archiver_key: String::new(),
            title: format!("Gallery {}", gid),
            title_jpn: String::new(),
            category: "Doujinshi".to_string(),
            thumb: String::new(),
            uploader: Some("uploader".to_string()),
            posted,
            filecount: 20,
            filesize: 1_048_576,
            expunged: false,
            rating: 4.5,
            torrentcount: 0,
            tags: vec!["language:english".to_string()],
        }
    }

    /// A torrent; expunged when it has no hash.
    pub fn torrent(id: u64, hash: Option<&str>) -> TorrentRecord {
        TorrentRecord {
            id,
            name: format!("Torrent {}", id),
            hash: hash.map(str::to_string),
            added_at: Some("2023-01-01 00:00".to_string()),
            size_text: Some("10.5 MiB".to_string()),
            uploader: "seeder".to_string(),
            expunged: hash.is_none(),
        }
    }

    /// Front-page listing with `(gid, posted)` rows in the given order.
    pub fn gallery_list_page(rows: &[(u64, i64)]) -> String {
        let mut body = String::from("<table class=\"itg gltc\">\n");
        for (gid, posted) in rows {
            let posted = DateTime::from_timestamp(*posted, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            let token = token(*gid);
            body.push_str(&format!(
                r#"<tr><td class="gl2c"><div onclick="popUp('https://{HOST}/gallerypopups.php?gid={gid}&amp;t={token}&amp;act=addfav',675,415)" id="posted_{gid}">{posted}</div></td><td class="gl3c glname"><a href="https://{HOST}/g/{gid}/{token}/">Gallery {gid}</a></td></tr>"#
            ));
            body.push('\n');
        }
        body.push_str("</table>");
        body
    }

    /// Torrent listing with `(gtid, gid)` rows in the given order.
    pub fn torrent_list_page(rows: &[(u64, u64)]) -> String {
        let mut body = String::from("<table class=\"itg\">\n");
        for (gtid, gid) in rows {
            let token = token(*gid);
            body.push_str(&format!(
                r#"<tr><td><a href="https://{HOST}/gallerytorrents.php?gid={gid}&amp;t={token}&amp;gtid={gtid}">Torrent {gtid}</a></td></tr>"#
            ));
            body.push('\n');
        }
        body.push_str("</table>");
        body
    }

    /// A gallery's torrent page listing `torrents` under `root_gid`.
    pub fn torrent_page(root_gid: u64, torrents: &[TorrentRecord]) -> String {
        let mut body = format!(
            "<p>Personalized torrent: https://ehtracker.org/{}/announce</p>\n",
            root_gid
        );
        for torrent in torrents {
            let link = match &torrent.hash {
                Some(hash) => format!(
                    r#"<a href="https://ehtracker.org/get/{root_gid}/{hash}.torrent?p=x" onclick="return false">{}</a>"#,
                    torrent.name
                ),
                None => format!(
                    r#"<input type="submit" value="Expunged" disabled="disabled" /> &nbsp; {}"#,
                    torrent.name
                ),
            };
            body.push_str(&format!(
                r#"<form method="post" action="gallerytorrents.php?gid={root_gid}">
<input type="hidden" name="gtid" value="{id}" />
<table>
<tr><td><span class="halp">Posted:</span> <span>{posted}</span></td><td><span class="halp">Size:</span> {size}</td></tr>
<tr><td colspan="5"><span class="halp">Uploader:</span> {uploader}</td></tr>
<tr><td colspan="5">{link}</td></tr>
</table>
</form>
"#,
                id = torrent.id,
                posted = torrent.added_at.as_deref().unwrap_or(""),
                size = torrent.size_text.as_deref().unwrap_or(""),
                uploader = torrent.uploader,
            ));
        }
        body
    }

    /// Torrent page of a gallery that was taken down.
    pub fn unavailable_page() -> String {
        "<p>This gallery is currently unavailable.</p>".to_string()
    }

    /// Torrent page of a gallery the upstream does not know.
    pub fn not_found_page() -> String {
        "<p>Gallery not found. If you just uploaded it, wait a moment.</p>".to_string()
    }
}
