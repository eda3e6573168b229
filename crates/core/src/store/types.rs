use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier pair the upstream needs to address a gallery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GalleryRef {
    pub gid: u64,
    pub token: String,
}

impl GalleryRef {
    pub fn new(gid: u64, token: impl Into<String>) -> Self {
        Self {
            gid,
            token: token.into(),
        }
    }
}

/// Gallery fields written by the importer.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryRecord {
    pub gid: u64,
    pub token: String,
    pub archiver_key: String,
    pub title: String,
    pub title_jpn: String,
    pub category: String,
    pub thumb: String,
    pub uploader: Option<String>,
    /// Unix seconds.
    pub posted: i64,
    pub filecount: u32,
    pub filesize: u64,
    pub expunged: bool,
    pub rating: f64,
    pub torrentcount: u32,
    /// Normalized `namespace:value` tags, in upstream order.
    pub tags: Vec<String>,
}

/// A stored gallery, including the flags maintained by the crawler.
#[derive(Debug, Clone, Serialize)]
pub struct Gallery {
    pub gid: u64,
    pub token: String,
    pub archiver_key: String,
    pub title: String,
    pub title_jpn: String,
    pub category: String,
    pub thumb: String,
    pub uploader: Option<String>,
    pub posted: DateTime<Utc>,
    pub filecount: u32,
    pub filesize: u64,
    pub expunged: bool,
    pub removed: bool,
    pub replaced: bool,
    pub rating: f64,
    pub torrentcount: u32,
    pub root_gid: Option<u64>,
    pub by_torrent: bool,
    pub tags: Vec<String>,
}

/// A gallery waiting for its torrent page to be crawled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingGallery {
    pub gid: u64,
    pub token: String,
    /// Unix seconds.
    pub posted: i64,
}

/// A torrent row. Stored under the root gallery of its group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TorrentRecord {
    pub id: u64,
    pub name: String,
    /// 40-char hex content hash; absent for expunged torrents.
    pub hash: Option<String>,
    /// Upstream post date text ("YYYY-MM-DD HH:MM").
    pub added_at: Option<String>,
    /// Upstream size text ("1.23 GiB").
    pub size_text: Option<String>,
    pub uploader: String,
    pub expunged: bool,
}

/// Live gallery count for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryStat {
    pub category: String,
    pub total: u64,
}
