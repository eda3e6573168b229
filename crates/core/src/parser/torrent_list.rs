use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::PageParser;
use crate::store::GalleryRef;

static TORRENT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"gallerytorrents\.php\?gid=(\d+)&(?:amp;)?t=([0-9a-f]{10})&(?:amp;)?gtid=(\d+)""#)
        .expect("torrent link pattern")
});

/// A torrent as shown on the torrent listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentListing {
    /// Torrent id; grows monotonically upstream.
    pub gtid: u64,
    pub gid: u64,
    pub token: String,
}

impl TorrentListing {
    pub fn gallery_ref(&self) -> GalleryRef {
        GalleryRef::new(self.gid, self.token.clone())
    }
}

/// Parses the torrent listing (newest first).
#[derive(Debug, Default, Clone, Copy)]
pub struct TorrentListParser;

impl PageParser for TorrentListParser {
    type Output = Vec<TorrentListing>;

    fn parse(&self, body: &str) -> Vec<TorrentListing> {
        let mut seen = HashSet::new();
        TORRENT_LINK
            .captures_iter(body)
            .filter_map(|caps| {
                Some(TorrentListing {
                    gid: caps[1].parse().ok()?,
                    token: caps[2].to_string(),
                    gtid: caps[3].parse().ok()?,
                })
            })
            .filter(|listing| seen.insert(listing.gtid))
            .collect()
    }
}
