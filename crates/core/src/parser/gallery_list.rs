use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use tracing::warn;

use super::PageParser;
use crate::store::GalleryRef;

static GALLERY_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"gid=(\d+)&(?:amp;)?t=([0-9a-f]{10})&.*?posted_\d+[^>]*>(\d{4}-\d{2}-\d{2}\s\d{2}:\d{2})<",
    )
    .expect("gallery row pattern")
});

/// A gallery as shown on the listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryListing {
    pub gid: u64,
    pub token: String,
    /// Unix seconds, UTC.
    pub posted: i64,
}

impl GalleryListing {
    pub fn gallery_ref(&self) -> GalleryRef {
        GalleryRef::new(self.gid, self.token.clone())
    }
}

/// Parses the front-page gallery listing (newest first).
#[derive(Debug, Default, Clone, Copy)]
pub struct GalleryListParser;

impl PageParser for GalleryListParser {
    type Output = Vec<GalleryListing>;

    fn parse(&self, body: &str) -> Vec<GalleryListing> {
        let mut listings = Vec::new();
        for caps in GALLERY_ROW.captures_iter(body) {
            let Ok(gid) = caps[1].parse::<u64>() else {
                warn!(raw = &caps[1], "Skipping listing row with invalid gid");
                continue;
            };
            let posted = match parse_posted(&caps[3]) {
                Some(posted) => posted,
                None => {
                    warn!(gid = gid, posted = &caps[3], "Skipping listing row with invalid date");
                    continue;
                }
            };
            listings.push(GalleryListing {
                gid,
                token: caps[2].to_string(),
                posted,
            });
        }
        listings
    }
}

/// Parse an upstream "YYYY-MM-DD HH:MM" timestamp as UTC.
pub(crate) fn parse_posted(raw: &str) -> Option<i64> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}
