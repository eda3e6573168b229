use once_cell::sync::Lazy;
use regex_lite::Regex;
use tracing::warn;

use super::PageParser;
use crate::store::TorrentRecord;

const UNAVAILABLE_BANNER: &str = "This gallery is currently unavailable";
const NOT_FOUND_BANNER: &str = "Gallery not found";

static ANNOUNCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d+)/announce").expect("announce pattern"));

static TORRENT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"name="gtid"\s+value="(\d+)""#).expect("torrent id pattern"));

// Labels are followed by any mix of whitespace and tags before the value.
static POSTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Posted:(?:\s|<[^>]*>)*(\d{4}-\d{2}-\d{2} \d{2}:\d{2})").expect("posted pattern")
});

static SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Size:(?:\s|<[^>]*>)*([\d.]+ ?[KMGTP]?i?B)").expect("size pattern")
});

static UPLOADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Uploader:(?:\s|<[^>]*>)*([^<\s]+)").expect("uploader pattern")
});

static HASHED_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9a-f]{40})\.torrent[^>]*>([^<]*)</a>").expect("torrent link pattern")
});

static EXPUNGED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"value="Expunged"[^>]*>(?:\s|&nbsp;)*([^<]*)"#).expect("expunged pattern")
});

/// What a gallery's torrent page says about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentPage {
    /// The gallery was taken down.
    Unavailable,
    /// The upstream does not (yet) know the gallery.
    NotFound,
    /// Regular page. `root_gid` comes from the tracker announce URL and is
    /// `None` when the page carries no torrents at all.
    Listed {
        root_gid: Option<u64>,
        torrents: Vec<TorrentRecord>,
    },
}

/// Parses `gallerytorrents.php` pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct TorrentPageParser;

impl PageParser for TorrentPageParser {
    type Output = TorrentPage;

    fn parse(&self, body: &str) -> TorrentPage {
        if body.contains(UNAVAILABLE_BANNER) {
            return TorrentPage::Unavailable;
        }
        if body.contains(NOT_FOUND_BANNER) {
            return TorrentPage::NotFound;
        }

        let root_gid = ANNOUNCE
            .captures(body)
            .and_then(|caps| caps[1].parse::<u64>().ok());

        // One block per torrent, from its id marker to the next one.
        let starts: Vec<(usize, &str)> = TORRENT_ID
            .captures_iter(body)
            .filter_map(|caps| Some((caps.get(0)?.start(), caps.get(1)?.as_str())))
            .collect();

        let mut torrents = Vec::with_capacity(starts.len());
        for (idx, (start, raw_id)) in starts.iter().enumerate() {
            let end = starts.get(idx + 1).map(|(s, _)| *s).unwrap_or(body.len());
            match parse_block(raw_id, &body[*start..end]) {
                Some(torrent) => torrents.push(torrent),
                None => warn!(torrent_id = *raw_id, "Skipping unparseable torrent block"),
            }
        }

        TorrentPage::Listed { root_gid, torrents }
    }
}

fn parse_block(raw_id: &str, block: &str) -> Option<TorrentRecord> {
    let id = raw_id.parse::<u64>().ok()?;
    let capture = |re: &Regex| {
        re.captures(block)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    };

    let (hash, name, expunged) = if let Some(caps) = HASHED_LINK.captures(block) {
        (Some(caps[1].to_string()), caps[2].trim().to_string(), false)
    } else if let Some(caps) = EXPUNGED.captures(block) {
        (None, caps[1].trim().to_string(), true)
    } else {
        return None;
    };

    Some(TorrentRecord {
        id,
        name,
        hash,
        added_at: capture(&POSTED),
        size_text: capture(&SIZE),
        uploader: capture(&UPLOADER).unwrap_or_default(),
        expunged,
    })
}
