//! Parsers for the upstream's HTML pages.
//!
//! Page shapes are owned by the upstream and change without notice, so every
//! parser is lenient: a row that does not match is logged and skipped instead
//! of failing the whole page.

mod gallery_list;
mod torrent_list;
mod torrent_page;

pub use gallery_list::{GalleryListParser, GalleryListing};
pub use torrent_list::{TorrentListParser, TorrentListing};
pub use torrent_page::{TorrentPage, TorrentPageParser};

/// Extracts structured data from one kind of page.
pub trait PageParser {
    type Output;

    fn parse(&self, body: &str) -> Self::Output;
}
