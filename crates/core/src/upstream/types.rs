use serde::{Deserialize, Serialize};

/// One entry of the metadata API response.
///
/// Numeric fields the upstream sends as strings stay strings here; the
/// importer parses them.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GalleryMetadata {
    pub gid: u64,
    pub token: String,
    pub archiver_key: String,
    pub title: String,
    pub title_jpn: String,
    pub category: String,
    pub thumb: String,
    pub uploader: Option<String>,
    pub posted: String,
    pub filecount: String,
    pub filesize: u64,
    pub expunged: bool,
    pub rating: String,
    pub torrentcount: String,
    pub tags: Vec<String>,
    /// Set instead of the other fields when the upstream rejects the pair.
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MetadataResponse {
    #[serde(default)]
    pub gmetadata: Vec<GalleryMetadata>,
    #[serde(default)]
    pub error: Option<String>,
}
