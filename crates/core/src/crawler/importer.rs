//! Staleness-guarded import of gallery metadata.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::normalize::normalize_tags;
use super::ImportSummary;
use crate::metrics;
use crate::store::{GalleryRecord, GalleryStore, StoreError};
use crate::upstream::GalleryMetadata;

const PROGRESS_EVERY: usize = 1000;

/// Writes metadata into the store.
///
/// New galleries are inserted. Existing ones are only overwritten when the
/// upstream copy is newer, unless the import is forced.
pub struct Importer {
    store: Arc<dyn GalleryStore>,
}

impl Importer {
    pub fn new(store: Arc<dyn GalleryStore>) -> Self {
        Self { store }
    }

    /// Import a metadata list.
    ///
    /// Fails only when the stored `posted` values cannot be read; every
    /// per-record problem is logged and counted.
    pub fn import(
        &self,
        metadata: &[GalleryMetadata],
        force: bool,
    ) -> Result<ImportSummary, StoreError> {
        let gids: Vec<u64> = metadata.iter().map(|m| m.gid).collect();
        let mut existing = self.store.posted_for(&gids)?;
        let mut summary = ImportSummary::default();

        for (index, entry) in metadata.iter().enumerate() {
            if index > 0 && index % PROGRESS_EVERY == 0 {
                info!(
                    processed = index,
                    total = metadata.len(),
                    imported = summary.imported(),
                    "Import progress"
                );
            }

            if let Some(error) = &entry.error {
                debug!(gid = entry.gid, error = %error, "Skipping metadata error entry");
                summary.invalid += 1;
                continue;
            }

            let record = match to_record(entry) {
                Ok(record) => record,
                Err(reason) => {
                    warn!(gid = entry.gid, reason = %reason, "Skipping invalid metadata");
                    metrics::IMPORT_SKIPPED.with_label_values(&["invalid"]).inc();
                    summary.invalid += 1;
                    continue;
                }
            };

            let operation = match existing.get(&record.gid) {
                None => "insert",
                Some(stored) if force || record.posted > *stored => "update",
                Some(_) => {
                    metrics::IMPORT_SKIPPED.with_label_values(&["unchanged"]).inc();
                    summary.unchanged += 1;
                    continue;
                }
            };

            let result = if operation == "insert" {
                self.store.insert_gallery(&record)
            } else {
                self.store.update_gallery(&record)
            };

            match result {
                Ok(()) => {
                    metrics::GALLERIES_IMPORTED
                        .with_label_values(&[operation])
                        .inc();
                    if operation == "insert" {
                        summary.inserted += 1;
                    } else {
                        summary.updated += 1;
                    }
                    existing.insert(record.gid, record.posted);
                }
                Err(e) => {
                    warn!(gid = record.gid, operation = operation, error = %e, "Failed to store gallery");
                    metrics::IMPORT_SKIPPED
                        .with_label_values(&["store_error"])
                        .inc();
                    summary.failed += 1;
                }
            }
        }

        if summary.imported() > 0 {
            if let Err(e) = self.store.refresh_stats() {
                warn!(error = %e, "Failed to refresh catalog statistics");
            }
        }

        info!(
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            invalid = summary.invalid,
            failed = summary.failed,
            force = force,
            "Import finished"
        );
        Ok(summary)
    }
}

/// Convert an API entry into a storable gallery.
///
/// `posted` must parse; the other numeric strings fall back to zero with a
/// warning.
pub fn to_record(metadata: &GalleryMetadata) -> Result<GalleryRecord, String> {
    let posted = metadata
        .posted
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid posted {:?}: {}", metadata.posted, e))?;

    Ok(GalleryRecord {
        gid: metadata.gid,
        token: metadata.token.clone(),
        archiver_key: metadata.archiver_key.clone(),
        title: metadata.title.clone(),
        title_jpn: metadata.title_jpn.clone(),
        category: metadata.category.clone(),
        thumb: metadata.thumb.clone(),
        uploader: metadata.uploader.clone(),
        posted,
        filecount: numeric_field(metadata.gid, "filecount", &metadata.filecount),
        filesize: metadata.filesize,
        expunged: metadata.expunged,
        rating: numeric_field(metadata.gid, "rating", &metadata.rating),
        torrentcount: numeric_field(metadata.gid, "torrentcount", &metadata.torrentcount),
        tags: normalize_tags(&metadata.tags),
    })
}

fn numeric_field<T>(gid: u64, field: &'static str, raw: &str) -> T
where
    T: std::str::FromStr + Default,
{
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(gid = gid, field = field, raw = raw, "Invalid numeric field, using 0");
            T::default()
        }
    }
}
