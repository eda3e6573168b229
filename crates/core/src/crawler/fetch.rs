use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::batcher::MetadataBatcher;
use super::importer::Importer;
use super::{finish_run, RefreshSummary, SyncError, SyncSettings};
use crate::store::{GalleryRef, GalleryStore};
use crate::upstream::EhClient;

static GALLERY_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)[/,_\s]([0-9a-f]{10})").expect("gallery id pattern"));

/// Extract gallery references from free-form caller input.
///
/// Accepts `gid/token`, `gid,token`, `gid_token`, `gid token`, the same with
/// a leading `g/` or `/g/`, and full gallery URLs. Returns the unique
/// references in input order and the number of inputs that had none.
pub fn parse_gallery_refs<S: AsRef<str>>(inputs: &[S]) -> (Vec<GalleryRef>, usize) {
    let mut refs = Vec::new();
    let mut seen = HashSet::new();
    let mut invalid = 0;

    for input in inputs {
        let raw = input.as_ref().trim();
        if raw.is_empty() {
            continue;
        }
        let stripped = raw
            .strip_prefix("/g/")
            .or_else(|| raw.strip_prefix("g/"))
            .unwrap_or(raw);

        let parsed = GALLERY_ID
            .captures(stripped)
            .and_then(|caps| Some(GalleryRef::new(caps[1].parse().ok()?, &caps[2])));
        match parsed {
            Some(gallery) => {
                if seen.insert(gallery.gid) {
                    refs.push(gallery);
                }
            }
            None => {
                warn!(input = raw, "Ignoring input without a gallery id and token");
                invalid += 1;
            }
        }
    }

    (refs, invalid)
}

/// Imports galleries named by the caller, overwriting what is stored.
pub struct ManualFetch {
    client: EhClient,
    store: Arc<dyn GalleryStore>,
    settings: SyncSettings,
}

impl ManualFetch {
    pub fn new(client: EhClient, store: Arc<dyn GalleryStore>, settings: SyncSettings) -> Self {
        Self {
            client,
            store,
            settings,
        }
    }

    pub async fn run<S: AsRef<str>>(
        &self,
        inputs: &[S],
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary, SyncError> {
        let started = Instant::now();
        let result = self.fetch(inputs, cancel).await;
        finish_run("manual_fetch", started, &result);
        result
    }

    async fn fetch<S: AsRef<str>>(
        &self,
        inputs: &[S],
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary, SyncError> {
        let (refs, invalid_inputs) = parse_gallery_refs(inputs);
        if refs.is_empty() {
            return Err(SyncError::InvalidInput(
                "no valid gallery id/token pairs given".to_string(),
            ));
        }
        info!(galleries = refs.len(), invalid = invalid_inputs, "Starting manual fetch");

        let batcher = MetadataBatcher::new(
            self.client.clone(),
            self.settings.retry.clone(),
            self.settings.api_delay,
        );
        let metadata = batcher.fetch(&refs, cancel).await?;
        let import = Importer::new(self.store.clone()).import(&metadata, true)?;

        Ok(RefreshSummary {
            selected: refs.len(),
            invalid_inputs,
            fetched: metadata.len(),
            import,
        })
    }
}
