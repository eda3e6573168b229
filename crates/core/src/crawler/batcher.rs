//! Batched metadata acquisition.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::retry::{pause, retry, RetryError, RetryPolicy};
use super::Cancelled;
use crate::metrics;
use crate::store::GalleryRef;
use crate::upstream::{EhClient, GalleryMetadata};

/// Most galleries the metadata API accepts per request.
pub const METADATA_BATCH_SIZE: usize = 25;

/// Fetches metadata for a gallery list in fixed-size batches.
///
/// A batch that keeps failing is dropped and the rest continue; entries the
/// upstream answers with an error are left out.
pub struct MetadataBatcher {
    client: EhClient,
    retry: RetryPolicy,
    delay: Duration,
}

impl MetadataBatcher {
    pub fn new(client: EhClient, retry: RetryPolicy, delay: Duration) -> Self {
        Self {
            client,
            retry,
            delay,
        }
    }

    pub async fn fetch(
        &self,
        refs: &[GalleryRef],
        cancel: &CancellationToken,
    ) -> Result<Vec<GalleryMetadata>, Cancelled> {
        let mut metadata = Vec::with_capacity(refs.len());
        let client = &self.client;

        for (index, batch) in refs.chunks(METADATA_BATCH_SIZE).enumerate() {
            if index > 0 {
                pause(cancel, self.delay).await?;
            }

            let result = retry(&self.retry, cancel, "metadata_batch", move || {
                client.metadata(batch)
            })
            .await;

            match result {
                Ok(entries) => {
                    for entry in entries {
                        if let Some(error) = &entry.error {
                            warn!(gid = entry.gid, error = %error, "Upstream rejected gallery");
                            metrics::IMPORT_SKIPPED
                                .with_label_values(&["upstream_error"])
                                .inc();
                            continue;
                        }
                        metadata.push(entry);
                    }
                }
                Err(RetryError::Cancelled) => return Err(Cancelled),
                Err(e) => {
                    warn!(
                        batch = index,
                        first_gid = batch[0].gid,
                        size = batch.len(),
                        error = %e,
                        "Dropping metadata batch"
                    );
                    metrics::BATCHES_DROPPED.inc();
                }
            }
        }

        debug!(
            requested = refs.len(),
            received = metadata.len(),
            "Metadata batches finished"
        );
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockFetcher, MockResponse};
    use std::sync::Arc;

    fn refs(count: u64) -> Vec<GalleryRef> {
        (1..=count)
            .map(|gid| GalleryRef::new(gid, fixtures::token(gid)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_of_twenty_five() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .set_handler(|request| {
                let gids: Vec<u64> = request.body.as_ref()?["gidlist"]
                    .as_array()?
                    .iter()
                    .filter_map(|pair| pair[0].as_u64())
                    .collect();
                let entries: Vec<_> = gids.iter().map(|gid| fixtures::metadata(*gid, 1000)).collect();
                Some(MockResponse::Body(fixtures::metadata_response(&entries)))
            })
            .await;
        let batcher = MetadataBatcher::new(
            fixtures::client(fetcher.clone()),
            RetryPolicy::default(),
            Duration::from_secs(1),
        );

        let metadata = batcher
            .fetch(&refs(60), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(metadata.len(), 60);
        let sizes: Vec<usize> = fetcher
            .requests()
            .await
            .iter()
            .map(|r| r.body.as_ref().unwrap()["gidlist"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![25, 25, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_dropped_and_errors_excluded() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .set_handler(|request| {
                let gidlist = request.body.as_ref()?["gidlist"].as_array()?.clone();
                let first = gidlist.first()?[0].as_u64()?;
                if first == 26 {
                    return Some(MockResponse::Status(502));
                }
                let entries: Vec<_> = gidlist
                    .iter()
                    .filter_map(|pair| pair[0].as_u64())
                    .map(|gid| {
                        if gid == 3 {
                            fixtures::metadata_error(gid)
                        } else {
                            fixtures::metadata(gid, 1000)
                        }
                    })
                    .collect();
                Some(MockResponse::Body(fixtures::metadata_response(&entries)))
            })
            .await;
        let batcher = MetadataBatcher::new(
            fixtures::client(fetcher.clone()),
            RetryPolicy::default(),
            Duration::ZERO,
        );

        let metadata = batcher
            .fetch(&refs(60), &CancellationToken::new())
            .await
            .unwrap();

        // Batch two (26..=50) dropped after three attempts; gid 3 rejected upstream
        assert_eq!(metadata.len(), 24 + 10);
        assert!(metadata.iter().all(|m| m.gid != 3 && !(26..=50).contains(&m.gid)));
        assert_eq!(fetcher.requests().await.len(), 1 + 3 + 1);
    }
}
