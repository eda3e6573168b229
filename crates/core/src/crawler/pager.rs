//! High-water-mark pagination over newest-first listings.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::retry::{pause, retry, RetryPolicy};
use super::SyncError;
use crate::parser::{GalleryListing, TorrentListing};

/// An item of a newest-first listing.
pub trait ListingItem {
    /// Monotonic key compared against the high-water mark.
    fn ordering_key(&self) -> i64;

    /// Identifier the next page starts after.
    fn cursor_id(&self) -> u64;
}

impl ListingItem for GalleryListing {
    fn ordering_key(&self) -> i64 {
        self.posted
    }

    fn cursor_id(&self) -> u64 {
        self.gid
    }
}

impl ListingItem for TorrentListing {
    fn ordering_key(&self) -> i64 {
        self.gtid as i64
    }

    fn cursor_id(&self) -> u64 {
        self.gtid
    }
}

/// Position of the page to fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// Zero-based page index.
    pub page: u32,
    /// Cursor id of the last item on the previous page.
    pub after: Option<u64>,
}

/// Walks a listing until it reaches already-known items.
pub struct ListPager<'a> {
    retry: &'a RetryPolicy,
    cancel: &'a CancellationToken,
    page_delay: Duration,
}

impl<'a> ListPager<'a> {
    pub fn new(retry: &'a RetryPolicy, cancel: &'a CancellationToken, page_delay: Duration) -> Self {
        Self {
            retry,
            cancel,
            page_delay,
        }
    }

    /// Collect every item newer than `high_water_mark`.
    ///
    /// The first item at or below the mark ends the walk, as does an empty
    /// page. With `page_limit`, the mark is ignored and every item on the
    /// first `page_limit` pages is returned. Each page fetch goes through the
    /// retry loop; a page that still fails aborts the walk.
    pub async fn collect<T, E, F, Fut>(
        &self,
        operation: &str,
        high_water_mark: i64,
        page_limit: Option<u32>,
        mut fetch_page: F,
    ) -> Result<Vec<T>, SyncError>
    where
        T: ListingItem,
        F: FnMut(PageCursor) -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut items = Vec::new();
        let mut cursor = PageCursor::default();

        loop {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if page_limit.is_some_and(|limit| cursor.page >= limit) {
                break;
            }

            let page = retry(self.retry, self.cancel, operation, || fetch_page(cursor)).await?;
            let Some(last_cursor) = page.last().map(|item| item.cursor_id()) else {
                debug!(operation = operation, page = cursor.page, "Empty page, listing exhausted");
                break;
            };

            let mut reached_mark = false;
            for item in page {
                if page_limit.is_none() && item.ordering_key() <= high_water_mark {
                    reached_mark = true;
                    break;
                }
                items.push(item);
            }
            if reached_mark {
                debug!(operation = operation, page = cursor.page, "Reached high-water mark");
                break;
            }

            cursor = PageCursor {
                page: cursor.page + 1,
                after: Some(last_cursor),
            };
            pause(self.cancel, self.page_delay).await?;
        }

        info!(
            operation = operation,
            pages = cursor.page + 1,
            items = items.len(),
            "Listing walk finished"
        );
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct PageError(String);

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Item(i64);

    impl ListingItem for Item {
        fn ordering_key(&self) -> i64 {
            self.0
        }

        fn cursor_id(&self) -> u64 {
            self.0 as u64
        }
    }

    /// Newest-first pages of keys 100 down to 1, `per_page` per page.
    fn source(per_page: usize) -> Vec<Vec<Item>> {
        let keys: Vec<Item> = (1..=100).rev().map(Item).collect();
        keys.chunks(per_page).map(|c| c.to_vec()).collect()
    }

    async fn run(
        pages: Vec<Vec<Item>>,
        mark: i64,
        limit: Option<u32>,
    ) -> (Result<Vec<Item>, SyncError>, Vec<PageCursor>) {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let pager = ListPager::new(&policy, &cancel, Duration::from_secs(1));
        let requests = Mutex::new(Vec::new());

        let result = pager
            .collect("test", mark, limit, |cursor| {
                requests.lock().unwrap().push(cursor);
                let page = pages.get(cursor.page as usize).cloned().unwrap_or_default();
                async move { Ok::<_, PageError>(page) }
            })
            .await;
        (result, requests.into_inner().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_high_water_mark() {
        // Mark 55 sits on the fifth page (keys 60..=51)
        let (result, requests) = run(source(10), 55, None).await;
        let items = result.unwrap();

        assert_eq!(requests.len(), 5);
        assert_eq!(items.len(), 45);
        assert_eq!(items.first(), Some(&Item(100)));
        assert_eq!(items.last(), Some(&Item(56)));
        assert_eq!(requests[1].after, Some(91));
        assert_eq!(requests[4].page, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_at_fifth_item_returns_first_four() {
        let (result, requests) = run(source(2), 96, None).await;
        assert_eq!(
            result.unwrap(),
            vec![Item(100), Item(99), Item(98), Item(97)]
        );
        // Item 5 is the first entry of the third page
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_on_page_boundary_needs_next_page() {
        // Page three opens with key 80, one above the mark
        let (result, requests) = run(source(10), 79, None).await;
        assert_eq!(result.unwrap().len(), 21);
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_page_ends_walk() {
        let (result, requests) = run(source(40), 0, None).await;
        assert_eq!(result.unwrap().len(), 100);
        // Three full pages and one empty page
        assert_eq!(requests.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_limit_ignores_mark() {
        let (result, requests) = run(source(10), 95, Some(2)).await;
        let items = result.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(items.len(), 20);
        assert_eq!(items.last(), Some(&Item(81)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_page_aborts_walk() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let pager = ListPager::new(&policy, &cancel, Duration::ZERO);
        let mut calls = 0;

        let result = pager
            .collect("test", 0, None, |_cursor| {
                calls += 1;
                async { Err::<Vec<Item>, _>(PageError("503".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Retry(_))));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pager = ListPager::new(&policy, &cancel, Duration::ZERO);

        let result = pager
            .collect("test", 0, None, |_cursor| async {
                Ok::<_, PageError>(vec![Item(1)])
            })
            .await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }
}
