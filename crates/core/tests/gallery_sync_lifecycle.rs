//! Gallery sync, resync and manual fetch integration tests.
//!
//! These run the workflows end to end against a scripted upstream and a
//! SQLite store on disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use ehdb_core::crawler::{
    GallerySyncOptions, ManualFetch, Resync, ResyncOptions, RetryError, RetryPolicy,
};
use ehdb_core::testing::{fixtures, MockFetcher, MockResponse, RecordedRequest};
use ehdb_core::{GallerySync, GalleryStore, SqliteGalleryStore, SyncError, SyncSettings};

/// Test helper wiring a mock upstream to an on-disk store.
struct TestHarness {
    fetcher: Arc<MockFetcher>,
    store: Arc<SqliteGalleryStore>,
    settings: SyncSettings,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("ehdb.sqlite");
        let store = Arc::new(SqliteGalleryStore::new(&db_path).expect("Failed to create store"));

        // No pacing in tests
        let settings = SyncSettings {
            page_delay: Duration::ZERO,
            api_delay: Duration::ZERO,
            torrent_delay: Duration::ZERO,
            backfill_delay: Duration::ZERO,
            ..SyncSettings::default()
        };

        Self {
            fetcher: Arc::new(MockFetcher::new()),
            store,
            settings,
            _temp_dir: temp_dir,
        }
    }

    fn gallery_sync(&self) -> GallerySync {
        GallerySync::new(
            fixtures::client(self.fetcher.clone()),
            self.store.clone(),
            self.settings.clone(),
        )
    }

    /// Serve one listing page per sweep (then empty pages) and metadata for
    /// every gid that appears on either sweep.
    async fn serve_listing(&self, regular: Vec<(u64, i64)>, expunged: Vec<(u64, i64)>) {
        let posted: HashMap<u64, i64> = regular.iter().chain(expunged.iter()).copied().collect();
        self.fetcher
            .set_handler(move |request| {
                if request.url.contains("api.php") {
                    return Some(MockResponse::Body(metadata_for(request, &posted)));
                }
                let rows = if !request.url.contains("next=&") {
                    Vec::new()
                } else if request.url.contains("f_sh=on") {
                    expunged.clone()
                } else {
                    regular.clone()
                };
                Some(MockResponse::Body(fixtures::gallery_list_page(&rows)))
            })
            .await;
    }
}

fn requested_gids(request: &RecordedRequest) -> Vec<u64> {
    request
        .body
        .as_ref()
        .and_then(|body| body["gidlist"].as_array().cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|pair| pair[0].as_u64())
        .collect()
}

fn metadata_for(request: &RecordedRequest, posted: &HashMap<u64, i64>) -> String {
    let entries: Vec<_> = requested_gids(request)
        .into_iter()
        .map(|gid| match posted.get(&gid) {
            Some(posted) => fixtures::metadata(gid, *posted),
            None => fixtures::metadata_error(gid),
        })
        .collect();
    fixtures::metadata_response(&entries)
}

#[tokio::test]
async fn test_first_sync_imports_both_sweeps() {
    let harness = TestHarness::new();
    harness
        .serve_listing(
            vec![(3, 3000), (2, 2000), (1, 1000)],
            vec![(4, 2500), (2, 2000)],
        )
        .await;

    let summary = harness
        .gallery_sync()
        .run(&GallerySyncOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.high_water_mark, 0);
    assert_eq!(summary.listed, 4);
    assert_eq!(summary.fetched, 4);
    assert_eq!(summary.import.inserted, 4);
    assert_eq!(harness.store.last_posted().unwrap(), Some(3000));
    assert!(harness.store.get_gallery(4).unwrap().is_some());

    // Each sweep reads its page and then an empty one
    assert_eq!(harness.fetcher.request_count("f_sh=on").await, 2);
    assert_eq!(harness.fetcher.request_count("next=").await, 4);
    assert_eq!(harness.fetcher.request_count("api.php").await, 1);

    let stats = harness.store.category_stats().unwrap();
    assert_eq!(stats[0].total, 4);
}

#[tokio::test]
async fn test_second_sync_stops_at_high_water_mark() {
    let harness = TestHarness::new();
    harness
        .serve_listing(vec![(3, 3000), (2, 2000), (1, 1000)], vec![])
        .await;
    let cancel = CancellationToken::new();
    harness
        .gallery_sync()
        .run(&GallerySyncOptions::default(), &cancel)
        .await
        .unwrap();
    let requests_before = harness.fetcher.requests().await.len();

    harness
        .serve_listing(vec![(5, 5000), (3, 3000), (2, 2000)], vec![(4, 2500)])
        .await;
    let summary = harness
        .gallery_sync()
        .run(&GallerySyncOptions::default(), &cancel)
        .await
        .unwrap();

    assert_eq!(summary.high_water_mark, 3000);
    assert_eq!(summary.listed, 1);
    assert_eq!(summary.import.inserted, 1);
    assert!(harness.store.get_gallery(4).unwrap().is_none());
    assert_eq!(harness.store.last_posted().unwrap(), Some(5000));

    // Both sweeps hit the mark on their first page
    let requests = harness.fetcher.requests().await;
    let listing_requests = requests[requests_before..]
        .iter()
        .filter(|r| r.url.contains("next="))
        .count();
    assert_eq!(listing_requests, 2);
}

#[tokio::test]
async fn test_offset_sync_forces_updates() {
    let harness = TestHarness::new();
    harness.serve_listing(vec![(2, 7200), (1, 3600)], vec![]).await;
    let cancel = CancellationToken::new();
    harness
        .gallery_sync()
        .run(&GallerySyncOptions::default(), &cancel)
        .await
        .unwrap();

    let options = GallerySyncOptions {
        offset_hours: 1,
        page_limit: None,
    };
    let summary = harness.gallery_sync().run(&options, &cancel).await.unwrap();

    assert_eq!(summary.high_water_mark, 3600);
    assert_eq!(summary.listed, 1);
    assert_eq!(summary.import.updated, 1);
    assert_eq!(summary.import.unchanged, 0);
}

#[tokio::test]
async fn test_page_limit_ignores_high_water_mark() {
    let harness = TestHarness::new();
    harness.serve_listing(vec![(2, 2000), (1, 1000)], vec![]).await;
    let cancel = CancellationToken::new();
    harness
        .gallery_sync()
        .run(&GallerySyncOptions::default(), &cancel)
        .await
        .unwrap();

    let options = GallerySyncOptions {
        offset_hours: 0,
        page_limit: Some(1),
    };
    let summary = harness.gallery_sync().run(&options, &cancel).await.unwrap();

    assert_eq!(summary.listed, 2);
    assert_eq!(summary.import.unchanged, 2);
}

#[tokio::test(start_paused = true)]
async fn test_listing_failure_aborts_before_import() {
    let harness = TestHarness::new();
    harness
        .fetcher
        .set_handler(|_| Some(MockResponse::Status(503)))
        .await;

    let result = harness
        .gallery_sync()
        .run(&GallerySyncOptions::default(), &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(SyncError::Retry(RetryError::Exhausted { attempts: 3, .. }))
    ));
    assert_eq!(harness.fetcher.request_count("next=").await, 3);
    assert_eq!(harness.fetcher.request_count("api.php").await, 0);
    assert_eq!(harness.store.last_posted().unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_waits_out_ip_ban_and_continues() {
    let mut harness = TestHarness::new();
    harness.settings.retry = RetryPolicy::new(3, true);

    let bans = Arc::new(AtomicUsize::new(0));
    let posted = HashMap::from([(1, 1000)]);
    {
        let bans = bans.clone();
        harness
            .fetcher
            .set_handler(move |request| {
                if request.url.contains("api.php") {
                    // More bans than attempts: only works because ban waits are not counted
                    if bans.fetch_add(1, Ordering::SeqCst) < 4 {
                        return Some(MockResponse::Banned(
                            "Your IP address has been temporarily banned for excessive pageloads. \
                             The ban expires in 1 minute and 5 seconds"
                                .to_string(),
                        ));
                    }
                    return Some(MockResponse::Body(metadata_for(request, &posted)));
                }
                let rows = if request.url.contains("next=&") && !request.url.contains("f_sh=on") {
                    vec![(1, 1000)]
                } else {
                    vec![]
                };
                Some(MockResponse::Body(fixtures::gallery_list_page(&rows)))
            })
            .await;
    }

    let started = tokio::time::Instant::now();
    let summary = harness
        .gallery_sync()
        .run(&GallerySyncOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.import.inserted, 1);
    assert_eq!(bans.load(Ordering::SeqCst), 5);
    // Four waits of 65s plus the 10s margin each
    assert!(started.elapsed() >= Duration::from_secs(4 * 75));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_metadata_retry() {
    let harness = TestHarness::new();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        harness
            .fetcher
            .set_handler(move |request| {
                if request.url.contains("api.php") {
                    cancel.cancel();
                    return Some(MockResponse::Status(502));
                }
                let rows = if request.url.contains("next=&") {
                    vec![(1, 1000)]
                } else {
                    vec![]
                };
                Some(MockResponse::Body(fixtures::gallery_list_page(&rows)))
            })
            .await;
    }

    let result = harness
        .gallery_sync()
        .run(&GallerySyncOptions::default(), &cancel)
        .await;

    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert_eq!(harness.fetcher.request_count("api.php").await, 1);
    assert!(harness.store.get_gallery(1).unwrap().is_none());
}

#[tokio::test]
async fn test_cancelled_before_start_makes_no_requests() {
    let harness = TestHarness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = harness
        .gallery_sync()
        .run(&GallerySyncOptions::default(), &cancel)
        .await;

    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert!(harness.fetcher.requests().await.is_empty());
}

#[tokio::test]
async fn test_resync_refreshes_recent_galleries_with_force() {
    let harness = TestHarness::new();
    let now = Utc::now().timestamp();
    harness
        .store
        .insert_gallery(&fixtures::record(1, now - 3600))
        .unwrap();
    harness
        .store
        .insert_gallery(&fixtures::record(2, now - 3 * 86_400))
        .unwrap();

    harness
        .fetcher
        .set_handler(move |request| {
            let entries: Vec<_> = requested_gids(request)
                .into_iter()
                .map(|gid| {
                    let mut entry = fixtures::metadata(gid, now - 3600);
                    entry.title = "Refreshed".to_string();
                    entry
                })
                .collect();
            Some(MockResponse::Body(fixtures::metadata_response(&entries)))
        })
        .await;

    let resync = Resync::new(
        fixtures::client(harness.fetcher.clone()),
        harness.store.clone(),
        harness.settings.clone(),
    );
    let summary = resync
        .run(ResyncOptions { hours: 24 }, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.selected, 1);
    assert_eq!(summary.import.updated, 1);
    assert_eq!(harness.store.get_gallery(1).unwrap().unwrap().title, "Refreshed");
    assert_ne!(harness.store.get_gallery(2).unwrap().unwrap().title, "Refreshed");

    let requests = harness.fetcher.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requested_gids(&requests[0]), vec![1]);
}

#[tokio::test]
async fn test_manual_fetch_overwrites_and_counts_invalid_inputs() {
    let harness = TestHarness::new();
    harness.store.insert_gallery(&fixtures::record(5, 5000)).unwrap();

    let posted = HashMap::from([(5, 4000), (6, 6000)]);
    harness
        .fetcher
        .set_handler(move |request| Some(MockResponse::Body(metadata_for(request, &posted))))
        .await;

    let fetch = ManualFetch::new(
        fixtures::client(harness.fetcher.clone()),
        harness.store.clone(),
        harness.settings.clone(),
    );
    let inputs = vec![
        format!("https://e-hentai.org/g/5/{}/", fixtures::token(5)),
        format!("6/{}", fixtures::token(6)),
        "not a gallery".to_string(),
    ];
    let summary = fetch.run(&inputs, &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.selected, 2);
    assert_eq!(summary.invalid_inputs, 1);
    assert_eq!(summary.import.inserted, 1);
    assert_eq!(summary.import.updated, 1);
    // Older posted date still overwrites
    let gallery = harness.store.get_gallery(5).unwrap().unwrap();
    assert_eq!(gallery.posted.timestamp(), 4000);
}

#[tokio::test]
async fn test_manual_fetch_without_valid_input_fails() {
    let harness = TestHarness::new();
    let fetch = ManualFetch::new(
        fixtures::client(harness.fetcher.clone()),
        harness.store.clone(),
        harness.settings.clone(),
    );

    let result = fetch.run(&["nope"], &CancellationToken::new()).await;

    assert!(matches!(result, Err(SyncError::InvalidInput(_))));
    assert!(harness.fetcher.requests().await.is_empty());
}
