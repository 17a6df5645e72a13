//! Repeated runs against the same database

use crate::support::{mount_item, mount_listing, test_config};
use listing_harvest::crawler::crawl;
use listing_harvest::storage::{open_storage, DiscoveryCache, RecordRepository, SessionStore};
use listing_harvest::SessionStatus;
use std::path::Path;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::MockServer;

async fn mount_site(server: &MockServer) {
    mount_listing(server, 1, &[1, 2, 3], true).await;
    mount_listing(server, 2, &[4], false).await;
    for n in 1..=4 {
        mount_item(server, n).await;
    }
}

#[tokio::test]
async fn test_second_run_reuses_discovery_cache() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_site(&server).await;

    let config = test_config(&server, &dir);
    let db_path = config.output.database_path.clone();

    let (_tx, rx) = watch::channel(false);
    let first = crawl(config.clone(), "hash", rx).await.unwrap();
    assert_eq!(first.pages_walked, 2);
    assert_eq!(first.counters.new, 4);

    let (_tx, rx) = watch::channel(false);
    let second = crawl(config, "hash", rx).await.unwrap();
    assert_eq!(second.status, SessionStatus::Completed);
    assert_eq!(second.pages_walked, 0);
    assert_eq!(second.counters.found, 0);

    // Each listing page was requested by the first run only
    let listing_requests = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/search/lisbon")
        .count();
    assert_eq!(listing_requests, 2);

    let storage = open_storage(Path::new(&db_path)).unwrap();
    assert_eq!(storage.count_records("lisbon").unwrap(), 4);
    assert_eq!(storage.get_stats("lisbon").unwrap().total, 4);
    assert_eq!(storage.recent_sessions(10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_item_budget_run_is_finished_by_next_run() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_site(&server).await;

    let mut config = test_config(&server, &dir);
    let db_path = config.output.database_path.clone();

    config.crawl.max_items = Some(3);
    let (_tx, rx) = watch::channel(false);
    let first = crawl(config.clone(), "hash", rx).await.unwrap();
    assert_eq!(first.counters.found, 3);
    assert_eq!(first.counters.new, 3);

    {
        let storage = open_storage(Path::new(&db_path)).unwrap();
        assert_eq!(storage.get_stats("lisbon").unwrap().pending(), 1);
    }

    config.crawl.max_items = None;
    let (_tx, rx) = watch::channel(false);
    let second = crawl(config, "hash", rx).await.unwrap();
    assert_eq!(second.counters.found, 1);
    assert_eq!(second.counters.new, 1);

    let storage = open_storage(Path::new(&db_path)).unwrap();
    let stats = storage.get_stats("lisbon").unwrap();
    assert_eq!(stats.pending(), 0);
    assert_eq!(stats.successful, 4);
    assert_eq!(storage.count_records("lisbon").unwrap(), 4);
}

#[tokio::test]
async fn test_recrawl_after_clearing_cache_updates_records() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_site(&server).await;

    let mut config = test_config(&server, &dir);
    let db_path = config.output.database_path.clone();

    let (_tx, rx) = watch::channel(false);
    crawl(config.clone(), "hash", rx).await.unwrap();

    {
        let mut storage = open_storage(Path::new(&db_path)).unwrap();
        assert_eq!(storage.clear_cache("lisbon").unwrap(), 4);
        assert_eq!(storage.get_stats("lisbon").unwrap().total, 0);
    }

    // Stored records alone would resume discovery at page 2
    config.crawl.start_page = Some(1);
    let (_tx, rx) = watch::channel(false);
    let again = crawl(config, "hash", rx).await.unwrap();
    assert_eq!(again.pages_walked, 2);
    assert_eq!(again.counters.new, 0);
    assert_eq!(again.counters.updated, 4);

    let storage = open_storage(Path::new(&db_path)).unwrap();
    assert_eq!(storage.count_records("lisbon").unwrap(), 4);
}

#[tokio::test]
async fn test_shutdown_before_start_interrupts_run() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_site(&server).await;

    let config = test_config(&server, &dir);
    let db_path = config.output.database_path.clone();

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let summary = crawl(config, "hash", rx).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Interrupted);
    assert_eq!(summary.counters.new, 0);

    let storage = open_storage(Path::new(&db_path)).unwrap();
    let session = storage.get_session(summary.session_id).unwrap();
    assert_eq!(session.status, SessionStatus::Interrupted);
}
