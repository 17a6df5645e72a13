//! End-to-end crawls against a mock listing site

use crate::support::{item_html, item_url, mount_item, mount_listing, test_config};
use listing_harvest::config::FetchStrategyKind;
use listing_harvest::crawler::crawl;
use listing_harvest::storage::{
    open_storage, DiscoveryCache, ImageStatus, RecordRepository, SessionStore,
};
use listing_harvest::{ErrorKind, SessionStatus, UrlOutcome};
use std::collections::HashMap;
use std::path::Path;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_pooled_crawl_stores_records_images_and_failures() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, 1, &[1, 2, 3], true).await;
    mount_listing(&server, 2, &[4, 5], false).await;

    Mock::given(method("GET"))
        .and(path("/item/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(item_html(1, true))
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/1.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0x89, b'P', b'N', b'G'])
                .insert_header("content-type", "image/png"),
        )
        .mount(&server)
        .await;
    mount_item(&server, 2).await;
    mount_item(&server, 3).await;
    Mock::given(method("GET"))
        .and(path("/item/4"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/item/5"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body><p>Please verify you are human</p></body></html>")
                .insert_header("content-type", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server, &dir);
    config.crawl.download_images = true;
    let db_path = config.output.database_path.clone();
    let (_tx, rx) = watch::channel(false);

    let summary = crawl(config, "integration-hash", rx).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.pages_walked, 2);
    assert_eq!(summary.counters.found, 5);
    assert_eq!(summary.counters.new, 3);
    assert_eq!(summary.counters.failed, 2);
    assert_eq!(summary.counters.images_ok, 1);
    assert_eq!(summary.counters.images_failed, 0);

    let storage = open_storage(Path::new(&db_path)).unwrap();
    let stats = storage.get_stats("lisbon").unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.processed, 5);
    assert_eq!(stats.successful, 3);
    assert_eq!(stats.last_page_seen, 2);
    assert_eq!(storage.count_records("lisbon").unwrap(), 3);

    let record = storage.find_by_id("1").unwrap().unwrap();
    assert_eq!(record.title, "Flat 1");
    assert_eq!(record.url, item_url(&server, 1));
    assert_eq!(record.fields.get("price").map(String::as_str), Some("100 EUR"));
    assert_eq!(record.image_urls, vec![format!("{}/img/1.png", server.uri())]);

    let images = storage.get_images("1").unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].status, ImageStatus::Downloaded);
    let local = images[0].local_path.as_deref().unwrap();
    assert_eq!(std::fs::read(local).unwrap(), vec![0x89, b'P', b'N', b'G']);

    let forbidden = storage
        .get_discovered_url(&item_url(&server, 4))
        .unwrap()
        .unwrap();
    assert_eq!(forbidden.outcome, UrlOutcome::Failure);

    let kinds: HashMap<ErrorKind, u64> = storage
        .error_summary(summary.session_id)
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(kinds.get(&ErrorKind::HttpTerminal), Some(&1));
    assert_eq!(kinds.get(&ErrorKind::Challenged), Some(&1));

    let session = storage.get_session(summary.session_id).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.config_hash, "integration-hash");
    assert_eq!(session.counters, summary.counters);
    assert!(session.ended_at.is_some());
}

#[tokio::test]
async fn test_isolated_crawl_recovers_from_transient_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // No next control on the first page, so discovery stops there
    mount_listing(&server, 1, &[1, 2], false).await;

    Mock::given(method("GET"))
        .and(path("/item/1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_item(&server, 1).await;
    mount_item(&server, 2).await;

    let mut config = test_config(&server, &dir);
    config.fetch.strategy = FetchStrategyKind::Isolated;
    let db_path = config.output.database_path.clone();
    let (_tx, rx) = watch::channel(false);

    let summary = crawl(config, "integration-hash", rx).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.pages_walked, 1);
    assert_eq!(summary.counters.found, 2);
    assert_eq!(summary.counters.new, 2);
    assert_eq!(summary.counters.failed, 0);

    let storage = open_storage(Path::new(&db_path)).unwrap();
    assert_eq!(storage.count_records("lisbon").unwrap(), 2);
    assert_eq!(storage.get_stats("lisbon").unwrap().last_page_seen, 1);
}

#[tokio::test]
async fn test_challenge_cleared_by_solving_service() {
    let server = MockServer::start().await;
    let solver = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, 1, &[1], false).await;

    Mock::given(method("GET"))
        .and(path("/item/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body><div>verify you are human</div></body></html>")
                .insert_header("content-type", "text/html"),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_item(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "task_id": "t-1"
        })))
        .expect(1)
        .mount(&solver)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ready",
            "solved": true
        })))
        .mount(&solver)
        .await;

    let mut config = test_config(&server, &dir);
    config.challenge.solver_endpoint = Some(solver.uri());
    config.challenge.solver_poll_interval_ms = 10;
    let db_path = config.output.database_path.clone();
    let (_tx, rx) = watch::channel(false);

    let summary = crawl(config, "integration-hash", rx).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.counters.new, 1);
    assert_eq!(summary.counters.failed, 0);

    let storage = open_storage(Path::new(&db_path)).unwrap();
    let record = storage.find_by_id("1").unwrap().unwrap();
    assert_eq!(record.title, "Flat 1");
}

#[tokio::test]
async fn test_crawl_fails_to_start_on_unwritable_database() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let mut config = test_config(&server, &dir);
    config.output.database_path = dir
        .path()
        .join("missing")
        .join("nested")
        .join("crawl.db")
        .display()
        .to_string();
    let (_tx, rx) = watch::channel(false);

    assert!(crawl(config, "integration-hash", rx).await.is_err());
}
