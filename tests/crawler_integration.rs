//! Integration tests for the listing crawler against a mock archive.

mod support;

use std::sync::Arc;

use myrient_core::catalog::EntryFilter;
use myrient_core::crawler::{CrawlTracker, Crawler};
use myrient_core::download::{HttpClient, RateLimiter};
use myrient_core::{Catalog, Config, CrawlError, CrawlState};
use support::{listing_html, memory_catalog, test_config};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GAME_BOY_DIR: &str = "/files/No-Intro/Nintendo%20-%20Game%20Boy/";

async fn mount_listing(server: &MockServer, at: &str, rows: &[(&str, &str)]) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(rows)))
        .mount(server)
        .await;
}

/// Root with two sections; the Redump section is broken.
async fn mock_archive() -> MockServer {
    let server = MockServer::start().await;
    mount_listing(&server, "/files/", &[("No-Intro/", "-"), ("Redump/", "-")]).await;
    mount_listing(&server, "/files/No-Intro/", &[("Nintendo%20-%20Game%20Boy/", "-")]).await;
    mount_listing(
        &server,
        GAME_BOY_DIR,
        &[
            ("Tetris%20(World).zip", "32768"),
            ("Super%20Mario%20Land%20(World)%20(Rev%201).zip", "64.5 KiB"),
            ("%5BBIOS%5D%20Nintendo%20Game%20Boy%20Boot%20ROM%20(World).zip", "256"),
            ("readme.txt", "1,024"),
        ],
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/files/Redump/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    server
}

fn crawl_config(server: &MockServer, dir: &TempDir) -> Config {
    Config {
        include_patterns: vec!["*.zip".to_string()],
        exclude_patterns: vec!["*BIOS*".to_string()],
        max_attempts: 2,
        ..test_config(server, dir.path())
    }
}

fn crawler(catalog: &Catalog, config: &Config) -> Crawler {
    let client = HttpClient::new(
        config.connect_timeout(),
        config.read_timeout(),
        &config.user_agent,
    )
    .expect("client should build");
    let rate_limiter = Arc::new(RateLimiter::new(config.bucket_capacity, config.refill_per_sec));
    Crawler::new(
        catalog.clone(),
        client,
        rate_limiter,
        Arc::new(CrawlTracker::new()),
        config,
    )
    .expect("crawler should build")
}

#[tokio::test]
async fn test_crawl_catalogs_filtered_files_and_survives_broken_section() {
    let server = mock_archive().await;
    let dir = TempDir::new().unwrap();
    let config = crawl_config(&server, &dir);
    let catalog = memory_catalog().await;
    let crawler = crawler(&catalog, &config);

    let snapshot = crawler
        .run(&config.base_url, CancellationToken::new())
        .await
        .expect("crawl should complete");

    assert_eq!(snapshot.state, CrawlState::Completed);
    assert_eq!(snapshot.locations_visited, 4);
    assert_eq!(snapshot.entries_discovered, 2);
    assert_eq!(snapshot.entries_filtered, 2, "BIOS and readme are filtered");
    assert_eq!(snapshot.errors, 1, "Redump listing fails");
    assert!(!snapshot.cancelled);

    let entries = catalog
        .query_by_filter(&EntryFilter::default(), 100, 0)
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);

    let tetris = entries
        .iter()
        .find(|e| e.name == "Tetris (World).zip")
        .expect("Tetris should be cataloged");
    assert_eq!(tetris.console.as_deref(), Some("Game Boy"));
    assert_eq!(tetris.collection, "No-Intro");
    assert_eq!(tetris.region.as_deref(), Some("World"));
    assert_eq!(tetris.parent_path, "No-Intro/Nintendo - Game Boy");
    assert_eq!(tetris.format, "zip");
    assert_eq!(tetris.size_bytes(), Some(32_768));
    assert!(tetris.size_exact);
    assert_eq!(
        tetris.address,
        format!("{}{GAME_BOY_DIR}Tetris%20(World).zip", server.uri())
    );

    let mario = entries
        .iter()
        .find(|e| e.name.starts_with("Super Mario Land"))
        .unwrap();
    assert_eq!(mario.size_bytes(), Some(66_048));
    assert!(!mario.size_exact);
}

#[tokio::test]
async fn test_recrawl_is_idempotent() {
    let server = mock_archive().await;
    let dir = TempDir::new().unwrap();
    let config = crawl_config(&server, &dir);
    let catalog = memory_catalog().await;
    let crawler = crawler(&catalog, &config);

    crawler
        .run(&config.base_url, CancellationToken::new())
        .await
        .unwrap();
    let second = crawler
        .run(&config.base_url, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.entries_discovered, 2, "counters reset per run");
    let stats = catalog.stats().await.unwrap();
    assert_eq!(stats.overall.total_entries, 2);
    assert_eq!(stats.overall.collections, 1);
}

#[tokio::test]
async fn test_max_depth_limits_descent() {
    let server = mock_archive().await;
    let dir = TempDir::new().unwrap();
    let config = Config {
        crawl_max_depth: 1,
        ..crawl_config(&server, &dir)
    };
    let catalog = memory_catalog().await;

    let snapshot = crawler(&catalog, &config)
        .run(&config.base_url, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(snapshot.locations_visited, 3);
    assert_eq!(snapshot.entries_discovered, 0);
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != GAME_BOY_DIR));
}

#[tokio::test]
async fn test_robots_disallowed_sections_are_skipped() {
    let server = mock_archive().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /files/Redump/\n"),
        )
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let config = Config {
        respect_robots_txt: true,
        ..crawl_config(&server, &dir)
    };
    let catalog = memory_catalog().await;

    let snapshot = crawler(&catalog, &config)
        .run(&config.base_url, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(snapshot.errors, 0);
    assert_eq!(snapshot.entries_discovered, 2);
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/files/Redump/"));
}

#[tokio::test]
async fn test_unreachable_root_fails_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let config = crawl_config(&server, &dir);
    let catalog = memory_catalog().await;
    let crawler = crawler(&catalog, &config);

    let result = crawler.run(&config.base_url, CancellationToken::new()).await;

    assert!(matches!(result, Err(CrawlError::RootUnreachable { .. })));
    let snapshot = crawler.tracker().snapshot();
    assert_eq!(snapshot.state, CrawlState::Failed);
    assert!(snapshot.failure.is_some());
}

#[tokio::test]
async fn test_invalid_root_is_rejected() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = crawl_config(&server, &dir);
    let catalog = memory_catalog().await;

    let result = crawler(&catalog, &config)
        .run("ftp://archive.example/files/", CancellationToken::new())
        .await;

    assert!(matches!(result, Err(CrawlError::InvalidRoot { .. })));
}

#[tokio::test]
async fn test_cancelled_crawl_completes_with_flag() {
    let server = mock_archive().await;
    let dir = TempDir::new().unwrap();
    let config = crawl_config(&server, &dir);
    let catalog = memory_catalog().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = crawler(&catalog, &config).run(&config.base_url, cancel).await;

    let snapshot = result.expect("a cancelled crawl is not a failure");
    assert_eq!(snapshot.state, CrawlState::Completed);
    assert!(snapshot.cancelled);
}
