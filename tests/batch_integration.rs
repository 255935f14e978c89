//! End-to-end batch tests: resolve pages, fetch documents, resume runs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docharvest_core::download::{HttpClient, RetryPolicy, RetryingFetcher, Sleeper};
use docharvest_core::render::HttpPageRenderer;
use docharvest_core::resolver::{PageStrategy, ResolverSettings, build_resolver_registry};
use docharvest_core::store::{OutcomeStatus, ResultStore, ResumePolicy};
use docharvest_core::targets::{self, Target};
use docharvest_core::{BatchReport, BatchRunner};
use tempfile::TempDir;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _delay: Duration) {}
}

/// Serves `/p/<id>` pages linking to `/files/<id>.pdf`, except page 4 which
/// has no link, and the documents themselves.
async fn site() -> MockServer {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path_regex(r"^/p/\d+$"))
        .respond_with(move |req: &Request| {
            let id = req.url.path().trim_start_matches("/p/").to_string();
            let body = if id == "4" {
                "Nothing to download on this page.".to_string()
            } else {
                format!("# Item {id}\n\n* [item-{id}.pdf]({base}/files/{id}.pdf)\n")
            };
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain")
                .set_body_string(body)
        })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/files/\d+\.pdf$"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(b"%PDF-1.4 test".to_vec()),
        )
        .mount(&server)
        .await;
    server
}

fn runner(data: &Path) -> BatchRunner {
    runner_with_policy(data, ResumePolicy::default())
}

fn runner_with_policy(data: &Path, policy: ResumePolicy) -> BatchRunner {
    let settings = ResolverSettings {
        strategy: PageStrategy::default(),
        rewrite_share_links: false,
        ..ResolverSettings::default()
    };
    let renderer = Arc::new(HttpPageRenderer::new(None).expect("renderer"));
    let registry = build_resolver_registry(&settings, renderer, None).expect("registry");
    let fetcher = RetryingFetcher::with_sleeper(
        HttpClient::new().expect("client"),
        RetryPolicy::with_max_attempts(2),
        Arc::new(NoSleep),
    );
    let store = ResultStore::load(&data.join("results.json"), policy).expect("store");
    BatchRunner::new(registry, fetcher, store, data.join("pdfs"), 1).expect("runner")
}

fn range_targets(server: &MockServer, start: u64, end: u64) -> Vec<Target> {
    targets::from_range(start, end, &format!("{}/p/{{id}}", server.uri())).expect("targets")
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |r| r.len())
}

fn pdf_count(data: &Path) -> usize {
    std::fs::read_dir(data.join("pdfs")).map_or(0, |d| d.count())
}

async fn run(data: &Path, targets: Vec<Target>) -> BatchReport {
    runner(data).run(targets).await.expect("batch")
}

#[tokio::test]
async fn test_second_run_over_finished_batch_makes_no_requests() {
    let server = site().await;
    let data = TempDir::new().expect("temp dir");
    let targets = vec![
        Target::new("1", format!("{}/p/1", server.uri())),
        Target::new("2", format!("{}/p/2", server.uri())),
    ];

    let first = run(data.path(), targets.clone()).await;
    assert_eq!(first.succeeded, 2);
    let before = request_count(&server).await;
    assert_eq!(before, 4, "two pages and two documents");
    let stored = std::fs::read_to_string(data.path().join("results.json")).expect("results");

    let second = run(data.path(), targets).await;
    assert_eq!(second.skipped, 2);
    assert_eq!(second.attempted(), 0);
    assert_eq!(request_count(&server).await, before, "no network traffic on resume");
    assert_eq!(pdf_count(data.path()), 2);
    assert_eq!(
        std::fs::read_to_string(data.path().join("results.json")).expect("results"),
        stored,
        "store untouched when nothing was processed"
    );
}

#[tokio::test]
async fn test_interrupted_batch_resumes_where_it_stopped() {
    let server = site().await;
    let data = TempDir::new().expect("temp dir");

    // First run dies after three targets; a half-written temp file is left behind.
    let partial = run(data.path(), range_targets(&server, 1, 4)).await;
    assert_eq!(partial.succeeded, 3);
    std::fs::write(data.path().join("results.json.tmp"), "{\"1\": {\"sou").expect("tmp");
    let after_crash = request_count(&server).await;

    let resumed = run(data.path(), range_targets(&server, 1, 7)).await;
    assert_eq!(resumed.total, 6);
    assert_eq!(resumed.skipped, 3);
    assert_eq!(resumed.succeeded, 2);
    assert_eq!(resumed.no_link_found, 1);

    // Pages 4..=6 plus documents 5 and 6.
    assert_eq!(request_count(&server).await - after_crash, 5);
    assert_eq!(pdf_count(data.path()), 5);

    let store = ResultStore::load(&data.path().join("results.json"), ResumePolicy::default())
        .expect("reload");
    assert_eq!(store.len(), 6);
    for key in ["1", "2", "3", "5", "6"] {
        let record = store.get(key).expect("record");
        assert_eq!(record.status, OutcomeStatus::Success, "key {key}");
        let file = record.downloaded_filename.as_ref().expect("filename");
        assert!(data.path().join("pdfs").join(file).exists());
    }
    let empty = store.get("4").expect("record");
    assert_eq!(empty.status, OutcomeStatus::NoLinkFound);
    assert!(empty.downloaded_filename.is_none());
}

#[tokio::test]
async fn test_no_link_targets_are_retried_on_every_run() {
    let server = site().await;
    let data = TempDir::new().expect("temp dir");
    let targets = range_targets(&server, 4, 5);

    run(data.path(), targets.clone()).await;
    let before = request_count(&server).await;
    let report = run(data.path(), targets).await;

    assert_eq!(report.skipped, 0);
    assert_eq!(report.no_link_found, 1);
    assert_eq!(request_count(&server).await - before, 1, "page fetched again");
}

#[tokio::test]
async fn test_rerun_with_unchanged_outcomes_keeps_store_byte_identical() {
    let server = site().await;
    let data = TempDir::new().expect("temp dir");
    let targets = range_targets(&server, 3, 5);
    let results = data.path().join("results.json");

    let first = run(data.path(), targets.clone()).await;
    assert_eq!(first.succeeded, 1);
    assert_eq!(first.no_link_found, 1);
    let once = std::fs::read(&results).expect("results");

    let second = run(data.path(), targets).await;
    assert_eq!(second.skipped, 1);
    assert_eq!(second.no_link_found, 1);
    assert_eq!(std::fs::read(&results).expect("results"), once);
}

#[tokio::test]
async fn test_give_up_policy_skips_repeated_no_link_targets() {
    let server = site().await;
    let data = TempDir::new().expect("temp dir");
    let targets = range_targets(&server, 4, 5);
    let policy = ResumePolicy {
        give_up_after_runs: Some(2),
    };

    runner_with_policy(data.path(), policy)
        .run(targets.clone())
        .await
        .expect("batch");
    let second = runner_with_policy(data.path(), policy)
        .run(targets.clone())
        .await
        .expect("batch");
    assert_eq!(second.skipped, 0);
    let before = request_count(&server).await;

    let third = runner_with_policy(data.path(), policy)
        .run(targets)
        .await
        .expect("batch");
    assert_eq!(third.skipped, 1);
    assert_eq!(request_count(&server).await, before);

    let store = ResultStore::load(&data.path().join("results.json"), policy).expect("reload");
    assert_eq!(store.get("4").expect("record").runs, 2);
}

#[tokio::test]
async fn test_parallel_workers_finish_every_target() {
    let server = site().await;
    let data = TempDir::new().expect("temp dir");

    let settings = ResolverSettings {
        rewrite_share_links: false,
        ..ResolverSettings::default()
    };
    let registry = build_resolver_registry(
        &settings,
        Arc::new(HttpPageRenderer::new(None).expect("renderer")),
        None,
    )
    .expect("registry");
    let store = ResultStore::load(&data.path().join("results.json"), ResumePolicy::default())
        .expect("store");
    let runner = BatchRunner::new(
        registry,
        RetryingFetcher::new(HttpClient::new().expect("client"), RetryPolicy::default()),
        store,
        data.path().join("pdfs"),
        4,
    )
    .expect("runner");

    let report = runner.run(range_targets(&server, 1, 11)).await.expect("batch");
    assert_eq!(report.succeeded, 9);
    assert_eq!(report.no_link_found, 1);
    assert_eq!(report.store_summary.total(), 10);
    assert_eq!(pdf_count(data.path()), 9);
}
