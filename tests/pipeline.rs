//! End-to-end runs against mock HTTP sources.

use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use ua_catalog::config::{Config, SourcePage};
use ua_catalog::error::PipelineError;
use ua_catalog::extractor::ExtractionRule;
use ua_catalog::normalize::CanonicalUA;
use ua_catalog::cache::CacheStatus;
use ua_catalog::pipeline::{Pipeline, RunOptions, RunOutcome, SourceOutcome};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TABLE_PAGE: &str = r#"
<html><body>
<div class="container">
  <h2 id="most-common-desktop-useragents">Desktop</h2>
  <table>
    <thead><tr><th>useragent</th><th>share</th></tr></thead>
    <tbody>
      <tr><td>  Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 </td><td>41%</td></tr>
      <tr><td>Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0</td><td>12%</td></tr>
      <tr><td>n/a</td><td>1%</td></tr>
    </tbody>
  </table>
</div>
</body></html>
"#;

const LINES_PAGE: &str = "# mobile\nMozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) Safari/604.1\nMozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0\n";

fn config_for(dir: &TempDir, sources: Vec<SourcePage>) -> Config {
    Config {
        sources,
        cache_ttl: Duration::from_secs(3600),
        min_ua_length: 10,
        timeout: Duration::from_secs(5),
        require_product_token: false,
        catalog_path: dir.path().join("user_agents.txt"),
        cache_dir: dir.path().join("cache"),
        index_path: None,
    }
}

fn source(id: &str, url: String, rule: ExtractionRule) -> SourcePage {
    SourcePage {
        id: id.to_string(),
        url,
        rule,
    }
}

async fn serve(server: &MockServer, route: &str, status: u16, body: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn three_sources(server: &MockServer) -> Vec<SourcePage> {
    vec![
        source("a-table", format!("{}/a", server.uri()), ExtractionRule::UseragentsMe),
        source("b-broken", format!("{}/b", server.uri()), ExtractionRule::Lines),
        source("c-lines", format!("{}/c", server.uri()), ExtractionRule::Lines),
    ]
}

#[tokio::test]
async fn one_failing_source_is_skipped_and_the_rest_are_merged() {
    let server = MockServer::start().await;
    serve(&server, "/a", 200, TABLE_PAGE, 1).await;
    serve(&server, "/b", 500, "boom", 1).await;
    serve(&server, "/c", 200, LINES_PAGE, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir, three_sources(&server));

    let summary = Pipeline::new(&config).run(RunOptions::default()).await.unwrap();

    assert_eq!(summary.skipped_sources(), vec!["b-broken"]);
    assert_eq!(summary.sources_fetched(), 2);
    assert_eq!(summary.candidates_extracted(), 5);
    assert_eq!(summary.rejections().too_short, 1);
    assert_eq!(summary.outcome, RunOutcome::Written { added: 3, total: 3 });

    let lines = read_lines(&config.catalog_path);
    let mut sorted = lines.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(lines, sorted);
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().any(|l| l.contains("Chrome/123.0.0.0") && !l.starts_with(' ')));
    assert!(lines.iter().any(|l| l.contains("iPhone")));
    assert!(std::fs::read_to_string(&config.catalog_path).unwrap().ends_with('\n'));
}

#[tokio::test]
async fn rerun_on_cache_hits_leaves_catalog_untouched() {
    let server = MockServer::start().await;
    // Each page is requested exactly once across both runs.
    serve(&server, "/a", 200, TABLE_PAGE, 1).await;
    serve(&server, "/c", 200, LINES_PAGE, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let config = config_for(
        &dir,
        vec![
            source("a-table", format!("{}/a", server.uri()), ExtractionRule::UseragentsMe),
            source("c-lines", format!("{}/c", server.uri()), ExtractionRule::Lines),
        ],
    );

    let first = Pipeline::new(&config).run(RunOptions::default()).await.unwrap();
    assert!(first.changed());
    let before = std::fs::read(&config.catalog_path).unwrap();
    let modified = std::fs::metadata(&config.catalog_path).unwrap().modified().unwrap();

    let second = Pipeline::new(&config).run(RunOptions::default()).await.unwrap();
    assert_eq!(second.outcome, RunOutcome::Unchanged);
    assert_eq!(second.cache_hits(), 2);
    assert_eq!(std::fs::read(&config.catalog_path).unwrap(), before);
    assert_eq!(
        std::fs::metadata(&config.catalog_path).unwrap().modified().unwrap(),
        modified
    );
}

#[tokio::test]
async fn merges_into_existing_catalog() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/list",
        200,
        "  Mozilla/5.0 (B)  \nMozilla/6.0 (C)\n",
        1,
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config = config_for(
        &dir,
        vec![source("list", format!("{}/list", server.uri()), ExtractionRule::Lines)],
    );
    std::fs::write(&config.catalog_path, "Mozilla/4.0 (A)\nMozilla/5.0 (B)\n").unwrap();

    let summary = Pipeline::new(&config).run(RunOptions::default()).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Written { added: 1, total: 3 });
    assert_eq!(
        read_lines(&config.catalog_path),
        vec!["Mozilla/4.0 (A)", "Mozilla/5.0 (B)", "Mozilla/6.0 (C)"]
    );
}

#[tokio::test]
async fn expired_response_is_served_when_refetch_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LINES_PAGE))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    serve(&server, "/c", 503, "down", 1).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(
        &dir,
        vec![source("c-lines", format!("{}/c", server.uri()), ExtractionRule::Lines)],
    );
    config.cache_ttl = Duration::ZERO;

    Pipeline::new(&config).run(RunOptions::default()).await.unwrap();
    let second = Pipeline::new(&config).run(RunOptions::default()).await.unwrap();

    assert_eq!(second.stale_fallbacks(), 1);
    assert!(second.skipped_sources().is_empty());
    assert_eq!(second.outcome, RunOutcome::Unchanged);
}

#[tokio::test]
async fn all_sources_failing_is_fatal_only_without_a_catalog() {
    let server = MockServer::start().await;
    serve(&server, "/a", 404, "", 2).await;

    let dir = tempfile::tempdir().unwrap();
    let config = config_for(
        &dir,
        vec![source("a", format!("{}/a", server.uri()), ExtractionRule::UseragentsMe)],
    );

    let err = Pipeline::new(&config).run(RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, PipelineError::AllSourcesFailed(1)));
    assert!(!config.catalog_path.exists());

    std::fs::write(&config.catalog_path, "Mozilla/5.0 (Existing)\n").unwrap();
    let summary = Pipeline::new(&config).run(RunOptions::default()).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Unchanged);
    assert_eq!(summary.skipped_sources(), vec!["a"]);
}

#[tokio::test]
async fn unreadable_catalog_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(
        &dir,
        vec![source("a", "http://127.0.0.1:9/a".to_string(), ExtractionRule::Lines)],
    );
    config.catalog_path = dir.path().to_path_buf();

    let err = Pipeline::new(&config).run(RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Catalog(_)));
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let server = MockServer::start().await;
    serve(&server, "/c", 200, LINES_PAGE, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(
        &dir,
        vec![source("c-lines", format!("{}/c", server.uri()), ExtractionRule::Lines)],
    );
    config.index_path = Some(dir.path().join("user_agents.json"));

    let summary = Pipeline::new(&config)
        .run(RunOptions { dry_run: true })
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::WouldWrite { added: 2, total: 2 });
    assert!(!config.catalog_path.exists());
    assert!(!dir.path().join("user_agents.json").exists());
}

#[tokio::test]
async fn offline_source_with_injected_check_and_index() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("fixture.txt");
    std::fs::write(&page, format!("{}Mozilla/5.0 (compatible; Examplebot/1.0)\n", LINES_PAGE)).unwrap();

    let mut config = config_for(
        &dir,
        vec![source(
            "fixture",
            reqwest::Url::from_file_path(&page).unwrap().to_string(),
            ExtractionRule::Lines,
        )],
    );
    config.index_path = Some(dir.path().join("user_agents.json"));

    let summary = Pipeline::new(&config)
        .with_check(|ua: &CanonicalUA| !ua.as_str().contains("bot/"))
        .run(RunOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.implausible(), 1);
    assert_eq!(summary.outcome, RunOutcome::Written { added: 2, total: 2 });
    assert!(summary.index_written);

    let index: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("user_agents.json")).unwrap()).unwrap();
    assert!(index["firefox"]["windows"].as_str().unwrap().contains("Firefox/124.0"));
    assert_eq!(index["firefox"]["win10"], index["firefox"]["windows"]);
    assert!(index["@modern"]["safari"]["ios"].is_array());

    let again = Pipeline::new(&config).run(RunOptions::default()).await.unwrap();
    assert!(!again.changed());
    assert!(!again.index_written);
}

#[tokio::test]
async fn slow_source_times_out_and_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(LINES_PAGE)
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    serve(&server, "/c", 200, LINES_PAGE, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(
        &dir,
        vec![
            source("a-slow", format!("{}/slow", server.uri()), ExtractionRule::Lines),
            source("c-lines", format!("{}/c", server.uri()), ExtractionRule::Lines),
        ],
    );
    config.timeout = Duration::from_millis(200);

    let summary = Pipeline::new(&config).run(RunOptions::default()).await.unwrap();

    assert_eq!(
        summary.sources[0],
        SourceOutcome::Skipped {
            source_id: "a-slow".to_string(),
            reason: "request timed out".to_string(),
        }
    );
    assert_eq!(summary.sources_fetched(), 1);
    assert_eq!(summary.outcome, RunOutcome::Written { added: 2, total: 2 });
}

#[tokio::test]
async fn unusable_cache_dir_fetches_without_cache() {
    let server = MockServer::start().await;
    serve(&server, "/c", 200, LINES_PAGE, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(
        &dir,
        vec![source("c-lines", format!("{}/c", server.uri()), ExtractionRule::Lines)],
    );
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    config.cache_dir = blocker.clone();

    let summary = Pipeline::new(&config).run(RunOptions::default()).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Written { added: 2, total: 2 });
    assert!(matches!(
        summary.sources[0],
        SourceOutcome::Processed {
            cache_status: CacheStatus::Bypassed,
            ..
        }
    ));
    assert_eq!(std::fs::read_to_string(&blocker).unwrap(), "not a directory");
}

#[tokio::test]
async fn index_write_failure_does_not_fail_the_run() {
    let server = MockServer::start().await;
    serve(&server, "/c", 200, LINES_PAGE, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(
        &dir,
        vec![source("c-lines", format!("{}/c", server.uri()), ExtractionRule::Lines)],
    );
    let index_dir = dir.path().join("index-is-a-dir");
    std::fs::create_dir(&index_dir).unwrap();
    config.index_path = Some(index_dir.clone());

    let summary = Pipeline::new(&config).run(RunOptions::default()).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Written { added: 2, total: 2 });
    assert!(!summary.index_written);
    assert!(index_dir.is_dir());
    assert_eq!(read_lines(&config.catalog_path).len(), 2);
}
