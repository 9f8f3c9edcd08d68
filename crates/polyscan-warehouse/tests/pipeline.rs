use polyscan_warehouse::pipeline::{self, Output};
use polyscan_warehouse::{Credential, FetchConfig, IngestError, Polygon, RetryPolicy, SchemaMode};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

const TICKERS: &str = "/v3/reference/tickers";

fn polygon(server: &MockServer) -> Polygon {
    let config = FetchConfig {
        page_delay: Duration::from_millis(1),
        retry: RetryPolicy {
            delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        },
        ..FetchConfig::default()
    }
    .with_base_url(&server.uri())
    .unwrap();
    Polygon::new(Credential::new("test-key"), config)
}

fn output(dir: &Path) -> Output {
    Output {
        dir: dir.to_path_buf(),
        ..Output::default()
    }
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

fn first_page() -> MockBuilder {
    Mock::given(method("GET"))
        .and(path(TICKERS))
        .and(query_param("market", "stocks"))
        .and(query_param("active", "true"))
        .and(query_param("order", "asc"))
        .and(query_param("limit", "1000"))
        .and(query_param("sort", "ticker"))
        .and(query_param("apiKey", "test-key"))
}

#[tokio::test]
async fn two_pages_make_three_rows() {
    let server = MockServer::start().await;
    first_page()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "results": [
                {"ticker": "A", "name": "Agilent Technologies Inc.", "market": "stocks"},
                {"ticker": "AA", "name": "Alcoa Corporation", "market": "stocks"}
            ],
            "next_url": format!("{}{TICKERS}?cursor=p2", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TICKERS))
        .and(query_param("cursor", "p2"))
        .and(query_param("apiKey", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "results": [{"ticker": "AAA", "name": "Listed Funds Trust", "market": "stocks"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let report = pipeline::run(
        &reqwest::Client::new(),
        &polygon(&server),
        &output(dir.path()),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.pages, 2);
    assert_eq!(report.export.rows, 3);
    let name = report.export.path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("stock_tickers_") && name.ends_with(".csv"));
    assert_eq!(
        std::fs::read_to_string(&report.export.path).unwrap(),
        "ticker,name,market\n\
         A,Agilent Technologies Inc.,stocks\n\
         AA,Alcoa Corporation,stocks\n\
         AAA,Listed Funds Trust,stocks\n"
    );

    for request in server.received_requests().await.unwrap() {
        let keys = request
            .url
            .query_pairs()
            .filter(|(k, _)| k == "apiKey")
            .count();
        assert_eq!(keys, 1, "{}", request.url);
    }
}

#[tokio::test]
async fn key_already_in_next_url_is_not_doubled() {
    let server = MockServer::start().await;
    first_page()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"ticker": "A"}],
            "next_url": format!("{TICKERS}?cursor=p2&apiKey=test-key")
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("cursor", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"ticker": "B"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    pipeline::run(
        &reqwest::Client::new(),
        &polygon(&server),
        &output(dir.path()),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].url.query(),
        Some("cursor=p2&apiKey=test-key")
    );
}

#[tokio::test]
async fn rate_limit_is_waited_out() {
    let server = MockServer::start().await;
    first_page()
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    first_page()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"ticker": "AAPL", "name": "Apple Inc."}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let report = pipeline::run(
        &reqwest::Client::new(),
        &polygon(&server),
        &output(dir.path()),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.export.rows, 1);
    assert_eq!(
        std::fs::read_to_string(&report.export.path).unwrap(),
        "ticker,name\nAAPL,Apple Inc.\n"
    );

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, requests[1].url);
}

#[tokio::test]
async fn empty_listing_produces_no_file() {
    let server = MockServer::start().await;
    first_page()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "results": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = pipeline::run(
        &reqwest::Client::new(),
        &polygon(&server),
        &output(dir.path()),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, IngestError::EmptyDataset));
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn transport_error_on_page_two_produces_no_file() {
    let server = MockServer::start().await;
    first_page()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"ticker": "A"}],
            // nothing listens on port 1
            "next_url": format!("http://127.0.0.1:1{TICKERS}?cursor=p2")
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = pipeline::run(
        &reqwest::Client::new(),
        &polygon(&server),
        &output(dir.path()),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, IngestError::Transport { page: 2, .. }), "{err:?}");
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn server_error_on_page_two_produces_no_file() {
    let server = MockServer::start().await;
    first_page()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"ticker": "A"}],
            "next_url": format!("{TICKERS}?cursor=p2")
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("cursor", "p2"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = pipeline::run(
        &reqwest::Client::new(),
        &polygon(&server),
        &output(dir.path()),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, IngestError::Status { page: 2, status: 502 }));
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn schema_drift_widens_the_header_or_is_dropped() {
    let server = MockServer::start().await;
    first_page()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"ticker": "A", "type": "CS"}],
            "next_url": format!("{TICKERS}?cursor=p2")
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("cursor", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"ticker": "B", "type": "ETF", "cik": "0000001"}]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let polygon = polygon(&server);
    let cancel = CancellationToken::new();

    let union = Output {
        path: Some(dir.path().join("union.csv")),
        ..output(dir.path())
    };
    let report = pipeline::run(&reqwest::Client::new(), &polygon, &union, &cancel)
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(&report.export.path).unwrap(),
        "ticker,type,cik\nA,CS,\nB,ETF,0000001\n"
    );

    let first = Output {
        path: Some(dir.path().join("first.csv")),
        schema: SchemaMode::First,
        ..output(dir.path())
    };
    let report = pipeline::run(&reqwest::Client::new(), &polygon, &first, &cancel)
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(&report.export.path).unwrap(),
        "ticker,type\nA,CS\nB,ETF\n"
    );
}
