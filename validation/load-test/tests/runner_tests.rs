//! End-to-end runs against an in-process tile server.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tile_load_test::{
    LoadRunner, Pattern, ResultsReport, RunPhase, TestConfig, TileBounds, TileClient, TileCoord,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const TILE_BYTES: usize = 2048;

#[derive(Clone, Default)]
struct Seen {
    tiles: Arc<Mutex<Vec<TileCoord>>>,
    encodings: Arc<Mutex<Vec<String>>>,
}

async fn tile_ok(
    State(seen): State<Seen>,
    Path((z, x, y)): Path<(u32, u32, u32)>,
    headers: HeaderMap,
) -> Vec<u8> {
    seen.tiles.lock().unwrap().push(TileCoord::new(z, x, y));
    if let Some(enc) = headers.get("accept-encoding").and_then(|v| v.to_str().ok()) {
        seen.encodings.lock().unwrap().push(enc.to_string());
    }
    vec![0u8; TILE_BYTES]
}

async fn tile_missing() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn tile_broken() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "render failed")
}

async fn tile_slow() -> Vec<u8> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    vec![0u8; 16]
}

/// Serve `app` on an ephemeral port and return its base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn bounds() -> TileBounds {
    TileBounds {
        min_zoom: 4,
        max_zoom: 6,
        min_x: 3,
        max_x: 9,
        min_y: 2,
        max_y: 5,
    }
}

fn config(base: &str) -> TestConfig {
    TestConfig::new(format!("{}/tiles/{{z}}/{{x}}/{{y}}", base), bounds())
}

// ============================================================================
// Request budget runs
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_budget_run_counts_every_request() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/tiles/:z/:x/:y", get(tile_ok))
        .with_state(seen.clone());
    let base = serve(app).await;

    let mut c = config(&base);
    c.threads = 4;
    c.requests = Some(50);
    c.accept_encoding = Some("gzip".to_string());

    let mut runner = LoadRunner::new(c).unwrap();
    let results = runner.run().await.unwrap();

    assert_eq!(runner.phase(), RunPhase::Done);
    assert_eq!(results.total_requests, 50);
    assert_eq!(results.failed_requests, 0);
    assert!(!results.had_failures);
    assert_eq!(results.success_rate, 100.0);
    assert_eq!(results.status_codes.get(&200), Some(&50));
    assert!(results.latency_avg > 0.0);
    assert!(results.latency_p99 >= results.latency_p95);
    assert!(results.bytes_per_second > 0.0);

    let tiles = seen.tiles.lock().unwrap();
    assert_eq!(tiles.len(), 50);
    assert!(tiles.iter().all(|t| bounds().contains(t)));

    let encodings = seen.encodings.lock().unwrap();
    assert_eq!(encodings.len(), 50);
    assert!(encodings.iter().all(|e| e == "gzip"));
}

#[tokio::test]
async fn test_fixed_sweep_covers_box() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/tiles/:z/:x/:y", get(tile_ok))
        .with_state(seen.clone());
    let base = serve(app).await;

    let mut c = config(&base);
    c.pattern = Pattern::Fixed;
    c.requests = Some(bounds().tile_count());

    let mut runner = LoadRunner::new(c).unwrap();
    let results = runner.run().await.unwrap();
    assert_eq!(results.total_requests, bounds().tile_count());

    let mut tiles = seen.tiles.lock().unwrap().clone();
    tiles.sort_by_key(|t| (t.z, t.y, t.x));
    tiles.dedup();
    assert_eq!(tiles.len() as u64, bounds().tile_count());
}

#[tokio::test]
async fn test_not_found_counts_as_success() {
    let app = Router::new().route("/tiles/:z/:x/:y", get(tile_missing));
    let base = serve(app).await;

    let mut c = config(&base);
    c.threads = 2;
    c.requests = Some(20);

    let results = LoadRunner::new(c).unwrap().run().await.unwrap();
    assert_eq!(results.total_requests, 20);
    assert_eq!(results.failed_requests, 0);
    assert_eq!(results.status_codes.get(&404), Some(&20));
}

#[tokio::test]
async fn test_custom_accept_list_rejects_not_found() {
    let app = Router::new().route("/tiles/:z/:x/:y", get(tile_missing));
    let base = serve(app).await;

    let mut c = config(&base);
    c.requests = Some(5);
    c.accept_status = vec![200];

    let results = LoadRunner::new(c).unwrap().run().await.unwrap();
    assert_eq!(results.failed_requests, 5);
    assert_eq!(results.success_rate, 0.0);
}

#[tokio::test]
async fn test_all_failures_still_report() {
    let app = Router::new().route("/tiles/:z/:x/:y", get(tile_broken));
    let base = serve(app).await;

    let mut c = config(&base);
    c.threads = 2;
    c.requests = Some(10);

    let mut runner = LoadRunner::new(c).unwrap();
    let results = runner.run().await.unwrap();
    assert_eq!(results.total_requests, 10);
    assert_eq!(results.failed_requests, 10);
    assert!(results.had_failures);
    assert_eq!(results.success_rate, 0.0);
    assert_eq!(results.latency_avg, 0.0);
    assert_eq!(results.status_codes.get(&500), Some(&10));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.csv");
    ResultsReport::append_csv(&path, runner.config(), &results).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    let row: Vec<&str> = content.lines().nth(1).unwrap().split(',').collect();
    assert_eq!(row[6], "true");
    assert_eq!(row[7], "10");
    assert_eq!(row[8], "10");
}

#[tokio::test]
async fn test_connection_refused_is_recorded() {
    // Grab a free port, then close it
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut c = config(&format!("http://{}", addr));
    c.requests = Some(3);

    let results = LoadRunner::new(c).unwrap().run().await.unwrap();
    assert_eq!(results.total_requests, 3);
    assert_eq!(results.failed_requests, 3);
    assert_eq!(results.status_codes.get(&0), Some(&3));
}

// ============================================================================
// Time budget and cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deadline_stops_slow_requests() {
    let app = Router::new().route("/tiles/:z/:x/:y", get(tile_slow));
    let base = serve(app).await;

    let mut c = config(&base);
    c.threads = 3;
    c.duration = Some("1s".to_string());
    c.timeout = "10s".to_string();

    let started = Instant::now();
    let results = LoadRunner::new(c).unwrap().run().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(950), "stopped early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "overran deadline: {:?}", elapsed);
    // Every request was still in flight at the deadline
    assert_eq!(results.total_requests, 0);
    assert!(!results.had_failures);
    assert!(results.duration_secs >= 0.95 && results.duration_secs < 3.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deadline_run_against_fast_server() {
    let app = Router::new()
        .route("/tiles/:z/:x/:y", get(tile_ok))
        .with_state(Seen::default());
    let base = serve(app).await;

    let mut c = config(&base);
    c.threads = 2;
    c.duration = Some("500ms".to_string());

    let results = LoadRunner::new(c).unwrap().run().await.unwrap();
    assert!(results.total_requests > 0);
    assert_eq!(results.failed_requests, 0);
    assert!(results.duration_secs >= 0.45);
    assert!(results.requests_per_second > 0.0);
    assert!(
        (results.requests_per_second_per_worker * 2.0 - results.requests_per_second).abs() < 1e-6
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manual_cancellation() {
    let app = Router::new()
        .route("/tiles/:z/:x/:y", get(tile_ok))
        .with_state(Seen::default());
    let base = serve(app).await;

    let mut c = config(&base);
    c.threads = 2;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let results = LoadRunner::new(c)
        .unwrap()
        .run_with_cancel(cancel)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(results.total_requests > 0);
}

// ============================================================================
// Executor
// ============================================================================

#[tokio::test]
async fn test_execute_drains_body() {
    let app = Router::new()
        .route("/tiles/:z/:x/:y", get(tile_ok))
        .with_state(Seen::default());
    let base = serve(app).await;

    let client = TileClient::new(&config(&base)).unwrap();
    let outcome = client.execute(TileCoord::new(5, 4, 3)).await;
    assert!(outcome.success);
    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.bytes, TILE_BYTES as u64);
    assert!(outcome.latency > Duration::ZERO);
}

#[tokio::test]
async fn test_execute_truncated_body_is_failure() {
    // Promises 1000 bytes, sends 10, then hangs up
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n0123456789")
            .await
            .unwrap();
        socket.flush().await.unwrap();
    });

    let client = TileClient::new(&config(&format!("http://{}", addr))).unwrap();
    let outcome = client.execute(TileCoord::new(5, 4, 3)).await;
    assert!(!outcome.success);
    assert_eq!(outcome.status, 200);
    assert!(outcome.latency > Duration::ZERO);
}

#[tokio::test]
async fn test_execute_times_out() {
    let app = Router::new().route("/tiles/:z/:x/:y", get(tile_slow));
    let base = serve(app).await;

    let mut c = config(&base);
    c.timeout = "200ms".to_string();
    let client = TileClient::new(&c).unwrap();

    let started = Instant::now();
    let outcome = client.execute(TileCoord::new(5, 4, 3)).await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!outcome.success);
    assert_eq!(outcome.status, 0);
}

#[tokio::test]
async fn test_execute_sends_extra_headers() {
    async fn echo(headers: HeaderMap) -> StatusCode {
        match headers.get("x-load-test").and_then(|v| v.to_str().ok()) {
            Some("nightly") => StatusCode::NO_CONTENT,
            _ => StatusCode::BAD_REQUEST,
        }
    }
    let app = Router::new().route("/tiles/:z/:x/:y", get(echo));
    let base = serve(app).await;

    let mut c = config(&base);
    c.headers = vec!["X-Load-Test: nightly".to_string()];
    let client = TileClient::new(&c).unwrap();

    let outcome = client.execute(TileCoord::new(1, 1, 1)).await;
    assert_eq!(outcome.status, 204);
    assert!(outcome.success);
}
