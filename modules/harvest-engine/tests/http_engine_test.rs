//! HTTP engine tests against a scripted loopback server. No external
//! network; everything binds 127.0.0.1.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use harvest_core::config::{BackoffMode, EngineConfig, RetryConfig};
use harvest_core::ErrorKind;
use harvest_engine::{CancelToken, Engine, FetchContext, HttpEngine};

/// Serve a scripted status/body per request; the last entry repeats.
async fn scripted_server(script: Vec<(u16, &'static str)>) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_inner = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let index = hits_inner.fetch_add(1, Ordering::SeqCst);
            let (status, body) = script[index.min(script.len() - 1)];

            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;

            let reason = match status {
                200 => "OK",
                404 => "Not Found",
                503 => "Service Unavailable",
                _ => "Status",
            };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    (addr, hits)
}

fn engine_config(max_retries: u32, base_delay_s: f64) -> EngineConfig {
    EngineConfig {
        timeout_s: 5.0,
        retry: RetryConfig {
            max_retries,
            backoff_mode: BackoffMode::Exp,
            base_delay_s,
            max_delay_s: 5.0,
            retry_on_status: vec![429, 500, 502, 503, 504],
        },
        ..Default::default()
    }
}

fn ctx() -> FetchContext {
    FetchContext::new(CancelToken::new())
}

#[tokio::test]
async fn retries_through_503_then_succeeds() {
    // 503, 503, 200 — the fetch must succeed on the third attempt and the
    // elapsed time must include both exponential backoff sleeps.
    let (addr, hits) = scripted_server(vec![
        (503, ""),
        (503, ""),
        (200, "<html>recovered</html>"),
    ])
    .await;
    let base = 0.05;
    let engine = HttpEngine::new(&engine_config(3, base)).unwrap();

    let start = Instant::now();
    let response = engine.get(&format!("http://{addr}/page"), &ctx()).await;
    let elapsed = start.elapsed();

    assert!(response.ok(), "expected success, got {}", response.short_error());
    assert_eq!(response.body, "<html>recovered</html>");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(response.trace.len(), 3);
    assert_eq!(
        response.trace[0].error,
        Some(ErrorKind::RetryableStatus)
    );
    // backoff = base + 2*base, jittered ±25%
    let floor = Duration::from_secs_f64(3.0 * base * 0.7);
    assert!(elapsed >= floor, "elapsed {elapsed:?} below backoff floor {floor:?}");
}

#[tokio::test]
async fn attempts_bounded_by_max_retries_plus_one() {
    let (addr, hits) = scripted_server(vec![(503, "")]).await;
    let engine = HttpEngine::new(&engine_config(2, 0.01)).unwrap();

    let response = engine.get(&format!("http://{addr}/page"), &ctx()).await;

    assert!(!response.ok());
    assert_eq!(response.status, 503);
    assert_eq!(hits.load(Ordering::SeqCst), 3, "max_retries + 1 attempts");
    assert_eq!(response.trace.len(), 3);
}

#[tokio::test]
async fn terminal_4xx_is_not_retried() {
    let (addr, hits) = scripted_server(vec![(404, "gone")]).await;
    let engine = HttpEngine::new(&engine_config(3, 0.01)).unwrap();

    let response = engine.get(&format!("http://{addr}/missing"), &ctx()).await;

    assert!(!response.ok());
    assert_eq!(response.status, 404);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(response.trace.len(), 1);
    assert_eq!(response.trace[0].error, Some(ErrorKind::TerminalStatus));
}

#[tokio::test]
async fn connection_refused_surfaces_status_zero_with_trace() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let engine = HttpEngine::new(&engine_config(1, 0.01)).unwrap();
    let response = engine.get(&format!("http://{addr}/page"), &ctx()).await;

    assert_eq!(response.status, 0);
    let error = response.error.as_ref().expect("transport error recorded");
    assert_eq!(error.kind, ErrorKind::Transport);
    assert_eq!(response.trace.len(), 2, "initial attempt + one retry");
}

#[tokio::test]
async fn get_rendered_degrades_to_get() {
    let (addr, hits) = scripted_server(vec![(200, "<html>plain</html>")]).await;
    let engine = HttpEngine::new(&engine_config(0, 0.01)).unwrap();

    let actions = vec![harvest_core::config::Action::Scroll {
        repeat: 3,
        min_px: 100,
        max_px: 200,
        pause_s: 0.0,
    }];
    let response = engine
        .get_rendered(&format!("http://{addr}/page"), &ctx(), &actions, Some(".x"))
        .await;

    assert!(response.ok());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn block_signal_classified_on_body() {
    let (addr, _) = scripted_server(vec![(200, "Please verify you are human")]).await;
    let engine = HttpEngine::new(&engine_config(0, 0.01)).unwrap();

    let response = engine.get(&format!("http://{addr}/page"), &ctx()).await;

    assert!(response.ok());
    assert_eq!(
        response.block_signal,
        harvest_core::BlockSignal::CaptchaPresent
    );
}

#[tokio::test]
async fn cancellation_aborts_before_fetch() {
    let (addr, hits) = scripted_server(vec![(200, "never served")]).await;
    let engine = HttpEngine::new(&engine_config(0, 0.01)).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let response = engine
        .get(&format!("http://{addr}/page"), &FetchContext::new(cancel))
        .await;

    assert_eq!(response.status, 0);
    assert_eq!(
        response.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::Cancelled)
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
