//! HTTP providers against a local socket: call timeouts come from each
//! provider's settings, and oversized bodies are cut at the cap.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use deep_research::config::ProviderSettings;
use deep_research::error::{FetchError, ProviderError};
use deep_research::fetch::providers::{http_client, SemanticScholar, WebPage, MAX_BODY_BYTES};
use deep_research::throttle::ThrottlePolicy;
use deep_research::{AcquisitionTask, CancellationToken, Fetcher, Provider, Sanitizer, Throttle};

/// Answers every connection with `body` after `delay`.
async fn serve(delay: Duration, content_type: &'static str, body: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = Arc::new(body);
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                tokio::time::sleep(delay).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = sock.write_all(head.as_bytes()).await;
                let _ = sock.write_all(&body).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    addr
}

fn settings(timeout_ms: u64) -> ProviderSettings {
    ProviderSettings {
        max_retries: 0,
        query_delay_ms: 0,
        base_backoff_ms: 10,
        max_delay_ms: 10,
        timeout_ms,
        jitter: 0.0,
    }
}

fn papers(addr: SocketAddr) -> Arc<SemanticScholar> {
    // The client's own bound is far below the provider's call timeout.
    let client = http_client("deep-research-test", Duration::from_millis(100)).unwrap();
    Arc::new(SemanticScholar::new(client, None).with_endpoint(format!("http://{addr}/search")))
}

#[tokio::test]
async fn slow_response_within_provider_timeout_succeeds() {
    let addr = serve(
        Duration::from_millis(300),
        "application/json",
        br#"{"data":[]}"#.to_vec(),
    )
    .await;
    let fetcher = Fetcher::new(
        Arc::new(Throttle::new(ThrottlePolicy::default())),
        Arc::new(Sanitizer::default()),
    )
    .register(papers(addr), settings(5_000));

    let task = AcquisitionTask::query("semantic_scholar", "heat pumps", 0).unwrap();
    let report = fetcher.acquire(vec![task], &CancellationToken::never()).await;
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].payload.bytes, br#"{"data":[]}"#);
}

#[tokio::test]
async fn provider_timeout_still_bounds_the_call() {
    let addr = serve(
        Duration::from_millis(500),
        "application/json",
        br#"{"data":[]}"#.to_vec(),
    )
    .await;
    let fetcher = Fetcher::new(
        Arc::new(Throttle::new(ThrottlePolicy::default())),
        Arc::new(Sanitizer::default()),
    )
    .register(papers(addr), settings(100));

    let task = AcquisitionTask::query("semantic_scholar", "heat pumps", 0).unwrap();
    let report = fetcher.acquire(vec![task], &CancellationToken::never()).await;
    assert!(report.items.is_empty());
    match &report.failures[0].error {
        FetchError::External { last, .. } => assert_eq!(*last, ProviderError::Timeout),
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_body_is_capped() {
    let addr = serve(
        Duration::ZERO,
        "text/plain",
        vec![b'x'; MAX_BODY_BYTES + 512 * 1024],
    )
    .await;
    let client = http_client("deep-research-test", Duration::from_secs(5)).unwrap();
    let page = WebPage::new(client);
    let task = AcquisitionTask::url("web", &format!("http://{addr}/big"), 0).unwrap();
    let payload = page.fetch(&task).await.unwrap();
    assert_eq!(payload.bytes.len(), MAX_BODY_BYTES);
    assert_eq!(payload.content_type, "text/plain");
}
