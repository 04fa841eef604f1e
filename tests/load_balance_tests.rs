//! End-to-end tests running the load balancer against real backend servers
//! on ephemeral ports.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;

use carousel::server::ProxyServer;
use carousel::target::TargetList;

/// Starts a backend that answers every request with "<name> <path-and-query>".
async fn spawn_backend(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| async move {
                    let body = format!("{} {}", name, req.uri());
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

async fn spawn_proxy(targets: TargetList) -> SocketAddr {
    let bound = ProxyServer::new(targets)
        .with_upstream_timeout(Duration::from_secs(5))
        .bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = bound.local_addr();
    tokio::spawn(async move {
        let _ = bound.serve().await;
    });
    addr
}

fn test_client() -> Client<HttpConnector, Empty<Bytes>> {
    Client::builder(TokioExecutor::new()).build_http()
}

async fn get(client: &Client<HttpConnector, Empty<Bytes>>, url: &str) -> (StatusCode, String) {
    let uri: Uri = url.parse().unwrap();
    let request = Request::builder()
        .uri(uri)
        .body(Empty::<Bytes>::new())
        .unwrap();
    let response = client.request(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

fn targets_for(addrs: &[SocketAddr]) -> TargetList {
    let entries: Vec<String> = addrs.iter().map(|a| format!("http://{}", a)).collect();
    TargetList::load(entries.iter().map(String::as_str)).unwrap()
}

#[tokio::test]
async fn test_sequential_requests_cycle_over_targets() {
    let b1 = spawn_backend("one").await;
    let b2 = spawn_backend("two").await;
    let b3 = spawn_backend("three").await;
    let proxy = spawn_proxy(targets_for(&[b1, b2, b3])).await;

    let client = test_client();
    let mut bodies = Vec::new();
    for _ in 0..6 {
        let (status, body) = get(&client, &format!("http://{}/v1", proxy)).await;
        assert_eq!(status, StatusCode::OK);
        bodies.push(body);
    }

    assert_eq!(
        bodies,
        vec!["one /v1", "two /v1", "three /v1", "one /v1", "two /v1", "three /v1"]
    );
}

#[tokio::test]
async fn test_unreachable_target_fails_only_its_own_turns() {
    let b1 = spawn_backend("one").await;
    // Grab a port with no listener behind it.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);
    let b3 = spawn_backend("three").await;
    let proxy = spawn_proxy(targets_for(&[b1, dead_addr, b3])).await;

    let client = test_client();
    let mut statuses = Vec::new();
    for _ in 0..6 {
        let (status, _) = get(&client, &format!("http://{}/", proxy)).await;
        statuses.push(status);
    }

    assert_eq!(
        statuses,
        vec![
            StatusCode::OK,
            StatusCode::BAD_GATEWAY,
            StatusCode::OK,
            StatusCode::OK,
            StatusCode::BAD_GATEWAY,
            StatusCode::OK,
        ]
    );

    // The listener keeps serving after the failures.
    let (status, body) = get(&client, &format!("http://{}/", proxy)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "one /");
}

#[tokio::test]
async fn test_query_string_passes_through_unchanged() {
    let b1 = spawn_backend("one").await;
    let proxy = spawn_proxy(targets_for(&[b1])).await;

    let client = test_client();
    let (status, body) = get(&client, &format!("http://{}/search?q=a%20b&page=2", proxy)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "one /search?q=a%20b&page=2");
}

#[tokio::test]
async fn test_target_path_prefix_is_joined() {
    let b1 = spawn_backend("one").await;
    let entries = vec![format!("http://{}/api/", b1)];
    let targets = TargetList::load(entries.iter().map(String::as_str)).unwrap();
    let proxy = spawn_proxy(targets).await;

    let client = test_client();
    let (status, body) = get(&client, &format!("http://{}/v1", proxy)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "one /api/v1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_balance_across_targets() {
    let b1 = spawn_backend("one").await;
    let b2 = spawn_backend("two").await;
    let b3 = spawn_backend("three").await;
    let proxy = spawn_proxy(targets_for(&[b1, b2, b3])).await;

    let mut join_set = tokio::task::JoinSet::new();
    for _ in 0..30 {
        let client = test_client();
        let url = format!("http://{}/load", proxy);
        join_set.spawn(async move { get(&client, &url).await });
    }

    let mut counts = std::collections::HashMap::new();
    while let Some(result) = join_set.join_next().await {
        let (status, body) = result.unwrap();
        assert_eq!(status, StatusCode::OK);
        let name = body.split_whitespace().next().unwrap().to_string();
        *counts.entry(name).or_insert(0) += 1;
    }

    // 30 dispatches over 3 targets: the atomic cursor keeps the split exact.
    assert_eq!(counts.get("one"), Some(&10));
    assert_eq!(counts.get("two"), Some(&10));
    assert_eq!(counts.get("three"), Some(&10));
}
