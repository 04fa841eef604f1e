use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::{debug, error, info};
use tokio::net::TcpListener;
use tokio::time::{Duration, timeout};

use crate::balance::RoundRobin;
use crate::error::ProxyError;
use crate::rewrite::{RewrittenUrl, rewrite};
use crate::target::TargetList;

const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// The load balancing reverse proxy runtime.
///
/// Each inbound request takes the next round-robin target, gets its URL
/// rewritten onto that target, and is forwarded with both bodies streamed.
/// An unreachable upstream turns into a 502 for that request only; the
/// listener keeps serving.
pub struct ProxyServer {
    selector: RoundRobin,
    client: Client<HttpsConnector<HttpConnector>, Incoming>,
    upstream_timeout: Duration,
    dispatched: AtomicU64,
}

impl ProxyServer {
    pub fn new(targets: TargetList) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(10)
            .build(HttpsConnector::new());

        Self {
            selector: RoundRobin::new(targets),
            client,
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            dispatched: AtomicU64::new(0),
        }
    }

    pub fn with_upstream_timeout(mut self, upstream_timeout: Duration) -> Self {
        self.upstream_timeout = upstream_timeout;
        self
    }

    pub async fn run(self, addr: SocketAddr) -> Result<(), ProxyError> {
        self.bind(addr).await?.serve().await
    }

    /// Binds the listen address without serving yet, so callers binding to
    /// an ephemeral port can learn the actual address first.
    pub async fn bind(self, addr: SocketAddr) -> Result<BoundServer, ProxyError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(ProxyError::Io)?;
        Ok(BoundServer {
            listener,
            local_addr,
            server: Arc::new(self),
        })
    }

    async fn dispatch(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        let seq = self.dispatched.fetch_add(1, Ordering::Relaxed);
        let (index, target) = self.selector.next_target();
        let rewritten = rewrite(target, req.uri());
        info!(
            "[{}] {} {} -> target {} ({})",
            seq,
            req.method(),
            req.uri().path(),
            index + 1,
            rewritten.host
        );

        match self.forward(req, &rewritten).await {
            Ok(response) => response.map(|body| body.boxed()),
            Err(e) => {
                error!("[{}] {}", seq, e);
                gateway_error_response(&e)
            }
        }
    }

    async fn forward(
        &self,
        req: Request<Incoming>,
        rewritten: &RewrittenUrl,
    ) -> Result<Response<Incoming>, ProxyError> {
        let uri = outbound_uri(rewritten, req.uri().query())?;

        let (mut parts, body) = req.into_parts();
        parts.uri = uri;
        let outbound = Request::from_parts(parts, body);

        match timeout(self.upstream_timeout, self.client.request(outbound)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ProxyError::Upstream {
                target: rewritten.host.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ProxyError::Upstream {
                target: rewritten.host.clone(),
                reason: format!("no response within {}s", self.upstream_timeout.as_secs()),
            }),
        }
    }
}

/// A [`ProxyServer`] that holds its listener and is ready to serve.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    server: Arc<ProxyServer>,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn serve(self) -> Result<(), ProxyError> {
        info!(
            "http round robin load balancer listening on: {}",
            self.local_addr
        );
        for (i, target) in self.server.selector.targets().iter().enumerate() {
            info!("target {}: {}", i + 1, target);
        }

        loop {
            let (stream, remote_addr) = self.listener.accept().await.map_err(ProxyError::Io)?;
            let server = self.server.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.dispatch(req).await) }
                });

                if let Err(err) = ServerBuilder::new().serve_connection(io, service).await {
                    // Early client disconnects land here; they cancel the
                    // in-flight upstream work and are not upstream failures.
                    debug!("connection from {} ended: {}", remote_addr, err);
                }
            });
        }
    }
}

fn outbound_uri(rewritten: &RewrittenUrl, query: Option<&str>) -> Result<Uri, ProxyError> {
    let mut uri = format!(
        "{}://{}{}",
        rewritten.scheme,
        rewritten.host,
        rewritten.escaped_path()
    );
    if let Some(query) = query {
        uri.push('?');
        uri.push_str(query);
    }
    uri.parse()
        .map_err(|e: http::uri::InvalidUri| ProxyError::Uri(e.to_string()))
}

fn gateway_error_response(err: &ProxyError) -> Response<ProxyBody> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(full(format!("Proxy Error: {}", err)))
        .unwrap()
}

fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}
