//! The statistics query surface
//!
//! `GET /statistics/{token}` answers a date token with exposition text.
//! Every response carries CORS headers so browser dashboards can read it.
//!
//! ## Metrics
//!
//! `connection.limit`: Configured connection ceiling
//! `connection.current`: Connections being served
//! `requests_received`: Requests received, by response status
//!

use std::{convert::Infallible, future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{
    HeaderMap, Method, StatusCode,
    header::{self, HeaderValue},
};
use http_body_util::Full;
use hyper::{Request, Response, body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use metrics::{counter, gauge};
use serde::Deserialize;
use tokio::{
    net::TcpListener,
    pin,
    sync::{Semaphore, TryAcquireError},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{
    aggregator::{self, Aggregator},
    store::SnapshotStore,
};

const ROUTE_PREFIX: &str = "/statistics/";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn default_binding_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_concurrent_requests_max() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Configuration of the query surface
pub struct Config {
    /// address -- IP plus port -- to bind to
    #[serde(default = "default_binding_addr")]
    pub binding_addr: SocketAddr,
    /// number of concurrent HTTP connections to allow
    #[serde(default = "default_concurrent_requests_max")]
    pub concurrent_requests_max: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binding_addr: default_binding_addr(),
            concurrent_requests_max: default_concurrent_requests_max(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by the query surface
pub enum Error {
    /// Wrapper for [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(io::Error),
}

/// Bind `config.binding_addr` and serve until `shutdown` resolves
///
/// # Errors
///
/// Function will error if the address cannot be bound.
pub async fn serve<S, F>(
    config: &Config,
    aggregator: Arc<Aggregator<S>>,
    shutdown: F,
) -> Result<(), Error>
where
    S: SnapshotStore + 'static,
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(config.binding_addr)
        .await
        .map_err(Error::Io)?;
    info!("Serving statistics on {}", config.binding_addr);
    run(listener, config.concurrent_requests_max, aggregator, shutdown).await
}

/// Serve connections from `listener` until `shutdown` resolves
///
/// Connections beyond `concurrency_limit` are dropped on accept. Once
/// `shutdown` resolves in-flight connections get a short grace period and
/// are then aborted.
///
/// # Errors
///
/// None known. The signature leaves room for listener faults.
pub async fn run<S, F>(
    listener: TcpListener,
    concurrency_limit: usize,
    aggregator: Arc<Aggregator<S>>,
    shutdown: F,
) -> Result<(), Error>
where
    S: SnapshotStore + 'static,
    F: Future<Output = ()>,
{
    let sem = Arc::new(Semaphore::new(concurrency_limit));
    let mut join_set = JoinSet::new();

    gauge!("connection.limit").set(concurrency_limit as f64);

    pin!(shutdown);
    loop {
        let claimed_permits = concurrency_limit - sem.available_permits();
        gauge!("connection.current").set(claimed_permits as f64);

        tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown signal received, stopping accept loop.");
                break;
            }

            incoming = listener.accept() => {
                let (stream, addr) = match incoming {
                    Ok(sa) => sa,
                    Err(e) => {
                        error!("Error accepting connection: {e}");
                        continue;
                    }
                };
                debug!("Accepted connection from {addr}");

                let sem = Arc::clone(&sem);
                let aggregator = Arc::clone(&aggregator);

                join_set.spawn(async move {
                    let permit = match sem.try_acquire() {
                        Ok(p) => p,
                        Err(TryAcquireError::Closed) => {
                            error!("Semaphore closed");
                            return;
                        }
                        Err(TryAcquireError::NoPermits) => {
                            warn!("httpd over connection capacity, load shedding");
                            drop(stream);
                            return;
                        }
                    };

                    let service = service_fn(move |req| handle(Arc::clone(&aggregator), req));
                    let builder = auto::Builder::new(TokioExecutor::new());
                    let serve_future =
                        builder.serve_connection_with_upgrades(TokioIo::new(stream), service);

                    if let Err(e) = serve_future.await {
                        error!("Error serving {addr}: {e}");
                    }
                    drop(permit);
                });
            }
        }
    }

    drop(listener);
    let drain = async { while join_set.join_next().await.is_some() {} };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!("Connections still open after {DRAIN_TIMEOUT:?}, aborting them");
        join_set.shutdown().await;
    }
    Ok(())
}

async fn handle<S>(
    aggregator: Arc<Aggregator<S>>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    S: SnapshotStore + 'static,
{
    let origin = allowed_origin(req.headers());
    let token = req
        .uri()
        .path()
        .strip_prefix(ROUTE_PREFIX)
        .filter(|token| !token.is_empty() && !token.contains('/'))
        .map(str::to_string);

    let mut response = match (req.method(), token) {
        (_, None) => plain(StatusCode::NOT_FOUND, "Not found."),
        (&Method::GET, Some(token)) => answer(aggregator, token).await,
        (&Method::OPTIONS, Some(_)) => plain(StatusCode::OK, ""),
        (_, Some(_)) => plain(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed."),
    };
    counter!("requests_received", "status" => response.status().as_str().to_string())
        .increment(1);
    allow_cors(response.headers_mut(), origin);
    Ok(response)
}

async fn answer<S>(aggregator: Arc<Aggregator<S>>, token: String) -> Response<Full<Bytes>>
where
    S: SnapshotStore + 'static,
{
    debug!(%token, "statistics requested");
    let answered = tokio::task::spawn_blocking(move || aggregator.answer_token(&token)).await;
    match answered {
        Ok(Ok(text)) => plain(StatusCode::OK, text),
        Ok(Err(
            err @ (aggregator::Error::InvalidDateRange { .. } | aggregator::Error::Query(_)),
        )) => plain(StatusCode::BAD_REQUEST, err.to_string()),
        Ok(Err(err @ aggregator::Error::NoDataForRequest)) => {
            plain(StatusCode::NOT_FOUND, err.to_string())
        }
        Ok(Err(err @ aggregator::Error::Store(_))) => {
            error!("Statistics lookup failed: {err}");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
        }
        Err(err) => {
            error!("Statistics task failed: {err}");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
        }
    }
}

fn plain(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

// The referring page, without its trailing slash, or `*` when absent.
fn allowed_origin(headers: &HeaderMap) -> HeaderValue {
    headers
        .get(header::REFERER)
        .and_then(|referer| referer.to_str().ok())
        .map(|referer| referer.trim_end_matches('/'))
        .filter(|referer| !referer.is_empty())
        .and_then(|referer| HeaderValue::from_str(referer).ok())
        .unwrap_or_else(|| HeaderValue::from_static("*"))
}

fn allow_cors(headers: &mut HeaderMap, origin: HeaderValue) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Authorization"),
    );
}
