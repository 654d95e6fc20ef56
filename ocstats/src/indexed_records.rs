//! Indexed records lookup
//!
//! The `opencitations_indexed_records` gauge is the sum of three counts
//! obtained from the public SPARQL endpoints: citations in INDEX,
//! expressions and agents in META. Every source carries its own fallback,
//! used whenever the endpoint cannot produce a count. The lookup never fails.
//!
//! A compiler run starts the lookup with [`Pending::spawn`] before reading
//! any row and collects it with [`Pending::join`] just before writing its
//! snapshot.

use std::time::Duration;

use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const SPARQL_RESULTS_XML: &str = "application/sparql-results+xml";

#[allow(clippy::unwrap_used)]
static FIRST_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:\w+:)?binding\b[^>]*>\s*<(?:\w+:)?literal\b[^>]*>([^<]*)</").unwrap()
});

#[derive(thiserror::Error, Debug)]
/// Errors produced by a single lookup
pub enum Error {
    /// Transport failure or timeout
    #[error("request to {endpoint} failed: {source}")]
    Request {
        /// Endpoint queried
        endpoint: String,
        /// Underlying reqwest error
        #[source]
        source: reqwest::Error,
    },
    /// The endpoint answered with a non-success status
    #[error("{endpoint} answered {status}")]
    Status {
        /// Endpoint queried
        endpoint: String,
        /// Status received
        status: reqwest::StatusCode,
    },
    /// The body held no integer binding
    #[error("{endpoint} returned no integer binding")]
    Payload {
        /// Endpoint queried
        endpoint: String,
    },
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// One count contributing to the gauge
pub struct Source {
    /// Name used in logs
    pub name: String,
    /// SPARQL endpoint URL
    pub endpoint: String,
    /// Query text, sent as the `query` parameter
    pub query: String,
    /// Value used when the endpoint does not produce one
    pub fallback: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Configuration of the indexed records lookup
pub struct Config {
    /// When false no request is made and the fallbacks are used
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Bound on each request
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// Bound on the wait once rows are exhausted
    #[serde(default = "default_join_timeout_seconds")]
    pub join_timeout_seconds: u64,
    /// The counts summed into the gauge
    #[serde(default = "default_sources")]
    pub sources: Vec<Source>,
}

fn default_enabled() -> bool {
    true
}

fn default_request_timeout_seconds() -> u64 {
    600
}

fn default_join_timeout_seconds() -> u64 {
    1_800
}

fn default_sources() -> Vec<Source> {
    vec![
        Source {
            name: "citations".to_string(),
            endpoint: "https://sparql.opencitations.net/index".to_string(),
            query: "PREFIX cito:<http://purl.org/spar/cito/>\n\
                    SELECT (COUNT(?citation) AS ?count) WHERE {\n    ?citation a cito:Citation .\n}"
                .to_string(),
            fallback: 2_216_426_689,
        },
        Source {
            name: "expressions".to_string(),
            endpoint: "https://sparql.opencitations.net/meta".to_string(),
            query: "PREFIX fabio: <http://purl.org/spar/fabio/>\n\n\
                    SELECT (COUNT(?br) AS ?total)\nWHERE {\n  ?br a fabio:Expression .\n}"
                .to_string(),
            fallback: 124_526_660,
        },
        Source {
            name: "agents".to_string(),
            endpoint: "https://sparql.opencitations.net/meta".to_string(),
            query: "SELECT (COUNT(?ra) as ?total) {\n      ?ra a <http://xmlns.com/foaf/0.1/Agent>.\n}"
                .to_string(),
            fallback: 341_540_052,
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            request_timeout_seconds: default_request_timeout_seconds(),
            join_timeout_seconds: default_join_timeout_seconds(),
            sources: default_sources(),
        }
    }
}

impl Config {
    /// Sum of every source's fallback
    #[must_use]
    pub fn fallback_total(&self) -> u64 {
        self.sources
            .iter()
            .map(|source| source.fallback)
            .fold(0, u64::saturating_add)
    }
}

/// The integer in the first binding of a SPARQL XML results document
#[must_use]
pub fn parse_count(body: &str) -> Option<u64> {
    FIRST_LITERAL.captures(body)?[1].trim().parse().ok()
}

/// Query one source
///
/// # Errors
///
/// Function will error if the request fails or times out, the endpoint
/// answers with a non-success status or the body holds no integer binding.
pub async fn lookup(
    client: &reqwest::Client,
    source: &Source,
    timeout: Duration,
) -> Result<u64, Error> {
    let endpoint = || source.endpoint.clone();
    let resp = client
        .get(&source.endpoint)
        .query(&[("query", source.query.as_str())])
        .header(reqwest::header::ACCEPT, SPARQL_RESULTS_XML)
        .timeout(timeout)
        .send()
        .await
        .map_err(|source| Error::Request {
            endpoint: endpoint(),
            source,
        })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Status {
            endpoint: endpoint(),
            status,
        });
    }

    let body = resp.text().await.map_err(|source| Error::Request {
        endpoint: endpoint(),
        source,
    })?;
    parse_count(&body).ok_or_else(|| Error::Payload {
        endpoint: endpoint(),
    })
}

/// Query every source in turn and sum the results, fallbacks standing in
/// for failed sources
pub async fn resolve(client: &reqwest::Client, config: &Config) -> u64 {
    let timeout = Duration::from_secs(config.request_timeout_seconds);
    let mut total: u64 = 0;
    for source in &config.sources {
        let value = match lookup(client, source, timeout).await {
            Ok(value) => {
                info!(source = %source.name, value, "indexed records counted");
                value
            }
            Err(err) => {
                warn!(source = %source.name, fallback = source.fallback, "indexed records lookup failed: {err}");
                counter!("indexed_records_fallbacks").increment(1);
                source.fallback
            }
        };
        total = total.saturating_add(value);
    }
    total
}

/// A lookup running alongside row processing
///
/// Dropping a `Pending` aborts the lookup.
#[derive(Debug)]
pub struct Pending {
    handle: Option<JoinHandle<u64>>,
    fallback: u64,
    join_timeout: Duration,
}

impl Pending {
    /// Start the lookup on the current runtime
    ///
    /// Nothing is started when the lookup is disabled.
    #[must_use]
    pub fn spawn(config: &Config) -> Self {
        Self::spawn_with(config, Duration::from_secs(config.join_timeout_seconds))
    }

    fn spawn_with(config: &Config, join_timeout: Duration) -> Self {
        let fallback = config.fallback_total();
        if !config.enabled {
            info!(fallback, "indexed records lookup disabled");
            return Self {
                handle: None,
                fallback,
                join_timeout,
            };
        }

        let config = config.clone();
        let handle = tokio::spawn(async move {
            match reqwest::Client::builder().build() {
                Ok(client) => resolve(&client, &config).await,
                Err(err) => {
                    warn!("unable to build HTTP client for indexed records lookup: {err}");
                    config.fallback_total()
                }
            }
        });
        Self {
            handle: Some(handle),
            fallback,
            join_timeout,
        }
    }

    /// Wait for the lookup, at most the configured join timeout
    ///
    /// Returns the sum of every fallback if the lookup does not finish in
    /// time or its task fails.
    pub async fn join(mut self) -> u64 {
        let fallback = self.fallback;
        let join_timeout = self.join_timeout;
        let Some(handle) = self.handle.as_mut() else {
            return fallback;
        };
        match tokio::time::timeout(join_timeout, handle).await {
            Ok(Ok(total)) => total,
            Ok(Err(err)) => {
                warn!(fallback, "indexed records lookup task failed: {err}");
                fallback
            }
            Err(_) => {
                warn!(fallback, "indexed records lookup timed out after {join_timeout:?}");
                fallback
            }
        }
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, net::SocketAddr};

    use warp::Filter;

    use super::*;

    fn results(count: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<sparql xmlns="http://www.w3.org/2005/sparql-results#">
  <head><variable name="count"/></head>
  <results>
    <result>
      <binding name="count">
        <literal datatype="http://www.w3.org/2001/XMLSchema#integer">{count}</literal>
      </binding>
    </result>
  </results>
</sparql>"#
        )
    }

    fn source(name: &str, endpoint: String, fallback: u64) -> Source {
        Source {
            name: name.to_string(),
            endpoint,
            query: "SELECT (COUNT(?s) AS ?count) { ?s ?p ?o }".to_string(),
            fallback,
        }
    }

    fn config(sources: Vec<Source>) -> Config {
        Config {
            enabled: true,
            request_timeout_seconds: 5,
            join_timeout_seconds: 30,
            sources,
        }
    }

    async fn endpoint() -> SocketAddr {
        let count = warp::path("count")
            .and(warp::query::<HashMap<String, String>>())
            .map(|params: HashMap<String, String>| {
                let body = if params.get("query").is_some_and(|q| q.contains("COUNT")) {
                    results("2216426700")
                } else {
                    "missing query".to_string()
                };
                warp::reply::with_header(body, "content-type", SPARQL_RESULTS_XML)
            });
        let garbage = warp::path("garbage").map(|| "<html>maintenance</html>");
        let broken = warp::path("broken").map(|| {
            warp::reply::with_status("oops", warp::http::StatusCode::INTERNAL_SERVER_ERROR)
        });
        let slow = warp::path("slow").then(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            results("1")
        });

        let (addr, serve_fut) =
            warp::serve(count.or(garbage).or(broken).or(slow)).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(serve_fut);
        addr
    }

    fn closed_port() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr")
    }

    #[test]
    fn parses_first_binding() {
        assert_eq!(parse_count(&results("2216426689")), Some(2_216_426_689));
        assert_eq!(parse_count(&results(" 42 ")), Some(42));
        assert_eq!(
            parse_count("<s:binding name=\"c\"><s:literal>7</s:literal></s:binding>"),
            Some(7)
        );
        assert_eq!(parse_count(&results("many")), None);
        assert_eq!(parse_count(&results("-3")), None);
        assert_eq!(parse_count("<html></html>"), None);
    }

    #[test]
    fn default_fallback_total() {
        assert_eq!(
            Config::default().fallback_total(),
            2_216_426_689 + 124_526_660 + 341_540_052
        );
    }

    #[tokio::test]
    async fn each_source_falls_back_independently() {
        let addr = endpoint().await;
        let config = config(vec![
            source("ok", format!("http://{addr}/count"), 1),
            source("garbage", format!("http://{addr}/garbage"), 20),
            source("broken", format!("http://{addr}/broken"), 300),
            source("down", format!("http://{}/count", closed_port()), 4_000),
        ]);

        let client = reqwest::Client::new();
        assert_eq!(resolve(&client, &config).await, 2_216_426_700 + 4_320);
    }

    #[tokio::test]
    async fn lookup_errors_are_typed() {
        let addr = endpoint().await;
        let client = reqwest::Client::new();
        let timeout = Duration::from_secs(5);

        let garbage = source("garbage", format!("http://{addr}/garbage"), 0);
        assert!(matches!(
            lookup(&client, &garbage, timeout).await,
            Err(Error::Payload { .. })
        ));
        let broken = source("broken", format!("http://{addr}/broken"), 0);
        assert!(matches!(
            lookup(&client, &broken, timeout).await,
            Err(Error::Status { .. })
        ));
        let slow = source("slow", format!("http://{addr}/slow"), 0);
        assert!(matches!(
            lookup(&client, &slow, Duration::from_millis(100)).await,
            Err(Error::Request { .. })
        ));
    }

    #[tokio::test]
    async fn pending_joins_the_lookup() {
        let addr = endpoint().await;
        let pending = Pending::spawn(&config(vec![source("ok", format!("http://{addr}/count"), 1)]));
        assert_eq!(pending.join().await, 2_216_426_700);
    }

    #[tokio::test]
    async fn join_timeout_yields_fallback_total() {
        let addr = endpoint().await;
        let config = config(vec![
            source("slow", format!("http://{addr}/slow"), 10),
            source("ok", format!("http://{addr}/count"), 5),
        ]);
        let pending = Pending::spawn_with(&config, Duration::from_millis(100));
        assert_eq!(pending.join().await, 15);
    }

    #[tokio::test]
    async fn disabled_lookup_makes_no_requests() {
        let mut config = config(vec![source("down", format!("http://{}/count", closed_port()), 9)]);
        config.enabled = false;
        let pending = Pending::spawn(&config);
        assert!(pending.handle.is_none());
        assert_eq!(pending.join().await, 9);
    }
}
