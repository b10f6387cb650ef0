//! Request/response types and the pass-through network seam.
//!
//! Everything that leaves the process goes through [`Network`], so the
//! worker and its tests can swap the real origin for a scripted one.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Returns true if `name` is a hop-by-hop header.
#[must_use]
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Where a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Served {
    /// Fetched from the origin.
    Network,
    /// Read back from the cache store.
    Cache,
}

impl Served {
    /// Value used in the `x-echonet-source` response header.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Cache => "cache",
        }
    }
}

/// An intercepted request.
///
/// `key` is the path and query of the request URL; it doubles as the cache key.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub key: String,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl Request {
    /// Creates a request with the given method and key.
    #[must_use]
    pub fn new(method: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            key: key.into(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    /// Creates a `GET` request.
    #[must_use]
    pub fn get(key: impl Into<String>) -> Self {
        Self::new("GET", key)
    }

    /// Adds a header (names are stored lowercase).
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Path component of the key, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.key.split(['?', '#']).next().unwrap_or_default()
    }

    /// Only `GET` requests can be matched against the cache.
    #[must_use]
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

/// A response, either fresh from the network or replayed from the cache.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub served: Served,
}

impl Response {
    /// Creates a network response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
            served: Served::Network,
        }
    }

    /// Adds a header (names are stored lowercase).
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// True for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Looks up a header by name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Abstraction over the origin the worker fetches from.
#[async_trait]
pub trait Network: Send + Sync {
    /// Performs the request against the origin.
    ///
    /// Transport failures (offline, refused, reset) are errors; any status the
    /// origin answers with, including 4xx/5xx, is a successful fetch.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Builds the shared HTTP client used for origin and backend requests.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
        .map_err(Error::from)
}

/// [`Network`] backed by `reqwest`, resolving request keys against an origin.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
    origin: String,
}

impl HttpNetwork {
    /// Creates a network for `origin` (e.g. `http://127.0.0.1:5000`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(origin: &str) -> Result<Self> {
        Ok(Self::with_client(build_http_client()?, origin))
    }

    /// Creates a network reusing an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, origin: &str) -> Self {
        Self {
            client,
            origin: origin.trim_end_matches('/').to_string(),
        }
    }

    /// The origin requests are resolved against.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn url_for(&self, key: &str) -> String {
        if key.starts_with('/') {
            format!("{}{key}", self.origin)
        } else {
            format!("{}/{key}", self.origin)
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::InvalidState(format!("bad method {}: {e}", request.method)))?;

        let mut builder = self.client.request(method, self.url_for(&request.key));
        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await?;

        log::debug!("{} {} -> {status}", request.method, request.key);
        Ok(Response {
            status,
            headers,
            body,
            served: Served::Network,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::{get, post};

    async fn spawn_origin() -> String {
        let app = Router::new()
            .route("/static/app.js", get(|| async { "console.log('hi')" }))
            .route("/echo", post(|body: String| async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn request_path_strips_query() {
        let req = Request::get("/info?x=1");
        assert_eq!(req.path(), "/info");
        assert!(req.is_get());
        assert!(!Request::new("post", "/task").is_get());
    }

    #[test]
    fn hop_by_hop_headers_are_recognised() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(!is_hop_by_hop("content-type"));
    }

    #[test]
    fn url_for_joins_origin_and_key() {
        let net = HttpNetwork::with_client(reqwest::Client::new(), "http://host:5000/");
        assert_eq!(net.url_for("/info"), "http://host:5000/info");
        assert_eq!(net.url_for("nodes"), "http://host:5000/nodes");
    }

    #[tokio::test]
    async fn http_network_fetches_from_origin() {
        let origin = spawn_origin().await;
        let net = HttpNetwork::new(&origin).unwrap();

        let resp = net.fetch(&Request::get("/static/app.js")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], b"console.log('hi')");
        assert_eq!(resp.served, Served::Network);

        let missing = net.fetch(&Request::get("/nope")).await.unwrap();
        assert_eq!(missing.status, 404);
    }

    #[tokio::test]
    async fn http_network_forwards_body() {
        let origin = spawn_origin().await;
        let net = HttpNetwork::new(&origin).unwrap();

        let req = Request::new("POST", "/echo").with_body("ping");
        let resp = net.fetch(&req).await.unwrap();
        assert_eq!(&resp.body[..], b"ping");
    }

    #[tokio::test]
    async fn http_network_reports_transport_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let net = HttpNetwork::new(&format!("http://{addr}")).unwrap();
        let err = net.fetch(&Request::get("/info")).await.unwrap_err();
        assert!(err.is_network_failure());
    }
}
