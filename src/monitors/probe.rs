//! Probe executor - one HTTP call per invocation
//!
//! The executor never fails: transport problems (timeouts, refused
//! connections, malformed requests) become a [`CallRecord`] carrying the
//! failure sentinel and an error text.
//!
//! ```text
//! TargetConfig → ProbeRequest → ProbeTransport::send → status | TransportError → CallRecord
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{instrument, trace};

use crate::util::{default_headers, effective_headers};
use crate::{CallRecord, HttpMethod, TargetConfig};

/// Everything needed to issue one probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,

    /// Only sent with POST
    pub body: Option<String>,

    pub timeout: Duration,
}

impl ProbeRequest {
    pub fn for_target(target: &TargetConfig) -> Self {
        Self {
            method: target.method,
            url: target.url.clone(),
            headers: effective_headers(target),
            body: target.payload.clone(),
            timeout: target.timeout(),
        }
    }
}

/// Why a probe produced no HTTP status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Connection(String),
    Request(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "request timed out"),
            TransportError::Connection(msg) => write!(f, "connection error: {msg}"),
            TransportError::Request(msg) => write!(f, "request error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connection(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// A single blocking request/response exchange
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Perform the request and return the HTTP status code
    async fn send(&self, request: &ProbeRequest) -> Result<u16, TransportError>;
}

/// `reqwest`-backed transport; the client is shared across all probes
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> reqwest::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
        })
    }
}

#[async_trait]
impl ProbeTransport for HttpTransport {
    async fn send(&self, request: &ProbeRequest) -> Result<u16, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => {
                let builder = self.client.post(&request.url);
                match &request.body {
                    Some(body) => builder.body(body.clone()),
                    None => builder,
                }
            }
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.timeout(request.timeout).send().await?;
        let status = response.status().as_u16();

        // the call is only complete once the body has arrived
        response.bytes().await?;

        Ok(status)
    }
}

/// Outcome of an ad-hoc connection test
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionTest {
    pub ok: bool,
    pub message: String,
    pub elapsed_secs: f64,
}

/// Issues probes and turns their results into call records
#[derive(Clone)]
pub struct ProbeExecutor {
    transport: Arc<dyn ProbeTransport>,
}

impl ProbeExecutor {
    pub fn new(transport: Arc<dyn ProbeTransport>) -> Self {
        Self { transport }
    }

    pub fn http() -> reqwest::Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new()?)))
    }

    /// Send the request, enforcing its timeout regardless of the transport.
    async fn dispatch(&self, request: &ProbeRequest) -> (Result<u16, TransportError>, f64) {
        let start = Instant::now();

        let result = match tokio::time::timeout(request.timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        (result, start.elapsed().as_secs_f64())
    }

    /// Perform exactly one call against `target`.
    #[instrument(skip(self, target), fields(target = %target.name))]
    pub async fn call(&self, target: &TargetConfig) -> CallRecord {
        let request = ProbeRequest::for_target(target);
        let timestamp = Utc::now();

        trace!("{} {}", request.method, request.url);

        let (result, elapsed) = self.dispatch(&request).await;

        match result {
            Ok(status) => CallRecord::response(target.id, timestamp, elapsed, status),
            Err(e) => CallRecord::transport_failure(target.id, timestamp, elapsed, e.to_string()),
        }
    }

    /// One interactive call for validating a target before it is saved.
    ///
    /// Success means a status in `[200, 300)`.
    pub async fn test_connection(
        &self,
        url: &str,
        method: HttpMethod,
        headers: Option<BTreeMap<String, String>>,
        payload: Option<String>,
        timeout: Duration,
    ) -> ConnectionTest {
        let request = ProbeRequest {
            method,
            url: url.to_string(),
            headers: headers.filter(|h| !h.is_empty()).unwrap_or_else(default_headers),
            body: payload,
            timeout,
        };

        let (result, elapsed_secs) = self.dispatch(&request).await;

        let (ok, message) = match result {
            Ok(status) if (200..300).contains(&status) => {
                (true, format!("connection succeeded, status code: {status}"))
            }
            Ok(status) => (false, format!("request returned non-success status code: {status}")),
            Err(TransportError::Timeout) => (false, "request timed out".to_string()),
            Err(TransportError::Connection(_)) => {
                (false, "connection error, check that the URL is correct".to_string())
            }
            Err(e) => (false, e.to_string()),
        };

        ConnectionTest {
            ok,
            message,
            elapsed_secs,
        }
    }
}
