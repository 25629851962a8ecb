//! HTTP client that records every exchange it performs

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, HOST};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::HttpConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::suite::RequestSpec;

/// The request exactly as it was handed to the transport
///
/// Only framing headers computed by the transport itself (such as
/// `content-length`) are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestSnapshot {
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

/// The response exactly as the server returned it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ResponseSnapshot {
    /// Case-insensitive header lookup; the first value wins
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    async fn read(response: reqwest::Response) -> HarnessResult<Self> {
        let status = response.status().as_u16();
        let headers = header_pairs(response.headers());
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Per-test record of the latest exchange
#[derive(Debug, Default)]
pub struct TestContext {
    pub request: Option<RequestSnapshot>,
    pub response: Option<ResponseSnapshot>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// HTTP client bound to the server under test
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    scheme: String,
    host: String,
    port: u16,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url())
            .finish()
    }
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> HarnessResult<Self> {
        let inner = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            inner,
            scheme: config.scheme.clone(),
            host: config.host.clone(),
            port: config.port,
        })
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Unrecorded GET, used by the readiness probe
    pub async fn get(&self, path: &str) -> HarnessResult<ResponseSnapshot> {
        let response = self.inner.get(self.url(path)).send().await?;
        ResponseSnapshot::read(response).await
    }

    /// Perform `spec`, recording the request before it is sent and the response once read
    pub async fn send(
        &self,
        ctx: &mut TestContext,
        spec: &RequestSpec,
    ) -> HarnessResult<ResponseSnapshot> {
        let method = Method::from_bytes(spec.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| HarnessError::InvalidConfig(format!("invalid method: {}", spec.method)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &spec.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                HarnessError::InvalidConfig(format!("invalid header name: {}", name))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                HarnessError::InvalidConfig(format!("invalid header value: {}", value))
            })?;
            headers.append(name, value);
        }
        // Made explicit so the snapshot shows what the transport would otherwise add.
        if !headers.contains_key(HOST) {
            let host = HeaderValue::from_str(&format!("{}:{}", self.host, self.port))
                .map_err(|_| HarnessError::InvalidConfig(format!("invalid host: {}", self.host)))?;
            headers.insert(HOST, host);
        }
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        }

        let mut builder = self.inner.request(method, self.url(&spec.path)).headers(headers);
        if let Some(body) = &spec.body {
            builder = builder.body(body.clone());
        }
        let request = builder.build()?;

        ctx.request = Some(RequestSnapshot {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.port,
            method: request.method().to_string(),
            path: spec.path.clone(),
            headers: header_pairs(request.headers()),
            body: spec.body.clone(),
        });
        ctx.response = None;

        let response = self.inner.execute(request).await?;
        let snapshot = ResponseSnapshot::read(response).await?;
        ctx.response = Some(snapshot.clone());
        Ok(snapshot)
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
