//! Outbound HTTP request operation
//!
//! Sends one request per target using the headers of the session the job was
//! assigned to. Static headers from config go on first and session headers
//! replace them on conflict, so a session can always override its identity.

use std::str::FromStr;
use std::time::Duration;

use operation::{Operation, OperationError, OperationFuture};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::HeaderInjection;
use crate::session::SessionState;

/// One request to make in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTarget {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestTarget {
    /// Check that the method and URL can be sent.
    pub fn validate(&self) -> Result<(), String> {
        Method::from_str(&self.method).map_err(|_| format!("invalid method: {}", self.method))?;
        let url = Url::parse(&self.url).map_err(|e| format!("invalid url {}: {e}", self.url))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(format!("unsupported url scheme: {other}")),
        }
    }
}

/// Result of a request that came back 2xx.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    pub bytes: usize,
}

/// Sends `RequestTarget`s with a session's headers attached.
pub struct HttpRequestOperation {
    client: reqwest::Client,
    static_headers: HeaderMap,
    timeout: Duration,
}

impl HttpRequestOperation {
    /// Build the operation, skipping static headers that are not valid HTTP.
    ///
    /// `Config::load` already rejects those, so this only matters for
    /// headers built in code.
    pub fn new(client: reqwest::Client, headers: &[HeaderInjection], timeout: Duration) -> Self {
        let mut static_headers = HeaderMap::new();
        for injection in headers {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            let value = match HeaderValue::from_str(&injection.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            static_headers.insert(name, value);
        }
        Self {
            client,
            static_headers,
            timeout,
        }
    }

    async fn send(
        &self,
        session: &SessionState,
        target: &RequestTarget,
    ) -> operation::Result<HttpResponse> {
        let method = Method::from_str(&target.method)
            .map_err(|_| OperationError::Failed(format!("invalid method: {}", target.method)))?;

        let mut headers = self.static_headers.clone();
        for (name, value) in session.header_pairs() {
            headers.insert(name, value);
        }

        let mut request = self
            .client
            .request(method, &target.url)
            .timeout(self.timeout);

        if let Some(body) = &target.body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| OperationError::Failed(format!("encoding body: {e}")))?;
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            request = request.body(bytes);
        }

        let response = request
            .headers(headers)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(url = %target.url, status = status.as_u16(), "target rejected request");
            return Err(OperationError::Rejected {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        Ok(HttpResponse {
            status: status.as_u16(),
            bytes: body.len(),
        })
    }

    fn classify(&self, e: reqwest::Error) -> OperationError {
        if e.is_timeout() {
            OperationError::Timeout(self.timeout)
        } else {
            OperationError::Transport(e.to_string())
        }
    }
}

impl Operation<SessionState, RequestTarget> for HttpRequestOperation {
    type Output = HttpResponse;

    fn name(&self) -> &str {
        "http_request"
    }

    fn execute<'a>(
        &'a self,
        session: &'a SessionState,
        target: &'a RequestTarget,
    ) -> OperationFuture<'a, HttpResponse> {
        Box::pin(self.send(session, target))
    }
}
