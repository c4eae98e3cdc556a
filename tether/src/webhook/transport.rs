//! Delivery transport seam: the HTTP POST behind a trait so the retry
//! schedule and signature invariants are testable without sockets.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect/send failure: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,
}

/// POSTs one signed payload. Returns the HTTP status code.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &str,
        timeout: Duration,
    ) -> Result<u16, TransportError>;
}

/// Production transport over a shared reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &str,
        timeout: Duration,
    ) -> Result<u16, TransportError> {
        let mut request = self
            .client
            .post(url)
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .body(body.to_string());
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;
        Ok(response.status().as_u16())
    }
}

/// One recorded call seen by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct TransportCall {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub at: std::time::Instant,
}

impl TransportCall {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Scripted transport for tests: returns queued status codes in order (the
/// last one repeats) and records every call with its arrival time.
pub struct MockTransport {
    responses: Mutex<Vec<u16>>,
    cursor: Mutex<usize>,
    calls: Mutex<Vec<TransportCall>>,
}

impl MockTransport {
    pub fn new(responses: Vec<u16>) -> Self {
        Self {
            responses: Mutex::new(responses),
            cursor: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryTransport for MockTransport {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &str,
        _timeout: Duration,
    ) -> Result<u16, TransportError> {
        self.calls.lock().unwrap().push(TransportCall {
            url: url.to_string(),
            headers: headers.to_vec(),
            body: body.to_string(),
            at: std::time::Instant::now(),
        });
        let responses = self.responses.lock().unwrap();
        let mut cursor = self.cursor.lock().unwrap();
        let status = responses
            .get(*cursor)
            .or_else(|| responses.last())
            .copied()
            .unwrap_or(200);
        *cursor += 1;
        Ok(status)
    }
}
