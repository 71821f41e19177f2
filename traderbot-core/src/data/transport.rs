//! HTTP seam used by every network collector.
//!
//! Collectors only ever issue GET requests with a query string, so the seam is
//! a single method. `ReqwestTransport` is the production implementation;
//! `ScriptedTransport` replays canned responses for tests and offline replays.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Status code and body of a completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Other(String),
}

pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, TransportError>;
}

/// Blocking `reqwest` client with a per-request timeout.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        tracing::debug!(url, ?query, "GET");
        let resp = self.client.get(url).query(query).send().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .map_err(|e| TransportError::Other(format!("reading body: {e}")))?;
        Ok(HttpResponse { status, body })
    }
}

/// A request seen by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

type Responder = Box<dyn Fn(&RecordedRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

/// Replays queued responses in order, then falls back to a responder
/// function (or a 404) once the queue is drained. Every request is recorded.
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Self {
        Self {
            queue: Mutex::new(responses.into()),
            responder: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request by calling `f`.
    pub fn from_fn(
        f: impl Fn(&RecordedRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(f)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl HttpTransport for ScriptedTransport {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        let request = RecordedRequest {
            url: url.to_string(),
            query: query.to_vec(),
        };
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }
        let queued = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match (queued, &self.responder) {
            (Some(resp), _) => resp,
            (None, Some(f)) => f(&request),
            (None, None) => Ok(HttpResponse::status(404, "no scripted response")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_replays_in_order_then_404() {
        let t = ScriptedTransport::new(vec![
            Ok(HttpResponse::ok("first")),
            Err(TransportError::Timeout("slow".into())),
        ]);
        assert_eq!(t.get("u", &[]).unwrap().body, "first");
        assert!(t.get("u", &[]).is_err());
        assert_eq!(t.get("u", &[]).unwrap().status, 404);
        assert_eq!(t.request_count(), 3);
    }

    #[test]
    fn responder_sees_query() {
        let t = ScriptedTransport::from_fn(|req| {
            Ok(HttpResponse::ok(req.param("pair").unwrap_or("none").to_string()))
        });
        let q = vec![("pair".to_string(), "XBTUSD".to_string())];
        assert_eq!(t.get("u", &q).unwrap().body, "XBTUSD");
        assert_eq!(t.requests()[0].param("pair"), Some("XBTUSD"));
    }

    #[test]
    fn success_range() {
        assert!(HttpResponse::status(204, "").is_success());
        assert!(!HttpResponse::status(429, "").is_success());
    }
}
