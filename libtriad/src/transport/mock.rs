//! Scripted transport for testing
//!
//! `MockTransport` answers requests from a per-URL script and records every
//! `RequestSettings` it receives, so tests can assert on the exact address,
//! parameters and headers a model sent without any network access.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;

use super::{RawResponse, RequestSettings, Response, Transport, TransportFailure};

/// A scripted answer for one URL
#[derive(Debug, Clone)]
pub enum MockReply {
    /// 200 with a JSON body
    Json(Value),
    /// 200 with a plain body
    Text(String),
    /// Non-success status
    Failure { status: u16, status_text: String },
}

/// Transport that replays scripted replies
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: RefCell<HashMap<String, MockReply>>,
    requests: RefCell<Vec<RequestSettings>>,
    delay: Cell<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with a JSON body
    pub fn reply_json(&self, url: &str, body: Value) {
        self.script(url, MockReply::Json(body));
    }

    pub fn reply_text(&self, url: &str, body: &str) {
        self.script(url, MockReply::Text(body.to_string()));
    }

    /// Fail every request to `url` with the given status
    pub fn fail(&self, url: &str, status: u16, status_text: &str) {
        self.script(
            url,
            MockReply::Failure {
                status,
                status_text: status_text.to_string(),
            },
        );
    }

    /// Replace the reply for `url`; replies stay in place until replaced
    pub fn script(&self, url: &str, reply: MockReply) {
        self.replies.borrow_mut().insert(url.to_string(), reply);
    }

    /// Simulate network latency before every reply
    pub fn with_delay(self, delay: Duration) -> Self {
        self.delay.set(delay);
        self
    }

    /// All requests received so far, oldest first
    pub fn requests(&self) -> Vec<RequestSettings> {
        self.requests.borrow().clone()
    }

    pub fn last_request(&self) -> Option<RequestSettings> {
        self.requests.borrow().last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.requests.borrow().len()
    }

    fn raw(status: u16, status_text: &str, body: String) -> RawResponse {
        let mut headers = BTreeMap::new();
        headers.insert("x-mock".to_string(), "true".to_string());
        RawResponse {
            status,
            status_text: status_text.to_string(),
            headers,
            body,
        }
    }
}

#[async_trait(?Send)]
impl Transport for MockTransport {
    async fn send(&self, settings: RequestSettings) -> Result<Response, TransportFailure> {
        let reply = self.replies.borrow().get(&settings.url).cloned();
        let response_type = settings.response_type.clone();
        tracing::debug!(method = %settings.method, url = %settings.url, "mock transport received request");
        self.requests.borrow_mut().push(settings);

        let delay = self.delay.get();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        match reply {
            Some(MockReply::Json(body)) => {
                let body = serde_json::to_string(&body).unwrap_or_default();
                Response::decode(Self::raw(200, "OK", body), &response_type)
            }
            Some(MockReply::Text(body)) => {
                Response::decode(Self::raw(200, "OK", body), &response_type)
            }
            Some(MockReply::Failure {
                status,
                status_text,
            }) => Err(TransportFailure {
                status,
                raw: Some(Self::raw(status, &status_text, String::new())),
                status_text,
            }),
            None => Err(TransportFailure {
                status: 404,
                status_text: "Not Found".to_string(),
                raw: Some(Self::raw(404, "Not Found", String::new())),
            }),
        }
    }
}
