//! Transport collaborator
//!
//! Models never talk to the network themselves. They hand a
//! [`RequestSettings`] to a [`Transport`] and get back either a decoded
//! [`Response`] or a [`TransportFailure`]. The trait is `?Send`: components
//! are single-threaded and requests complete on the local task set.
//!
//! # Examples
//!
//! ```no_run
//! use libtriad::transport::{mock::MockTransport, RequestSettings, Transport};
//! use serde_json::json;
//!
//! # async fn example() {
//! let transport = MockTransport::new();
//! transport.reply_json("/api/login", json!({"ok": true}));
//!
//! let response = transport.send(RequestSettings::get("/api/login")).await;
//! assert!(response.is_ok());
//! # }
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// Scripted transport, shipped for integration tests and the demo
pub mod mock;

/// Request parameters, sent as a flat JSON object
pub type Params = Map<String, Value>;

/// Everything a transport needs to issue one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSettings {
    pub method: String,
    pub url: String,
    pub params: Params,
    /// How the body should be decoded: `json` or anything else for text
    pub response_type: String,
    pub headers: BTreeMap<String, String>,
}

impl RequestSettings {
    /// A bare GET expecting JSON, mostly useful in tests
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            params: Params::new(),
            response_type: "json".to_string(),
            headers: BTreeMap::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Undecoded response as it came off the wire
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// A successful call: decoded body plus the raw response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub result: Value,
    pub raw: RawResponse,
}

impl Response {
    /// Decode a raw response according to `response_type`
    ///
    /// A `json` body that does not parse becomes a `parsererror` failure
    /// carrying the raw response.
    pub fn decode(raw: RawResponse, response_type: &str) -> Result<Self, TransportFailure> {
        let result = if response_type.eq_ignore_ascii_case("json") {
            if raw.body.trim().is_empty() {
                Value::Null
            } else {
                match serde_json::from_str(&raw.body) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::debug!(error = %e, "response body is not valid JSON");
                        return Err(TransportFailure {
                            status: raw.status,
                            status_text: "parsererror".to_string(),
                            raw: Some(raw),
                        });
                    }
                }
            }
        } else {
            Value::String(raw.body.clone())
        };

        Ok(Self { result, raw })
    }
}

/// What a model's `request` listeners and success callback receive
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub result: Value,
    /// Parameters that were actually sent, correlation token included
    pub params: Params,
    pub raw: RawResponse,
}

/// Network or server failure, surfaced through the `error` event only
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{status} {status_text}")]
pub struct TransportFailure {
    pub status: u16,
    pub status_text: String,
    pub raw: Option<RawResponse>,
}

impl TransportFailure {
    pub fn new(status: u16, status_text: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            raw: None,
        }
    }
}

/// Outbound call primitive used by models
#[async_trait(?Send)]
pub trait Transport {
    /// Issue exactly one call
    ///
    /// # Errors
    ///
    /// Returns `TransportFailure` for network errors, non-success statuses and
    /// undecodable bodies.
    async fn send(&self, settings: RequestSettings) -> Result<Response, TransportFailure>;
}
