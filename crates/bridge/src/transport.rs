//! Upstream transport seam.
//!
//! All outbound network I/O funnels through [`Transport`], so routing logic
//! can be tested against a fake that records calls instead of opening
//! sockets.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// A single outbound HTTP request, fully described.
#[derive(Debug, Clone)]
pub struct HttpCall {
    pub method: String,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl HttpCall {
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

/// The upstream's answer, body kept raw until normalization.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpReply {
    /// Normalize the body into JSON: parsed JSON when the upstream declares
    /// it, plain text for valid UTF-8, base64-wrapped otherwise.
    #[must_use]
    pub fn body_json(&self) -> Value {
        let is_json = self
            .content_type
            .as_deref()
            .and_then(|ct| ct.parse::<mime::Mime>().ok())
            .is_some_and(|m| {
                m.subtype() == mime::JSON || m.suffix().is_some_and(|s| s == mime::JSON)
            });
        if is_json {
            if let Ok(value) = serde_json::from_slice::<Value>(&self.body) {
                return value;
            }
        }
        match std::str::from_utf8(&self.body) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => {
                use base64::Engine as _;
                json!({
                    "encoding": "base64",
                    "contentType": self.content_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(&self.body),
                })
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("invalid upstream URL {url}: {message}")]
    BadUrl { url: String, message: String },
}

/// Outbound call channel. One implementation talks real HTTP; tests install
/// fakes that script replies and count invocations.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, call: HttpCall) -> Result<HttpReply, TransportError>;
}

/// Production transport over a shared reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
    call_timeout: Duration,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(call_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            call_timeout,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, call: HttpCall) -> Result<HttpReply, TransportError> {
        let method: reqwest::Method =
            call.method
                .parse()
                .map_err(|_| TransportError::BadUrl {
                    url: call.url.clone(),
                    message: format!("unsupported method {}", call.method),
                })?;

        let mut request = self
            .client
            .request(method, &call.url)
            .timeout(self.call_timeout);
        if !call.query.is_empty() {
            request = request.query(&call.query);
        }
        for (name, value) in &call.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout {
                    url: call.url.clone(),
                }
            } else {
                TransportError::Transport {
                    url: call.url.clone(),
                    message: err.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Transport {
                url: call.url.clone(),
                message: err.to_string(),
            })?
            .to_vec();

        Ok(HttpReply {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_bodies_parse_when_declared() {
        let reply = HttpReply {
            status: 200,
            content_type: Some("application/json; charset=utf-8".to_string()),
            body: br#"{"ok":true}"#.to_vec(),
        };
        assert_eq!(reply.body_json(), json!({"ok": true}));
    }

    #[test]
    fn problem_json_suffix_counts_as_json() {
        let reply = HttpReply {
            status: 404,
            content_type: Some("application/problem+json".to_string()),
            body: br#"{"title":"missing"}"#.to_vec(),
        };
        assert_eq!(reply.body_json(), json!({"title": "missing"}));
    }

    #[test]
    fn utf8_text_stays_text() {
        let reply = HttpReply {
            status: 200,
            content_type: Some("text/plain".to_string()),
            body: b"hello".to_vec(),
        };
        assert_eq!(reply.body_json(), json!("hello"));
    }

    #[test]
    fn binary_bodies_wrap_as_base64() {
        let reply = HttpReply {
            status: 200,
            content_type: Some("application/octet-stream".to_string()),
            body: vec![0xff, 0xfe, 0x00],
        };
        let value = reply.body_json();
        assert_eq!(value["encoding"], "base64");
        assert_eq!(value["data"], "//4A");
    }
}
