//! HTTP transport to instrument services.
//!
//! The scheduler only needs two calls: a GET of the status route and a JSON
//! POST of an action. Both go through the [`Transport`] trait so tests can
//! replace the network with [`MockTransport`](super::mock::MockTransport).

use crate::error::{AppResult, SchedulerError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// Raw reply of an HTTP call: status code and body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status code
    pub status: u16,
    /// Body text
    pub body: String,
}

impl HttpReply {
    /// Reply with `status` and `body`.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 200 reply with a JSON body.
    pub fn ok_json(body: &Value) -> Self {
        Self::new(200, body.to_string())
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as a JSON object.
    pub fn json_object(&self, url: &str) -> AppResult<Map<String, Value>> {
        match serde_json::from_str::<Value>(&self.body) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(SchedulerError::protocol(
                url,
                format!("expected a JSON object, got {}", json_type_name(&other)),
            )),
            Err(e) => Err(SchedulerError::protocol(url, format!("invalid JSON: {e}"))),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Blocking request/response access to instrument services.
///
/// Implementations return `Err` only for transport failures; non-2xx replies
/// come back as `Ok` so callers can classify them.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `GET url`.
    async fn get(&self, url: &str) -> AppResult<HttpReply>;

    /// `POST url` with `body` as JSON.
    async fn post_json(&self, url: &str, body: &Value) -> AppResult<HttpReply>;
}

/// [`Transport`] over reqwest with a per-call timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Client whose every call times out after `timeout`.
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> AppResult<HttpReply> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpReply { status, body })
    }

    async fn post_json(&self, url: &str, body: &Value) -> AppResult<HttpReply> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpReply { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_json_object_accepts_object() {
        let reply = HttpReply::ok_json(&json!({"value": "ready", "extra": 1}));
        let map = reply.json_object("http://imx/status").unwrap();
        assert_eq!(map.get("value"), Some(&json!("ready")));
    }

    #[test]
    fn test_json_object_rejects_array_and_garbage() {
        let err = HttpReply::new(200, "[1, 2]")
            .json_object("http://imx/status")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("an array"));

        let err = HttpReply::new(200, "<html>")
            .json_object("http://imx/status")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_success_range() {
        assert!(HttpReply::new(204, "").is_success());
        assert!(!HttpReply::new(500, "").is_success());
        assert!(!HttpReply::new(302, "").is_success());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let transport = HttpTransport::new(Duration::from_millis(200)).unwrap();
        let err = transport.get("http://127.0.0.1:1/status").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
