//! Scripted stand-in for instrument services.
//!
//! `MockTransport` answers status polls from a per-URL script and records
//! every call, so tests can assert on poll counts and dispatch order without
//! any network.

use super::transport::{HttpReply, Transport};
use crate::error::AppResult;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// One call observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// `GET url`
    Get(String),
    /// `POST url` with a JSON body
    Post(String, Value),
}

impl Call {
    /// URL the call went to.
    pub fn url(&self) -> &str {
        match self {
            Call::Get(url) | Call::Post(url, _) => url,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    // Replies consumed in order; once a queue is down to its last entry that
    // entry repeats forever.
    scripted: HashMap<String, VecDeque<AppResult<HttpReply>>>,
    calls: Vec<Call>,
}

/// In-memory [`Transport`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Mock with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue status answers (`value` field) for `{base_url}/status`.
    pub fn script_status(&self, base_url: &str, values: &[&str]) -> &Self {
        let url = format!("{base_url}/status");
        for value in values {
            self.script_reply(&url, Ok(HttpReply::ok_json(&json!({ "value": value }))));
        }
        self
    }

    /// Queue an arbitrary reply (or transport error) for `url`.
    pub fn script_reply(&self, url: &str, reply: AppResult<HttpReply>) -> &Self {
        self.lock()
            .scripted
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Bodies of the POSTs made so far, in order.
    pub fn posts(&self) -> Vec<(String, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Post(url, body) => Some((url, body)),
                Call::Get(_) => None,
            })
            .collect()
    }

    /// Number of GETs issued to `url`.
    pub fn get_count(&self, url: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Get(u) if u == url))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_reply(&self, url: &str, call: Call) -> AppResult<HttpReply> {
        let mut state = self.lock();
        state.calls.push(call);
        let Some(queue) = state.scripted.get_mut(url) else {
            // Unscripted action routes succeed; unscripted status routes are ready.
            return Ok(HttpReply::ok_json(&json!({ "value": "ready" })));
        };
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        reply.unwrap_or_else(|| Ok(HttpReply::ok_json(&json!({ "value": "ready" }))))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str) -> AppResult<HttpReply> {
        self.next_reply(url, Call::Get(url.to_string()))
    }

    async fn post_json(&self, url: &str, body: &Value) -> AppResult<HttpReply> {
        self.next_reply(url, Call::Post(url.to_string(), body.clone()))
    }
}
