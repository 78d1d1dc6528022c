//! Common test utilities for lab_scheduler integration tests
//!
//! [`MockLab`] is a small axum server that stands in for the instrument
//! services. Each device is served under its own path prefix:
//!
//! - `GET /{device}/status` answers `{"value": ...}` from a scripted queue
//!   (the last entry repeats; unscripted devices are always `ready`)
//! - `POST /{device}` records the action body and answers `{"value": "OK"}`,
//!   or a scripted rejection

#![allow(dead_code)] // Utilities may not all be used by every test binary

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lab_scheduler::instrument::HttpTransport;
use lab_scheduler::{Clock, Executor, ResourceRegistry, SystemClock};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Default)]
struct Inner {
    status: HashMap<String, VecDeque<String>>,
    status_polls: HashMap<String, usize>,
    rejections: HashMap<String, (StatusCode, Value)>,
    action_delay: Option<Duration>,
    actions: Vec<(String, Value)>,
}

#[derive(Clone, Default)]
pub struct MockLab {
    inner: Arc<Mutex<Inner>>,
}

impl MockLab {
    /// Queue status values for `device`.
    pub fn script_status(&self, device: &str, values: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .status
            .insert(device.to_string(), values.iter().map(|v| v.to_string()).collect());
    }

    /// Make every action on `device` fail with `status` and `body`.
    pub fn reject(&self, device: &str, status: StatusCode, body: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.rejections.insert(device.to_string(), (status, body));
    }

    /// Hold every action reply for `delay`.
    pub fn delay_actions(&self, delay: Duration) {
        self.inner.lock().unwrap().action_delay = Some(delay);
    }

    /// Recorded `(device, body)` pairs in arrival order.
    pub fn actions(&self) -> Vec<(String, Value)> {
        self.inner.lock().unwrap().actions.clone()
    }

    pub fn status_polls(&self, device: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .status_polls
            .get(device)
            .copied()
            .unwrap_or(0)
    }

    /// Serve on an ephemeral local port. Returns the base address.
    pub async fn start(&self) -> String {
        let app = Router::new()
            .route("/{device}/status", get(status))
            .route("/{device}", post(action))
            .with_state(self.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}

async fn status(State(lab): State<MockLab>, Path(device): Path<String>) -> Json<Value> {
    let mut inner = lab.inner.lock().unwrap();
    *inner.status_polls.entry(device.clone()).or_default() += 1;
    let value = match inner.status.get_mut(&device) {
        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
        Some(queue) => queue.front().cloned().unwrap_or_else(|| "ready".to_string()),
        None => "ready".to_string(),
    };
    Json(json!({ "value": value }))
}

async fn action(
    State(lab): State<MockLab>,
    Path(device): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let (delay, rejection) = {
        let mut inner = lab.inner.lock().unwrap();
        inner.actions.push((device.clone(), body));
        (inner.action_delay, inner.rejections.get(&device).cloned())
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    match rejection {
        Some((status, body)) => (status, Json(body)),
        None => (StatusCode::OK, Json(json!({ "value": "OK" }))),
    }
}

/// Registry pointing `instrument` at `{base}/imx` and `arm` at `{base}/pf`.
pub fn lab_registry(base: &str) -> ResourceRegistry {
    ResourceRegistry::new([
        ("instrument", format!("{base}/imx")),
        ("arm", format!("{base}/pf")),
    ])
}

/// Executor over real HTTP and the system clock with a fast poll cadence.
pub fn http_executor(registry: ResourceRegistry) -> Executor {
    let transport = HttpTransport::new(Duration::from_secs(10)).unwrap();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    Executor::new(
        registry,
        Arc::new(transport),
        clock,
        Duration::from_millis(20),
    )
}
