//! Status prober.
//!
//! Polls `GET {base_url}/status` until the reply's `value` field is `ready`.
//! The reply must be a JSON object with a string `value`; other fields are
//! ignored. Between polls the prober sleeps a fixed cadence on the injected
//! clock. It never retries a failed poll: the first transport or protocol
//! error ends the wait.

use super::transport::Transport;
use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::error::{AppResult, SchedulerError};
use crate::resource::{Availability, Resource, ResourceRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};

/// Polls resource status routes until they report `ready`.
pub struct StatusProber {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    observed: Mutex<HashMap<Resource, Availability>>,
}

impl StatusProber {
    /// Prober over `transport`, sleeping `poll_interval` on `clock` between polls.
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        Self {
            transport,
            clock,
            poll_interval,
            observed: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep between polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Availability seen by the most recent poll of `resource`.
    pub fn last_observed(&self, resource: &Resource) -> Availability {
        self.observed
            .lock()
            .map(|m| m.get(resource).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Poll `resource` once.
    pub async fn probe(
        &self,
        resource: &Resource,
        registry: &ResourceRegistry,
    ) -> AppResult<Availability> {
        let url = format!("{}/status", registry.url_for(resource)?);
        let result = self.poll(&url).await;
        self.record(resource, result.as_ref().ok().copied().unwrap_or_default());
        result
    }

    /// Block until `resource` reports `ready`. Returns the number of polls.
    ///
    /// The loop itself is unbounded; only `cancel` or an error ends it early.
    pub async fn wait_for(
        &self,
        resource: &Resource,
        registry: &ResourceRegistry,
        cancel: &CancelToken,
    ) -> AppResult<usize> {
        let mut polls = 0usize;
        loop {
            let availability = cancel.guard(self.probe(resource, registry)).await?;
            polls += 1;
            debug!(%resource, ?availability, polls, "status poll");
            if availability.is_ready() {
                return Ok(polls);
            }
            cancel
                .guard(async {
                    self.clock.sleep(self.poll_interval).await;
                    Ok(())
                })
                .await?;
        }
    }

    async fn poll(&self, url: &str) -> AppResult<Availability> {
        let reply = self.transport.get(url).await?;
        trace!(url, status = reply.status, body = %reply.body, "status reply");
        if !reply.is_success() {
            return Err(SchedulerError::Transport(format!(
                "GET {url} returned HTTP {}",
                reply.status
            )));
        }
        let body = reply.json_object(url)?;
        match body.get("value") {
            Some(Value::String(value)) => Ok(Availability::from_status_value(value)),
            Some(other) => Err(SchedulerError::protocol(
                url,
                format!("field `value` is not a string: {other}"),
            )),
            None => Err(SchedulerError::protocol(url, "missing field `value`")),
        }
    }

    fn record(&self, resource: &Resource, availability: Availability) {
        if let Ok(mut observed) = self.observed.lock() {
            observed.insert(resource.clone(), availability);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::instrument::mock::MockTransport;
    use crate::instrument::transport::HttpReply;
    use chrono::NaiveDate;

    const IMX: &str = "http://imx";

    fn setup() -> (MockTransport, ManualClock, StatusProber, ResourceRegistry) {
        let mock = MockTransport::new();
        let clock = ManualClock::new(
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        );
        let prober = StatusProber::new(
            Arc::new(mock.clone()),
            Arc::new(clock.clone()),
            Duration::from_secs(1),
        );
        let registry = ResourceRegistry::new([("instrument", IMX)]);
        (mock, clock, prober, registry)
    }

    #[tokio::test]
    async fn test_wait_for_polls_until_ready() {
        let (mock, clock, prober, registry) = setup();
        mock.script_status(IMX, &["busy", "busy", "ready"]);

        let polls = prober
            .wait_for(&Resource::instrument(), &registry, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(polls, 3);
        assert_eq!(mock.get_count("http://imx/status"), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1); 2]);
        assert_eq!(prober.last_observed(&Resource::instrument()), Availability::Ready);
    }

    #[tokio::test]
    async fn test_unknown_values_are_not_ready() {
        let (mock, _clock, prober, registry) = setup();
        mock.script_status(IMX, &["offline", "ready"]);

        let polls = prober
            .wait_for(&Resource::instrument(), &registry, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(polls, 2);
    }

    #[tokio::test]
    async fn test_missing_value_is_protocol_error() {
        let (mock, _clock, prober, registry) = setup();
        mock.script_reply(
            "http://imx/status",
            Ok(HttpReply::ok_json(&serde_json::json!({"state": "ready"}))),
        );

        let err = prober
            .wait_for(&Resource::instrument(), &registry, &CancelToken::never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(mock.get_count("http://imx/status"), 1);
    }

    #[tokio::test]
    async fn test_non_object_body_is_protocol_error() {
        let (mock, _clock, prober, registry) = setup();
        mock.script_reply("http://imx/status", Ok(HttpReply::new(200, "\"ready\"")));

        let err = prober
            .probe(&Resource::instrument(), &registry)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(prober.last_observed(&Resource::instrument()), Availability::Unknown);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let (mock, _clock, prober, registry) = setup();
        mock.script_reply(
            "http://imx/status",
            Err(SchedulerError::Transport("connection refused".to_string())),
        );

        let err = prober
            .wait_for(&Resource::instrument(), &registry, &CancelToken::never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(mock.get_count("http://imx/status"), 1);
    }

    #[tokio::test]
    async fn test_unregistered_resource() {
        let (mock, _clock, prober, registry) = setup();
        let err = prober
            .wait_for(&Resource::arm(), &registry, &CancelToken::never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownResource);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_poll() {
        let (mock, _clock, prober, registry) = setup();
        let (handle, token) = cancel_pair();
        handle.cancel();

        let err = prober
            .wait_for(&Resource::instrument(), &registry, &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(mock.calls().is_empty());
    }
}
