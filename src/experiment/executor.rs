//! Plan executor.
//!
//! Runs a plan strictly in order, one command at a time:
//!
//! 1. `WaitUntil(T)` sleeps on the injected clock until `T` (no-op if past).
//! 2. Any other command resolves its resource, waits for the resource's status
//!    to report `ready`, then dispatches its action and waits for the reply.
//!
//! The three suspension points (status polling, the wall-clock wait and the
//! action call) all race against the executor's cancel token. The first
//! failure stops the run; it is returned with the failing plan index and the
//! records of the commands that did complete.

use crate::cancel::{cancel_pair, CancelHandle, CancelToken};
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::{AppResult, ExecutionError, SchedulerError};
use crate::experiment::commands::{required_resource, Command, Plan};
use crate::instrument::{dispatch, Action, HttpTransport, StatusProber, Transport};
use crate::resource::ResourceRegistry;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// What happened to one completed command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRecord {
    /// Plan index
    pub index: usize,
    /// The command that ran
    pub command: Command,
    /// Wall-clock time the command was picked up
    pub started: NaiveDateTime,
    /// Wall-clock time the command completed
    pub finished: NaiveDateTime,
    /// Status polls issued before dispatch (0 for `WaitUntil`)
    pub polls: usize,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique id of this run
    pub run_uid: String,
    /// Wall-clock start
    pub started: NaiveDateTime,
    /// Wall-clock end
    pub finished: NaiveDateTime,
    /// Monotonic duration of the whole run
    pub elapsed: Duration,
    /// One record per command, in plan order
    pub records: Vec<CommandRecord>,
}

/// Runs plans against instrument services, one command at a time.
pub struct Executor {
    registry: ResourceRegistry,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    prober: StatusProber,
    cancel_handle: CancelHandle,
    cancel: CancelToken,
}

impl Executor {
    /// Executor over `transport` and `clock`, polling status every `poll_interval`.
    pub fn new(
        registry: ResourceRegistry,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        let prober = StatusProber::new(transport.clone(), clock.clone(), poll_interval);
        let (cancel_handle, cancel) = cancel_pair();
        Self {
            registry,
            transport,
            clock,
            prober,
            cancel_handle,
            cancel,
        }
    }

    /// Executor talking HTTP to the services named in `settings`, on the system clock.
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        settings.validate()?;
        let transport = HttpTransport::new(settings.http_timeout())?;
        Ok(Self::new(
            ResourceRegistry::from_settings(settings),
            Arc::new(transport),
            Arc::new(SystemClock::new()),
            settings.poll_interval(),
        ))
    }

    /// Handle that interrupts the current (and any later) run.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel_handle.clone()
    }

    /// Where each resource lives.
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// The status prober used before each dispatch.
    pub fn prober(&self) -> &StatusProber {
        &self.prober
    }

    /// Execute `plan` in order.
    pub async fn run(&self, plan: &Plan) -> Result<RunReport, ExecutionError> {
        let run_uid = Uuid::new_v4().to_string();
        let started = self.clock.now_wall();
        let t0 = self.clock.monotonic();
        let mut records = Vec::with_capacity(plan.len());

        info!(%run_uid, commands = plan.len(), "starting plan");

        for (index, command) in plan.iter().enumerate() {
            let span = info_span!("command", index, kind = command.kind().as_str());
            let picked_up = self.clock.now_wall();
            match self.execute(command).instrument(span).await {
                Ok(polls) => records.push(CommandRecord {
                    index,
                    command: command.clone(),
                    started: picked_up,
                    finished: self.clock.now_wall(),
                    polls,
                }),
                Err(source) => {
                    warn!(%run_uid, index, %command, error = %source, "plan halted");
                    return Err(ExecutionError {
                        index,
                        command: command.clone(),
                        completed: records,
                        source,
                    });
                }
            }
        }

        let elapsed = self.clock.monotonic().saturating_sub(t0);
        info!(%run_uid, ?elapsed, "plan completed");
        Ok(RunReport {
            run_uid,
            started,
            finished: self.clock.now_wall(),
            elapsed,
            records,
        })
    }

    /// Execute one command. Returns the number of status polls it took.
    async fn execute(&self, command: &Command) -> AppResult<usize> {
        let Some(resource) = required_resource(command) else {
            if let Command::WaitUntil(deadline) = command {
                info!(%deadline, "waiting for wall clock");
                self.cancel
                    .guard(async {
                        self.clock.sleep_until(*deadline).await;
                        Ok(())
                    })
                    .await?;
            }
            return Ok(0);
        };

        let base_url = self.registry.url_for(&resource)?;
        command.validate()?;
        let action = Action::for_command(command).ok_or_else(|| {
            SchedulerError::InvalidCommand(format!("{command} has no instrument action"))
        })?;

        let polls = self
            .prober
            .wait_for(&resource, &self.registry, &self.cancel)
            .await?;

        info!(%resource, cmd = action.cmd, "dispatching");
        let value = self
            .cancel
            .guard(dispatch(self.transport.as_ref(), base_url, &action))
            .await?;
        info!(%resource, reply = %value, "completed");
        Ok(polls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::instrument::{Call, HttpReply, MockTransport};
    use chrono::{NaiveDate, TimeDelta};
    use serde_json::{json, Value};
    use tracing_test::traced_test;

    const IMX: &str = "http://imx";
    const PF: &str = "http://pf";

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 12)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn executor(registry: ResourceRegistry) -> (Executor, MockTransport, ManualClock) {
        let mock = MockTransport::new();
        let clock = ManualClock::new(t0());
        let executor = Executor::new(
            registry,
            Arc::new(mock.clone()),
            Arc::new(clock.clone()),
            Duration::from_secs(1),
        );
        (executor, mock, clock)
    }

    fn both() -> ResourceRegistry {
        ResourceRegistry::new([("instrument", IMX), ("arm", PF)])
    }

    #[tokio::test]
    async fn test_wait_until_now_makes_no_calls() {
        let (executor, mock, clock) = executor(both());
        let plan = Plan::new(vec![Command::wait_until(t0())]);

        let report = executor.run(&plan).await.unwrap();

        assert_eq!(report.records.len(), 1);
        assert!(mock.calls().is_empty());
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_single_acquisition_with_busy_instrument() {
        let (executor, mock, _clock) = executor(both());
        mock.script_status(IMX, &["busy", "busy", "ready"]);
        let plan = Plan::new(vec![
            Command::Open,
            Command::acquire("p.hts", Some("X")),
            Command::Close,
        ]);

        let report = executor.run(&plan).await.unwrap();

        assert!(mock.get_count("http://imx/status") >= 3);
        let cmds: Vec<_> = mock.posts().into_iter().map(|(_, b)| b).collect();
        assert_eq!(
            cmds,
            vec![
                json!({"cmd": "goto", "args": ["LOAD"], "kwargs": {}}),
                json!({"cmd": "acquire", "args": [], "kwargs": {"hts_file": "p.hts", "plate_id": "X"}}),
                json!({"cmd": "goto", "args": ["SAMPLE"], "kwargs": {}}),
            ]
        );
        assert_eq!(
            report.records.iter().map(|r| r.polls).collect::<Vec<_>>(),
            vec![3, 1, 1]
        );
    }

    #[tokio::test]
    async fn test_polls_follow_resource_of_each_command() {
        let (executor, mock, _clock) = executor(both());
        let plan = Plan::new(vec![
            Command::arm_move("h1 to imx"),
            Command::acquire("t.hts", Some("p1")),
            Command::arm_move("imx to h1"),
        ]);

        executor.run(&plan).await.unwrap();

        let urls: Vec<String> = mock.calls().iter().map(|c| c.url().to_string()).collect();
        assert_eq!(
            urls,
            vec![
                "http://pf/status",
                "http://pf",
                "http://imx/status",
                "http://imx",
                "http://pf/status",
                "http://pf",
            ]
        );
    }

    #[tokio::test]
    async fn test_wall_clock_gate_precedes_dispatch() {
        let (executor, mock, clock) = executor(both());
        let deadline = t0() + TimeDelta::seconds(2);
        let plan = Plan::new(vec![Command::wait_until(deadline), Command::Open]);

        let report = executor.run(&plan).await.unwrap();

        assert!(clock.monotonic() >= Duration::from_secs(2));
        assert!(report.records[1].started >= deadline);
        assert_eq!(mock.posts().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_resource_halts_before_dispatch() {
        let (executor, mock, _clock) =
            executor(ResourceRegistry::new([("instrument", IMX)]));
        let plan = Plan::new(vec![
            Command::Open,
            Command::arm_move("h1 to imx"),
            Command::Close,
        ]);

        let err = executor.run(&plan).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnknownResource);
        assert_eq!(err.index, 1);
        assert_eq!(err.completed.len(), 1);
        assert!(mock
            .calls()
            .iter()
            .all(|c| !c.url().starts_with(PF)));
        assert_eq!(mock.posts().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_stops_remaining_commands() {
        let (executor, mock, _clock) = executor(both());
        mock.script_reply(IMX, Ok(HttpReply::new(500, "stage error")));
        let plan = Plan::new(vec![Command::Open, Command::Close]);

        let err = executor.run(&plan).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InstrumentRejected);
        assert_eq!(err.index, 0);
        assert_eq!(mock.posts().len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_halt_is_logged_with_index() {
        let (executor, mock, _clock) = executor(both());
        mock.script_reply(PF, Ok(HttpReply::ok_json(&json!({"error": "no such program"}))));
        let plan = Plan::new(vec![Command::Open, Command::arm_move("h9 to imx")]);

        let err = executor.run(&plan).await.unwrap_err();

        assert_eq!(err.index, 1);
        assert!(logs_contain("starting plan"));
        assert!(logs_contain("plan halted"));
        assert!(logs_contain("no such program"));
    }

    #[tokio::test]
    async fn test_invalid_plate_id_is_not_dispatched() {
        let (executor, mock, _clock) = executor(both());
        let plan = Plan::new(vec![Command::acquire("p.hts", Some("p1,RUN"))]);

        let err = executor.run(&plan).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidCommand);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_surfaces_as_cancelled() {
        let (executor, mock, _clock) = executor(both());
        executor.cancel_handle().cancel();
        let plan = Plan::new(vec![Command::Open]);

        let err = executor.run(&plan).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.index, 0);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_order_matches_plan_order() {
        let (executor, mock, _clock) = executor(both());
        let plan = Plan::new(vec![
            Command::Open,
            Command::arm_move("h1 to imx"),
            Command::Close,
            Command::acquire("a.hts", None),
            Command::Open,
            Command::arm_move("imx to h1"),
            Command::Close,
        ]);

        executor.run(&plan).await.unwrap();

        let dispatched: Vec<Value> = mock
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Post(_, body) => Some(body),
                Call::Get(_) => None,
            })
            .collect();
        let expected: Vec<Value> = plan
            .iter()
            .filter_map(Action::for_command)
            .map(|a| a.to_json())
            .collect();
        assert_eq!(dispatched, expected);
    }
}
