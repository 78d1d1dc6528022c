//! Offline feasibility checking.
//!
//! A plan is projected onto a timeline by threading a cursor `t` (seconds
//! since a plan epoch) through per-command duration estimates. Every command
//! that needs a resource becomes an [`Event`] `[t, t + est]`; `WaitUntil(T)`
//! moves the cursor to `max(t, T - epoch)` and produces no event.
//!
//! Events on the same resource must not overlap. [`check_events`] sorts each
//! resource's events by `begin` (ties by plan index) and reports every
//! adjacent pair where the earlier one ends after the later one begins. The
//! list is empty exactly when no two events on a resource overlap.

use crate::error::{AppResult, SchedulerError};
use crate::experiment::commands::{required_resource, Command, Plan};
use crate::resource::Resource;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;

/// Estimated duration, in seconds, of executing a command.
pub trait DurationEstimate {
    /// Seconds `cmd` is expected to take.
    fn estimate(&self, cmd: &Command) -> f64;
}

impl<F> DurationEstimate for F
where
    F: Fn(&Command) -> f64,
{
    fn estimate(&self, cmd: &Command) -> f64 {
        self(cmd)
    }
}

/// Per-kind default durations with per-program overrides for arm moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimateTable {
    /// Default seconds for an arm move
    pub arm_move: f64,
    /// Seconds for an acquisition
    pub acquire: f64,
    /// Seconds to move the stage to the loading position
    pub open: f64,
    /// Seconds to move the stage back
    pub close: f64,
    /// Arm program name -> seconds
    pub programs: BTreeMap<String, f64>,
}

impl Default for EstimateTable {
    fn default() -> Self {
        Self {
            arm_move: 20.0,
            acquire: 600.0,
            open: 10.0,
            close: 10.0,
            programs: BTreeMap::new(),
        }
    }
}

impl DurationEstimate for EstimateTable {
    fn estimate(&self, cmd: &Command) -> f64 {
        match cmd {
            Command::ArmMove { program } => {
                self.programs.get(program).copied().unwrap_or(self.arm_move)
            }
            Command::Acquire { .. } => self.acquire,
            Command::Open => self.open,
            Command::Close => self.close,
            Command::WaitUntil(_) => 0.0,
        }
    }
}

#[derive(Deserialize)]
struct TimingLine {
    source: Option<String>,
    arg: Option<String>,
    duration: Option<f64>,
}

impl EstimateTable {
    /// Average measured arm program durations from a JSON-lines timing log.
    ///
    /// Lines look like `{"source": "arm", "arg": "h1 to imx", "duration": 12.5}`.
    /// Lines from other sources, without a duration, or that do not parse are
    /// skipped. Averages replace existing program entries.
    pub fn learn_programs<R: BufRead>(&mut self, log: R) -> AppResult<usize> {
        let mut samples: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for line in log.lines() {
            let line = line.map_err(|e| SchedulerError::Config(format!("timing log: {e}")))?;
            let Ok(entry) = serde_json::from_str::<TimingLine>(&line) else {
                continue;
            };
            if let (Some(source), Some(arg), Some(duration)) = (entry.source, entry.arg, entry.duration) {
                if source == Resource::ARM && duration.is_finite() && duration >= 0.0 {
                    let slot = samples.entry(arg).or_insert((0.0, 0));
                    slot.0 += duration;
                    slot.1 += 1;
                }
            }
        }
        let learned = samples.len();
        for (program, (total, n)) in samples {
            self.programs.insert(program, total / n as f64);
        }
        Ok(learned)
    }
}

/// A command placed on the estimated timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Plan index of the command
    pub index: usize,
    /// The command on the timeline
    pub command: Command,
    /// Plate the command acts on
    pub plate_id: Option<String>,
    /// Seconds since the plan epoch
    pub begin: f64,
    /// Seconds since the plan epoch, never before `begin`
    pub end: f64,
}

impl Event {
    /// Event for `command` starting at `begin`. Negative or NaN durations count as zero.
    pub fn new(index: usize, command: Command, begin: f64, duration: f64) -> Self {
        let plate_id = command.plate_id().map(str::to_string);
        Self {
            index,
            command,
            plate_id,
            begin,
            end: begin + sanitize(duration),
        }
    }

    /// Resource the event occupies.
    pub fn resource(&self) -> Option<Resource> {
        required_resource(&self.command)
    }
}

/// Two events on one resource where `first` ends after `second` begins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlap {
    /// Contended resource
    pub resource: Resource,
    /// Earlier event (by begin, then index)
    pub first: Event,
    /// Later event
    pub second: Event,
}

fn sanitize(duration: f64) -> f64 {
    if duration.is_finite() && duration > 0.0 {
        duration
    } else {
        0.0
    }
}

/// Project `plan` onto the timeline starting at `epoch`.
pub fn to_events(
    plan: &Plan,
    estimates: &dyn DurationEstimate,
    epoch: NaiveDateTime,
) -> Vec<Event> {
    let mut events = Vec::new();
    let mut t = 0.0_f64;
    for (index, command) in plan.iter().enumerate() {
        if let Command::WaitUntil(deadline) = command {
            let offset = (*deadline - epoch).num_milliseconds() as f64 / 1000.0;
            t = t.max(offset);
            continue;
        }
        if required_resource(command).is_none() {
            continue;
        }
        let event = Event::new(index, command.clone(), t, estimates.estimate(command));
        t = event.end;
        events.push(event);
    }
    events
}

/// Report overlapping adjacent events per resource.
pub fn check_events(events: &[Event]) -> Vec<Overlap> {
    let mut by_resource: BTreeMap<Resource, Vec<&Event>> = BTreeMap::new();
    for event in events {
        if let Some(resource) = event.resource() {
            by_resource.entry(resource).or_default().push(event);
        }
    }

    let mut overlaps = Vec::new();
    for (resource, mut group) in by_resource {
        group.sort_by(|a, b| a.begin.total_cmp(&b.begin).then(a.index.cmp(&b.index)));
        for pair in group.windows(2) {
            let (first, second) = (pair[0], pair[1]);
            if first.end > second.begin {
                overlaps.push(Overlap {
                    resource: resource.clone(),
                    first: first.clone(),
                    second: second.clone(),
                });
            }
        }
    }
    overlaps
}

/// Project `plan` and check it. Empty means feasible.
pub fn check(
    plan: &Plan,
    estimates: &dyn DurationEstimate,
    epoch: NaiveDateTime,
) -> Vec<Overlap> {
    check_events(&to_events(plan, estimates, epoch))
}

/// Turn a non-empty overlap list into an `Infeasible` error.
pub fn ensure_feasible(overlaps: &[Overlap]) -> AppResult<()> {
    if overlaps.is_empty() {
        Ok(())
    } else {
        Err(SchedulerError::Infeasible(overlaps.len()))
    }
}
