//! Arm position resolution.
//!
//! Protocol authors can leave an [`ArmBy`] marker on the timeline meaning
//! "the robot must be at this pose by now" instead of spelling out the move.
//! [`resolve`] replaces each marker with a concrete `ArmMove` from wherever
//! the previous arm event left the robot to the marker's pose, starting when
//! that previous event ends.
//!
//! Arm programs are named `"<from> to <to>"`; the text after the last `" to "`
//! is the pose the robot ends in.
//!
//! Resolution does not try to make the result feasible. A synthesised move
//! can run into the next arm event; feed the output to
//! [`check_events`](super::feasibility::check_events) to find out.

use crate::error::{AppResult, SchedulerError};
use crate::experiment::commands::{Command, Plan};
use crate::experiment::feasibility::{to_events, DurationEstimate, Event};
use crate::resource::Resource;
use chrono::NaiveDateTime;

/// "Robot must be at `pose`" marker.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmBy {
    /// Plan index the synthesised move will carry
    pub index: usize,
    /// Pose the arm must reach
    pub pose: String,
    /// Plate carried by the move
    pub plate_id: Option<String>,
    /// Position on the timeline, used only for ordering
    pub begin: f64,
}

/// Input to [`resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum TimedStep {
    /// A concrete event
    Event(Event),
    /// A pose marker to resolve
    ArmBy(ArmBy),
}

impl TimedStep {
    fn begin(&self) -> f64 {
        match self {
            TimedStep::Event(e) => e.begin,
            TimedStep::ArmBy(m) => m.begin,
        }
    }

    fn index(&self) -> usize {
        match self {
            TimedStep::Event(e) => e.index,
            TimedStep::ArmBy(m) => m.index,
        }
    }

    fn is_arm(&self) -> bool {
        match self {
            TimedStep::Event(e) => e.resource() == Some(Resource::arm()),
            TimedStep::ArmBy(_) => true,
        }
    }
}

/// Pose an arm program leaves the robot in.
pub fn end_pose(program: &str) -> Option<&str> {
    program
        .rsplit_once(" to ")
        .map(|(_, to)| to.trim())
        .filter(|to| !to.is_empty())
}

/// Timeline steps of `plan`, ready for markers to be mixed in.
pub fn steps_from_plan(
    plan: &Plan,
    estimates: &dyn DurationEstimate,
    epoch: NaiveDateTime,
) -> Vec<TimedStep> {
    to_events(plan, estimates, epoch)
        .into_iter()
        .map(TimedStep::Event)
        .collect()
}

/// Replace every [`ArmBy`] marker with a concrete arm move.
///
/// Fails when two markers follow each other on the arm timeline, when a
/// marker has no earlier arm event to start from, or when the earlier
/// event's program name has no `" to "` pose.
pub fn resolve(steps: Vec<TimedStep>, estimates: &dyn DurationEstimate) -> AppResult<Vec<Event>> {
    let (mut arm, other): (Vec<TimedStep>, Vec<TimedStep>) =
        steps.into_iter().partition(TimedStep::is_arm);
    arm.sort_by(|a, b| a.begin().total_cmp(&b.begin()).then(a.index().cmp(&b.index())));

    let mut events: Vec<Event> = other
        .into_iter()
        .filter_map(|s| match s {
            TimedStep::Event(e) => Some(e),
            TimedStep::ArmBy(_) => None,
        })
        .collect();

    let mut previous: Option<Event> = None;
    let mut after_marker = false;
    for step in arm {
        match step {
            TimedStep::Event(event) => {
                after_marker = false;
                previous = Some(event.clone());
                events.push(event);
            }
            TimedStep::ArmBy(marker) => {
                if after_marker {
                    return Err(SchedulerError::Resolve(format!(
                        "two arm markers in a row (index {})",
                        marker.index
                    )));
                }
                after_marker = true;
                let prev = previous.as_ref().ok_or_else(|| {
                    SchedulerError::Resolve(format!(
                        "marker for pose {:?} at index {} has no earlier arm event",
                        marker.pose, marker.index
                    ))
                })?;
                let from = previous_pose(prev)?;
                if from == marker.pose {
                    continue;
                }
                let command = Command::arm_move(format!("{from} to {}", marker.pose));
                let duration = estimates.estimate(&command);
                let mut event = Event::new(marker.index, command, prev.end, duration);
                event.plate_id = marker.plate_id;
                previous = Some(event.clone());
                events.push(event);
            }
        }
    }

    events.sort_by(|a, b| a.begin.total_cmp(&b.begin).then(a.index.cmp(&b.index)));
    Ok(events)
}

fn previous_pose(event: &Event) -> AppResult<String> {
    match &event.command {
        Command::ArmMove { program } => end_pose(program).map(str::to_string).ok_or_else(|| {
            SchedulerError::Resolve(format!(
                "cannot tell where program {program:?} (index {}) ends",
                event.index
            ))
        }),
        other => Err(SchedulerError::Resolve(format!(
            "{} at index {} is not an arm move",
            other.kind().as_str(),
            event.index
        ))),
    }
}
