//! Ready-made plans.

use crate::error::{AppResult, SchedulerError};
use crate::experiment::commands::{Command, Plan};
use chrono::{NaiveDateTime, TimeDelta};

/// Timed imaging rounds, one plate per hotel.
///
/// Round `i` (1-based) waits until `start + i * spacing`, loads plate `i` from
/// hotel `h{i}` into the imager, acquires it as `plate{i}` and puts it back.
///
/// Fails with `InvalidCommand` when a round's start time does not fit in the
/// calendar.
pub fn imaging_rounds(
    start: NaiveDateTime,
    rounds: u32,
    spacing: TimeDelta,
    hts_file: &str,
) -> AppResult<Plan> {
    let mut commands = Vec::new();
    for i in 1..=rounds {
        let at = round_start(start, spacing, i).ok_or_else(|| {
            SchedulerError::InvalidCommand(format!(
                "round {i} starts out of range ({spacing} spacing from {start})"
            ))
        })?;
        let hotel = format!("h{i}");
        let plate_id = format!("plate{i}");
        commands.extend([
            Command::wait_until(at),
            Command::Open,
            Command::arm_move(format!("{hotel} to imx")),
            Command::acquire(hts_file, Some(&plate_id)),
            Command::Open,
            Command::arm_move(format!("imx to {hotel}")),
            Command::Close,
        ]);
    }
    Ok(Plan::new(commands))
}

fn round_start(start: NaiveDateTime, spacing: TimeDelta, round: u32) -> Option<NaiveDateTime> {
    let offset = spacing.checked_mul(i32::try_from(round).ok()?)?;
    start.checked_add_signed(offset)
}
