//! Experiment plans and their execution.
//!
//! - **Commands**: the plan vocabulary ([`Command`], [`Plan`])
//! - **Executor**: runs a plan in order against live instruments
//! - **Feasibility**: projects a plan onto estimated timelines and reports
//!   resource conflicts before anything moves
//! - **Resolve**: turns "arm must be at X" markers into concrete moves
//! - **Protocols**: ready-made plans
//!
//! # Example
//!
//! ```rust,ignore
//! use lab_scheduler::experiment::{check, ensure_feasible, EstimateTable, Executor, Plan};
//!
//! let plan = Plan::from_json(&std::fs::read_to_string("plan.json")?)?;
//! ensure_feasible(&check(&plan, &settings.estimates, now))?;
//!
//! let executor = Executor::from_settings(&settings)?;
//! let report = executor.run(&plan).await?;
//! ```

pub mod commands;
pub mod executor;
pub mod feasibility;
pub mod protocols;
pub mod resolve;

pub use commands::{is_valid_plate_id, required_resource, Command, CommandKind, Plan};
pub use executor::{CommandRecord, Executor, RunReport};
pub use feasibility::{
    check, check_events, ensure_feasible, to_events, DurationEstimate, EstimateTable, Event,
    Overlap,
};
pub use protocols::imaging_rounds;
pub use resolve::{end_pose, resolve, steps_from_plan, ArmBy, TimedStep};
