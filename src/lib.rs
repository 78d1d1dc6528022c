//! Core library for the lab scheduler.
//!
//! Executes plans of instrument commands against HTTP instrument services
//! (a robot arm, a microscope, ...), waiting for each service to report
//! `ready` before dispatching, and checks plans offline for resource
//! conflicts. Used by the `lab_scheduler` binary.

pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod experiment;
pub mod instrument;
pub mod resource;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use error::{AppResult, ErrorKind, ExecutionError, SchedulerError};
pub use experiment::{Command, Executor, Plan, RunReport};
pub use resource::{Availability, Resource, ResourceRegistry};
