//! Error types for the scheduler.
//!
//! `SchedulerError` is the single error enum shared by every component. Each
//! variant belongs to exactly one [`ErrorKind`], which is what callers match on
//! when deciding exit codes or retry policy:
//!
//! - **`UnknownResource`**: a command needs a resource the registry does not know.
//! - **`Transport`**: the HTTP layer failed or timed out.
//! - **`Protocol`**: an instrument answered with a body the scheduler cannot read.
//! - **`InstrumentRejected`**: an action came back non-2xx or carried an `error`.
//! - **`Cancelled`**: the operator interrupted a suspension point.
//! - **`Infeasible`**: the feasibility checker found overlapping events.
//!
//! The executor never swallows any of these. It wraps the first failure in an
//! [`ExecutionError`] together with the plan index and the offending command.

use crate::experiment::commands::Command;
use crate::experiment::executor::CommandRecord;
use crate::resource::Resource;
use thiserror::Error;

/// Convenience alias for results using the scheduler error type.
pub type AppResult<T> = std::result::Result<T, SchedulerError>;

/// Classification of [`SchedulerError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A command names a resource absent from the registry.
    UnknownResource,
    /// An HTTP call errored or timed out.
    Transport,
    /// A response was malformed.
    Protocol,
    /// An action dispatch was refused by the instrument.
    InstrumentRejected,
    /// External interruption during a suspension point.
    Cancelled,
    /// The plan has overlapping events on some resource.
    Infeasible,
    /// Settings failed to load or validate.
    Config,
    /// A command payload is not acceptable to its instrument.
    InvalidCommand,
    /// The arm-position resolution pass could not be applied.
    Resolve,
}

/// Errors raised by the scheduler.
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    /// A command needs a resource the registry does not know.
    #[error("Unknown resource: {0}")]
    UnknownResource(Resource),

    /// An HTTP call failed or timed out.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A reply body could not be interpreted.
    #[error("Protocol error from {url}: {reason}")]
    Protocol {
        /// URL that answered
        url: String,
        /// What was wrong with the body
        reason: String,
    },

    /// An instrument refused an action.
    #[error("Instrument rejected action at {url} (status {status}): {message}")]
    InstrumentRejected {
        /// Service the action was sent to
        url: String,
        /// HTTP status of the reply
        status: u16,
        /// Instrument's error text, or the raw body
        message: String,
    },

    /// The run was interrupted by the operator.
    #[error("Cancelled")]
    Cancelled,

    /// The feasibility check found this many overlaps.
    #[error("Plan is infeasible: {0} overlapping event pair(s)")]
    Infeasible(usize),

    /// Settings could not be loaded or are invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command or plan is malformed.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Arm markers could not be turned into moves.
    #[error("Cannot resolve arm positions: {0}")]
    Resolve(String),
}

impl SchedulerError {
    /// The kind this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::UnknownResource(_) => ErrorKind::UnknownResource,
            SchedulerError::Transport(_) => ErrorKind::Transport,
            SchedulerError::Protocol { .. } => ErrorKind::Protocol,
            SchedulerError::InstrumentRejected { .. } => ErrorKind::InstrumentRejected,
            SchedulerError::Cancelled => ErrorKind::Cancelled,
            SchedulerError::Infeasible(_) => ErrorKind::Infeasible,
            SchedulerError::Config(_) => ErrorKind::Config,
            SchedulerError::InvalidCommand(_) => ErrorKind::InvalidCommand,
            SchedulerError::Resolve(_) => ErrorKind::Resolve,
        }
    }

    pub(crate) fn protocol(url: &str, reason: impl Into<String>) -> Self {
        SchedulerError::Protocol {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for SchedulerError {
    fn from(err: figment::Error) -> Self {
        SchedulerError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for SchedulerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SchedulerError::Transport(format!("request timed out: {err}"))
        } else {
            SchedulerError::Transport(err.to_string())
        }
    }
}

/// Failure of a plan run, annotated with where it happened.
#[derive(Error, Debug)]
#[error("Command {index} ({command}) failed: {source}")]
pub struct ExecutionError {
    /// Plan index of the command that failed.
    pub index: usize,
    /// The failing command.
    pub command: Command,
    /// Commands that completed before the failure.
    pub completed: Vec<CommandRecord>,
    /// The underlying failure.
    #[source]
    pub source: SchedulerError,
}

impl ExecutionError {
    /// Kind of the underlying failure.
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}
