//! Command catalogue and plans.
//!
//! Commands form a closed set. Which resource a command needs is a pure
//! function of its kind, see [`required_resource`]; payloads never change it.
//!
//! | Kind        | Resource     |
//! |-------------|--------------|
//! | `ArmMove`   | `arm`        |
//! | `Acquire`   | `instrument` |
//! | `Open`      | `instrument` |
//! | `Close`     | `instrument` |
//! | `WaitUntil` | none         |

use crate::error::{AppResult, SchedulerError};
use crate::resource::Resource;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[allow(clippy::expect_used)]
static PLATE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w\d\-_ ]+$").expect("plate id pattern is valid"));

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Run a named program on the robot arm.
    ArmMove {
        /// Program name, by convention `"<from> to <to>"`
        program: String,
    },
    /// Acquire the plate currently in the imaging instrument.
    Acquire {
        /// Acquisition protocol file on the instrument host
        hts_file: String,
        /// Plate identifier recorded with the images
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plate_id: Option<String>,
    },
    /// Move the instrument stage to the loading position.
    Open,
    /// Move the instrument stage back to the sample position.
    Close,
    /// Wait until the wall clock reaches the given time.
    WaitUntil(NaiveDateTime),
}

/// Discriminant of [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// [`Command::ArmMove`]
    ArmMove,
    /// [`Command::Acquire`]
    Acquire,
    /// [`Command::Open`]
    Open,
    /// [`Command::Close`]
    Close,
    /// [`Command::WaitUntil`]
    WaitUntil,
}

impl CommandKind {
    /// Kind name as it appears in plans and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::ArmMove => "ArmMove",
            CommandKind::Acquire => "Acquire",
            CommandKind::Open => "Open",
            CommandKind::Close => "Close",
            CommandKind::WaitUntil => "WaitUntil",
        }
    }

    /// Resource a command of this kind needs.
    pub fn required_resource(self) -> Option<Resource> {
        match self {
            CommandKind::ArmMove => Some(Resource::arm()),
            CommandKind::Acquire | CommandKind::Open | CommandKind::Close => {
                Some(Resource::instrument())
            }
            CommandKind::WaitUntil => None,
        }
    }
}

impl Command {
    /// Run arm program `program`.
    pub fn arm_move(program: impl Into<String>) -> Self {
        Command::ArmMove {
            program: program.into(),
        }
    }

    /// Acquire with protocol `hts_file`, optionally tagging the plate.
    pub fn acquire(hts_file: impl Into<String>, plate_id: Option<&str>) -> Self {
        Command::Acquire {
            hts_file: hts_file.into(),
            plate_id: plate_id.map(str::to_string),
        }
    }

    /// Wait until `timestamp`.
    pub fn wait_until(timestamp: NaiveDateTime) -> Self {
        Command::WaitUntil(timestamp)
    }

    /// Discriminant of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::ArmMove { .. } => CommandKind::ArmMove,
            Command::Acquire { .. } => CommandKind::Acquire,
            Command::Open => CommandKind::Open,
            Command::Close => CommandKind::Close,
            Command::WaitUntil(_) => CommandKind::WaitUntil,
        }
    }

    /// Plate this command acts on, if any.
    pub fn plate_id(&self) -> Option<&str> {
        match self {
            Command::Acquire { plate_id, .. } => plate_id.as_deref(),
            _ => None,
        }
    }

    /// Check the payload against what the instruments accept.
    pub fn validate(&self) -> AppResult<()> {
        match self {
            Command::Acquire {
                plate_id: Some(plate_id),
                ..
            } if !is_valid_plate_id(plate_id) => Err(SchedulerError::InvalidCommand(format!(
                "invalid plate id {plate_id:?}"
            ))),
            Command::Acquire { hts_file, .. } if hts_file.trim().is_empty() => Err(
                SchedulerError::InvalidCommand("empty acquisition file".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Resource `cmd` needs before it can be dispatched.
pub fn required_resource(cmd: &Command) -> Option<Resource> {
    cmd.kind().required_resource()
}

/// Plate ids may only contain word characters, digits, `-`, `_` and spaces.
pub fn is_valid_plate_id(plate_id: &str) -> bool {
    PLATE_ID.is_match(plate_id)
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::WaitUntil(t) => write!(f, "WaitUntil({})", t.format("%Y-%m-%dT%H:%M:%S")),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Ordered, immutable sequence of commands.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    commands: Vec<Command>,
}

impl Plan {
    /// Plan running `commands` in order.
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    /// Commands in execution order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the plan has no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Command at plan index `index`.
    pub fn get(&self, index: usize) -> Option<&Command> {
        self.commands.get(index)
    }

    /// Iterate commands in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    /// Parse a plan from its JSON encoding.
    pub fn from_json(text: &str) -> AppResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| SchedulerError::InvalidCommand(format!("cannot parse plan: {e}")))
    }

    /// Pretty-printed JSON encoding, readable by [`Plan::from_json`].
    pub fn to_json_pretty(&self) -> AppResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SchedulerError::InvalidCommand(format!("cannot encode plan: {e}")))
    }
}

impl FromIterator<Command> for Plan {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}
