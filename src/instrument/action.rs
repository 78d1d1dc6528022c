//! Action dispatch to instrument services.
//!
//! Services follow the lab machine convention: `POST {base_url}` with
//! `{"cmd": name, "args": [...], "kwargs": {...}}`. The call returns once the
//! instrument has finished (or refused) the action. Replies are JSON objects
//! carrying either `value` or `error`.
//!
//! | Command        | cmd                | args         | kwargs                   |
//! |----------------|--------------------|--------------|--------------------------|
//! | `ArmMove(p)`   | `execute_movelist` | `[p]`        |                          |
//! | `Open`         | `goto`             | `["LOAD"]`   |                          |
//! | `Close`        | `goto`             | `["SAMPLE"]` |                          |
//! | `Acquire(h,p)` | `acquire`          |              | `hts_file`, `plate_id`   |

use super::transport::Transport;
use crate::error::{AppResult, SchedulerError};
use crate::experiment::commands::Command;
use serde_json::{Map, Value};

/// Request body of an action.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Service command name
    pub cmd: &'static str,
    /// Positional arguments
    pub args: Vec<Value>,
    /// Keyword arguments
    pub kwargs: Map<String, Value>,
}

impl Action {
    fn new(cmd: &'static str) -> Self {
        Self {
            cmd,
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    fn kwarg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.to_string(), value.into());
        self
    }

    /// Action payload for `cmd`, or `None` for commands that act on no instrument.
    pub fn for_command(cmd: &Command) -> Option<Self> {
        let action = match cmd {
            Command::ArmMove { program } => Action::new("execute_movelist").arg(program.as_str()),
            Command::Open => Action::new("goto").arg("LOAD"),
            Command::Close => Action::new("goto").arg("SAMPLE"),
            Command::Acquire { hts_file, plate_id } => {
                let action = Action::new("acquire").kwarg("hts_file", hts_file.as_str());
                match plate_id {
                    Some(plate_id) => action.kwarg("plate_id", plate_id.as_str()),
                    None => action,
                }
            }
            Command::WaitUntil(_) => return None,
        };
        Some(action)
    }

    /// JSON request body.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("cmd".to_string(), Value::from(self.cmd));
        body.insert("args".to_string(), Value::Array(self.args.clone()));
        body.insert("kwargs".to_string(), Value::Object(self.kwargs.clone()));
        Value::Object(body)
    }
}

/// Send `action` to the service at `base_url` and wait for its reply.
///
/// Returns the reply's `value` (or `null` when absent).
pub async fn dispatch(
    transport: &dyn Transport,
    base_url: &str,
    action: &Action,
) -> AppResult<Value> {
    let reply = transport.post_json(base_url, &action.to_json()).await?;
    if !reply.is_success() {
        let message = match reply.json_object(base_url) {
            Ok(body) => error_message(&body).unwrap_or_else(|| reply.body.clone()),
            Err(_) => reply.body.clone(),
        };
        return Err(SchedulerError::InstrumentRejected {
            url: base_url.to_string(),
            status: reply.status,
            message,
        });
    }
    let mut body = reply.json_object(base_url)?;
    if let Some(message) = error_message(&body) {
        return Err(SchedulerError::InstrumentRejected {
            url: base_url.to_string(),
            status: reply.status,
            message,
        });
    }
    Ok(body.remove("value").unwrap_or(Value::Null))
}

fn error_message(body: &Map<String, Value>) -> Option<String> {
    match body.get("error")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
