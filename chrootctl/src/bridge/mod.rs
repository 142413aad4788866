//! Command bridge: the seam between the panel and whatever actually runs shell commands.
//!
//! A [`HostBridge`] is the injected host object. It may attach late, may only
//! support one of the synchronous/asynchronous primitives, and reports
//! asynchronous progress as a stream of [`BridgeEvent`]s. [`CommandRunner`]
//! wraps it into the uniform API used by every workflow.

mod process;
mod runner;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use chrootctl_shared::errors::ChrootResult;

pub use process::ProcessBridge;
pub use runner::{AsyncCallbacks, CommandRunner, RunOptions, apply_debug_prefix, normalize_output};

/// Identifier handed out by the bridge for an asynchronous command.
pub type CommandId = String;

/// Terminal value of one asynchronous command.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: None,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Output if present, otherwise the error text, otherwise empty.
    pub fn text(&self) -> &str {
        self.output
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.error.as_deref())
            .unwrap_or("")
    }
}

/// One in-flight command as tracked by the bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunningCommand {
    pub id: CommandId,
    pub command: String,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
}

/// Which privilege escalation the host uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMethod {
    Ksu,
    Sulib,
    #[default]
    None,
}

impl ExecMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecMethod::Ksu => "ksu",
            ExecMethod::Sulib => "sulib",
            ExecMethod::None => "none",
        }
    }
}

/// Progress reported by an asynchronous command.
///
/// A well-behaved bridge sends any number of `Output` events followed by
/// exactly one `Error` or `Complete`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Raw output chunk, possibly several lines.
    Output(String),
    /// The command could not run to completion.
    Error(String),
    Complete(CommandResult),
}

/// Host-provided command execution.
#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Whether [`HostBridge::execute`] is usable.
    fn supports_sync(&self) -> bool {
        true
    }

    /// Whether [`HostBridge::execute_async`] is usable.
    fn supports_async(&self) -> bool {
        true
    }

    fn exec_method(&self) -> ExecMethod {
        ExecMethod::None
    }

    /// Run `command` to completion and return its output.
    async fn execute(&self, command: &str, as_root: bool) -> ChrootResult<String>;

    /// Start `command` without waiting for it.
    ///
    /// Returns the command id, or an error if the command could not be started.
    /// Progress is delivered on `events`.
    fn execute_async(
        &self,
        command: &str,
        as_root: bool,
        events: mpsc::UnboundedSender<BridgeEvent>,
    ) -> ChrootResult<CommandId>;

    fn running_commands(&self) -> Vec<RunningCommand> {
        Vec::new()
    }

    fn is_command_running(&self, _id: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_wire_shape() {
        let json = r#"{"success":false,"exitCode":2,"error":"boom"}"#;
        let result: CommandResult = serde_json::from_str(json).unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(2));
        assert_eq!(result.output, None);
        assert_eq!(result.text(), "boom");
    }

    #[test]
    fn test_text_prefers_output() {
        let mut result = CommandResult::ok("done");
        result.error = Some("ignored".into());
        assert_eq!(result.text(), "done");
        assert_eq!(CommandResult::default().text(), "");
    }
}
