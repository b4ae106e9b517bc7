//! Error handling for the deimos pipeline
//!
//! Two layers live here: `ReconError` for the few conditions that abort a run
//! before it starts, and `StageIssue` for everything that only marks a single
//! stage as skipped or failed while the pipeline keeps going.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fatal errors. Anything in here stops the process.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Authorization not confirmed: pass -c/--confirm to certify you may scan this target")]
    AuthorizationMissing,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ReconError {
    /// Process exit code for this error.
    ///
    /// `2` is reserved for a missing authorization confirmation so wrapper
    /// scripts can tell "refused to run" apart from "bad input".
    pub fn exit_code(&self) -> i32 {
        match self {
            ReconError::AuthorizationMissing => 2,
            _ => 1,
        }
    }

    /// True for the conditions that are checked before anything touches the
    /// filesystem or the network.
    pub fn is_pre_run(&self) -> bool {
        matches!(
            self,
            ReconError::InvalidTarget(_) | ReconError::AuthorizationMissing
        )
    }
}

/// Non-fatal conditions recorded against a single stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StageIssue {
    /// None of the stage's executables could be resolved.
    ToolMissing(Vec<String>),
    /// A tool ran past its deadline and was killed. Partial output is kept.
    ToolTimeout(String),
    /// A tool exited with a non-zero status (or could not be spawned).
    ToolNonZeroExit { tool: String, code: Option<i32> },
    /// A producer stage left nothing for this stage to work on.
    DependencyUnmet(String),
    /// The run was cancelled before or while the stage ran.
    Interrupted,
}

impl StageIssue {
    /// Stable short code used in the run log and console output.
    pub fn code(&self) -> &'static str {
        match self {
            StageIssue::ToolMissing(_) => "TOOL_MISSING",
            StageIssue::ToolTimeout(_) => "TOOL_TIMEOUT",
            StageIssue::ToolNonZeroExit { .. } => "TOOL_NONZERO_EXIT",
            StageIssue::DependencyUnmet(_) => "DEPENDENCY_UNMET",
            StageIssue::Interrupted => "INTERRUPTED",
        }
    }
}

impl fmt::Display for StageIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageIssue::ToolMissing(tools) => write!(f, "tool(s) not found: {}", tools.join(", ")),
            StageIssue::ToolTimeout(tool) => write!(f, "{} timed out", tool),
            StageIssue::ToolNonZeroExit { tool, code: Some(code) } => {
                write!(f, "{} exited with status {}", tool, code)
            }
            StageIssue::ToolNonZeroExit { tool, code: None } => {
                write!(f, "{} terminated without an exit status", tool)
            }
            StageIssue::DependencyUnmet(why) => write!(f, "dependency unmet: {}", why),
            StageIssue::Interrupted => write!(f, "run interrupted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ReconError::AuthorizationMissing.exit_code(), 2);
        assert_eq!(ReconError::InvalidTarget("".into()).exit_code(), 1);
        assert_eq!(ReconError::ConfigError("bad".into()).exit_code(), 1);
    }

    #[test]
    fn test_pre_run_classification() {
        assert!(ReconError::AuthorizationMissing.is_pre_run());
        assert!(ReconError::InvalidTarget("x".into()).is_pre_run());
        assert!(!ReconError::ParseError("x".into()).is_pre_run());
    }

    #[test]
    fn test_stage_issue_serializes_with_kind_tag() {
        let issue = StageIssue::ToolNonZeroExit { tool: "nmap".into(), code: Some(1) };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "tool_non_zero_exit");
        assert_eq!(json["detail"]["tool"], "nmap");

        let missing = StageIssue::ToolMissing(vec!["nuclei".into()]);
        assert_eq!(missing.code(), "TOOL_MISSING");
        assert_eq!(missing.to_string(), "tool(s) not found: nuclei");
    }
}
