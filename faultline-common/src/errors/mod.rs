//! Error catalog and the typed engine error.
//!
//! Every failure surfaced to a user is a [`FaultlineError`]: a catalog
//! code plus format arguments, rendered through the code's message
//! template. Raw stack traces never cross the API boundary.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                            |
//! |------------|-------------|----------------------------------------|
//! | E001-E099  | Validation  | Config and request validation errors   |
//! | E100-E199  | Command     | Command execution and classification   |
//! | E200-E299  | Task        | Task lifecycle and concurrency         |
//! | E300-E399  | Scheduler   | Schedule creation and resync           |
//! | E400-E499  | Cluster     | Coordination and convergence           |
//! | E500-E599  | Internal    | Internal/unexpected errors             |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use serde::{Deserialize, Serialize};

/// Structured engine error: `{code, message, args}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{}] {}", .code.code_string(), render_message(.code, .args))]
pub struct FaultlineError {
    pub code: ErrorCode,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Fill the code's message template with positional arguments.
fn render_message(code: &ErrorCode, args: &[String]) -> String {
    let mut rendered = code.message().to_string();
    for (idx, arg) in args.iter().enumerate() {
        rendered = rendered.replace(&format!("{{{idx}}}"), arg);
    }
    rendered
}

impl FaultlineError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(code: ErrorCode, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The message template rendered with this error's arguments.
    ///
    /// Templates use positional `{0}`, `{1}`, ... placeholders; missing
    /// arguments leave the placeholder in place rather than panic.
    pub fn message(&self) -> String {
        render_message(&self.code, &self.args)
    }
}

pub type Result<T> = std::result::Result<T, FaultlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_positional_args() {
        let err = FaultlineError::with_args(
            ErrorCode::UnsupportedEndpoint,
            ["cpuFault", "DATABASE_PROXY"],
        );
        assert_eq!(
            err.message(),
            "Fault 'cpuFault' does not support endpoint type 'DATABASE_PROXY'"
        );
        assert!(err.to_string().starts_with("[FLN-E011]"));
    }

    #[test]
    fn missing_args_keep_placeholders() {
        let err = FaultlineError::new(ErrorCode::UnsupportedEndpoint);
        assert!(err.message().contains("{0}"));
    }

    #[test]
    fn serializes_as_structured_payload() {
        let err = FaultlineError::with_args(ErrorCode::TaskNotFound, ["abc"]);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "TASK_NOT_FOUND");
        assert_eq!(json["args"][0], "abc");
    }
}
