//! Errors surfaced by coalesced tool calls.

use std::time::Duration;

/// Failure of a tool call's underlying operation.
///
/// `Clone` because one failure is delivered to every caller coalesced onto
/// the same in-flight operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("{tool}: {message}")]
    Backend { tool: String, message: String },

    #[error("{tool}: timed out after {after:?}")]
    TimedOut { tool: String, after: Duration },
}

impl CallError {
    /// A backend failure for `tool`.
    pub fn backend(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Name of the tool whose operation failed.
    pub fn tool(&self) -> &str {
        match self {
            Self::Backend { tool, .. } | Self::TimedOut { tool, .. } => tool,
        }
    }

    /// Whether the operation was cut off by the configured timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}
