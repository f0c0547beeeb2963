//! Error types for npm-audit-parser.

use std::time::Duration;

use thiserror::Error;

use crate::report::Unresolved;

/// Errors that can occur while running an audit.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to spawn the audit process
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The spawned process did not expose the requested pipe
    #[error("audit process has no {0} pipe")]
    MissingPipe(&'static str),

    /// The report lists advisories that are not ignored
    #[error("{0}")]
    VulnerabilitiesFound(Unresolved),

    /// The run was cancelled before the report was complete
    #[error("audit cancelled")]
    Cancelled,

    /// The deadline elapsed before the report was complete
    #[error("audit timed out after {0:?}")]
    TimedOut(Duration),
}

impl AuditError {
    /// Returns true if this error is a failed verdict rather than a runtime failure.
    pub fn is_vulnerable(&self) -> bool {
        matches!(self, AuditError::VulnerabilitiesFound(_))
    }
}
