/// Lifecycle status of a crawl session
///
/// A session is created `Running` and closed exactly once into one of the
/// three terminal statuses.
use std::fmt;

/// Status of a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// The orchestrator is still working on this session
    Running,

    /// Both phases finished without a fatal error
    Completed,

    /// A phase-scoped error aborted the run
    Failed,

    /// An external signal stopped the run before it finished
    Interrupted,
}

impl SessionStatus {
    /// Returns true once the session has been closed
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "interrupted" => Some(Self::Interrupted),
            _ => None,
        }
    }

    /// Process exit code the CLI reports for a session closed in this status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Running | Self::Failed => 1,
            Self::Interrupted => 130,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
