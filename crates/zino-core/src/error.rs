//! Error types for the state engine.

use thiserror::Error;

/// State engine errors.
#[derive(Error, Debug)]
pub enum CoreError {
    /// An operation tried to move an event out of the terminal closed state.
    #[error("event {0} is closed and cannot be reopened")]
    ClosedEvent(u32),

    /// Unknown event id.
    #[error("event {0} does not exist")]
    NoSuchEvent(u32),

    /// Unknown planned maintenance id.
    #[error("planned maintenance {0} does not exist")]
    NoSuchMaintenance(u32),

    /// Pollfile parse error, with the offending line number.
    #[error("pollfile {file} line {line}: {reason}")]
    Pollfile {
        file: String,
        line: usize,
        reason: String,
    },

    /// Main configuration file error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Snapshot or archive serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for state engine operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_event_display() {
        let err = CoreError::ClosedEvent(42);
        assert_eq!(err.to_string(), "event 42 is closed and cannot be reopened");
    }

    #[test]
    fn test_pollfile_error_cites_line() {
        let err = CoreError::Pollfile {
            file: "polldevs.cf".to_string(),
            line: 17,
            reason: "unknown key \"communty\"".to_string(),
        };
        assert!(err.to_string().contains("line 17"));
    }
}
