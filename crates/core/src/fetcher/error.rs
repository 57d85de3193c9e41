//! Error types for the fetcher module.

use thiserror::Error;

/// Errors raised while running the external fetch tool.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The fetch program could not be launched.
    #[error("Fetch tool not found: {program}")]
    ToolNotFound { program: String },

    /// The fetch process exited unsuccessfully.
    #[error("Download failed (exit code {}): {stderr}", describe_exit(.exit_code))]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The fetch process exceeded its time budget and was killed.
    #[error("Download timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Track listing output could not be understood.
    #[error("Failed to parse track listing: {reason}")]
    ParseError { reason: String },

    /// I/O error talking to the child process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl FetchError {
    /// Creates a new failure from an exit code and captured stderr.
    pub fn failed(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::Failed {
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Creates a new parse error.
    pub fn parse_error(reason: impl Into<String>) -> Self {
        Self::ParseError {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_display_carries_stderr() {
        let err = FetchError::failed(Some(1), "auth error");
        assert_eq!(err.to_string(), "Download failed (exit code 1): auth error");

        let err = FetchError::failed(None, "killed");
        assert!(err.to_string().contains("exit code none"));
    }
}
