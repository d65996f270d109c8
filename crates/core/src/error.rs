use thiserror::Error;

pub type NurtureResult<T> = Result<T, NurtureError>;

#[derive(Error, Debug)]
pub enum NurtureError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Flow is not valid: {}", .0.join("; "))]
    InvalidFlow(Vec<String>),

    #[error("A publish for draft {0} is already in flight")]
    SubmissionInFlight(String),

    #[error("Backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl NurtureError {
    /// Whether the failure came from the remote side (HTTP status or
    /// connection) rather than from local input.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Transport(_))
    }
}

impl From<config::ConfigError> for NurtureError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_flow_lists_every_error() {
        let err = NurtureError::InvalidFlow(vec![
            "Flow name is required".into(),
            "Stage 1 has no content".into(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("Flow name is required"));
        assert!(msg.contains("Stage 1 has no content"));
        assert!(!err.is_backend());
    }

    #[test]
    fn test_backend_classification() {
        let err = NurtureError::Backend {
            status: 502,
            message: "bad gateway".into(),
        };
        assert!(err.is_backend());
        assert!(NurtureError::Transport("timeout".into()).is_backend());
    }
}
