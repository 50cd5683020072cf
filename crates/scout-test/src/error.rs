//! Test fixture error types.

/// Result type alias for fixture operations.
pub type Result<T> = std::result::Result<T, TestError>;

/// Fixture errors.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// The mock core agent failed.
    #[error("mock agent error: {0}")]
    MockAgent(String),

    /// Building a fixture archive failed.
    #[error("archive fixture error: {0}")]
    Archive(String),

    /// Timeout.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TestError {
    /// Creates a mock agent error.
    #[must_use]
    pub fn mock_agent(msg: impl Into<String>) -> Self {
        Self::MockAgent(msg.into())
    }

    /// Creates an archive error.
    #[must_use]
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }
}
