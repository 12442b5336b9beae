use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("agent is offline")]
    AgentOffline,

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("operation timed out after {0}s")]
    Timeout(f64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
