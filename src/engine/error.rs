/// Caller-facing classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Entity absent, or the caller may not see it.
    NotFound,
    InvalidRequest,
    Conflict,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(String),
    InvalidRequest(String),
    Conflict(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::InvalidRequest(_) | EngineError::LimitExceeded(_) => {
                ErrorKind::InvalidRequest
            }
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(msg) => write!(f, "not found: {msg}"),
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Conflict(msg) => write!(f, "conflict: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
