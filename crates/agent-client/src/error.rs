use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    /// Worth retrying with backoff. Rejections and malformed payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::RequestFailed(e) => e.is_timeout() || e.is_connect(),
            AgentError::ServiceUnavailable(_) | AgentError::RateLimited(_) | AgentError::Timeout => true,
            AgentError::Rejected(_) | AgentError::InvalidResponse(_) | AgentError::Serialization(_) => {
                false
            }
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
