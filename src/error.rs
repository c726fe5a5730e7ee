// Governance Error Types
// Errors surface only at configuration boundaries and inside the audit pipeline;
// allow/deny decisions are plain values.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("Failed to format audit record: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Audit sink error: {0}")]
    Sink(String),
}

impl From<figment::Error> for GovernanceError {
    fn from(error: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(error))
    }
}

pub type GovernanceResult<T> = Result<T, GovernanceError>;
