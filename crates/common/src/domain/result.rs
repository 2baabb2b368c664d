use thiserror::Error;

use crate::domain::ValidationError;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Sink write failed: {0}")]
    SinkWrite(String),

    #[error("Connection fault: {0}")]
    Connection(String),

    #[error("Connection {connection_id} exceeded abuse threshold ({score} > {threshold})")]
    AbuseThresholdExceeded {
        connection_id: u64,
        score: u64,
        threshold: u64,
    },

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}
