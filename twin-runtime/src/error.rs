//! Error types for the twin runtime

use thiserror::Error;
use twin_types::{OperatorError, TqlError};

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),

    #[error("Mapper error: {0}")]
    Mapper(#[from] MapperError),

    #[error("Flush error: {0}")]
    Flush(#[from] FlushError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Mailbox errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailboxError {
    /// Retryable; the producer yields and puts again
    #[error("Mailbox overflow at capacity {0}")]
    Overflow(usize),

    #[error("Mailbox cannot shrink from {capacity} to {requested}")]
    ShrinkRejected { capacity: usize, requested: usize },
}

/// Property patch errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("Patch path invalid: {0:?}")]
    PathInvalid(String),

    #[error("Patch operator invalid: {0}")]
    OperatorInvalid(String),

    #[error("Patch operator reserved: {0}")]
    OperatorReserved(String),

    #[error("Property not found: {0}")]
    PropertyNotFound(String),

    #[error("Property {path} is not {expected}")]
    TypeMismatch { path: String, expected: &'static str },
}

impl From<OperatorError> for PatchError {
    fn from(err: OperatorError) -> Self {
        match err {
            OperatorError::Invalid(op) => PatchError::OperatorInvalid(op),
            OperatorError::Reserved(op) => PatchError::OperatorReserved(op),
        }
    }
}

/// Actor lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActorError {
    #[error("Entity {0} is deleted")]
    Deleted(String),

    #[error("Message has no target entity")]
    MissingTarget,

    #[error("Message handler failed: {0}")]
    Handler(String),
}

/// Mapper compile/exec errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapperError {
    #[error("Compile mapper {mapper_id}: {source}")]
    Compile { mapper_id: String, source: TqlError },

    #[error("Execute mapper {mapper_id}: {source}")]
    Exec { mapper_id: String, source: TqlError },
}

/// Failure reported by a search or time-series sink
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

/// First sink failure seen during a flush
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("state store: {0}")]
    State(RepositoryError),

    #[error("search index: {0}")]
    Search(SinkError),

    #[error("time series: {0}")]
    TimeSeries(SinkError),
}

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Dispatch and transport errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No queue available for entity {0}")]
    NoQueue(String),

    #[error("Downstream {0} not found")]
    DownstreamNotFound(String),

    #[error("Pub/sub {0} is closed")]
    Closed(String),

    #[error("Pub/sub {0} already has a consumer")]
    AlreadyConsuming(String),

    #[error("Event codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Event missing attribute {0}")]
    MissingAttribute(&'static str),

    #[error("Unsupported queue type for {0}")]
    Unsupported(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;
