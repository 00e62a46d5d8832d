use thiserror::Error;

/// Rejected session-log operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    #[error("Response received with no question in progress.")]
    NoQuestion,

    #[error("Response received out of order.")]
    OutOfOrder,

    #[error("A question is already in progress.")]
    AlreadyInProgress,

    #[error("No question in progress.")]
    NotInProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown choice style: {0}")]
pub struct UnknownStyle(pub String);
