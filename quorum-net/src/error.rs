use std::io;

use quorum_core::LogError;
use quorum_markup::ParseError;
use thiserror::Error;

/// Why a document could not be queued for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Outbound queue is full")]
    Full,

    #[error("Outbound stream is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Malformed handshake: {0}")]
    Handshake(String),

    #[error("Unexpected token in stream: {0}")]
    UnexpectedToken(String),

    #[error("Unexpected <{0}> in stream")]
    UnexpectedDocument(String),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Session has shut down")]
    Shutdown,
}
