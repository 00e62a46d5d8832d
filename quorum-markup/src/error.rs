//! Error types for reading and writing markup.

use std::io;

use thiserror::Error;

/// Failure while turning a token stream into documents.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("No factory registered for element <{0}>")]
    UnknownElement(String),

    #[error("Line {line}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        line: usize,
    },

    #[error("Line {line}: expected </{expected}>, found </{found}>")]
    MismatchedEndTag {
        expected: String,
        found: String,
        line: usize,
    },

    #[error("Line {line}: {message}")]
    Lex { message: String, line: usize },

    #[error("Element <{element}> does not accept attribute '{name}'")]
    UnexpectedAttribute { element: String, name: String },

    #[error("Invalid value {value:?} for attribute '{name}': {reason}")]
    InvalidAttribute {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Element <{element}> does not accept nested <{child}>")]
    UnexpectedChild { element: String, child: String },

    #[error("Element <{element}> does not accept text {text:?}")]
    UnexpectedText { element: String, text: String },

    #[error("Unexpected end of input{}", .0.as_ref().map(|e| format!(" inside <{e}>")).unwrap_or_default())]
    UnexpectedEof(Option<String>),

    #[error("Line {line}: only one token can be pushed back, after it was read")]
    PushBack { line: usize },

    #[error("Invalid document: {0}")]
    Invalid(String),
}

/// Failure while emitting markup.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Illegal markup name {0:?}")]
    InvalidName(String),

    #[error("Only one top-level element may be written")]
    MultipleRoots,

    #[error("Attributes may only follow an element start or another attribute")]
    AttributeOutsideTag,

    #[error("Text must be nested inside an element")]
    TextOutsideElement,

    #[error("No open element to end")]
    NothingToEnd,

    #[error("Comments may not contain '--' or end with '-'")]
    InvalidComment,

    #[error("Only text may be written inside raw-text element <{0}>")]
    MarkupInRawText(String),

    #[error("Raw text inside <{0}> would end the element early")]
    RawTextEndTag(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failure of a whole-file load or save.
#[derive(Debug, Error)]
pub enum MarkupError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Expected a {expected} document, found <{found}>")]
    WrongDocument { expected: &'static str, found: String },
}
