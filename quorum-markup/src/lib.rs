//! # quorum-markup — Markup layer for the Quorum quiz protocol
//!
//! A small, non-standard XML dialect: a streaming lexer, an indenting
//! writer whose output the lexer reads back losslessly, and a document
//! model where typed nodes are built by name through a [`Registry`].
//!
//! ## Modules
//!
//! - [`lexer`] — Character stream to tokens, one token of pushback
//! - [`writer`] — Escaping, indenting emitter
//! - [`document`] — `Document` trait and the recursive parse/serialize walk
//! - [`registry`] — Element name to factory mapping

pub mod document;
pub mod error;
pub mod lexer;
pub mod registry;
pub mod writer;

pub use document::{
    parse_body, parse_document, save, to_markup_string, write_document, Content, Document,
    Element, Node,
};
pub use error::{MarkupError, ParseError, WriteError};
pub use lexer::{Lexer, Token, TokenKind};
pub use registry::Registry;
pub use writer::MarkupWriter;
