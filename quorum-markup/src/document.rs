//! Polymorphic document trees and the recursive parse/serialize protocol.
//!
//! ```text
//!  OPEN name ──► Registry::create(name) ──► ATTR* ──► accept_attribute
//!                                            │
//!                          ECLOSE ◄──────────┴──────────► CLOSE
//!                            │                              │
//!                            │        TEXT ─► accept_text   │
//!                            │        OPEN ─► (recurse) ─► accept_child
//!                            │        ETAG name             │
//!                            ▼                              ▼
//!                          finish() ◄───────────────────────┘
//! ```

use std::any::Any;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use crate::error::{MarkupError, ParseError, WriteError};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::registry::Registry;
use crate::writer::MarkupWriter;

/// One piece of an element's content, in document order.
#[derive(Debug)]
pub enum Content<'a> {
    Text(&'a str),
    Element(&'a dyn Document),
}

/// Upcast helper so trait objects can be downcast to concrete documents.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A node that can be read from and written to markup.
///
/// Writers use [`element_name`](Document::element_name),
/// [`attributes`](Document::attributes) and [`contents`](Document::contents).
/// The parser feeds a fresh node through the `accept_*` hooks and then calls
/// [`finish`](Document::finish). Hooks a type does not override reject
/// their input.
pub trait Document: AsAny + fmt::Debug + Send + Sync {
    fn element_name(&self) -> &str;

    fn attributes(&self) -> Vec<(&str, String)> {
        Vec::new()
    }

    fn contents(&self) -> Vec<Content<'_>> {
        Vec::new()
    }

    fn accept_attribute(&mut self, name: &str, _value: String) -> Result<(), ParseError> {
        Err(ParseError::UnexpectedAttribute {
            element: self.element_name().to_string(),
            name: name.to_string(),
        })
    }

    fn accept_child(&mut self, child: Box<dyn Document>) -> Result<(), ParseError> {
        Err(ParseError::UnexpectedChild {
            element: self.element_name().to_string(),
            child: child.element_name().to_string(),
        })
    }

    fn accept_text(&mut self, text: String) -> Result<(), ParseError> {
        Err(ParseError::UnexpectedText {
            element: self.element_name().to_string(),
            text,
        })
    }

    /// Called once the end tag (or `/>`) has been read.
    fn finish(&mut self) -> Result<(), ParseError> {
        Ok(())
    }
}

impl dyn Document {
    pub fn is<T: Document>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Document>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    pub fn downcast_mut<T: Document>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }

    /// Take ownership of the concrete node, or get the node back unchanged.
    pub fn downcast<T: Document>(self: Box<Self>) -> Result<Box<T>, Box<dyn Document>> {
        if !self.is::<T>() {
            return Err(self);
        }
        let Ok(doc) = self.into_any().downcast::<T>() else {
            unreachable!("concrete type checked above");
        };
        Ok(doc)
    }
}

fn unexpected(expected: &'static str, token: Token) -> ParseError {
    match token.kind {
        TokenKind::Error(message) => ParseError::Lex {
            message,
            line: token.line,
        },
        _ => ParseError::UnexpectedToken {
            expected,
            found: token.to_string(),
            line: token.line,
        },
    }
}

/// Parse the next complete element from `lexer`.
pub fn parse_document<R: BufRead>(
    registry: &Registry,
    lexer: &mut Lexer<R>,
) -> Result<Box<dyn Document>, ParseError> {
    match lexer.next_token() {
        Some(Token {
            kind: TokenKind::Open(name),
            ..
        }) => {
            let mut doc = registry.create(&name)?;
            parse_body(registry, lexer, doc.as_mut())?;
            Ok(doc)
        }
        Some(token) => Err(unexpected("an element", token)),
        None => Err(ParseError::UnexpectedEof(None)),
    }
}

/// Parse the attributes and content of `doc`, whose OPEN token has already
/// been consumed.
pub fn parse_body<R: BufRead>(
    registry: &Registry,
    lexer: &mut Lexer<R>,
    doc: &mut dyn Document,
) -> Result<(), ParseError> {
    let name = doc.element_name().to_string();
    let eof = || ParseError::UnexpectedEof(Some(name.clone()));

    let after_attributes = loop {
        match lexer.next_token() {
            Some(Token {
                kind: TokenKind::Attr { name, value },
                ..
            }) => doc.accept_attribute(&name, value)?,
            Some(token) => break token,
            None => return Err(eof()),
        }
    };

    match after_attributes.kind {
        TokenKind::EClose => {}
        TokenKind::Close => loop {
            let Some(token) = lexer.next_token() else {
                return Err(eof());
            };
            match token.kind {
                TokenKind::Text(text) => doc.accept_text(text)?,
                TokenKind::Open(_) => {
                    lexer.push_back()?;
                    let child = parse_document(registry, lexer)?;
                    doc.accept_child(child)?;
                }
                TokenKind::ETag(found) if found == name => break,
                TokenKind::ETag(found) => {
                    return Err(ParseError::MismatchedEndTag {
                        expected: name,
                        found,
                        line: token.line,
                    })
                }
                _ => return Err(unexpected("text, an element or an end tag", token)),
            }
        },
        _ => return Err(unexpected("an attribute, '>' or '/>'", after_attributes)),
    }
    doc.finish()
}

/// Write `doc` and everything beneath it.
pub fn write_document<W: Write>(
    doc: &dyn Document,
    writer: &mut MarkupWriter<W>,
) -> Result<(), WriteError> {
    let name = doc.element_name();
    writer.start_element(name)?;
    for (key, value) in doc.attributes() {
        writer.write_attribute(key, &value)?;
    }
    for content in doc.contents() {
        match content {
            Content::Text(text) => writer.write_text(text)?,
            Content::Element(child) => write_document(child, writer)?,
        }
    }
    writer.end_element(name)
}

/// Serialize `doc` as a fragment (no XML declaration).
pub fn to_markup_string(doc: &dyn Document) -> Result<String, WriteError> {
    markup_string_with(doc, |_| {})
}

pub(crate) fn markup_string_with(
    doc: &dyn Document,
    configure: impl FnOnce(&mut MarkupWriter<Vec<u8>>),
) -> Result<String, WriteError> {
    let mut writer = MarkupWriter::fragment(Vec::new());
    configure(&mut writer);
    write_document(doc, &mut writer)?;
    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

/// Write `doc` to a file as a standalone document.
pub fn save(doc: &dyn Document, path: impl AsRef<Path>) -> Result<(), MarkupError> {
    save_with(doc, path.as_ref(), |_| {})
}

pub(crate) fn save_with(
    doc: &dyn Document,
    path: &Path,
    configure: impl FnOnce(&mut MarkupWriter<BufWriter<File>>),
) -> Result<(), MarkupError> {
    let file = File::create(path)?;
    let mut writer = MarkupWriter::new(BufWriter::new(file))?;
    configure(&mut writer);
    write_document(doc, &mut writer)?;
    writer.flush()?;
    log::debug!("Saved <{}> to {}", doc.element_name(), path.display());
    Ok(())
}

/// Generic element that keeps whatever it is given.
///
/// Useful for unknown vocabularies and for inspecting a stream; children
/// must themselves be `Element`s.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Element(Element),
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text.into());
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Adjacent runs merge, as they would after a round trip.
    fn push_text(&mut self, text: String) {
        match self.children.last_mut() {
            Some(Node::Text(last)) => last.push_str(&text),
            _ => self.children.push(Node::Text(text)),
        }
    }
}

impl Document for Element {
    fn element_name(&self) -> &str {
        &self.name
    }

    fn attributes(&self) -> Vec<(&str, String)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone()))
            .collect()
    }

    fn contents(&self) -> Vec<Content<'_>> {
        self.children
            .iter()
            .map(|node| match node {
                Node::Text(text) => Content::Text(text),
                Node::Element(child) => Content::Element(child),
            })
            .collect()
    }

    fn accept_attribute(&mut self, name: &str, value: String) -> Result<(), ParseError> {
        if self.attribute(name).is_some() {
            return Err(ParseError::InvalidAttribute {
                name: name.to_string(),
                value,
                reason: "duplicate attribute".into(),
            });
        }
        self.attributes.push((name.to_string(), value));
        Ok(())
    }

    fn accept_child(&mut self, child: Box<dyn Document>) -> Result<(), ParseError> {
        match child.downcast::<Element>() {
            Ok(element) => {
                self.children.push(Node::Element(*element));
                Ok(())
            }
            Err(child) => Err(ParseError::UnexpectedChild {
                element: self.name.clone(),
                child: child.element_name().to_string(),
            }),
        }
    }

    fn accept_text(&mut self, text: String) -> Result<(), ParseError> {
        self.push_text(text);
        Ok(())
    }
}
