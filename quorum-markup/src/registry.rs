//! Name-keyed document factories.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use crate::document::{self, Document};
use crate::error::{MarkupError, ParseError, WriteError};
use crate::lexer::Lexer;
use crate::writer::MarkupWriter;

type Factory = Box<dyn Fn() -> Box<dyn Document> + Send + Sync>;

/// Maps element names to factories producing fresh, empty documents.
///
/// Built once at startup and shared (usually behind an `Arc`) by every
/// parser that needs it.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, Factory>,
    raw_text: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `name`.
    pub fn register<D, F>(&mut self, name: impl Into<String>, factory: F)
    where
        D: Document,
        F: Fn() -> D + Send + Sync + 'static,
    {
        let name = name.into();
        let boxed: Factory = Box::new(move || -> Box<dyn Document> { Box::new(factory()) });
        let previous = self.factories.insert(name.clone(), boxed);
        if previous.is_some() {
            log::debug!("Replaced factory for <{}>", name);
        }
    }

    /// Register a factory whose element content is lexed as raw text.
    pub fn register_raw_text<D, F>(&mut self, name: impl Into<String>, factory: F)
    where
        D: Document,
        F: Fn() -> D + Send + Sync + 'static,
    {
        let name = name.into();
        self.raw_text.insert(name.clone());
        self.register(name, factory);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.raw_text.remove(name);
        self.factories.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn is_raw_text(&self, name: &str) -> bool {
        self.raw_text.contains(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// A fresh, empty document for `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Document>, ParseError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ParseError::UnknownElement(name.to_string()))?;
        let doc = factory();
        debug_assert_eq!(doc.element_name(), name, "factory built the wrong element");
        Ok(doc)
    }

    /// A lexer that knows this registry's raw-text elements.
    pub fn lexer<R: BufRead>(&self, reader: R) -> Lexer<R> {
        let mut lexer = Lexer::new(reader);
        for name in &self.raw_text {
            lexer.add_cdata(name.clone());
        }
        lexer
    }

    /// A fragment writer that keeps this registry's raw-text elements
    /// verbatim.
    pub fn writer<W: Write>(&self, out: W) -> MarkupWriter<W> {
        let mut writer = MarkupWriter::fragment(out);
        self.mark_raw_text(&mut writer);
        writer
    }

    fn mark_raw_text<W: Write>(&self, writer: &mut MarkupWriter<W>) {
        for name in &self.raw_text {
            writer.add_raw_text(name.clone());
        }
    }

    pub fn to_markup_string(&self, doc: &dyn Document) -> Result<String, WriteError> {
        document::markup_string_with(doc, |writer| self.mark_raw_text(writer))
    }

    /// Write a standalone document this registry can load back.
    pub fn save(&self, doc: &dyn Document, path: impl AsRef<Path>) -> Result<(), MarkupError> {
        document::save_with(doc, path.as_ref(), |writer| self.mark_raw_text(writer))
    }

    /// Parse the next element from an existing lexer.
    pub fn parse<R: BufRead>(&self, lexer: &mut Lexer<R>) -> Result<Box<dyn Document>, ParseError> {
        document::parse_document(self, lexer)
    }

    pub fn parse_str(&self, text: &str) -> Result<Box<dyn Document>, ParseError> {
        self.parse(&mut self.lexer(text.as_bytes()))
    }

    pub fn read<R: Read>(&self, reader: R) -> Result<Box<dyn Document>, ParseError> {
        self.parse(&mut self.lexer(BufReader::new(reader)))
    }

    /// Read a standalone document from a file.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Box<dyn Document>, MarkupError> {
        let file = File::open(path.as_ref())?;
        let doc = self.read(file)?;
        log::debug!("Loaded <{}> from {}", doc.element_name(), path.as_ref().display());
        Ok(doc)
    }

    /// Read a file that must hold a `T` at the top level.
    pub fn load_as<T: Document>(&self, path: impl AsRef<Path>) -> Result<T, MarkupError> {
        let doc = self.load(path)?;
        doc.downcast::<T>()
            .map(|doc| *doc)
            .map_err(|doc| MarkupError::WrongDocument {
                expected: std::any::type_name::<T>(),
                found: doc.element_name().to_string(),
            })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("elements", &self.names())
            .field("raw_text", &self.raw_text)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Element;

    #[test]
    fn test_register_and_create() {
        let mut registry = Registry::new();
        registry.register("a", || Element::new("a"));
        assert!(registry.contains("a"));
        assert_eq!(registry.create("a").unwrap().element_name(), "a");
        assert!(matches!(registry.create("b"), Err(ParseError::UnknownElement(_))));
    }

    #[test]
    fn test_unregister() {
        let mut registry = Registry::new();
        registry.register_raw_text("code", || Element::new("code"));
        assert!(registry.is_raw_text("code"));
        assert!(registry.unregister("code"));
        assert!(!registry.contains("code"));
        assert!(!registry.is_raw_text("code"));
        assert!(!registry.unregister("code"));
    }

    #[test]
    fn test_raw_text_element() {
        let mut registry = Registry::new();
        registry.register("doc", || Element::new("doc"));
        registry.register_raw_text("code", || Element::new("code"));

        let doc = registry.parse_str("<doc><code>a < b && <c></code></doc>").unwrap();
        let doc = doc.downcast_ref::<Element>().unwrap();
        let expected = Element::new("doc").with_child(Element::new("code").with_text("a < b && <c>"));
        assert_eq!(doc, &expected);
    }

    #[test]
    fn test_raw_text_round_trip() {
        let mut registry = Registry::new();
        registry.register("doc", || Element::new("doc"));
        registry.register_raw_text("code", || Element::new("code"));

        let tree = Element::new("doc")
            .with_child(Element::new("code").with_text("a < b & c\n  </x> &amp;"))
            .with_child(Element::new("code"));
        let text = registry.to_markup_string(&tree).unwrap();
        assert_eq!(
            text,
            "<doc>\n  <code>a < b & c\n  </x> &amp;</code>\n  <code/>\n</doc>\n"
        );
        let parsed = registry.parse_str(&text).unwrap();
        assert_eq!(parsed.downcast_ref::<Element>(), Some(&tree));
    }

    #[test]
    fn test_raw_text_rejects_its_end_tag() {
        let mut registry = Registry::new();
        registry.register_raw_text("code", || Element::new("code"));

        for text in ["x </code> y", "x </ code"] {
            let tree = Element::new("code").with_text(text);
            assert!(matches!(
                registry.to_markup_string(&tree),
                Err(WriteError::RawTextEndTag(_))
            ));
        }
        let nested = Element::new("code").with_child(Element::new("b"));
        assert!(matches!(
            registry.to_markup_string(&nested),
            Err(WriteError::MarkupInRawText(_))
        ));
    }

    #[test]
    fn test_save_keeps_raw_text() {
        let mut registry = Registry::new();
        registry.register_raw_text("code", || Element::new("code"));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("code.xml");
        let tree = Element::new("code").with_text("if a < b && c > d {}");
        registry.save(&tree, &path).unwrap();
        assert_eq!(registry.load_as::<Element>(&path).unwrap(), tree);
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = Registry::new();
        registry.register("b", || Element::new("b"));
        registry.register("a", || Element::new("a"));
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_read_from_reader() {
        let mut registry = Registry::new();
        registry.register("a", || Element::new("a"));
        let doc = registry.read(&b"<?xml version=\"1.0\"?>\n<a x='1'/>"[..]).unwrap();
        assert_eq!(doc.downcast_ref::<Element>().and_then(|e| e.attribute("x")), Some("1"));
    }

    #[test]
    fn test_load_as_wrong_type() {
        #[derive(Debug)]
        struct Other;
        impl Document for Other {
            fn element_name(&self) -> &str {
                "a"
            }
        }

        let mut registry = Registry::new();
        registry.register("a", || Element::new("a"));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.xml");
        std::fs::write(&path, "<a/>").unwrap();
        assert!(registry.load_as::<Element>(&path).is_ok());
        assert!(matches!(
            registry.load_as::<Other>(&path),
            Err(MarkupError::WrongDocument { .. })
        ));
    }
}
