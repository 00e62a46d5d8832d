//! Indenting markup emitter.
//!
//! Output is shaped so that [`Lexer`](crate::Lexer) reads it back exactly:
//! every text run sits on its own indented line, and every character the
//! lexer would fold away (newlines, edge spaces, control characters) is
//! written as an entity.
//!
//! Raw-text elements are the exception: the lexer takes their content
//! verbatim, so it is written verbatim, on the start tag's line.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::Write;

use crate::error::WriteError;
use crate::lexer::is_word_char;

pub const DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

const INDENT_STEP: usize = 2;
const MAX_INDENT: usize = 40;

/// Stateful writer for one top-level element.
pub struct MarkupWriter<W: Write> {
    out: W,
    depth: usize,
    in_attributes: bool,
    finished: bool,
    raw_text: HashSet<String>,
    /// The raw-text element currently open, if any.
    raw: Option<String>,
}

impl<W: Write> MarkupWriter<W> {
    /// Writer for a file or stream: emits the XML declaration first.
    pub fn new(mut out: W) -> Result<Self, WriteError> {
        out.write_all(DECLARATION.as_bytes())?;
        Ok(Self::fragment(out))
    }

    /// Writer without the declaration.
    pub fn fragment(out: W) -> Self {
        Self {
            out,
            depth: 0,
            in_attributes: false,
            finished: false,
            raw_text: HashSet::new(),
            raw: None,
        }
    }

    /// Write the content of `<name>` unescaped, as the lexer reads it back.
    pub fn add_raw_text(&mut self, name: impl Into<String>) {
        self.raw_text.insert(name.into());
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn start_element(&mut self, name: &str) -> Result<(), WriteError> {
        check_name(name)?;
        if self.finished {
            return Err(WriteError::MultipleRoots);
        }
        if let Some(raw) = &self.raw {
            return Err(WriteError::MarkupInRawText(raw.clone()));
        }
        self.end_attributes()?;
        self.indent()?;
        write!(self.out, "<{name}")?;
        self.depth += 1;
        self.in_attributes = true;
        if self.raw_text.contains(name) {
            self.raw = Some(name.to_string());
        }
        Ok(())
    }

    pub fn write_attribute(&mut self, name: &str, value: &str) -> Result<(), WriteError> {
        check_name(name)?;
        if !self.in_attributes {
            return Err(WriteError::AttributeOutsideTag);
        }
        write!(self.out, " {name}=\"{}\"", escape(value, false))?;
        Ok(())
    }

    /// Write a text run on its own line, or verbatim inside a raw-text
    /// element. Empty text writes nothing.
    pub fn write_text(&mut self, text: &str) -> Result<(), WriteError> {
        if self.depth == 0 {
            return Err(WriteError::TextOutsideElement);
        }
        if text.is_empty() {
            return Ok(());
        }
        if let Some(raw) = &self.raw {
            if closes_raw_text(text, raw) {
                return Err(WriteError::RawTextEndTag(raw.clone()));
            }
            self.end_attributes()?;
            self.out.write_all(text.as_bytes())?;
            return Ok(());
        }
        self.end_attributes()?;
        self.indent()?;
        writeln!(self.out, "{}", escape(text, true))?;
        Ok(())
    }

    /// Character data is handled like any other text.
    pub fn write_cdata(&mut self, text: &str) -> Result<(), WriteError> {
        self.write_text(text)
    }

    pub fn write_comment(&mut self, comment: &str) -> Result<(), WriteError> {
        if comment.contains("--") || comment.ends_with('-') {
            return Err(WriteError::InvalidComment);
        }
        if let Some(raw) = &self.raw {
            return Err(WriteError::MarkupInRawText(raw.clone()));
        }
        self.end_attributes()?;
        self.indent()?;
        writeln!(self.out, "<!--{comment}-->")?;
        Ok(())
    }

    /// End the innermost open element, self-closing it if nothing was
    /// written inside.
    pub fn end_element(&mut self, name: &str) -> Result<(), WriteError> {
        if self.depth == 0 {
            return Err(WriteError::NothingToEnd);
        }
        self.depth -= 1;
        if self.in_attributes {
            self.out.write_all(b"/>\n")?;
            self.in_attributes = false;
            self.raw = None;
        } else if self.raw.take().is_some() {
            writeln!(self.out, "</{name}>")?;
        } else {
            self.indent()?;
            writeln!(self.out, "</{name}>")?;
        }
        if self.depth == 0 {
            self.finished = true;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), WriteError> {
        self.out.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn end_attributes(&mut self) -> Result<(), WriteError> {
        if self.in_attributes {
            let close: &[u8] = if self.raw.is_some() { b">" } else { b">\n" };
            self.out.write_all(close)?;
            self.in_attributes = false;
        }
        Ok(())
    }

    fn indent(&mut self) -> Result<(), WriteError> {
        let width = (self.depth * INDENT_STEP).min(MAX_INDENT);
        write!(self.out, "{:width$}", "")?;
        Ok(())
    }
}

/// Whether `text` holds something the lexer would take as `</tag>`.
fn closes_raw_text(text: &str, tag: &str) -> bool {
    text.match_indices("</").any(|(i, _)| {
        let rest = text[i + 2..].trim_start();
        let end = rest.find(|c| !is_word_char(c)).unwrap_or(rest.len());
        &rest[..end] == tag
    })
}

/// Names start with a letter, `_` or `:`; digits, `.`, `-` and `·` may follow.
fn check_name(name: &str) -> Result<(), WriteError> {
    let mut chars = name.chars();
    let legal_start = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == ':');
    let legal_rest = chars.all(|c| {
        c.is_alphanumeric() || matches!(c, '_' | ':' | '.' | '-' | '\u{b7}')
    });
    if legal_start && legal_rest {
        Ok(())
    } else {
        Err(WriteError::InvalidName(name.to_string()))
    }
}

/// Escape a text run or attribute value.
pub fn escape(text: &str, quote_edge_spaces: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&NewLine;"),
            ' ' if quote_edge_spaces && (i == 0 || i + 1 == text.len()) => out.push_str("&sp;"),
            c if c.is_control() => {
                let _ = write!(out, "&#{};", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment() -> MarkupWriter<Vec<u8>> {
        MarkupWriter::fragment(Vec::new())
    }

    fn output(writer: MarkupWriter<Vec<u8>>) -> String {
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[test]
    fn test_raw_text_is_verbatim() {
        let mut w = fragment();
        w.add_raw_text("script");
        w.start_element("page").unwrap();
        w.start_element("script").unwrap();
        w.write_attribute("lang", "js").unwrap();
        w.write_text("if (a < b && c) {\n  go();\n}").unwrap();
        w.end_element("script").unwrap();
        w.write_text("after").unwrap();
        w.end_element("page").unwrap();
        assert_eq!(
            output(w),
            "<page>\n  <script lang=\"js\">if (a < b && c) {\n  go();\n}</script>\n  after\n</page>\n"
        );
    }

    #[test]
    fn test_raw_text_content_checks() {
        let mut w = fragment();
        w.add_raw_text("script");
        w.start_element("script").unwrap();
        assert!(matches!(
            w.write_text("a </script> b"),
            Err(WriteError::RawTextEndTag(_))
        ));
        w.write_text("a </scripts> b").unwrap();
        assert!(matches!(w.start_element("b"), Err(WriteError::MarkupInRawText(_))));
        assert!(matches!(w.write_comment("c"), Err(WriteError::MarkupInRawText(_))));
        w.end_element("script").unwrap();
        assert_eq!(output(w), "<script>a </scripts> b</script>\n");
    }

    #[test]
    fn test_declaration() {
        let mut w = MarkupWriter::new(Vec::new()).unwrap();
        w.start_element("a").unwrap();
        w.end_element("a").unwrap();
        assert_eq!(output(w), format!("{DECLARATION}<a/>\n"));
    }

    #[test]
    fn test_nested_output() {
        let mut w = fragment();
        w.start_element("Response").unwrap();
        w.write_attribute("user", "bob").unwrap();
        w.write_text("yes").unwrap();
        w.start_element("x").unwrap();
        w.end_element("x").unwrap();
        w.end_element("Response").unwrap();
        assert_eq!(
            output(w),
            "<Response user=\"bob\">\n  yes\n  <x/>\n</Response>\n"
        );
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape("a&b<c\"d", false), "a&amp;b&lt;c&quot;d");
        assert_eq!(escape("line\nnext", true), "line&NewLine;next");
        assert_eq!(escape(" pad ", true), "&sp;pad&sp;");
        assert_eq!(escape(" pad ", false), " pad ");
        assert_eq!(escape("tab\t", true), "tab&#9;");
    }

    #[test]
    fn test_indent_is_capped() {
        let mut w = fragment();
        for _ in 0..30 {
            w.start_element("n").unwrap();
        }
        w.write_text("deep").unwrap();
        let text = output(w);
        let line = text.lines().find(|l| l.ends_with("deep")).unwrap();
        assert_eq!(line.len(), MAX_INDENT + 4);
    }

    #[test]
    fn test_two_roots_fail() {
        let mut w = fragment();
        w.start_element("a").unwrap();
        w.end_element("a").unwrap();
        assert!(matches!(w.start_element("b"), Err(WriteError::MultipleRoots)));
    }

    #[test]
    fn test_text_before_element_fails() {
        let mut w = fragment();
        assert!(matches!(w.write_text("x"), Err(WriteError::TextOutsideElement)));
    }

    #[test]
    fn test_over_ending_fails() {
        let mut w = fragment();
        w.start_element("a").unwrap();
        w.end_element("a").unwrap();
        assert!(matches!(w.end_element("a"), Err(WriteError::NothingToEnd)));
    }

    #[test]
    fn test_attribute_after_content_fails() {
        let mut w = fragment();
        w.start_element("a").unwrap();
        w.write_text("x").unwrap();
        assert!(matches!(
            w.write_attribute("k", "v"),
            Err(WriteError::AttributeOutsideTag)
        ));
    }

    #[test]
    fn test_names_are_checked() {
        let mut w = fragment();
        assert!(matches!(w.start_element("1a"), Err(WriteError::InvalidName(_))));
        assert!(matches!(w.start_element(""), Err(WriteError::InvalidName(_))));
        assert!(w.start_element("_a.b-c\u{b7}9").is_ok());
    }

    #[test]
    fn test_comments() {
        let mut w = fragment();
        w.start_element("a").unwrap();
        assert!(matches!(w.write_comment("a--b"), Err(WriteError::InvalidComment)));
        assert!(matches!(w.write_comment("ends-"), Err(WriteError::InvalidComment)));
        w.write_comment(" fine ").unwrap();
        w.end_element("a").unwrap();
        assert_eq!(output(w), "<a>\n  <!-- fine -->\n</a>\n");
    }
}
