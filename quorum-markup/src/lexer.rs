//! Character-level tokenizer for quorum markup.
//!
//! ```text
//!            '<' name                     '>' (raw-text element)
//!   OUTER ─────────────► INNER ───────────────────────────────► CDATA(name)
//!     ▲                    │  '>' / '/>'                           │
//!     └────────────────────┘                       '</' name '>'   │
//!     ▲                                                            │
//!     └────────────────────────────────────────────────────────────┘
//!
//!   OUTER ── '<![CDATA[' ──► CDATA(anonymous) ── ']]>' ──► OUTER
//! ```
//!
//! Comments, `<!DOCTYPE ..>`, `<![if ..]> .. <![endif]>` guards and
//! `<?xml ..?>` declarations are consumed in OUTER and produce no tokens.
//!
//! The lexer never reads further ahead than the current token needs, so a
//! peer can act on `<UserResponses user="..."` before the `>` arrives.

use std::char::REPLACEMENT_CHARACTER;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::io::{self, BufRead, BufReader, ErrorKind, Read};

use crate::error::ParseError;

/// Entities every lexer knows before any numeric reference is cached.
const BUILTIN_ENTITIES: &[(&str, &str)] = &[
    ("amp", "&"),
    ("lt", "<"),
    ("gt", ">"),
    ("quot", "\""),
    ("apos", "'"),
    ("sp", " "),
    ("nbsp", "\u{a0}"),
    ("NewLine", "\n"),
];

/// The payload of a [`Token`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// `<name`
    Open(String),
    /// `name=value` inside an open tag, entities already resolved.
    Attr { name: String, value: String },
    /// `>` ending an open tag.
    Close,
    /// `/>` ending an open tag with no content.
    EClose,
    /// `</name>`
    ETag(String),
    /// A run of character data.
    Text(String),
    /// A lexical problem; the parser decides whether it is fatal.
    Error(String),
}

/// A token with the (approximate) line on which it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

impl Token {
    /// Element or attribute name, if this token carries one.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Open(name) | TokenKind::ETag(name) => Some(name),
            TokenKind::Attr { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Attribute value, text run or error message.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Attr { value, .. } => Some(value),
            TokenKind::Text(text) | TokenKind::Error(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, TokenKind::Error(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Open(name) => write!(f, "OPEN <{name}"),
            TokenKind::Attr { name, value } => write!(f, "ATTR {name}={value:?}"),
            TokenKind::Close => write!(f, "CLOSE >"),
            TokenKind::EClose => write!(f, "ECLOSE />"),
            TokenKind::ETag(name) => write!(f, "ETAG </{name}>"),
            TokenKind::Text(text) => write!(f, "TEXT {text:?}"),
            TokenKind::Error(message) => write!(f, "ERROR {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Outer,
    Inner,
    /// Raw text until `</name>`, or until `]]>` when anonymous.
    Cdata(Option<String>),
}

/// Result of one scanning step.
enum Scan {
    Token(TokenKind),
    /// A construct was consumed without producing a token.
    Skip,
    End,
}

fn error(message: impl Into<String>) -> io::Result<Scan> {
    Ok(Scan::Token(TokenKind::Error(message.into())))
}

/// UTF-8 decoding over a `BufRead` with unlimited character pushback.
struct CharSource<R> {
    reader: R,
    stray: Option<u8>,
    pending: VecDeque<char>,
    line: usize,
}

impl<R: BufRead> CharSource<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            stray: None,
            pending: VecDeque::new(),
            line: 1,
        }
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(byte) = self.stray.take() {
            return Ok(Some(byte));
        }
        loop {
            match self.reader.fill_buf() {
                Ok([]) => return Ok(None),
                Ok(buf) => {
                    let byte = buf[0];
                    self.reader.consume(1);
                    return Ok(Some(byte));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn decode(&mut self) -> io::Result<Option<char>> {
        let Some(first) = self.read_byte()? else {
            return Ok(None);
        };
        let width = match first {
            0x00..=0x7f => return Ok(Some(char::from(first))),
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return Ok(Some(REPLACEMENT_CHARACTER)),
        };
        let mut bytes = [first, 0, 0, 0];
        for slot in bytes.iter_mut().take(width).skip(1) {
            match self.read_byte()? {
                Some(b) if b & 0xc0 == 0x80 => *slot = b,
                Some(b) => {
                    // Start of the next character; keep it.
                    self.stray = Some(b);
                    return Ok(Some(REPLACEMENT_CHARACTER));
                }
                None => return Ok(Some(REPLACEMENT_CHARACTER)),
            }
        }
        Ok(std::str::from_utf8(&bytes[..width])
            .ok()
            .and_then(|s| s.chars().next())
            .or(Some(REPLACEMENT_CHARACTER)))
    }

    fn next_char(&mut self) -> io::Result<Option<char>> {
        let c = match self.pending.pop_front() {
            Some(c) => Some(c),
            None => self.decode()?,
        };
        if c == Some('\n') {
            self.line += 1;
        }
        Ok(c)
    }

    fn unread(&mut self, c: char) {
        if c == '\n' {
            self.line -= 1;
        }
        self.pending.push_front(c);
    }
}

/// Characters that may appear in element names, attribute names and bare
/// attribute values.
pub(crate) fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '<' | '>' | '/' | '=' | '&' | '"' | '\'' | ';')
}

fn is_entity_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '#' | '_' | ':' | '.' | '-')
}

/// Drop newline-plus-indentation runs left behind by pretty printing.
fn collapse_indentation(run: &str) -> String {
    let mut out = String::with_capacity(run.len());
    let mut chars = run.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                while matches!(chars.peek(), Some(' ') | Some('\t')) {
                    chars.next();
                }
            }
            c => out.push(c),
        }
    }
    out
}

/// Pull-based tokenizer with one token of pushback.
pub struct Lexer<R> {
    source: CharSource<R>,
    mode: Mode,
    /// Mode to enter when the current open tag ends with `>`.
    content_mode: Option<Mode>,
    cdata_elements: HashSet<String>,
    entities: HashMap<String, String>,
    current: Option<Token>,
    pushed_back: bool,
    exhausted: bool,
    /// Read failure behind the last ERROR token, if any.
    io_error: Option<io::Error>,
}

impl<'a> Lexer<&'a [u8]> {
    /// Lex an in-memory string.
    pub fn from_text(text: &'a str) -> Self {
        Self::new(text.as_bytes())
    }
}

impl<R: Read> Lexer<BufReader<R>> {
    /// Lex an unbuffered reader (a socket or file).
    pub fn from_reader(reader: R) -> Self {
        Self::new(BufReader::new(reader))
    }
}

impl<R: BufRead> Lexer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            source: CharSource::new(reader),
            mode: Mode::Outer,
            content_mode: None,
            cdata_elements: HashSet::new(),
            entities: BUILTIN_ENTITIES
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            current: None,
            pushed_back: false,
            exhausted: false,
            io_error: None,
        }
    }

    /// Treat the content of `<name>` as raw text up to `</name>`.
    pub fn add_cdata(&mut self, name: impl Into<String>) {
        self.cdata_elements.insert(name.into());
    }

    pub fn is_cdata(&self, name: &str) -> bool {
        self.cdata_elements.contains(name)
    }

    /// Approximate line of the input position.
    pub fn line(&self) -> usize {
        self.source.line
    }

    /// The most recently returned token.
    pub fn current(&self) -> Option<&Token> {
        self.current.as_ref()
    }

    /// Next token, or `None` at end of input.
    pub fn next_token(&mut self) -> Option<Token> {
        if self.pushed_back {
            self.pushed_back = false;
            return self.current.clone();
        }
        let token = self.scan();
        self.current = token.clone();
        token
    }

    /// Make the next call to [`next_token`](Self::next_token) return the
    /// current token again.
    pub fn push_back(&mut self) -> Result<(), ParseError> {
        if self.pushed_back || self.current.is_none() {
            return Err(ParseError::PushBack { line: self.line() });
        }
        self.pushed_back = true;
        Ok(())
    }

    /// The read failure that ended the token stream, as opposed to malformed
    /// input. Taken once.
    pub fn take_io_error(&mut self) -> Option<io::Error> {
        self.io_error.take()
    }

    /// Consume the underlying reader.
    pub fn into_inner(self) -> R {
        self.source.reader
    }

    fn scan(&mut self) -> Option<Token> {
        if self.exhausted {
            return None;
        }
        loop {
            let step = match self.mode.clone() {
                Mode::Outer => self.scan_outer(),
                Mode::Inner => self.scan_inner(),
                Mode::Cdata(Some(tag)) => self.scan_named_cdata(&tag),
                Mode::Cdata(None) => self.scan_anonymous_cdata(),
            };
            match step {
                Ok(Scan::Token(kind)) => {
                    return Some(Token {
                        kind,
                        line: self.source.line,
                    })
                }
                Ok(Scan::Skip) => continue,
                Ok(Scan::End) => {
                    self.exhausted = true;
                    return None;
                }
                Err(e) => {
                    log::debug!("Read failed at line {}: {}", self.source.line, e);
                    self.exhausted = true;
                    let token = Token {
                        kind: TokenKind::Error(e.to_string()),
                        line: self.source.line,
                    };
                    self.io_error = Some(e);
                    return Some(token);
                }
            }
        }
    }

    // ── character helpers ──────────────────────────────────────────

    fn read_while(&mut self, keep: impl Fn(char) -> bool) -> io::Result<String> {
        let mut out = String::new();
        while let Some(c) = self.source.next_char()? {
            if keep(c) {
                out.push(c);
            } else {
                self.source.unread(c);
                break;
            }
        }
        Ok(out)
    }

    fn skip_whitespace(&mut self) -> io::Result<()> {
        self.read_while(char::is_whitespace).map(drop)
    }

    /// Consume input through `terminator`; `false` if input ended first.
    fn skip_past(&mut self, terminator: &str) -> io::Result<bool> {
        let pattern: Vec<char> = terminator.chars().collect();
        let mut matched = 0;
        while let Some(c) = self.source.next_char()? {
            if c == pattern[matched] {
                matched += 1;
                if matched == pattern.len() {
                    return Ok(true);
                }
            } else {
                matched = usize::from(c == pattern[0]);
            }
        }
        Ok(false)
    }

    fn skip_comment(&mut self) -> io::Result<()> {
        let mut dashes = 0;
        while let Some(c) = self.source.next_char()? {
            match c {
                '-' => dashes += 1,
                '>' if dashes >= 2 => return Ok(()),
                _ => dashes = 0,
            }
        }
        Ok(())
    }

    // ── entities ───────────────────────────────────────────────────

    fn resolve_entity(&mut self, name: &str) -> String {
        if let Some(value) = self.entities.get(name) {
            return value.clone();
        }
        let code = match name.strip_prefix('#') {
            Some(hex) if hex.starts_with(['x', 'X']) => u32::from_str_radix(&hex[1..], 16).ok(),
            Some(dec) => dec.parse::<u32>().ok(),
            None => None,
        };
        match code.and_then(char::from_u32) {
            Some(c) => {
                let value = c.to_string();
                self.entities.insert(name.to_string(), value.clone());
                value
            }
            None => format!("Unknown entity \"&{name};\""),
        }
    }

    /// Resolve `&name;` references inside an attribute value.
    fn expand_entities(&mut self, raw: &str) -> String {
        if !raw.contains('&') {
            return raw.to_string();
        }
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(pos) = rest.find('&') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let end = after
                .find(|c: char| !is_entity_char(c))
                .unwrap_or(after.len());
            let resolved = self.resolve_entity(&after[..end]);
            out.push_str(&resolved);
            match after[end..].strip_prefix(';') {
                Some(tail) => rest = tail,
                None => {
                    out.push_str("(Missing ';' after '&')");
                    rest = &after[end..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    // ── OUTER ──────────────────────────────────────────────────────

    fn scan_outer(&mut self) -> io::Result<Scan> {
        let Some(c) = self.source.next_char()? else {
            return Ok(Scan::End);
        };
        match c {
            '<' => self.scan_markup(),
            '&' => self.scan_entity(),
            c => {
                self.source.unread(c);
                let run = self.read_while(|c| c != '<' && c != '&')?;
                let text = collapse_indentation(&run);
                if text.is_empty() {
                    Ok(Scan::Skip)
                } else {
                    Ok(Scan::Token(TokenKind::Text(text)))
                }
            }
        }
    }

    fn scan_entity(&mut self) -> io::Result<Scan> {
        match self.source.next_char()? {
            Some(' ') => return Ok(Scan::Token(TokenKind::Text("& ".into()))),
            Some(c) => self.source.unread(c),
            None => return error("Expected word after &"),
        }
        let name = self.read_while(is_entity_char)?;
        if name.is_empty() {
            return error("Expected word after &");
        }
        match self.source.next_char()? {
            Some(';') => {
                let value = self.resolve_entity(&name);
                Ok(Scan::Token(TokenKind::Text(value)))
            }
            other => {
                if let Some(c) = other {
                    self.source.unread(c);
                }
                error("Expected ';' to end entity")
            }
        }
    }

    /// After `<` in OUTER.
    fn scan_markup(&mut self) -> io::Result<Scan> {
        match self.source.next_char()? {
            None => error("< at EOF"),
            Some('/') => self.scan_end_tag(),
            Some('!') => self.scan_bang(),
            Some('?') => self.scan_declaration(),
            Some(c) if is_word_char(c) => {
                self.source.unread(c);
                let name = self.read_while(is_word_char)?;
                self.content_mode = self
                    .cdata_elements
                    .contains(&name)
                    .then(|| Mode::Cdata(Some(name.clone())));
                self.mode = Mode::Inner;
                Ok(Scan::Token(TokenKind::Open(name)))
            }
            Some(c) => error(format!("Illegal {c:?} after <")),
        }
    }

    fn scan_end_tag(&mut self) -> io::Result<Scan> {
        self.skip_whitespace()?;
        let name = self.read_while(is_word_char)?;
        if name.is_empty() {
            return error("Expected element name after </");
        }
        self.skip_whitespace()?;
        match self.source.next_char()? {
            Some('>') => Ok(Scan::Token(TokenKind::ETag(name))),
            other => {
                if let Some(c) = other {
                    self.source.unread(c);
                }
                error(format!("Expected > to close </{name}"))
            }
        }
    }

    /// After `<!`.
    fn scan_bang(&mut self) -> io::Result<Scan> {
        match self.source.next_char()? {
            Some('-') => {
                if self.source.next_char()? == Some('-') {
                    self.skip_comment()?;
                    Ok(Scan::Skip)
                } else {
                    error("BAD TAG: <!-")
                }
            }
            Some('[') => {
                let keyword = self.read_while(|c| c.is_ascii_alphabetic())?;
                if keyword == "CDATA" && self.source.next_char()? == Some('[') {
                    self.mode = Mode::Cdata(None);
                    Ok(Scan::Skip)
                } else if keyword.eq_ignore_ascii_case("if") {
                    self.skip_past("<![endif]>")?;
                    Ok(Scan::Skip)
                } else {
                    error(format!("BAD TAG: <![{keyword}"))
                }
            }
            Some(c) if c.is_ascii_alphabetic() => {
                self.source.unread(c);
                let keyword = self.read_while(|c| c.is_ascii_alphabetic())?;
                if keyword.eq_ignore_ascii_case("DOCTYPE") {
                    self.skip_past(">")?;
                    Ok(Scan::Skip)
                } else {
                    error(format!("BAD TAG: <!{keyword}"))
                }
            }
            _ => error("BAD TAG: <!"),
        }
    }

    /// After `<?`.
    fn scan_declaration(&mut self) -> io::Result<Scan> {
        let keyword = self.read_while(is_word_char)?;
        if keyword != "xml" {
            return error(format!("BAD TAG: <?{keyword}"));
        }
        if self.skip_past("?>")? {
            Ok(Scan::Skip)
        } else {
            error("BAD <?xml?> tag")
        }
    }

    // ── INNER ──────────────────────────────────────────────────────

    fn scan_inner(&mut self) -> io::Result<Scan> {
        self.skip_whitespace()?;
        match self.source.next_char()? {
            None => {
                self.mode = Mode::Outer;
                error("EOF inside tag")
            }
            Some('>') => {
                self.mode = self.content_mode.take().unwrap_or(Mode::Outer);
                Ok(Scan::Token(TokenKind::Close))
            }
            Some('/') => {
                self.mode = Mode::Outer;
                self.content_mode = None;
                match self.source.next_char()? {
                    Some('>') => Ok(Scan::Token(TokenKind::EClose)),
                    other => {
                        if let Some(c) = other {
                            self.source.unread(c);
                        }
                        error("Expected > after / inside tag")
                    }
                }
            }
            Some(c) if is_word_char(c) => {
                self.source.unread(c);
                self.scan_attribute()
            }
            Some(c) => error(format!("Illegal {c:?} inside of tag")),
        }
    }

    fn scan_attribute(&mut self) -> io::Result<Scan> {
        let name = self.read_while(is_word_char)?;
        self.skip_whitespace()?;
        match self.source.next_char()? {
            Some('=') => {}
            other => {
                if let Some(c) = other {
                    self.source.unread(c);
                }
                return error(format!("Expected '=' after attribute {name}"));
            }
        }
        self.skip_whitespace()?;
        let raw = match self.source.next_char()? {
            Some(quote @ ('"' | '\'')) => {
                let value = self.read_while(|c| c != quote)?;
                if self.source.next_char()?.is_none() {
                    return error("EOF inside attribute value");
                }
                value
            }
            Some(c) if is_word_char(c) => {
                self.source.unread(c);
                self.read_while(is_word_char)?
            }
            other => {
                if let Some(c) = other {
                    self.source.unread(c);
                }
                return error(format!("Expected value for attribute {name}"));
            }
        };
        let value = self.expand_entities(&raw);
        Ok(Scan::Token(TokenKind::Attr { name, value }))
    }

    // ── CDATA ──────────────────────────────────────────────────────

    fn scan_named_cdata(&mut self, tag: &str) -> io::Result<Scan> {
        let Some(c) = self.source.next_char()? else {
            return Ok(Scan::End);
        };
        if c != '<' {
            self.source.unread(c);
            let run = self.read_while(|c| c != '<')?;
            return Ok(Scan::Token(TokenKind::Text(run)));
        }
        match self.source.next_char()? {
            Some('/') => {}
            Some(other) => {
                self.source.unread(other);
                return Ok(Scan::Token(TokenKind::Text("<".into())));
            }
            None => return Ok(Scan::Token(TokenKind::Text("<".into()))),
        }
        self.skip_whitespace()?;
        let name = self.read_while(is_word_char)?;
        if name != tag {
            return Ok(Scan::Token(TokenKind::Text(format!("</{name}"))));
        }
        self.skip_whitespace()?;
        self.mode = Mode::Outer;
        match self.source.next_char()? {
            Some('>') => Ok(Scan::Token(TokenKind::ETag(name))),
            other => {
                if let Some(c) = other {
                    self.source.unread(c);
                }
                error(format!("Expected > to close </{name}"))
            }
        }
    }

    fn scan_anonymous_cdata(&mut self) -> io::Result<Scan> {
        let Some(c) = self.source.next_char()? else {
            return Ok(Scan::End);
        };
        if c != ']' {
            self.source.unread(c);
            let run = self.read_while(|c| c != ']')?;
            return Ok(Scan::Token(TokenKind::Text(run)));
        }
        let brackets = 1 + self.read_while(|c| c == ']')?.len();
        match self.source.next_char()? {
            Some('>') if brackets >= 2 => {
                self.mode = Mode::Outer;
                if brackets > 2 {
                    Ok(Scan::Token(TokenKind::Text("]".repeat(brackets - 2))))
                } else {
                    Ok(Scan::Skip)
                }
            }
            other => {
                if let Some(c) = other {
                    self.source.unread(c);
                }
                Ok(Scan::Token(TokenKind::Text("]".repeat(brackets))))
            }
        }
    }
}

impl<R: BufRead> Iterator for Lexer<R> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.next_token()
    }
}
