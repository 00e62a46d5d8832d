//! Wire conventions shared by server and client.
//!
//! Each direction is one long-lived envelope element. Its start tag arrives
//! first (the client's carries `user`), then one child document at a time
//! until the end tag or end of stream.

use std::io::BufRead;
use std::sync::Arc;

use quorum_markup::{Document, Lexer, Registry, TokenKind};

use crate::error::NetError;

/// TCP port used when none is configured.
pub const DEFAULT_PORT: u16 = 53129;

pub const MALFORMED_HANDSHAKE: &str = "Malformed/Illegal request response.";
pub const DUPLICATE_USER: &str = "Duplicate user.";

/// Reads the incoming half of a connection.
pub struct EnvelopeReader<R> {
    lexer: Lexer<R>,
    registry: Arc<Registry>,
    envelope: &'static str,
}

impl<R: BufRead> EnvelopeReader<R> {
    pub fn new(registry: Arc<Registry>, reader: R, envelope: &'static str) -> Self {
        Self {
            lexer: registry.lexer(reader),
            registry,
            envelope,
        }
    }

    pub fn line(&self) -> usize {
        self.lexer.line()
    }

    /// Run one read step, reporting a failed socket read as `Io` rather than
    /// as the malformed input it left behind.
    fn checked<T>(
        &mut self,
        step: impl FnOnce(&mut Self) -> Result<T, NetError>,
    ) -> Result<T, NetError> {
        step(self).map_err(|e| match self.lexer.take_io_error() {
            Some(io) => NetError::Io(io),
            None => e,
        })
    }

    /// Expect the envelope's start tag to open.
    pub fn read_open(&mut self) -> Result<(), NetError> {
        self.checked(Self::open_envelope)
    }

    fn open_envelope(&mut self) -> Result<(), NetError> {
        match self.lexer.next_token() {
            Some(token) if token.name() == Some(self.envelope) && matches!(token.kind, TokenKind::Open(_)) => {
                Ok(())
            }
            Some(token) => Err(NetError::Handshake(format!(
                "expected <{}, found {token}",
                self.envelope
            ))),
            None => Err(NetError::Handshake(format!(
                "expected <{}, found end of stream",
                self.envelope
            ))),
        }
    }

    /// Expect the very next token to be attribute `name`; returns its value.
    pub fn read_attribute(&mut self, name: &str) -> Result<String, NetError> {
        self.checked(|r| r.expect_attribute(name))
    }

    fn expect_attribute(&mut self, name: &str) -> Result<String, NetError> {
        let Some(token) = self.lexer.next_token() else {
            return Err(NetError::Handshake(format!(
                "expected {name}=.., found end of stream"
            )));
        };
        match token.kind {
            TokenKind::Attr { name: found, value } if found == name => Ok(value),
            _ => Err(NetError::Handshake(format!(
                "expected {name}=.., found {token}"
            ))),
        }
    }

    /// Skip any remaining attributes of the start tag. Returns false when the
    /// envelope was empty (`/>`).
    pub fn finish_start_tag(&mut self) -> Result<bool, NetError> {
        self.checked(Self::skip_attributes)
    }

    fn skip_attributes(&mut self) -> Result<bool, NetError> {
        loop {
            match self.lexer.next_token() {
                Some(token) => match token.kind {
                    TokenKind::Attr { .. } => continue,
                    TokenKind::Close => return Ok(true),
                    TokenKind::EClose => return Ok(false),
                    _ => return Err(NetError::UnexpectedToken(token.to_string())),
                },
                None => return Ok(false),
            }
        }
    }

    /// The next child document, or `None` at the envelope's end tag or end
    /// of stream. Whitespace between children is skipped.
    pub fn next_document(&mut self) -> Result<Option<Box<dyn Document>>, NetError> {
        self.checked(Self::read_document)
    }

    fn read_document(&mut self) -> Result<Option<Box<dyn Document>>, NetError> {
        loop {
            let Some(token) = self.lexer.next_token() else {
                return Ok(None);
            };
            match &token.kind {
                TokenKind::Text(text) if text.trim().is_empty() => continue,
                TokenKind::Open(_) => {
                    self.lexer.push_back()?;
                    return Ok(Some(self.registry.parse(&mut self.lexer)?));
                }
                TokenKind::ETag(name) if name == self.envelope => return Ok(None),
                _ => return Err(NetError::UnexpectedToken(token.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::{standard_registry, Response, TimesUp};
    use std::io::{self, BufReader, ErrorKind, Read};

    fn reader<'a>(text: &'a str, envelope: &'static str) -> EnvelopeReader<&'a [u8]> {
        EnvelopeReader::new(Arc::new(standard_registry()), text.as_bytes(), envelope)
    }

    #[test]
    fn test_handshake_and_responses() {
        let mut r = reader(
            "<?xml version=\"1.0\"?>\n<UserResponses user=\"dana\">\n  \
             <Response user=\"dana\" timestamp=\"2024-03-01T10:00:00\">B</Response>\n\
             </UserResponses>",
            "UserResponses",
        );
        r.read_open().unwrap();
        assert_eq!(r.read_attribute("user").unwrap(), "dana");
        assert!(r.finish_start_tag().unwrap());
        let doc = r.next_document().unwrap().unwrap();
        assert_eq!(doc.downcast_ref::<Response>().map(Response::text), Some("B"));
        assert!(r.next_document().unwrap().is_none());
    }

    #[test]
    fn test_handshake_requires_user_first() {
        let mut r = reader("<UserResponses name=\"x\" user=\"y\">", "UserResponses");
        r.read_open().unwrap();
        assert!(matches!(r.read_attribute("user"), Err(NetError::Handshake(_))));

        let mut r = reader("<Requests>", "UserResponses");
        assert!(matches!(r.read_open(), Err(NetError::Handshake(_))));

        let mut r = reader("", "UserResponses");
        assert!(matches!(r.read_open(), Err(NetError::Handshake(_))));
    }

    #[test]
    fn test_stream_ends_without_end_tag() {
        let mut r = reader("<Requests><ResponseTimeDone/>", "Requests");
        r.read_open().unwrap();
        assert!(r.finish_start_tag().unwrap());
        let doc = r.next_document().unwrap().unwrap();
        assert!(doc.is::<TimesUp>());
        assert!(r.next_document().unwrap().is_none());
    }

    #[test]
    fn test_stray_text_is_rejected() {
        let mut r = reader("<Requests> hello <ResponseTimeDone/>", "Requests");
        r.read_open().unwrap();
        r.finish_start_tag().unwrap();
        assert!(matches!(r.next_document(), Err(NetError::UnexpectedToken(_))));
    }

    #[test]
    fn test_empty_envelope() {
        let mut r = reader("<Requests/>", "Requests");
        r.read_open().unwrap();
        assert!(!r.finish_start_tag().unwrap());
    }

    /// Yields `data`, then fails as a dropped socket would.
    struct ResetAfter<'a>(&'a [u8]);

    impl Read for ResetAfter<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Err(io::Error::new(ErrorKind::ConnectionReset, "reset by peer"));
            }
            self.0.read(buf)
        }
    }

    fn failing_reader(text: &str) -> EnvelopeReader<BufReader<ResetAfter<'_>>> {
        EnvelopeReader::new(
            Arc::new(standard_registry()),
            BufReader::new(ResetAfter(text.as_bytes())),
            "UserResponses",
        )
    }

    #[test]
    fn test_reset_mid_document_is_io() {
        let mut r = failing_reader(
            "<UserResponses user=\"dana\">\
             <Response user=\"dana\" timestamp=\"2024-03-01T10:00:00\">hal",
        );
        r.read_open().unwrap();
        r.read_attribute("user").unwrap();
        assert!(r.finish_start_tag().unwrap());
        match r.next_document() {
            Err(NetError::Io(e)) => assert_eq!(e.kind(), ErrorKind::ConnectionReset),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn test_reset_during_handshake_is_io() {
        let mut r = failing_reader("<UserResp");
        assert!(matches!(r.read_open(), Err(NetError::Io(_))));
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let mut r = reader("<UserResponses user=\"dana\"><Response user>", "UserResponses");
        r.read_open().unwrap();
        r.read_attribute("user").unwrap();
        r.finish_start_tag().unwrap();
        assert!(matches!(r.next_document(), Err(NetError::Parse(_))));
    }
}
