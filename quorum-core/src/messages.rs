//! Protocol documents: the two stream envelopes and the control messages
//! that travel inside them.
//!
//! ```text
//! client ── <UserResponses user="..">  <Response/>*          ──► server
//! server ── <Requests>  (<ChoiceQuestion/> | <FreeResponseQuestion/>
//!                        | <ResponseTimeDone/> | <Error/>)*    ──► client
//! ```

use std::fmt;

use quorum_markup::{Content, Document, ParseError};

use crate::question::Question;
use crate::response::Response;

/// Diagnostic sent to a peer; travels in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorReport {
    message: String,
}

impl ErrorReport {
    pub const ELEMENT: &'static str = "Error";

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Document for ErrorReport {
    fn element_name(&self) -> &str {
        Self::ELEMENT
    }

    fn contents(&self) -> Vec<Content<'_>> {
        vec![Content::Text(&self.message)]
    }

    fn accept_text(&mut self, text: String) -> Result<(), ParseError> {
        self.message.push_str(&text);
        Ok(())
    }
}

/// "Time's up": the question in progress no longer takes answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimesUp;

impl TimesUp {
    pub const ELEMENT: &'static str = "ResponseTimeDone";
}

impl Document for TimesUp {
    fn element_name(&self) -> &str {
        Self::ELEMENT
    }
}

/// Client-to-server envelope.
///
/// On the wire only its start tag and `user` attribute are sent up front;
/// the responses follow one at a time for the life of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserResponses {
    pub user: String,
    pub responses: Vec<Response>,
}

impl UserResponses {
    pub const ELEMENT: &'static str = "UserResponses";

    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            responses: Vec::new(),
        }
    }
}

impl Document for UserResponses {
    fn element_name(&self) -> &str {
        Self::ELEMENT
    }

    fn attributes(&self) -> Vec<(&str, String)> {
        vec![("user", self.user.clone())]
    }

    fn contents(&self) -> Vec<Content<'_>> {
        self.responses
            .iter()
            .map(|r| Content::Element(r as &dyn Document))
            .collect()
    }

    fn accept_attribute(&mut self, name: &str, value: String) -> Result<(), ParseError> {
        if name != "user" {
            return Err(ParseError::UnexpectedAttribute {
                element: Self::ELEMENT.to_string(),
                name: name.to_string(),
            });
        }
        self.user = value;
        Ok(())
    }

    fn accept_child(&mut self, child: Box<dyn Document>) -> Result<(), ParseError> {
        let response = child
            .downcast::<Response>()
            .map_err(|child| ParseError::UnexpectedChild {
                element: Self::ELEMENT.to_string(),
                child: child.element_name().to_string(),
            })?;
        self.responses.push(*response);
        Ok(())
    }
}

/// One item of the server-to-client stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Question(Question),
    TimesUp(TimesUp),
    Error(ErrorReport),
}

impl Request {
    pub fn as_document(&self) -> &dyn Document {
        match self {
            Request::Question(q) => q,
            Request::TimesUp(t) => t,
            Request::Error(e) => e,
        }
    }

    /// Classify a parsed document; anything else is handed back.
    pub fn from_document(doc: Box<dyn Document>) -> Result<Request, Box<dyn Document>> {
        let doc = match doc.downcast::<Question>() {
            Ok(question) => return Ok(Request::Question(*question)),
            Err(doc) => doc,
        };
        let doc = match doc.downcast::<ErrorReport>() {
            Ok(error) => return Ok(Request::Error(*error)),
            Err(doc) => doc,
        };
        doc.downcast::<TimesUp>().map(|_| Request::TimesUp(TimesUp))
    }
}

impl From<Question> for Request {
    fn from(question: Question) -> Self {
        Request::Question(question)
    }
}

impl From<ErrorReport> for Request {
    fn from(error: ErrorReport) -> Self {
        Request::Error(error)
    }
}

/// Server-to-client envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Requests {
    pub requests: Vec<Request>,
}

impl Requests {
    pub const ELEMENT: &'static str = "Requests";
}

impl Document for Requests {
    fn element_name(&self) -> &str {
        Self::ELEMENT
    }

    fn contents(&self) -> Vec<Content<'_>> {
        self.requests
            .iter()
            .map(|r| Content::Element(r.as_document()))
            .collect()
    }

    fn accept_child(&mut self, child: Box<dyn Document>) -> Result<(), ParseError> {
        let request = Request::from_document(child).map_err(|child| ParseError::UnexpectedChild {
            element: Self::ELEMENT.to_string(),
            child: child.element_name().to_string(),
        })?;
        self.requests.push(request);
        Ok(())
    }
}
