use std::fmt;

use chrono::{Local, NaiveDateTime};
use quorum_markup::{Content, Document, ParseError};

/// Wire format of response timestamps: ISO local date-time, fractional
/// seconds only when non-zero.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parse an ISO local date-time, with or without seconds.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M"))
        .ok()
}

pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// One user's answer, stamped with local wall-clock time when created.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    user: String,
    text: String,
    timestamp: NaiveDateTime,
}

impl Response {
    pub const ELEMENT: &'static str = "Response";

    pub fn new(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self::at(user, text, Local::now().naive_local())
    }

    pub fn at(user: impl Into<String>, text: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            user: user.into(),
            text: text.into(),
            timestamp,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.user, self.text)
    }
}

impl Document for Response {
    fn element_name(&self) -> &str {
        Self::ELEMENT
    }

    fn attributes(&self) -> Vec<(&str, String)> {
        vec![
            ("user", self.user.clone()),
            ("timestamp", format_timestamp(&self.timestamp)),
        ]
    }

    fn contents(&self) -> Vec<Content<'_>> {
        vec![Content::Text(&self.text)]
    }

    fn accept_attribute(&mut self, name: &str, value: String) -> Result<(), ParseError> {
        match name {
            "user" => self.user = value,
            "timestamp" => {
                self.timestamp = parse_timestamp(&value).ok_or_else(|| ParseError::InvalidAttribute {
                    name: name.to_string(),
                    value,
                    reason: "expected an ISO local date-time".into(),
                })?;
            }
            _ => {
                return Err(ParseError::UnexpectedAttribute {
                    element: Self::ELEMENT.to_string(),
                    name: name.to_string(),
                })
            }
        }
        Ok(())
    }

    fn accept_text(&mut self, text: String) -> Result<(), ParseError> {
        self.text.push_str(&text);
        Ok(())
    }
}
