//! # quorum-core — Quiz documents for Quorum
//!
//! Typed documents built on `quorum-markup`: questions and their choices,
//! timestamped responses, scripts of prepared questions, the session log,
//! and the envelope and control messages exchanged over the network.
//!
//! ## Modules
//!
//! - [`choice`] — Choices and the twelve label styles
//! - [`question`] — Free-response and choice questions
//! - [`response`] — Timestamped answers
//! - [`script`] — Prepared question lists
//! - [`session_log`] — Questions asked and the answers collected
//! - [`messages`] — `UserResponses` / `Requests` envelopes, `Error`, `ResponseTimeDone`

pub mod choice;
pub mod error;
pub mod messages;
pub mod question;
pub mod response;
pub mod script;
pub mod session_log;

pub use choice::{Choice, ChoiceStyle, LabelFormat, Numbering};
pub use error::{LogError, UnknownStyle};
pub use messages::{ErrorReport, Request, Requests, TimesUp, UserResponses};
pub use question::{ChoiceSet, Question, QuestionKind};
pub use response::Response;
pub use script::Script;
pub use session_log::{LogEntry, SessionLog, Tally};

use quorum_markup::Registry;

/// A registry that knows every document in this crate.
pub fn standard_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(Choice::ELEMENT, Choice::default);
    registry.register(Question::CHOICE_ELEMENT, || Question::choice("", Vec::<String>::new()));
    registry.register(Question::FREE_RESPONSE_ELEMENT, || Question::free_response(""));
    registry.register(Response::ELEMENT, Response::default);
    registry.register(Script::ELEMENT, Script::default);
    registry.register(SessionLog::ELEMENT, SessionLog::default);
    registry.register(ErrorReport::ELEMENT, ErrorReport::default);
    registry.register(TimesUp::ELEMENT, || TimesUp);
    registry.register(UserResponses::ELEMENT, UserResponses::default);
    registry.register(Requests::ELEMENT, Requests::default);
    registry
}
