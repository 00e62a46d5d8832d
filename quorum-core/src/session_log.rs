//! Questions put to a session and the responses they collected.
//!
//! ```text
//!   start_question(q, epoch) ──► [ ..., (q, []) ]   current = q
//!   add_response(r)           ──► [ ..., (q, [r]) ]  r.timestamp >= epoch
//!   stop_question()           ──► entry kept,        current = none
//!   abort_question()          ──► entry dropped,     current = none
//! ```

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use quorum_markup::{Content, Document, ParseError};
use serde::Serialize;

use crate::error::LogError;
use crate::question::Question;
use crate::response::Response;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub question: Question,
    pub responses: Vec<Response>,
}

/// Answer counts for one logged question, keyed by answer text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub prompt: String,
    pub responses: usize,
    pub answers: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLog {
    entries: Vec<LogEntry>,
    /// Epoch of the question in progress (always the last entry).
    current: Option<NaiveDateTime>,
}

impl SessionLog {
    pub const ELEMENT: &'static str = "ResponseLog";

    pub fn new() -> Self {
        Self::default()
    }

    /// Provisionally log `question`; responses stamped before `epoch` will
    /// be refused.
    pub fn start_question(&mut self, question: Question, epoch: NaiveDateTime) -> Result<(), LogError> {
        if self.current.is_some() {
            return Err(LogError::AlreadyInProgress);
        }
        self.entries.push(LogEntry {
            question,
            responses: Vec::new(),
        });
        self.current = Some(epoch);
        Ok(())
    }

    pub fn add_response(&mut self, response: Response) -> Result<(), LogError> {
        let epoch = self.current.ok_or(LogError::NoQuestion)?;
        if response.timestamp() < epoch {
            log::debug!("Stale response from {} ({} < {})", response.user(), response.timestamp(), epoch);
            return Err(LogError::OutOfOrder);
        }
        let entry = self.entries.last_mut().ok_or(LogError::NoQuestion)?;
        entry.responses.push(response);
        Ok(())
    }

    /// Close the question in progress, keeping its entry.
    pub fn stop_question(&mut self) -> Result<&LogEntry, LogError> {
        self.current.take().ok_or(LogError::NotInProgress)?;
        self.entries.last().ok_or(LogError::NotInProgress)
    }

    /// Drop the question in progress and its responses.
    pub fn abort_question(&mut self) -> Option<LogEntry> {
        self.current.take()?;
        let entry = self.entries.pop()?;
        log::debug!("Aborted question with {} responses", entry.responses.len());
        Some(entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = None;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    pub fn epoch(&self) -> Option<NaiveDateTime> {
        self.current
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.current?;
        self.entries.last().map(|entry| &entry.question)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.entries.iter().map(|entry| &entry.question)
    }

    /// Responses of the 1-based entry `index`.
    pub fn responses(&self, index: usize) -> Option<&[Response]> {
        index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(|entry| entry.responses.as_slice())
    }

    /// Responses to every entry asking `question`, in log order.
    pub fn responses_to(&self, question: &Question) -> Vec<&Response> {
        self.entries
            .iter()
            .filter(|entry| &entry.question == question)
            .flat_map(|entry| entry.responses.iter())
            .collect()
    }

    /// Count answers to the 1-based entry `index`.
    pub fn tally(&self, index: usize) -> Option<Tally> {
        let entry = index.checked_sub(1).and_then(|i| self.entries.get(i))?;
        let mut answers = BTreeMap::new();
        for response in &entry.responses {
            *answers.entry(response.text().trim().to_string()).or_insert(0) += 1;
        }
        Some(Tally {
            prompt: entry.question.prompt().to_string(),
            responses: entry.responses.len(),
            answers,
        })
    }
}

impl Document for SessionLog {
    fn element_name(&self) -> &str {
        Self::ELEMENT
    }

    fn contents(&self) -> Vec<Content<'_>> {
        let mut contents = Vec::new();
        for entry in &self.entries {
            contents.push(Content::Element(&entry.question as &dyn Document));
            contents.extend(
                entry
                    .responses
                    .iter()
                    .map(|r| Content::Element(r as &dyn Document)),
            );
        }
        contents
    }

    fn accept_child(&mut self, child: Box<dyn Document>) -> Result<(), ParseError> {
        let child = match child.downcast::<Response>() {
            Ok(response) => {
                let entry = self
                    .entries
                    .last_mut()
                    .ok_or_else(|| ParseError::Invalid("response logged before any question".into()))?;
                entry.responses.push(*response);
                return Ok(());
            }
            Err(child) => child,
        };
        let question = child
            .downcast::<Question>()
            .map_err(|child| ParseError::UnexpectedChild {
                element: Self::ELEMENT.to_string(),
                child: child.element_name().to_string(),
            })?;
        self.entries.push(LogEntry {
            question: *question,
            responses: Vec::new(),
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ParseError> {
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard_registry;
    use chrono::{Duration, NaiveDate};
    use quorum_markup::to_markup_string;

    fn epoch() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn answer(user: &str, text: &str, offset_secs: i64) -> Response {
        Response::at(user, text, epoch() + Duration::seconds(offset_secs))
    }

    #[test]
    fn test_question_lifecycle() {
        let mut log = SessionLog::new();
        assert_eq!(log.add_response(answer("a", "x", 1)), Err(LogError::NoQuestion));
        assert!(matches!(log.stop_question(), Err(LogError::NotInProgress)));

        log.start_question(Question::free_response("Q1"), epoch()).unwrap();
        assert_eq!(
            log.start_question(Question::free_response("Q2"), epoch()),
            Err(LogError::AlreadyInProgress)
        );
        assert_eq!(log.current_question().map(Question::prompt), Some("Q1"));
        log.add_response(answer("a", "x", 0)).unwrap();
        log.add_response(answer("b", "y", 5)).unwrap();
        assert_eq!(log.stop_question().unwrap().responses.len(), 2);
        assert!(!log.in_progress());
        assert_eq!(log.add_response(answer("c", "z", 9)), Err(LogError::NoQuestion));
        assert_eq!(log.responses(1).map(<[Response]>::len), Some(2));
    }

    #[test]
    fn test_stale_response_rejected() {
        let mut log = SessionLog::new();
        log.start_question(Question::free_response("Q"), epoch()).unwrap();
        assert_eq!(log.add_response(answer("a", "x", -1)), Err(LogError::OutOfOrder));
        assert_eq!(log.responses(1), Some(&[][..]));
    }

    #[test]
    fn test_abort_drops_entry() {
        let mut log = SessionLog::new();
        assert!(log.abort_question().is_none());
        log.start_question(Question::free_response("Q"), epoch()).unwrap();
        log.add_response(answer("a", "x", 1)).unwrap();
        let dropped = log.abort_question().unwrap();
        assert_eq!(dropped.responses.len(), 1);
        assert!(log.is_empty());
        assert!(!log.in_progress());
    }

    #[test]
    fn test_responses_to_repeated_question() {
        let mut log = SessionLog::new();
        let q = Question::choice("Pick", ["a", "b"]);
        for (i, text) in ["a", "b"].into_iter().enumerate() {
            log.start_question(q.clone(), epoch()).unwrap();
            log.add_response(answer("u", text, i as i64)).unwrap();
            log.stop_question().unwrap();
        }
        let texts: Vec<_> = log.responses_to(&q).iter().map(|r| r.text()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_tally() {
        let mut log = SessionLog::new();
        log.start_question(Question::choice("Pick", ["a", "b"]), epoch()).unwrap();
        for (user, text) in [("u1", "a"), ("u2", "b "), ("u3", "b")] {
            log.add_response(answer(user, text, 1)).unwrap();
        }
        let tally = log.tally(1).unwrap();
        assert_eq!(tally.responses, 3);
        assert_eq!(tally.answers.get("b"), Some(&2));
        assert!(log.tally(2).is_none());
    }

    #[test]
    fn test_markup_round_trip_clears_current() {
        let mut log = SessionLog::new();
        log.start_question(Question::choice("Pick", ["a", "b"]), epoch()).unwrap();
        log.add_response(answer("u1", "a", 1)).unwrap();
        log.stop_question().unwrap();
        log.start_question(Question::free_response("Why?"), epoch()).unwrap();
        log.add_response(answer("u2", "because", 2)).unwrap();

        let text = to_markup_string(&log).unwrap();
        let parsed = standard_registry().parse_str(&text).unwrap();
        let parsed = parsed.downcast_ref::<SessionLog>().unwrap();
        assert_eq!(parsed.entries(), log.entries());
        assert!(!parsed.in_progress());
    }

    #[test]
    fn test_response_before_question_rejected() {
        let text = "<ResponseLog><Response user='a' timestamp='2024-05-01T09:30:00'>x</Response></ResponseLog>";
        assert!(matches!(
            standard_registry().parse_str(text),
            Err(ParseError::Invalid(_))
        ));
    }
}
