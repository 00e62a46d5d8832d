use quorum_markup::{Content, Document, ParseError};

use crate::question::Question;

/// An ordered list of questions prepared ahead of a session.
///
/// Positions are 1-based throughout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    questions: Vec<Question>,
}

impl Script {
    pub const ELEMENT: &'static str = "Script";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Question> {
        self.questions.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Question> {
        index.checked_sub(1).and_then(|i| self.questions.get(i))
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Question> {
        index.checked_sub(1).and_then(|i| self.questions.get_mut(i))
    }

    pub fn push(&mut self, question: Question) {
        self.questions.push(question);
    }

    /// Insert so that `question` ends up at `index` (1..=len+1).
    pub fn insert(&mut self, index: usize, question: Question) -> bool {
        if index == 0 || index > self.questions.len() + 1 {
            return false;
        }
        self.questions.insert(index - 1, question);
        true
    }

    pub fn remove(&mut self, index: usize) -> Option<Question> {
        let i = index.checked_sub(1).filter(|&i| i < self.questions.len())?;
        Some(self.questions.remove(i))
    }

    pub fn set_all(&mut self, questions: impl IntoIterator<Item = Question>) {
        self.questions = questions.into_iter().collect();
    }

    pub fn clear(&mut self) {
        self.questions.clear();
    }
}

impl FromIterator<Question> for Script {
    fn from_iter<I: IntoIterator<Item = Question>>(iter: I) -> Self {
        Self {
            questions: iter.into_iter().collect(),
        }
    }
}

impl Document for Script {
    fn element_name(&self) -> &str {
        Self::ELEMENT
    }

    fn contents(&self) -> Vec<Content<'_>> {
        self.questions
            .iter()
            .map(|q| Content::Element(q as &dyn Document))
            .collect()
    }

    fn accept_child(&mut self, child: Box<dyn Document>) -> Result<(), ParseError> {
        let question = child
            .downcast::<Question>()
            .map_err(|child| ParseError::UnexpectedChild {
                element: Self::ELEMENT.to_string(),
                child: child.element_name().to_string(),
            })?;
        self.questions.push(*question);
        Ok(())
    }
}
