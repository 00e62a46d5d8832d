//! Questions: free-response or multiple choice.

use std::fmt;

use quorum_markup::{Content, Document, ParseError};

use crate::choice::{Choice, ChoiceStyle};

/// The choices of a choice question, kept indexed 1..n in order and
/// sharing one style.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChoiceSet {
    choices: Vec<Choice>,
    style: ChoiceStyle,
    multiple: bool,
}

impl ChoiceSet {
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Choice> {
        self.choices.iter()
    }

    /// 1-based lookup.
    pub fn get(&self, index: usize) -> Option<&Choice> {
        index.checked_sub(1).and_then(|i| self.choices.get(i))
    }

    pub fn set_text(&mut self, index: usize, text: impl Into<String>) -> bool {
        match index.checked_sub(1).and_then(|i| self.choices.get_mut(i)) {
            Some(choice) => {
                choice.set_text(text);
                true
            }
            None => false,
        }
    }

    pub fn style(&self) -> ChoiceStyle {
        self.style
    }

    /// Restyle every choice.
    pub fn set_style(&mut self, style: ChoiceStyle) {
        self.style = style;
        self.renumber(0);
    }

    pub fn multiple(&self) -> bool {
        self.multiple
    }

    pub fn set_multiple(&mut self, multiple: bool) {
        self.multiple = multiple;
    }

    /// Append a choice; returns its index.
    pub fn add(&mut self, text: impl Into<String>) -> usize {
        self.push(Choice::new(text));
        self.choices.len()
    }

    /// Remove the choice at 1-based `index`, renumbering those after it.
    pub fn remove(&mut self, index: usize) -> Option<Choice> {
        let i = index.checked_sub(1).filter(|&i| i < self.choices.len())?;
        let removed = self.choices.remove(i);
        self.renumber(i);
        Some(removed)
    }

    /// Swap the choice at `index` with the one before it. Moving the first
    /// choice up does nothing.
    pub fn move_up(&mut self, index: usize) -> bool {
        if index < 2 || index > self.choices.len() {
            return false;
        }
        self.choices.swap(index - 2, index - 1);
        self.renumber(index - 2);
        true
    }

    /// Swap the choice at `index` with the one after it. Moving the last
    /// choice down does nothing.
    pub fn move_down(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.choices.len() {
            return false;
        }
        self.choices.swap(index - 1, index);
        self.renumber(index - 1);
        true
    }

    fn push(&mut self, mut choice: Choice) {
        choice.place(self.choices.len() + 1, self.style);
        self.choices.push(choice);
    }

    fn renumber(&mut self, from: usize) {
        let style = self.style;
        for (i, choice) in self.choices.iter_mut().enumerate().skip(from) {
            choice.place(i + 1, style);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionKind {
    FreeResponse,
    Choice(ChoiceSet),
}

/// A prompt plus the way it is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    prompt: String,
    kind: QuestionKind,
}

impl Question {
    pub const CHOICE_ELEMENT: &'static str = "ChoiceQuestion";
    pub const FREE_RESPONSE_ELEMENT: &'static str = "FreeResponseQuestion";

    pub fn free_response(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            kind: QuestionKind::FreeResponse,
        }
    }

    pub fn choice<I, S>(prompt: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = ChoiceSet::default();
        for text in choices {
            set.add(text);
        }
        Self {
            prompt: prompt.into(),
            kind: QuestionKind::Choice(set),
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn kind(&self) -> &QuestionKind {
        &self.kind
    }

    pub fn is_choice(&self) -> bool {
        matches!(self.kind, QuestionKind::Choice(_))
    }

    pub fn choices(&self) -> Option<&ChoiceSet> {
        match &self.kind {
            QuestionKind::Choice(set) => Some(set),
            QuestionKind::FreeResponse => None,
        }
    }

    pub fn choices_mut(&mut self) -> Option<&mut ChoiceSet> {
        match &mut self.kind {
            QuestionKind::Choice(set) => Some(set),
            QuestionKind::FreeResponse => None,
        }
    }

    fn invalid_for_free_response(name: &str, value: String) -> ParseError {
        ParseError::InvalidAttribute {
            name: name.to_string(),
            value,
            reason: "free-response questions take no attributes".into(),
        }
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.prompt)?;
        match &self.kind {
            QuestionKind::FreeResponse => f.write_str("Your answer: "),
            QuestionKind::Choice(set) => set.iter().try_for_each(|choice| writeln!(f, "{choice}")),
        }
    }
}

impl Document for Question {
    fn element_name(&self) -> &str {
        match self.kind {
            QuestionKind::FreeResponse => Self::FREE_RESPONSE_ELEMENT,
            QuestionKind::Choice(_) => Self::CHOICE_ELEMENT,
        }
    }

    fn attributes(&self) -> Vec<(&str, String)> {
        let mut attributes = Vec::new();
        if let QuestionKind::Choice(set) = &self.kind {
            if set.style != ChoiceStyle::DEFAULT {
                attributes.push(("style", set.style.to_string()));
            }
            if set.multiple {
                attributes.push(("multiple", "true".to_string()));
            }
        }
        attributes
    }

    fn contents(&self) -> Vec<Content<'_>> {
        let mut contents = vec![Content::Text(&self.prompt)];
        if let QuestionKind::Choice(set) = &self.kind {
            contents.extend(set.iter().map(|choice| Content::Element(choice as &dyn Document)));
        }
        contents
    }

    fn accept_attribute(&mut self, name: &str, value: String) -> Result<(), ParseError> {
        let element = self.element_name().to_string();
        let Some(set) = self.choices_mut() else {
            return Err(Self::invalid_for_free_response(name, value));
        };
        match name {
            "style" => match value.parse() {
                Ok(style) => set.set_style(style),
                Err(e) => {
                    return Err(ParseError::InvalidAttribute {
                        name: name.to_string(),
                        reason: format!("{e}"),
                        value,
                    })
                }
            },
            "multiple" => match value.as_str() {
                "true" => set.multiple = true,
                "false" => set.multiple = false,
                _ => {
                    return Err(ParseError::InvalidAttribute {
                        name: name.to_string(),
                        value,
                        reason: "expected true or false".into(),
                    })
                }
            },
            _ => {
                return Err(ParseError::UnexpectedAttribute {
                    element,
                    name: name.to_string(),
                })
            }
        }
        Ok(())
    }

    fn accept_child(&mut self, child: Box<dyn Document>) -> Result<(), ParseError> {
        let element = self.element_name().to_string();
        match (self.choices_mut(), child.downcast::<Choice>()) {
            (Some(set), Ok(choice)) => {
                set.push(*choice);
                Ok(())
            }
            (_, Ok(choice)) => Err(ParseError::UnexpectedChild {
                element,
                child: choice.element_name().to_string(),
            }),
            (_, Err(child)) => Err(ParseError::UnexpectedChild {
                element,
                child: child.element_name().to_string(),
            }),
        }
    }

    fn accept_text(&mut self, text: String) -> Result<(), ParseError> {
        self.prompt.push_str(&text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard_registry;
    use quorum_markup::to_markup_string;

    fn sample() -> Question {
        Question::choice("Capital of France?", ["Lyon", "Paris", "Nice"])
    }

    fn indices(q: &Question) -> Vec<(usize, String)> {
        q.choices()
            .unwrap()
            .iter()
            .map(|c| (c.index(), c.text().to_string()))
            .collect()
    }

    #[test]
    fn test_display() {
        assert_eq!(
            sample().to_string(),
            "Capital of France?\n1. Lyon\n2. Paris\n3. Nice\n"
        );
        assert_eq!(
            Question::free_response("Why?").to_string(),
            "Why?\nYour answer: "
        );
    }

    #[test]
    fn test_remove_renumbers() {
        let mut q = sample();
        let removed = q.choices_mut().unwrap().remove(1).unwrap();
        assert_eq!(removed.text(), "Lyon");
        assert_eq!(indices(&q), vec![(1, "Paris".into()), (2, "Nice".into())]);
        assert!(q.choices_mut().unwrap().remove(3).is_none());
        assert!(q.choices_mut().unwrap().remove(0).is_none());
    }

    #[test]
    fn test_move_up_and_down() {
        let mut q = sample();
        let set = q.choices_mut().unwrap();
        assert!(!set.move_up(1));
        assert!(set.move_up(3));
        assert!(!set.move_down(3));
        assert!(set.move_down(1));
        assert_eq!(
            indices(&q),
            vec![(1, "Nice".into()), (2, "Lyon".into()), (3, "Paris".into())]
        );
    }

    #[test]
    fn test_set_style_restyles_all() {
        let mut q = sample();
        let style: ChoiceStyle = "PAR_alpha".parse().unwrap();
        q.choices_mut().unwrap().set_style(style);
        assert!(q.choices().unwrap().iter().all(|c| c.style() == style));
        assert_eq!(q.choices().unwrap().get(3).unwrap().to_string(), "(c) Nice");
    }

    #[test]
    fn test_default_attributes_omitted() {
        let text = to_markup_string(&sample()).unwrap();
        assert!(text.starts_with("<ChoiceQuestion>"));

        let mut q = sample();
        let set = q.choices_mut().unwrap();
        set.set_style("DOT_roman".parse().unwrap());
        set.set_multiple(true);
        let text = to_markup_string(&q).unwrap();
        assert!(text.starts_with("<ChoiceQuestion style=\"DOT_roman\" multiple=\"true\">"));
    }

    #[test]
    fn test_markup_round_trip() {
        let registry = standard_registry();
        let mut q = sample();
        q.choices_mut().unwrap().set_style("PAR_ROMAN".parse().unwrap());
        q.choices_mut().unwrap().set_multiple(true);
        let parsed = registry.parse_str(&to_markup_string(&q).unwrap()).unwrap();
        assert_eq!(parsed.downcast_ref::<Question>(), Some(&q));

        let free = Question::free_response("Explain <why> & how.");
        let parsed = registry.parse_str(&to_markup_string(&free).unwrap()).unwrap();
        assert_eq!(parsed.downcast_ref::<Question>(), Some(&free));
    }

    #[test]
    fn test_bad_attributes() {
        let registry = standard_registry();
        assert!(matches!(
            registry.parse_str("<ChoiceQuestion style=\"DOT_greek\"/>"),
            Err(ParseError::InvalidAttribute { .. })
        ));
        assert!(matches!(
            registry.parse_str("<FreeResponseQuestion style=\"DOT_roman\"/>"),
            Err(ParseError::InvalidAttribute { .. })
        ));
        assert!(matches!(
            registry.parse_str("<ChoiceQuestion color=\"red\"/>"),
            Err(ParseError::UnexpectedAttribute { .. })
        ));
    }

    #[test]
    fn test_free_response_rejects_choices() {
        let registry = standard_registry();
        assert!(matches!(
            registry.parse_str("<FreeResponseQuestion>Q<Choice>a</Choice></FreeResponseQuestion>"),
            Err(ParseError::UnexpectedChild { .. })
        ));
    }
}
