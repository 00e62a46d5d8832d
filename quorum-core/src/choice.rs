//! Choices and their label styles.

use std::fmt;
use std::str::FromStr;

use quorum_markup::{Content, Document, ParseError};
use serde::Serialize;

use crate::error::UnknownStyle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Numbering {
    Arabic,
    Roman,
    Alpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LabelFormat {
    /// `(x)`
    Parenthesized,
    /// `x.`
    Dotted,
}

/// How choice labels are rendered: `1.`, `(iv)`, `C.`, `(bb)` and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChoiceStyle {
    pub numbering: Numbering,
    pub uppercase: bool,
    pub format: LabelFormat,
}

const fn style(numbering: Numbering, uppercase: bool, format: LabelFormat) -> ChoiceStyle {
    ChoiceStyle {
        numbering,
        uppercase,
        format,
    }
}

/// Every style with its wire name, in canonical order.
const STYLES: [(&str, ChoiceStyle); 12] = {
    use LabelFormat::{Dotted, Parenthesized};
    use Numbering::{Alpha, Arabic, Roman};
    [
        ("PAR_arabic", style(Arabic, false, Parenthesized)),
        ("DOT_arabic", style(Arabic, false, Dotted)),
        ("PAR_ARABIC", style(Arabic, true, Parenthesized)),
        ("DOT_ARABIC", style(Arabic, true, Dotted)),
        ("PAR_roman", style(Roman, false, Parenthesized)),
        ("DOT_roman", style(Roman, false, Dotted)),
        ("PAR_ROMAN", style(Roman, true, Parenthesized)),
        ("DOT_ROMAN", style(Roman, true, Dotted)),
        ("PAR_alpha", style(Alpha, false, Parenthesized)),
        ("DOT_alpha", style(Alpha, false, Dotted)),
        ("PAR_ALPHA", style(Alpha, true, Parenthesized)),
        ("DOT_ALPHA", style(Alpha, true, Dotted)),
    ]
};

impl ChoiceStyle {
    pub const DEFAULT: ChoiceStyle = style(Numbering::Arabic, true, LabelFormat::Dotted);

    pub fn all() -> impl Iterator<Item = ChoiceStyle> {
        STYLES.iter().map(|(_, style)| *style)
    }

    pub fn name(&self) -> &'static str {
        STYLES
            .iter()
            .find(|(_, style)| style == self)
            .map(|(name, _)| *name)
            .unwrap_or("DOT_ARABIC")
    }

    /// Label for the 1-based `index`.
    pub fn label(&self, index: usize) -> String {
        let raw = match self.numbering {
            Numbering::Arabic => index.to_string(),
            Numbering::Roman => roman(index),
            Numbering::Alpha => alpha(index),
        };
        let raw = if self.uppercase {
            raw.to_uppercase()
        } else {
            raw
        };
        match self.format {
            LabelFormat::Parenthesized => format!("({raw})"),
            LabelFormat::Dotted => format!("{raw}."),
        }
    }
}

impl Default for ChoiceStyle {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ChoiceStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChoiceStyle {
    type Err = UnknownStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STYLES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, style)| *style)
            .ok_or_else(|| UnknownStyle(s.to_string()))
    }
}

/// Lowercase roman numeral; empty for zero.
fn roman(mut n: usize) -> String {
    const DIGITS: [(usize, &str); 13] = [
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];
    let mut out = String::new();
    for (value, digits) in DIGITS {
        while n >= value {
            out.push_str(digits);
            n -= value;
        }
    }
    out
}

/// `a`..`z`, then `aa`..`zz`, then `aaa`...
fn alpha(index: usize) -> String {
    if index == 0 {
        return String::new();
    }
    let letter = char::from(b'a' + ((index - 1) % 26) as u8);
    std::iter::repeat(letter).take((index - 1) / 26 + 1).collect()
}

/// One answer option of a choice question.
///
/// Index and style belong to the enclosing question, which keeps them in
/// step as choices are added, removed and reordered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Choice {
    text: String,
    index: usize,
    style: ChoiceStyle,
}

impl Choice {
    pub const ELEMENT: &'static str = "Choice";

    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// 1-based position within the question; 0 while detached.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn style(&self) -> ChoiceStyle {
        self.style
    }

    pub fn label(&self) -> String {
        self.style.label(self.index)
    }

    pub(crate) fn place(&mut self, index: usize, style: ChoiceStyle) {
        self.index = index;
        self.style = style;
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.label(), self.text)
    }
}

impl Document for Choice {
    fn element_name(&self) -> &str {
        Self::ELEMENT
    }

    fn contents(&self) -> Vec<Content<'_>> {
        vec![Content::Text(&self.text)]
    }

    fn accept_text(&mut self, text: String) -> Result<(), ParseError> {
        self.text.push_str(&text);
        Ok(())
    }
}
