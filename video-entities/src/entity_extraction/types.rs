//! Entity types produced by extraction.

use serde::{Deserialize, Serialize};

/// A labelled span reported by a token classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSpan {
    /// Text of the span as it appears in the source
    pub text: String,
    /// Label without BIO prefix, e.g. `PERSON` or `ORG`
    pub label: String,
    /// Character offset of the first character
    pub start_char: usize,
    /// Character offset one past the last character
    pub end_char: usize,
}

impl RawSpan {
    /// Create a new raw span.
    pub fn new(text: impl Into<String>, label: impl Into<String>, start_char: usize, end_char: usize) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
            start_char,
            end_char,
        }
    }
}

/// An entity found in a text, in the shape written to the output files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity text, trimmed of surrounding whitespace
    pub name: String,
    /// Entity label
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Character offset of the span start in the source text
    pub start_char: usize,
    /// Character offset of the span end in the source text
    pub end_char: usize,
}

impl From<RawSpan> for Entity {
    fn from(span: RawSpan) -> Self {
        Self {
            name: span.text.trim().to_string(),
            entity_type: span.label,
            start_char: span.start_char,
            end_char: span.end_char,
        }
    }
}
