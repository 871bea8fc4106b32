//! Recoverable validation errors.
//!
//! Everything here is reported from `fire_event`/`end` and never aborts
//! validation: the grammar walker recovers and keeps consuming events.

use crate::event::ExpandedName;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A start tag was seen that no live pattern allows, or a required
    /// element never arrived.
    #[error("{msg}: {name}")]
    ElementName { msg: &'static str, name: String },
    /// An attribute name was rejected or a required attribute is missing.
    #[error("{msg}: {name}")]
    AttributeName { msg: &'static str, name: String },
    #[error("invalid attribute value {value:?} for {name}")]
    AttributeValue { name: String, value: String },
    /// Both alternatives of a choice failed.
    #[error("neither alternative matched: {0}; {1}")]
    Choice(Box<ValidationError>, Box<ValidationError>),
    #[error("{0}")]
    Generic(String),
}

impl ValidationError {
    pub(crate) fn element_name(msg: &'static str, name: &ExpandedName) -> ValidationError {
        ValidationError::ElementName {
            msg,
            name: name.to_string(),
        }
    }

    pub(crate) fn text_not_allowed() -> ValidationError {
        ValidationError::Generic("text not allowed here".to_string())
    }

    /// Collapse the error lists of two failed choice branches into a single
    /// `Choice` error; one-sided failures pass through untouched.
    pub(crate) fn choice(a: Vec<ValidationError>, b: Vec<ValidationError>) -> Vec<ValidationError> {
        match (a.into_iter().next(), b.into_iter().next()) {
            (Some(a), Some(b)) => {
                if a == b {
                    vec![a]
                } else {
                    vec![ValidationError::Choice(Box::new(a), Box::new(b))]
                }
            }
            (Some(e), None) | (None, Some(e)) => vec![e],
            (None, None) => vec![],
        }
    }
}
