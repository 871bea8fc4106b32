//! The event vocabulary consumed by walkers.

use relaxng_grammar::NameClass;
use std::fmt;

/// An expanded name: namespace URI plus local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpandedName {
    pub ns: String,
    pub local: String,
}

impl ExpandedName {
    pub fn new(ns: &str, local: &str) -> ExpandedName {
        ExpandedName {
            ns: ns.to_string(),
            local: local.to_string(),
        }
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ns.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.ns, self.local)
        }
    }
}

/// One structural event of the document stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    /// Opening tag seen; attribute events follow.
    EnterStartTag { ns: &'a str, local: &'a str },
    AttributeName { ns: &'a str, local: &'a str },
    /// Value for the most recently accepted attribute name.
    AttributeValue { value: &'a str },
    /// Atomic name/value pair.
    AttributeNameAndValue {
        ns: &'a str,
        local: &'a str,
        value: &'a str,
    },
    /// All attributes delivered.
    LeaveStartTag,
    Text { text: &'a str },
    EndTag { ns: &'a str, local: &'a str },
}

impl Event<'_> {
    pub fn is_attribute_event(&self) -> bool {
        matches!(
            self,
            Event::AttributeName { .. }
                | Event::AttributeValue { .. }
                | Event::AttributeNameAndValue { .. }
        )
    }
}

/// An event a walker would accept next; used for diagnostics and authoring
/// tools.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedEvent<'g> {
    EnterStartTag(&'g NameClass),
    AttributeName(&'g NameClass),
    /// Description of the expected value.
    AttributeValue(String),
    LeaveStartTag,
    Text,
    EndTag,
}

impl fmt::Display for ExpectedEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedEvent::EnterStartTag(nc) => write!(f, "element {nc}"),
            ExpectedEvent::AttributeName(nc) => write!(f, "attribute {nc}"),
            ExpectedEvent::AttributeValue(desc) => write!(f, "attribute value {desc}"),
            ExpectedEvent::LeaveStartTag => f.write_str("end of start tag"),
            ExpectedEvent::Text => f.write_str("text"),
            ExpectedEvent::EndTag => f.write_str("end tag"),
        }
    }
}

pub(crate) fn is_whitespace_char(c: char) -> bool {
    ['\x20', '\x09', '\x0d', '\x0a'].contains(&c)
}

pub(crate) fn is_whitespace_str(s: &str) -> bool {
    s.chars().all(is_whitespace_char)
}
