//! Validation of XML documents against compiled RELAX NG grammars.
//!
//! The core is a pushdown recognizer: [`GrammarWalker`] consumes structural
//! events (start tag, attributes, text, end tag) and keeps a set of
//! candidate per-pattern walkers per element depth.  Event-level failures
//! are reported and recovered from; the walker keeps validating the rest of
//! the document.
//!
//! [`driver::Validator`] adapts an `xmlparser` token stream into the event
//! vocabulary for whole-document validation.

pub mod driver;
pub mod error;
pub mod event;
pub mod grammar_walker;
pub mod resolver;
pub mod walk;

pub use driver::{DocError, DocErrorKind, Validator, validate_str};
pub use error::ValidationError;
pub use event::{Event, ExpandedName, ExpectedEvent};
pub use grammar_walker::GrammarWalker;
pub use resolver::{DefaultNameResolver, NameResolver};
pub use walk::{FireResult, Walker, new_walker};
