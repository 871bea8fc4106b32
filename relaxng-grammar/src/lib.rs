//! The compiled form of a RELAX NG schema.
//!
//! This crate holds everything the validator needs at runtime and nothing it
//! does not: name classes and their set algebra, the pattern model produced
//! by the simplifier, the two supported datatype libraries, and a JSON codec
//! for compiled grammars.

pub mod datatype;
pub mod json;
pub mod nameclass;
pub mod pattern;

pub use json::{GrammarJsonError, read_grammar_json, write_grammar_json};
pub use nameclass::NameClass;
pub use pattern::{Define, ElementPat, Grammar, Pattern, RefPattern, UnresolvedRef};
