//! RELAX NG schema simplification.
//!
//! Takes a schema in XML syntax and reduces it to the canonical form
//! consumed by the validator: a single grammar whose defines each hold
//! exactly one element pattern, with all shorthand expanded, all inclusions
//! resolved, and dead branches pruned.  The output is compiled into a
//! [`relaxng_grammar::Grammar`].

pub mod loader;
pub mod parse;
pub mod pipeline;
pub mod tree;

use loader::{Resource, ResourceError, ResourceLoader};
use thiserror::Error;
use tree::Tree;
use url::Url;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{url}: {source}")]
    Parse {
        url: Url,
        #[source]
        source: roxmltree::Error,
    },
    #[error("{path}: {msg}")]
    Validation { path: String, msg: String },
    #[error("unresolvable resource: {0}")]
    UnresolvableResource(#[from] ResourceError),
    #[error("invalid href {href:?}: {path}")]
    BadHref { href: String, path: String },
    #[error("inclusion cycle through {url}")]
    IncludeCycle { url: Url },
    #[error("{path}: datatype error: {source}")]
    Datatype {
        path: String,
        #[source]
        source: relaxng_grammar::datatype::DatatypeError,
    },
    #[error("the definition of {name} is self-referential but does not describe an element")]
    RecursiveNonElementDefine { name: String },
    #[error("the start pattern matches nothing")]
    StartNotAllowed,
    #[error(transparent)]
    Link(#[from] relaxng_grammar::UnresolvedRef),
}

impl SchemaError {
    pub(crate) fn validation(tree: &Tree, node: tree::NodeId, msg: impl Into<String>) -> SchemaError {
        SchemaError::Validation {
            path: tree.path(node),
            msg: msg.into(),
        }
    }
}

/// A compiled schema plus non-fatal observations made along the way.
#[derive(Debug)]
pub struct CompiledSchema {
    pub grammar: relaxng_grammar::Grammar,
    pub warnings: Vec<String>,
}

/// Fetch, simplify and compile the schema at `url`.
pub fn compile_rng(url: &Url, loader: &dyn ResourceLoader) -> Result<CompiledSchema, SchemaError> {
    let Resource { url, text } = loader.load(url)?;
    compile_rng_text(&text, &url, loader)
}

/// Simplify and compile schema text already in hand; `base_url` anchors any
/// relative `include`/`externalRef` references.
pub fn compile_rng_text(
    text: &str,
    base_url: &Url,
    loader: &dyn ResourceLoader,
) -> Result<CompiledSchema, SchemaError> {
    let mut tree = Tree::new();
    let root = parse::parse_into(&mut tree, text).map_err(|source| SchemaError::Parse {
        url: base_url.clone(),
        source,
    })?;
    let mut warnings = Vec::new();
    let grammar_node = pipeline::simplify(&mut tree, root, base_url, loader, &mut warnings)?;
    let grammar = pipeline::emit::emit(&tree, grammar_node)?;
    Ok(CompiledSchema { grammar, warnings })
}
