//! The simplification pipeline.
//!
//! An ordered sequence of rewrite passes, each a function over the element
//! tree relying on the postconditions of the passes before it:
//!
//! 1. [`resolve`]: inline `externalRef`/`include`, flatten `div`, merge
//!    `combine` duplicates.
//! 2. [`normalize`]: strip annotations, normalize whitespace, expand the
//!    `name` attribute shorthand, make `ns`/`datatypeLibrary` explicit.
//! 3. [`rewrite`]: local structural rewrites into binary canonical form,
//!    plus the static name-class restrictions.
//! 4. [`grammars`]: flatten nested grammars into one.
//! 5. [`defines`]: every element into its own define, non-element defines
//!    inlined, unreferenced defines dropped.
//! 6. [`reduce`]: `notAllowed`/`empty` propagation to a fixed point.
//! 7. [`emit`]: conversion into the runtime pattern model.
//!
//! The pipeline is deterministic and idempotent: re-running it on its own
//! output leaves the tree unchanged.

pub mod defines;
pub mod emit;
pub mod grammars;
pub mod normalize;
pub mod reduce;
pub mod resolve;
pub mod rewrite;

use crate::SchemaError;
use crate::loader::ResourceLoader;
use crate::tree::{NodeId, Tree};
use tracing::debug;
use url::Url;

pub const RELAXNG_NS: &str = "http://relaxng.org/ns/structure/1.0";

/// Run every pass up to (but not including) emission.  Returns the single
/// canonical `grammar` node.
pub fn simplify(
    tree: &mut Tree,
    root: NodeId,
    base_url: &Url,
    loader: &dyn ResourceLoader,
    warnings: &mut Vec<String>,
) -> Result<NodeId, SchemaError> {
    debug!(url = %base_url, "resolving inclusions");
    resolve::resolve(tree, root, base_url, loader)?;
    debug!("normalizing");
    normalize::strip_foreign(tree, root)?;
    normalize::normalize_names(tree, root)?;
    let root = grammars::ensure_grammar(tree, root);
    debug!("rewriting to binary form");
    rewrite::rewrite(tree, root)?;
    debug!("flattening grammars");
    grammars::flatten(tree, root)?;
    debug!("normalizing defines");
    defines::normalize_defines(tree, root, warnings)?;
    debug!("reducing");
    reduce::reduce(tree, root)?;
    Ok(root)
}

/// Is this node an element in the RELAX NG namespace with the given local
/// name?
pub(crate) fn is_rng(tree: &Tree, node: NodeId, local: &str) -> bool {
    tree.as_element(node)
        .is_some_and(|e| e.uri == RELAXNG_NS && e.local == local)
}

pub(crate) fn rng_local<'t>(tree: &'t Tree, node: NodeId) -> Option<&'t str> {
    tree.as_element(node)
        .filter(|e| e.uri == RELAXNG_NS)
        .map(|e| e.local.as_str())
}

/// Create a fresh RELAX NG element.
pub(crate) fn new_rng(tree: &mut Tree, local: &str) -> NodeId {
    tree.add_element("", local, RELAXNG_NS)
}
