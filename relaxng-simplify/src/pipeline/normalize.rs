//! Passes 2 and 3: annotation stripping, whitespace normalization, the
//! `name` attribute shorthand, and explicit `ns`/`datatypeLibrary`.
//!
//! After this pass every `name`, `nsName` and `value` element carries an
//! explicit `ns` attribute, every `data`/`value` an explicit
//! `datatypeLibrary`, QNames are resolved into `(ns, local)` pairs, and no
//! foreign-namespace content remains.

use crate::SchemaError;
use crate::tree::{NodeId, Tree};

use super::{RELAXNG_NS, new_rng, rng_local};

/// Elements whose text content is significant.
fn keeps_text(local: &str) -> bool {
    matches!(local, "value" | "param" | "name")
}

/// Drop foreign-namespace elements and attributes, drop insignificant
/// whitespace, and trim the token-valued attributes.
pub fn strip_foreign(tree: &mut Tree, root: NodeId) -> Result<(), SchemaError> {
    let local = match rng_local(tree, root) {
        Some(local) => local.to_string(),
        None => {
            return Err(SchemaError::validation(
                tree,
                root,
                "root element is not a RELAX NG pattern",
            ));
        }
    };

    // Foreign attributes (annotations) go; so does any attribute claiming
    // the RELAX NG namespace itself.
    let element = tree.element_mut(root);
    element.attributes.retain(|_, attr| attr.uri.is_empty());
    for key in ["name", "type", "combine"] {
        if let Some(attr) = tree.element_mut(root).attributes.get_mut(key) {
            attr.value = attr.value.trim().to_string();
        }
    }

    let mut i = 0;
    while i < tree.child_count(root) {
        let child = tree.children(root)[i];
        if let Some(text) = tree.text(child) {
            if keeps_text(&local) {
                i += 1;
            } else if text.chars().all(char::is_whitespace) {
                tree.remove_child(root, child).expect("child seen");
            } else {
                return Err(SchemaError::validation(
                    tree,
                    root,
                    format!("unexpected text content {:?}", text.trim()),
                ));
            }
        } else if rng_local(tree, child).is_some() {
            strip_foreign(tree, child)?;
            i += 1;
        } else {
            // Foreign element: an annotation, dropped with its subtree.
            tree.remove_child(root, child).expect("child seen");
        }
    }
    Ok(())
}

/// Expand `name="..."` into a `<name>` child, give `name`/`nsName`/`value`
/// an explicit `ns`, resolve QNames, and make `datatypeLibrary` explicit on
/// `data`/`value`.
pub fn normalize_names(tree: &mut Tree, root: NodeId) -> Result<(), SchemaError> {
    expand_name_attr(tree, root)?;
    propagate_ns(tree, root, "");
    resolve_qnames(tree, root)?;
    propagate_datatype_library(tree, root, "");
    Ok(())
}

fn expand_name_attr(tree: &mut Tree, node: NodeId) -> Result<(), SchemaError> {
    let local = match rng_local(tree, node) {
        Some(l) => l.to_string(),
        None => return Ok(()),
    };
    if matches!(local.as_str(), "element" | "attribute")
        && let Some(qname) = tree.remove_attr(node, "name")
    {
        let name_elt = new_rng(tree, "name");
        let text = tree.add_text(qname.trim());
        tree.append(name_elt, text);
        // An unprefixed name attribute on an attribute pattern is in no
        // namespace, regardless of any ns in scope.
        if local == "attribute" && !qname.contains(':') {
            tree.set_attr(name_elt, "ns", "");
        }
        tree.prepend(node, name_elt);
    }
    let children: Vec<NodeId> = tree.children(node).to_vec();
    for child in children {
        expand_name_attr(tree, child)?;
    }
    Ok(())
}

fn propagate_ns(tree: &mut Tree, node: NodeId, inherited: &str) {
    let local = match rng_local(tree, node) {
        Some(l) => l.to_string(),
        None => return,
    };
    let current = match tree.attr(node, "ns") {
        Some(ns) => ns.to_string(),
        None => inherited.to_string(),
    };
    if matches!(local.as_str(), "name" | "nsName" | "value") {
        if tree.attr(node, "ns").is_none() {
            tree.set_attr(node, "ns", &current);
        }
    } else {
        tree.remove_attr(node, "ns");
    }
    let children: Vec<NodeId> = tree.children(node).to_vec();
    for child in children {
        propagate_ns(tree, child, &current);
    }
}

/// Rewrite `<name>p:local</name>` into `<name ns="...">local</name>`.
fn resolve_qnames(tree: &mut Tree, node: NodeId) -> Result<(), SchemaError> {
    if rng_local(tree, node) == Some("name") {
        let text = tree.text_content(node);
        let text = text.trim();
        if let Some((prefix, local)) = text.split_once(':') {
            let uri = tree.resolve_prefix(node, prefix).ok_or_else(|| {
                SchemaError::validation(tree, node, format!("undefined prefix {prefix:?}"))
            })?;
            tree.set_attr(node, "ns", &uri);
            tree.empty(node);
            let new_text = tree.add_text(local);
            tree.append(node, new_text);
        } else {
            // Normalize the content to the trimmed local name.
            let trimmed = text.to_string();
            tree.empty(node);
            let new_text = tree.add_text(&trimmed);
            tree.append(node, new_text);
        }
        return Ok(());
    }
    let children: Vec<NodeId> = tree.children(node).to_vec();
    for child in children {
        if tree.is_element(child) {
            resolve_qnames(tree, child)?;
        }
    }
    Ok(())
}

fn propagate_datatype_library(tree: &mut Tree, node: NodeId, inherited: &str) {
    let local = match rng_local(tree, node) {
        Some(l) => l.to_string(),
        None => return,
    };
    let current = match tree.attr(node, "datatypeLibrary") {
        Some(lib) => lib.trim().to_string(),
        None => inherited.to_string(),
    };
    match local.as_str() {
        "data" => {
            tree.set_attr(node, "datatypeLibrary", &current);
        }
        "value" => {
            // A value without a type means the built-in token type.
            if tree.attr(node, "type").is_none() {
                tree.set_attr(node, "type", "token");
                tree.set_attr(node, "datatypeLibrary", "");
            } else {
                tree.set_attr(node, "datatypeLibrary", &current);
            }
        }
        _ => {
            tree.remove_attr(node, "datatypeLibrary");
        }
    }
    let children: Vec<NodeId> = tree.children(node).to_vec();
    for child in children {
        propagate_datatype_library(tree, child, &current);
    }
}
