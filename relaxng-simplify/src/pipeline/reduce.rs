//! Pass 7: `notAllowed` and `empty` propagation.
//!
//! The algebraic identities are applied bottom-up until a fixed point:
//! dead branches disappear, vacuous `group`/`interleave` operands unwrap,
//! and `choice(empty, p)` normalizes to `choice(p, empty)`.  `element`
//! patterns are deliberately left alone; an element with unsatisfiable
//! content is still an element.

use crate::SchemaError;
use crate::tree::{NodeId, Tree};

use super::{is_rng, new_rng, rng_local};

pub fn reduce(tree: &mut Tree, grammar: NodeId) -> Result<(), SchemaError> {
    loop {
        let mut changed = false;
        let components: Vec<NodeId> = tree.children(grammar).to_vec();
        for component in components {
            walk(tree, component, &mut changed);
        }
        if !changed {
            break;
        }
    }
    let start = tree
        .children(grammar)
        .iter()
        .copied()
        .find(|&c| rng_local(tree, c) == Some("start"))
        .expect("grammar has a start after flattening");
    if tree
        .first_child(start)
        .is_some_and(|p| is_rng(tree, p, "notAllowed"))
    {
        return Err(SchemaError::StartNotAllowed);
    }
    Ok(())
}

fn walk(tree: &mut Tree, node: NodeId, changed: &mut bool) {
    let mut i = 0;
    while i < tree.child_count(node) {
        let child = tree.children(node)[i];
        if tree.is_element(child) {
            walk(tree, child, changed);
            apply(tree, node, child, changed);
        }
        i += 1;
    }
}

fn apply(tree: &mut Tree, parent: NodeId, child: NodeId, changed: &mut bool) {
    let local = match rng_local(tree, child) {
        Some(l) => l.to_string(),
        None => return,
    };
    let replace = |tree: &mut Tree, with: NodeId, changed: &mut bool| {
        tree.replace_child_with(parent, child, with)
            .expect("child is in parent");
        *changed = true;
    };
    match local.as_str() {
        "choice" => {
            let a = tree.children(child)[0];
            let b = tree.children(child)[1];
            let a_na = is_rng(tree, a, "notAllowed");
            let b_na = is_rng(tree, b, "notAllowed");
            let a_empty = is_rng(tree, a, "empty");
            let b_empty = is_rng(tree, b, "empty");
            if a_na {
                replace(tree, b, changed);
            } else if b_na {
                replace(tree, a, changed);
            } else if a_empty && b_empty {
                replace(tree, a, changed);
            } else if a_empty {
                // Canonical form keeps empty as the second alternative.
                tree.detach(a);
                tree.append(child, a);
                *changed = true;
            }
        }
        "group" | "interleave" => {
            let a = tree.children(child)[0];
            let b = tree.children(child)[1];
            if is_rng(tree, a, "notAllowed") || is_rng(tree, b, "notAllowed") {
                let na = new_rng(tree, "notAllowed");
                replace(tree, na, changed);
            } else if is_rng(tree, a, "empty") {
                replace(tree, b, changed);
            } else if is_rng(tree, b, "empty") {
                replace(tree, a, changed);
            }
        }
        "oneOrMore" => {
            let p = tree.children(child)[0];
            if is_rng(tree, p, "notAllowed") {
                let na = new_rng(tree, "notAllowed");
                replace(tree, na, changed);
            } else if is_rng(tree, p, "empty") {
                let empty = new_rng(tree, "empty");
                replace(tree, empty, changed);
            }
        }
        "list" | "attribute" => {
            // For attribute the content is the second child.
            let p = *tree.children(child).last().expect("content child");
            if is_rng(tree, p, "notAllowed") {
                let na = new_rng(tree, "notAllowed");
                replace(tree, na, changed);
            }
        }
        "data" => {
            let except = tree
                .children(child)
                .iter()
                .copied()
                .find(|&c| rng_local(tree, c) == Some("except"));
            if let Some(except) = except
                && tree
                    .first_child(except)
                    .is_some_and(|p| is_rng(tree, p, "notAllowed"))
            {
                tree.remove_child(child, except).expect("except is a child");
                *changed = true;
            }
        }
        _ => {}
    }
}
