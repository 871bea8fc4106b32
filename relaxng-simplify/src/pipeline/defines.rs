//! Pass 6: define/ref normalization.
//!
//! Afterwards every define holds exactly one `element` pattern, every
//! `element` lives directly under a define, and every define is reachable
//! from the start pattern.

use crate::SchemaError;
use crate::tree::{NodeId, Tree};
use fnv::{FnvHashMap, FnvHashSet};
use tracing::debug;

use super::{is_rng, new_rng, rng_local};

pub fn normalize_defines(
    tree: &mut Tree,
    grammar: NodeId,
    warnings: &mut Vec<String>,
) -> Result<(), SchemaError> {
    wrap_elements(tree, grammar);
    inline_non_element_defines(tree, grammar)?;
    drop_unreferenced(tree, grammar, warnings);
    Ok(())
}

/// Move every `element` that is not the body of a define into a fresh,
/// uniquely named define, leaving a `ref` behind.
fn wrap_elements(tree: &mut Tree, grammar: NodeId) {
    let mut taken: FnvHashSet<String> = tree
        .children(grammar)
        .iter()
        .filter_map(|&c| tree.attr(c, "name").map(str::to_string))
        .collect();
    let mut counter = 0u32;
    let mut i = 0;
    while i < tree.child_count(grammar) {
        let component = tree.children(grammar)[i];
        let scan_root = match rng_local(tree, component) {
            Some("define") => {
                let body = tree.children(component)[0];
                // The define's own element stays put; only elements nested
                // inside it move out.
                if is_rng(tree, body, "element") { body } else { component }
            }
            _ => component,
        };
        scan(tree, grammar, scan_root, &mut taken, &mut counter);
        i += 1;
    }
}

fn scan(
    tree: &mut Tree,
    grammar: NodeId,
    node: NodeId,
    taken: &mut FnvHashSet<String>,
    counter: &mut u32,
) {
    let mut i = 0;
    while i < tree.child_count(node) {
        let child = tree.children(node)[i];
        if is_rng(tree, child, "element") {
            let name = fresh_define_name(tree, child, taken, counter);
            let reference = new_rng(tree, "ref");
            tree.set_attr(reference, "name", &name);
            tree.replace_child_with(node, child, reference)
                .expect("child is in node");
            let define = new_rng(tree, "define");
            tree.set_attr(define, "name", &name);
            tree.append(define, child);
            // The new define is scanned when the outer loop reaches it.
            tree.append(grammar, define);
        } else if tree.is_element(child) {
            scan(tree, grammar, child, taken, counter);
        }
        i += 1;
    }
}

fn fresh_define_name(
    tree: &Tree,
    element: NodeId,
    taken: &mut FnvHashSet<String>,
    counter: &mut u32,
) -> String {
    let first = tree.first_child(element);
    let local = match first {
        Some(nc) if is_rng(tree, nc, "name") => tree.text_content(nc),
        _ => "anon".to_string(),
    };
    loop {
        *counter += 1;
        let candidate = format!("__{local}-elt-{counter}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
    }
}

/// Inline every define whose body is not an element at each of its
/// reference sites, rejecting self-referential non-element defines.
fn inline_non_element_defines(tree: &mut Tree, grammar: NodeId) -> Result<(), SchemaError> {
    let mut targets: FnvHashMap<String, NodeId> = FnvHashMap::default();
    for &child in tree.children(grammar) {
        if rng_local(tree, child) == Some("define") {
            let body = tree.children(child)[0];
            if !is_rng(tree, body, "element") {
                let name = tree.attr(child, "name").expect("named define").to_string();
                targets.insert(name, child);
            }
        }
    }
    if targets.is_empty() {
        return Ok(());
    }
    debug!(count = targets.len(), "inlining non-element defines");

    let mut cache: FnvHashMap<String, NodeId> = FnvHashMap::default();
    let mut visiting: FnvHashSet<String> = FnvHashSet::default();
    // Expand all templates up front so cycles surface even for defines that
    // end up unreferenced.
    let names: Vec<String> = targets.keys().cloned().collect();
    for name in &names {
        template(tree, name, &targets, &mut cache, &mut visiting)?;
    }

    let components: Vec<NodeId> = tree.children(grammar).to_vec();
    for component in components {
        if let Some(name) = tree.attr(component, "name")
            && targets.contains_key(name)
        {
            continue;
        }
        inline_refs(tree, component, &targets, &mut cache, &mut visiting)?;
    }
    for node in targets.values() {
        tree.remove_child(grammar, *node)
            .expect("define is a grammar child");
    }
    Ok(())
}

/// The fully expanded body of a non-element define, built once and cloned
/// per reference site.
fn template(
    tree: &mut Tree,
    name: &str,
    targets: &FnvHashMap<String, NodeId>,
    cache: &mut FnvHashMap<String, NodeId>,
    visiting: &mut FnvHashSet<String>,
) -> Result<NodeId, SchemaError> {
    if let Some(&t) = cache.get(name) {
        return Ok(t);
    }
    if !visiting.insert(name.to_string()) {
        return Err(SchemaError::RecursiveNonElementDefine {
            name: name.to_string(),
        });
    }
    let define = targets[name];
    let body = tree.children(define)[0];
    let copy = tree.clone_subtree(body);
    let copy = if let Some(target) = ref_target(tree, copy, targets) {
        // The body is itself a bare ref to another non-element define.
        let t = template(tree, &target, targets, cache, visiting)?;
        tree.clone_subtree(t)
    } else {
        inline_refs(tree, copy, targets, cache, visiting)?;
        copy
    };
    visiting.remove(name);
    cache.insert(name.to_string(), copy);
    Ok(copy)
}

fn ref_target(
    tree: &Tree,
    node: NodeId,
    targets: &FnvHashMap<String, NodeId>,
) -> Option<String> {
    if rng_local(tree, node) == Some("ref") {
        let name = tree.attr(node, "name")?;
        if targets.contains_key(name) {
            return Some(name.to_string());
        }
    }
    None
}

fn inline_refs(
    tree: &mut Tree,
    node: NodeId,
    targets: &FnvHashMap<String, NodeId>,
    cache: &mut FnvHashMap<String, NodeId>,
    visiting: &mut FnvHashSet<String>,
) -> Result<(), SchemaError> {
    let mut i = 0;
    while i < tree.child_count(node) {
        let child = tree.children(node)[i];
        if let Some(target) = ref_target(tree, child, targets) {
            let t = template(tree, &target, targets, cache, visiting)?;
            let copy = tree.clone_subtree(t);
            tree.replace_child_with(node, child, copy)
                .expect("child is in node");
        } else if tree.is_element(child) {
            inline_refs(tree, child, targets, cache, visiting)?;
        }
        i += 1;
    }
    Ok(())
}

/// Drop defines not reachable from the start pattern.
fn drop_unreferenced(tree: &mut Tree, grammar: NodeId, warnings: &mut Vec<String>) {
    let mut by_name: FnvHashMap<String, NodeId> = FnvHashMap::default();
    let mut start = None;
    for &child in tree.children(grammar) {
        match rng_local(tree, child) {
            Some("define") => {
                if let Some(name) = tree.attr(child, "name") {
                    by_name.insert(name.to_string(), child);
                }
            }
            Some("start") => start = Some(child),
            _ => {}
        }
    }
    let mut reached: FnvHashSet<String> = FnvHashSet::default();
    let mut worklist = Vec::new();
    if let Some(start) = start {
        collect_refs(tree, start, &mut worklist);
    }
    while let Some(name) = worklist.pop() {
        if reached.insert(name.clone())
            && let Some(&define) = by_name.get(&name)
        {
            collect_refs(tree, define, &mut worklist);
        }
    }
    for (name, &define) in &by_name {
        if !reached.contains(name) {
            warnings.push(format!("unreferenced definition {name:?} dropped"));
            tree.remove_child(grammar, define)
                .expect("define is a grammar child");
        }
    }
}

fn collect_refs(tree: &Tree, node: NodeId, out: &mut Vec<String>) {
    if rng_local(tree, node) == Some("ref")
        && let Some(name) = tree.attr(node, "name")
    {
        out.push(name.to_string());
    }
    for &child in tree.children(node) {
        if tree.is_element(child) {
            collect_refs(tree, child, out);
        }
    }
}
