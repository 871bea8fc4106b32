//! Pass 5: flattening nested grammars.
//!
//! Inner grammars are dissolved into the outermost one: their defines are
//! renamed uniquely and promoted to the top grammar, `parentRef`s become
//! plain `ref`s against the enclosing scope, and each inner `grammar`
//! element is replaced by its start pattern.

use crate::SchemaError;
use crate::tree::{NodeId, Tree};
use fnv::FnvHashMap;

use super::{is_rng, new_rng, rng_local};

/// Wrap a bare pattern root in `grammar`/`start`.
pub fn ensure_grammar(tree: &mut Tree, root: NodeId) -> NodeId {
    if is_rng(tree, root, "grammar") {
        return root;
    }
    let grammar = new_rng(tree, "grammar");
    let start = new_rng(tree, "start");
    tree.append(grammar, start);
    tree.append(start, root);
    grammar
}

pub fn flatten(tree: &mut Tree, top: NodeId) -> Result<(), SchemaError> {
    let mut scopes = vec![collect_scope(tree, top, None)?];
    let mut counter = 0u32;
    let children: Vec<NodeId> = tree.children(top).to_vec();
    for child in children {
        process(tree, child, top, &mut scopes, &mut counter)?;
    }
    check_components(tree, top)
}

/// After flattening, the top grammar holds exactly one start plus defines.
fn check_components(tree: &Tree, top: NodeId) -> Result<(), SchemaError> {
    let mut starts = 0;
    for &child in tree.children(top) {
        match rng_local(tree, child) {
            Some("start") => starts += 1,
            Some("define") => {}
            _ => {
                return Err(SchemaError::validation(
                    tree,
                    child,
                    "only start and define may appear in a grammar",
                ));
            }
        }
    }
    match starts {
        1 => Ok(()),
        0 => Err(SchemaError::validation(tree, top, "grammar has no start")),
        _ => Err(SchemaError::validation(
            tree,
            top,
            "grammar has more than one start",
        )),
    }
}

/// Source define name → flattened name for one grammar scope.
type Scope = FnvHashMap<String, String>;

fn collect_scope(
    tree: &Tree,
    grammar: NodeId,
    rename: Option<u32>,
) -> Result<Scope, SchemaError> {
    let mut scope = Scope::default();
    for &child in tree.children(grammar) {
        if rng_local(tree, child) == Some("define") {
            let name = tree
                .attr(child, "name")
                .ok_or_else(|| SchemaError::validation(tree, child, "define without a name"))?
                .to_string();
            let flat = match rename {
                None => name.clone(),
                Some(n) => format!("__grammar-{n}-{name}"),
            };
            scope.insert(name, flat);
        }
    }
    Ok(scope)
}

fn process(
    tree: &mut Tree,
    node: NodeId,
    top: NodeId,
    scopes: &mut Vec<Scope>,
    counter: &mut u32,
) -> Result<(), SchemaError> {
    match rng_local(tree, node) {
        Some("ref") => rename_reference(tree, node, scopes, 1),
        Some("parentRef") => {
            rename_reference(tree, node, scopes, 2)?;
            // A parentRef is an ordinary ref once the scope is flat.
            tree.element_mut(node).local = "ref".to_string();
            Ok(())
        }
        Some("define") => {
            let name = tree.attr(node, "name").expect("checked in collect_scope");
            let flat = scopes
                .last()
                .and_then(|s| s.get(name))
                .expect("define collected into scope")
                .clone();
            tree.set_attr(node, "name", &flat);
            process_children(tree, node, top, scopes, counter)
        }
        Some("grammar") => {
            *counter += 1;
            let scope = collect_scope(tree, node, Some(*counter))?;
            scopes.push(scope);
            process_children(tree, node, top, scopes, counter)?;
            scopes.pop();
            dissolve_grammar(tree, node, top)
        }
        _ => process_children(tree, node, top, scopes, counter),
    }
}

fn process_children(
    tree: &mut Tree,
    node: NodeId,
    top: NodeId,
    scopes: &mut Vec<Scope>,
    counter: &mut u32,
) -> Result<(), SchemaError> {
    let children: Vec<NodeId> = tree.children(node).to_vec();
    for child in children {
        if tree.is_element(child) {
            process(tree, child, top, scopes, counter)?;
        }
    }
    Ok(())
}

fn rename_reference(
    tree: &mut Tree,
    node: NodeId,
    scopes: &[Scope],
    depth: usize,
) -> Result<(), SchemaError> {
    let name = tree
        .attr(node, "name")
        .ok_or_else(|| SchemaError::validation(tree, node, "ref without a name"))?
        .trim()
        .to_string();
    let scope = scopes.len().checked_sub(depth).map(|i| &scopes[i]);
    let scope = scope.ok_or_else(|| {
        SchemaError::validation(tree, node, "parentRef used outside a nested grammar")
    })?;
    let flat = scope.get(&name).ok_or_else(|| {
        SchemaError::validation(tree, node, format!("reference to undefined pattern {name:?}"))
    })?;
    let flat = flat.clone();
    tree.set_attr(node, "name", &flat);
    Ok(())
}

/// Replace a processed inner grammar by its start pattern, promoting its
/// defines to the top grammar.
fn dissolve_grammar(tree: &mut Tree, grammar: NodeId, top: NodeId) -> Result<(), SchemaError> {
    let mut start_pattern = None;
    for &child in tree.children(grammar) {
        if rng_local(tree, child) == Some("start") {
            if start_pattern.is_some() {
                return Err(SchemaError::validation(
                    tree,
                    grammar,
                    "grammar has more than one start",
                ));
            }
            start_pattern = tree.first_child(child);
        }
    }
    let start_pattern = start_pattern
        .ok_or_else(|| SchemaError::validation(tree, grammar, "grammar has no start"))?;

    let children: Vec<NodeId> = tree.children(grammar).to_vec();
    for child in children {
        if rng_local(tree, child) == Some("define") {
            tree.append(top, child);
        }
    }
    tree.detach(start_pattern);
    tree.replace_with(grammar, start_pattern)
        .map_err(|_| SchemaError::validation(tree, grammar, "nested grammar without a parent"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use crate::pipeline::{normalize, rewrite};
    use assert_matches::assert_matches;

    const RNG: &str = r#"xmlns="http://relaxng.org/ns/structure/1.0""#;

    fn run(schema: &str) -> Result<(Tree, NodeId), SchemaError> {
        let mut tree = Tree::new();
        let root = parse::parse_into(&mut tree, schema).unwrap();
        normalize::strip_foreign(&mut tree, root)?;
        normalize::normalize_names(&mut tree, root)?;
        let root = ensure_grammar(&mut tree, root);
        rewrite::rewrite(&mut tree, root)?;
        flatten(&mut tree, root)?;
        Ok((tree, root))
    }

    #[test]
    fn bare_pattern_is_wrapped() {
        let (tree, root) = run(&format!(r#"<element name="a" {RNG}><empty/></element>"#)).unwrap();
        assert!(is_rng(&tree, root, "grammar"));
        let start = tree.children(root)[0];
        assert!(is_rng(&tree, start, "start"));
    }

    #[test]
    fn nested_grammar_is_dissolved() {
        let (tree, root) = run(&format!(
            r#"<grammar {RNG}>
                 <start><ref name="out"/></start>
                 <define name="out">
                   <element name="a">
                     <grammar>
                       <start><ref name="in"/></start>
                       <define name="in"><element name="b"><empty/></element></define>
                     </grammar>
                   </element>
                 </define>
               </grammar>"#
        ))
        .unwrap();
        let defines: Vec<String> = tree
            .children(root)
            .iter()
            .filter(|&&c| is_rng(&tree, c, "define"))
            .map(|&c| tree.attr(c, "name").unwrap().to_string())
            .collect();
        assert_eq!(defines, vec!["out", "__grammar-1-in"]);
        // The element content is now a renamed ref, not a grammar.
        let out = tree
            .children(root)
            .iter()
            .copied()
            .find(|&c| tree.attr(c, "name") == Some("out"))
            .unwrap();
        let element = tree.children(out)[0];
        let content = tree.children(element)[1];
        assert!(is_rng(&tree, content, "ref"));
        assert_eq!(tree.attr(content, "name"), Some("__grammar-1-in"));
    }

    #[test]
    fn parent_ref_reaches_outer_scope() {
        let (tree, root) = run(&format!(
            r#"<grammar {RNG}>
                 <start><ref name="a"/></start>
                 <define name="a">
                   <element name="a">
                     <grammar>
                       <start><parentRef name="b"/></start>
                     </grammar>
                   </element>
                 </define>
                 <define name="b"><element name="b"><empty/></element></define>
               </grammar>"#
        ))
        .unwrap();
        let a = tree
            .children(root)
            .iter()
            .copied()
            .find(|&c| tree.attr(c, "name") == Some("a"))
            .unwrap();
        let element = tree.children(a)[0];
        let content = tree.children(element)[1];
        assert!(is_rng(&tree, content, "ref"));
        assert_eq!(tree.attr(content, "name"), Some("b"));
    }

    #[test]
    fn undefined_ref_is_an_error() {
        let err = run(&format!(
            r#"<grammar {RNG}><start><ref name="ghost"/></start></grammar>"#
        ))
        .unwrap_err();
        assert_matches!(err, SchemaError::Validation { .. });
    }

    #[test]
    fn parent_ref_at_top_is_an_error() {
        let err = run(&format!(
            r#"<grammar {RNG}><start><parentRef name="x"/></start></grammar>"#
        ))
        .unwrap_err();
        assert_matches!(err, SchemaError::Validation { .. });
    }
}
