//! Pass 4: local structural rewrites into the canonical binary form, plus
//! the static restrictions on name classes.
//!
//! Postconditions: `choice`/`group`/`interleave` have exactly two children,
//! `element` has a name class plus one pattern, `attribute` a name class
//! plus one pattern, `zeroOrMore`/`optional`/`mixed` are gone, and every
//! `except` holds a single child.

use crate::SchemaError;
use crate::tree::{NodeId, Tree};

use super::{new_rng, rng_local};

const XMLNS_RESERVED: &str = "http://www.w3.org/2000/xmlns";

#[derive(Debug, Default, Clone, Copy)]
struct Ctx {
    /// Inside the name class of an `attribute`.
    in_attribute_class: bool,
    /// Inside the `except` of an `anyName`.
    in_any_except: bool,
    /// Inside the `except` of an `nsName`.
    in_ns_except: bool,
}

pub fn rewrite(tree: &mut Tree, root: NodeId) -> Result<(), SchemaError> {
    walk(tree, root, Ctx::default())
}

fn walk(tree: &mut Tree, node: NodeId, ctx: Ctx) -> Result<(), SchemaError> {
    check(tree, node, ctx)?;
    let local = match rng_local(tree, node) {
        Some(l) => l.to_string(),
        None => return Ok(()),
    };
    let mut i = 0;
    while i < tree.child_count(node) {
        let child = tree.children(node)[i];
        if tree.is_element(child) {
            walk(tree, child, child_context(&local, i, ctx))?;
            transform(tree, node, child)?;
        }
        i += 1;
    }
    Ok(())
}

fn child_context(parent_local: &str, index: usize, ctx: Ctx) -> Ctx {
    match parent_local {
        "element" => Ctx::default(),
        "attribute" if index == 0 => Ctx {
            in_attribute_class: true,
            ..Ctx::default()
        },
        "attribute" => Ctx::default(),
        "anyName" => Ctx {
            in_any_except: true,
            ..ctx
        },
        "nsName" => Ctx {
            in_ns_except: true,
            ..ctx
        },
        "data" => Ctx::default(),
        _ => ctx,
    }
}

fn check(tree: &Tree, node: NodeId, ctx: Ctx) -> Result<(), SchemaError> {
    let local = match rng_local(tree, node) {
        Some(l) => l,
        None => return Ok(()),
    };
    if ctx.in_any_except && local == "anyName" {
        return Err(SchemaError::validation(
            tree,
            node,
            "anyName is not allowed inside an except of anyName",
        ));
    }
    if ctx.in_ns_except && matches!(local, "anyName" | "nsName") {
        return Err(SchemaError::validation(
            tree,
            node,
            format!("{local} is not allowed inside an except of nsName"),
        ));
    }
    if ctx.in_attribute_class {
        let ns = tree.attr(node, "ns").unwrap_or("");
        let reserved = ns.starts_with(XMLNS_RESERVED);
        match local {
            "name" => {
                if reserved || (ns.is_empty() && tree.text_content(node).trim() == "xmlns") {
                    return Err(SchemaError::validation(
                        tree,
                        node,
                        "attributes cannot live in the xmlns namespace",
                    ));
                }
            }
            "nsName" if reserved => {
                return Err(SchemaError::validation(
                    tree,
                    node,
                    "attributes cannot live in the xmlns namespace",
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Apply `child`'s rewrite rule within `parent`.  The replacement, if any,
/// lands at the child's position.
fn transform(tree: &mut Tree, parent: NodeId, child: NodeId) -> Result<(), SchemaError> {
    let local = match rng_local(tree, child) {
        Some(l) => l.to_string(),
        None => return Ok(()),
    };
    match local.as_str() {
        "choice" | "group" | "interleave" => {
            match tree.child_count(child) {
                0 => {
                    return Err(SchemaError::validation(
                        tree,
                        child,
                        format!("{local} requires at least one child"),
                    ));
                }
                1 => {
                    let only = tree.children(child)[0];
                    tree.replace_child_with(parent, child, only)
                        .expect("child is in parent");
                }
                2 => {}
                _ => fold_binary(tree, child, &local),
            }
        }
        "element" => match tree.child_count(child) {
            0 | 1 => {
                return Err(SchemaError::validation(
                    tree,
                    child,
                    "element requires a name class and a content pattern",
                ));
            }
            2 => check_name_class_child(tree, child)?,
            _ => {
                check_name_class_child(tree, child)?;
                // Wrap the trailing pattern children in a group.
                let group = new_rng(tree, "group");
                while tree.child_count(child) > 1 {
                    let c = tree.children(child)[1];
                    tree.append(group, c);
                }
                tree.append(child, group);
                fold_binary(tree, group, "group");
            }
        },
        "attribute" => match tree.child_count(child) {
            0 => {
                return Err(SchemaError::validation(
                    tree,
                    child,
                    "attribute requires a name class",
                ));
            }
            1 => {
                check_name_class_child(tree, child)?;
                let text = new_rng(tree, "text");
                tree.append(child, text);
            }
            2 => check_name_class_child(tree, child)?,
            _ => {
                return Err(SchemaError::validation(
                    tree,
                    child,
                    "attribute takes at most one content pattern",
                ));
            }
        },
        "start" => {
            if tree.child_count(child) != 1 {
                return Err(SchemaError::validation(
                    tree,
                    child,
                    "start requires exactly one pattern",
                ));
            }
        }
        "define" | "oneOrMore" | "list" => {
            if tree.child_count(child) == 0 {
                return Err(SchemaError::validation(
                    tree,
                    child,
                    format!("{local} requires a content pattern"),
                ));
            }
            group_wrap(tree, child);
        }
        "zeroOrMore" => {
            let content = take_content(tree, child, &local)?;
            let one_or_more = new_rng(tree, "oneOrMore");
            tree.append(one_or_more, content);
            let choice = new_rng(tree, "choice");
            tree.append(choice, one_or_more);
            let empty = new_rng(tree, "empty");
            tree.append(choice, empty);
            tree.replace_child_with(parent, child, choice)
                .expect("child is in parent");
        }
        "optional" => {
            let content = take_content(tree, child, &local)?;
            let choice = new_rng(tree, "choice");
            tree.append(choice, content);
            let empty = new_rng(tree, "empty");
            tree.append(choice, empty);
            tree.replace_child_with(parent, child, choice)
                .expect("child is in parent");
        }
        "mixed" => {
            let content = take_content(tree, child, &local)?;
            let interleave = new_rng(tree, "interleave");
            tree.append(interleave, content);
            let text = new_rng(tree, "text");
            tree.append(interleave, text);
            tree.replace_child_with(parent, child, interleave)
                .expect("child is in parent");
        }
        "except" => match tree.child_count(child) {
            0 => {
                return Err(SchemaError::validation(
                    tree,
                    child,
                    "except requires at least one child",
                ));
            }
            1 => {}
            _ => {
                let choice = new_rng(tree, "choice");
                tree.grab_children(choice, child);
                fold_binary(tree, choice, "choice");
                tree.append(child, choice);
            }
        },
        _ => {}
    }
    Ok(())
}

/// The first child of `element`/`attribute` must be a name class; the
/// `name` attribute shorthand was expanded into one earlier.
fn check_name_class_child(tree: &Tree, node: NodeId) -> Result<(), SchemaError> {
    let first = tree.first_child(node).expect("checked by the caller");
    match rng_local(tree, first) {
        Some("name" | "nsName" | "anyName" | "choice") => Ok(()),
        _ => Err(SchemaError::validation(
            tree,
            node,
            "missing name class (use a name attribute or a name-class child)",
        )),
    }
}

/// Left-fold an n-ary combinator into nested binary nodes of the same kind.
fn fold_binary(tree: &mut Tree, node: NodeId, kind: &str) {
    while tree.child_count(node) > 2 {
        let a = tree.children(node)[0];
        let b = tree.children(node)[1];
        let wrapper = new_rng(tree, kind);
        tree.append(wrapper, a);
        tree.append(wrapper, b);
        tree.insert(node, 0, wrapper);
    }
}

/// Wrap multiple children in a single binary `group`.
fn group_wrap(tree: &mut Tree, node: NodeId) {
    if tree.child_count(node) > 1 {
        let group = new_rng(tree, "group");
        tree.grab_children(group, node);
        fold_binary(tree, group, "group");
        tree.append(node, group);
    }
}

/// Detach and return the (group-wrapped) content of a shorthand element.
fn take_content(tree: &mut Tree, node: NodeId, local: &str) -> Result<NodeId, SchemaError> {
    if tree.child_count(node) == 0 {
        return Err(SchemaError::validation(
            tree,
            node,
            format!("{local} requires a content pattern"),
        ));
    }
    group_wrap(tree, node);
    let content = tree.children(node)[0];
    tree.detach(content);
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use crate::pipeline::normalize;
    use assert_matches::assert_matches;

    const RNG: &str = r#"xmlns="http://relaxng.org/ns/structure/1.0""#;

    fn run(schema: &str) -> Result<(Tree, NodeId), SchemaError> {
        let mut tree = Tree::new();
        let root = parse::parse_into(&mut tree, schema).unwrap();
        normalize::strip_foreign(&mut tree, root)?;
        normalize::normalize_names(&mut tree, root)?;
        let root = crate::pipeline::grammars::ensure_grammar(&mut tree, root);
        rewrite(&mut tree, root)?;
        Ok((tree, root))
    }

    /// Render a subtree as a compact s-expression for shape assertions.
    fn shape(tree: &Tree, node: NodeId) -> String {
        let e = match tree.as_element(node) {
            Some(e) => e,
            None => return format!("{:?}", tree.text(node).unwrap()),
        };
        if tree.child_count(node) == 0 {
            return e.local.clone();
        }
        let children: Vec<String> = tree
            .children(node)
            .iter()
            .map(|&c| shape(tree, c))
            .collect();
        format!("{}({})", e.local, children.join(","))
    }

    #[test]
    fn nary_choice_folds_left() {
        let (tree, root) = run(&format!(
            r#"<element name="a" {RNG}>
                 <choice><empty/><text/><notAllowed/></choice>
               </element>"#
        ))
        .unwrap();
        let element = tree.children(tree.children(root)[0])[0];
        assert_eq!(
            shape(&tree, element),
            "element(name(\"a\"),choice(choice(empty,text),notAllowed))"
        );
    }

    #[test]
    fn single_child_combinator_unwraps() {
        let (tree, root) = run(&format!(
            r#"<element name="a" {RNG}><choice><empty/></choice></element>"#
        ))
        .unwrap();
        let element = tree.children(tree.children(root)[0])[0];
        assert_eq!(shape(&tree, element), "element(name(\"a\"),empty)");
    }

    #[test]
    fn element_trailing_children_grouped() {
        let (tree, root) = run(&format!(
            r#"<element name="a" {RNG}><text/><empty/><text/></element>"#
        ))
        .unwrap();
        let element = tree.children(tree.children(root)[0])[0];
        assert_eq!(
            shape(&tree, element),
            "element(name(\"a\"),group(group(text,empty),text))"
        );
    }

    #[test]
    fn attribute_defaults_to_text() {
        let (tree, root) = run(&format!(
            r#"<element name="a" {RNG}><attribute name="x"/></element>"#
        ))
        .unwrap();
        let element = tree.children(tree.children(root)[0])[0];
        assert_eq!(
            shape(&tree, element),
            "element(name(\"a\"),attribute(name(\"x\"),text))"
        );
    }

    #[test]
    fn zero_or_more_expands() {
        let (tree, root) = run(&format!(
            r#"<element name="a" {RNG}><zeroOrMore><text/></zeroOrMore></element>"#
        ))
        .unwrap();
        let element = tree.children(tree.children(root)[0])[0];
        assert_eq!(
            shape(&tree, element),
            "element(name(\"a\"),choice(oneOrMore(text),empty))"
        );
    }

    #[test]
    fn optional_and_mixed_expand() {
        let (tree, root) = run(&format!(
            r#"<element name="a" {RNG}>
                 <optional><attribute name="x"/></optional>
                 <mixed><empty/></mixed>
               </element>"#
        ))
        .unwrap();
        let element = tree.children(tree.children(root)[0])[0];
        assert_eq!(
            shape(&tree, element),
            "element(name(\"a\"),group(choice(attribute(name(\"x\"),text),empty),interleave(empty,text)))"
        );
    }

    #[test]
    fn any_name_inside_any_except_rejected() {
        let err = run(&format!(
            r#"<element {RNG}>
                 <anyName><except><anyName/></except></anyName>
                 <empty/>
               </element>"#
        ))
        .unwrap_err();
        assert_matches!(err, SchemaError::Validation { .. });
    }

    #[test]
    fn ns_name_inside_ns_except_rejected() {
        let err = run(&format!(
            r#"<element {RNG}>
                 <nsName ns="urn:x"><except><nsName ns="urn:y"/></except></nsName>
                 <empty/>
               </element>"#
        ))
        .unwrap_err();
        assert_matches!(err, SchemaError::Validation { .. });
    }

    #[test]
    fn xmlns_attribute_rejected() {
        let err = run(&format!(
            r#"<element name="a" {RNG}>
                 <attribute name="xmlns"><text/></attribute>
               </element>"#
        ))
        .unwrap_err();
        assert_matches!(err, SchemaError::Validation { .. });
    }
}
