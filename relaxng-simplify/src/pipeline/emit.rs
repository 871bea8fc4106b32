//! Pass 8: emission of the canonical tree into the runtime pattern model.
//!
//! The tree handed to [`emit`] satisfies the pipeline postconditions; a
//! malformed tree here is a programmer error, not a schema error, and
//! panics.

use crate::SchemaError;
use crate::tree::{NodeId, Tree};
use relaxng_grammar::datatype::{Datatypes, DatatypeValues};
use relaxng_grammar::{Define, ElementPat, Grammar, NameClass, Pattern, RefPattern};

use super::rng_local;

pub fn emit(tree: &Tree, grammar_node: NodeId) -> Result<Grammar, SchemaError> {
    let mut start = None;
    let mut defines = Vec::new();
    for &component in tree.children(grammar_node) {
        match rng_local(tree, component) {
            Some("start") => {
                let pattern = tree.first_child(component).expect("start has a pattern");
                start = Some(emit_pattern(tree, pattern)?);
            }
            Some("define") => {
                let name = tree
                    .attr(component, "name")
                    .expect("defines are named")
                    .to_string();
                let element = tree.first_child(component).expect("define has a body");
                defines.push(Define {
                    name,
                    element: emit_element(tree, element)?,
                });
            }
            other => panic!("unexpected grammar component {other:?}"),
        }
    }
    let mut grammar = Grammar::new(start.expect("grammar has a start"), defines);
    grammar.link()?;
    Ok(grammar)
}

fn emit_element(tree: &Tree, node: NodeId) -> Result<ElementPat, SchemaError> {
    debug_assert_eq!(rng_local(tree, node), Some("element"));
    let children = tree.children(node);
    debug_assert_eq!(children.len(), 2);
    Ok(ElementPat {
        name: emit_name_class(tree, children[0]),
        content: emit_pattern(tree, children[1])?,
    })
}

fn emit_pattern(tree: &Tree, node: NodeId) -> Result<Pattern, SchemaError> {
    let local = rng_local(tree, node).expect("pattern element");
    let binary = |tree: &Tree| -> Result<(Box<Pattern>, Box<Pattern>), SchemaError> {
        let children = tree.children(node);
        debug_assert_eq!(children.len(), 2);
        Ok((
            Box::new(emit_pattern(tree, children[0])?),
            Box::new(emit_pattern(tree, children[1])?),
        ))
    };
    match local {
        "empty" => Ok(Pattern::Empty),
        "notAllowed" => Ok(Pattern::NotAllowed),
        "text" => Ok(Pattern::Text),
        "choice" => {
            let (a, b) = binary(tree)?;
            Ok(Pattern::Choice(a, b))
        }
        "group" => {
            let (a, b) = binary(tree)?;
            Ok(Pattern::Group(a, b))
        }
        "interleave" => {
            let (a, b) = binary(tree)?;
            Ok(Pattern::Interleave(a, b))
        }
        "oneOrMore" => {
            let p = tree.first_child(node).expect("oneOrMore has content");
            Ok(Pattern::OneOrMore(Box::new(emit_pattern(tree, p)?)))
        }
        "list" => {
            let p = tree.first_child(node).expect("list has content");
            Ok(Pattern::List(Box::new(emit_pattern(tree, p)?)))
        }
        "attribute" => {
            let children = tree.children(node);
            debug_assert_eq!(children.len(), 2);
            Ok(Pattern::Attribute(
                emit_name_class(tree, children[0]),
                Box::new(emit_pattern(tree, children[1])?),
            ))
        }
        "ref" => Ok(Pattern::Ref(RefPattern::new(
            tree.attr(node, "name").expect("refs are named"),
        ))),
        "data" => emit_data(tree, node),
        "value" => {
            let library = tree.attr(node, "datatypeLibrary").unwrap_or("");
            let type_name = tree.attr(node, "type").unwrap_or("token");
            let ns = tree.attr(node, "ns").unwrap_or("");
            let value = tree.text_content(node);
            let dv = DatatypeValues::from_type(library, type_name, &value, ns).map_err(
                |source| SchemaError::Datatype {
                    path: tree.path(node),
                    source,
                },
            )?;
            Ok(Pattern::Value(dv))
        }
        other => panic!("unexpected pattern element {other:?} after simplification"),
    }
}

fn emit_data(tree: &Tree, node: NodeId) -> Result<Pattern, SchemaError> {
    let library = tree.attr(node, "datatypeLibrary").unwrap_or("").to_string();
    let type_name = tree
        .attr(node, "type")
        .ok_or_else(|| SchemaError::validation(tree, node, "data without a type attribute"))?
        .to_string();
    let mut params = Vec::new();
    let mut except = None;
    for &child in tree.children(node) {
        match rng_local(tree, child) {
            Some("param") => {
                let name = tree.attr(child, "name").ok_or_else(|| {
                    SchemaError::validation(tree, child, "param without a name attribute")
                })?;
                params.push((name.to_string(), tree.text_content(child)));
            }
            Some("except") => {
                let p = tree.first_child(child).expect("except has content");
                except = Some(Box::new(emit_pattern(tree, p)?));
            }
            _ => {}
        }
    }
    let datatype =
        Datatypes::from_params(&library, &type_name, &params).map_err(|source| {
            SchemaError::Datatype {
                path: tree.path(node),
                source,
            }
        })?;
    Ok(Pattern::Data { datatype, except })
}

fn emit_name_class(tree: &Tree, node: NodeId) -> NameClass {
    let local = rng_local(tree, node).expect("name-class element");
    match local {
        "name" => NameClass::Name {
            ns: tree.attr(node, "ns").unwrap_or("").to_string(),
            local: tree.text_content(node).trim().to_string(),
        },
        "nsName" => NameClass::NsName {
            ns: tree.attr(node, "ns").unwrap_or("").to_string(),
            except: emit_name_except(tree, node),
        },
        "anyName" => NameClass::AnyName {
            except: emit_name_except(tree, node),
        },
        "choice" => {
            let children = tree.children(node);
            debug_assert_eq!(children.len(), 2);
            NameClass::choice(
                emit_name_class(tree, children[0]),
                emit_name_class(tree, children[1]),
            )
        }
        other => panic!("unexpected name-class element {other:?}"),
    }
}

fn emit_name_except(tree: &Tree, node: NodeId) -> Option<Box<NameClass>> {
    let except = tree
        .children(node)
        .iter()
        .copied()
        .find(|&c| rng_local(tree, c) == Some("except"))?;
    let nc = tree.first_child(except).expect("except has content");
    Some(Box::new(emit_name_class(tree, nc)))
}
