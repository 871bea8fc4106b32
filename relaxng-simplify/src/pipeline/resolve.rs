//! Pass 1: resolution of `externalRef` and `include`, `div` flattening, and
//! `combine` merging.
//!
//! Referenced documents are fetched through the resource loader, parsed
//! into the same arena, and grafted in place.  Each grafted document gets an
//! explicit `datatypeLibrary` so it does not accidentally inherit one from
//! the referencing document.  A URL stack guards against inclusion cycles.

use crate::loader::ResourceLoader;
use crate::tree::{NodeId, Tree};
use crate::{SchemaError, parse};
use fnv::FnvHashSet;
use tracing::trace;
use url::Url;

use super::{is_rng, new_rng, rng_local};

pub fn resolve(
    tree: &mut Tree,
    root: NodeId,
    base_url: &Url,
    loader: &dyn ResourceLoader,
) -> Result<(), SchemaError> {
    let mut stack = vec![base_url.as_str().to_string()];
    resolve_subtree(tree, root, base_url, loader, &mut stack)?;
    flatten_divs(tree, root);
    merge_combines(tree, root)?;
    Ok(())
}

fn resolve_subtree(
    tree: &mut Tree,
    node: NodeId,
    base_url: &Url,
    loader: &dyn ResourceLoader,
    stack: &mut Vec<String>,
) -> Result<(), SchemaError> {
    // Children may be replaced in place, so walk by index.
    let mut i = 0;
    while i < tree.child_count(node) {
        let child = tree.children(node)[i];
        match rng_local(tree, child) {
            Some("externalRef") => {
                let loaded = load_referenced(tree, child, base_url, loader, stack)?;
                // The referenced document element must be a pattern; its ns
                // defaults to the one on the externalRef element.
                if tree.attr(loaded.root, "ns").is_none()
                    && let Some(ns) = tree.attr(child, "ns").map(str::to_string)
                {
                    tree.set_attr(loaded.root, "ns", &ns);
                }
                tree.replace_child_with(node, child, loaded.root)
                    .expect("externalRef is a child of its parent");
            }
            Some("include") => {
                // The override components are part of the including
                // document; resolve them against its base URL first.
                resolve_subtree(tree, child, base_url, loader, stack)?;
                let loaded = load_referenced(tree, child, base_url, loader, stack)?;
                if !is_rng(tree, loaded.root, "grammar") {
                    return Err(SchemaError::validation(
                        tree,
                        child,
                        "included document must have a grammar root element",
                    ));
                }
                apply_include_overrides(tree, child, loaded.root)?;
                // include becomes a div holding the included grammar's
                // components followed by its own.
                let div = new_rng(tree, "div");
                flatten_divs(tree, loaded.root);
                tree.grab_children(div, loaded.root);
                tree.grab_children(div, child);
                tree.replace_child_with(node, child, div)
                    .expect("include is a child of its parent");
            }
            _ => {
                if tree.is_element(child) {
                    resolve_subtree(tree, child, base_url, loader, stack)?;
                }
            }
        }
        i += 1;
    }
    Ok(())
}

struct Loaded {
    root: NodeId,
    url: Url,
}

fn load_referenced(
    tree: &mut Tree,
    node: NodeId,
    base_url: &Url,
    loader: &dyn ResourceLoader,
    stack: &mut Vec<String>,
) -> Result<Loaded, SchemaError> {
    let href = tree
        .attr(node, "href")
        .ok_or_else(|| SchemaError::validation(tree, node, "missing href attribute"))?
        .to_string();
    let url = base_url.join(&href).map_err(|_| SchemaError::BadHref {
        href: href.clone(),
        path: tree.path(node),
    })?;
    if stack.contains(&url.as_str().to_string()) {
        return Err(SchemaError::IncludeCycle { url });
    }
    trace!(%url, "loading referenced schema");
    let resource = loader.load(&url)?;
    let root = parse::parse_into(tree, &resource.text).map_err(|source| SchemaError::Parse {
        url: resource.url.clone(),
        source,
    })?;
    // Block datatypeLibrary inheritance across document boundaries.
    if tree.attr(root, "datatypeLibrary").is_none() {
        tree.set_attr(root, "datatypeLibrary", "");
    }
    stack.push(resource.url.as_str().to_string());
    resolve_subtree(tree, root, &resource.url, loader, stack)?;
    stack.pop();
    Ok(Loaded {
        root,
        url: resource.url,
    })
}

/// `define`/`start` children of an `include` replace the same-named
/// components of the included grammar, which must contain something to
/// replace.
fn apply_include_overrides(
    tree: &mut Tree,
    include: NodeId,
    grammar: NodeId,
) -> Result<(), SchemaError> {
    let mut replaced_defines = FnvHashSet::default();
    let mut replaces_start = false;
    for &child in tree.children(include) {
        match rng_local(tree, child) {
            Some("define") => {
                if let Some(name) = tree.attr(child, "name") {
                    replaced_defines.insert(name.trim().to_string());
                }
            }
            Some("start") => replaces_start = true,
            _ => {}
        }
    }
    if replaced_defines.is_empty() && !replaces_start {
        return Ok(());
    }

    let mut found_defines = FnvHashSet::default();
    let mut found_start = false;
    remove_overridden(
        tree,
        grammar,
        &replaced_defines,
        replaces_start,
        &mut found_defines,
        &mut found_start,
    );
    if replaces_start && !found_start {
        return Err(SchemaError::validation(
            tree,
            include,
            "include overrides start, but the included grammar has no start",
        ));
    }
    for name in &replaced_defines {
        if !found_defines.contains(name) {
            return Err(SchemaError::validation(
                tree,
                include,
                format!("include overrides {name:?}, which the included grammar does not define"),
            ));
        }
    }
    Ok(())
}

fn remove_overridden(
    tree: &mut Tree,
    node: NodeId,
    defines: &FnvHashSet<String>,
    start: bool,
    found_defines: &mut FnvHashSet<String>,
    found_start: &mut bool,
) {
    let mut i = 0;
    while i < tree.child_count(node) {
        let child = tree.children(node)[i];
        let drop = match rng_local(tree, child) {
            Some("define") => match tree.attr(child, "name") {
                Some(name) if defines.contains(name.trim()) => {
                    found_defines.insert(name.trim().to_string());
                    true
                }
                _ => false,
            },
            Some("start") if start => {
                *found_start = true;
                true
            }
            Some("div") => {
                remove_overridden(tree, child, defines, start, found_defines, found_start);
                false
            }
            _ => false,
        };
        if drop {
            tree.remove_child(node, child)
                .expect("child seen in iteration");
        } else {
            i += 1;
        }
    }
}

/// Replace every `div` by its children, recursively.
pub(crate) fn flatten_divs(tree: &mut Tree, node: NodeId) {
    let mut i = 0;
    while i < tree.child_count(node) {
        let child = tree.children(node)[i];
        if is_rng(tree, child, "div") {
            flatten_divs(tree, child);
            let grandchildren = tree.empty(child);
            tree.remove_child(node, child)
                .expect("child seen in iteration");
            for (offset, gc) in grandchildren.into_iter().enumerate() {
                tree.insert(node, i + offset, gc);
            }
        } else {
            if tree.is_element(child) {
                flatten_divs(tree, child);
            }
            i += 1;
        }
    }
}

/// Merge duplicate `define`s (and `start`s) in every grammar according to
/// their `combine` attributes.
fn merge_combines(tree: &mut Tree, node: NodeId) -> Result<(), SchemaError> {
    if is_rng(tree, node, "grammar") {
        merge_grammar_combines(tree, node)?;
    }
    let children: Vec<NodeId> = tree.children(node).to_vec();
    for child in children {
        if tree.is_element(child) {
            merge_combines(tree, child)?;
        }
    }
    Ok(())
}

fn merge_grammar_combines(tree: &mut Tree, grammar: NodeId) -> Result<(), SchemaError> {
    // Group component indices by key; "" keys the start component.
    let mut groups: Vec<(String, Vec<NodeId>)> = Vec::new();
    for &child in tree.children(grammar) {
        let key = match rng_local(tree, child) {
            Some("start") => String::new(),
            Some("define") => match tree.attr(child, "name") {
                Some(name) => name.trim().to_string(),
                None => {
                    return Err(SchemaError::validation(tree, child, "define without a name"));
                }
            },
            _ => continue,
        };
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(child),
            None => groups.push((key, vec![child])),
        }
    }

    for (key, members) in groups {
        if members.len() < 2 {
            continue;
        }
        let mut combine: Option<String> = None;
        let mut without_combine = 0usize;
        for &member in &members {
            match tree.attr(member, "combine") {
                Some(c) => {
                    let c = c.trim().to_string();
                    if !matches!(c.as_str(), "choice" | "interleave") {
                        return Err(SchemaError::validation(
                            tree,
                            member,
                            format!("invalid combine value {c:?}"),
                        ));
                    }
                    match &combine {
                        Some(prev) if *prev != c => {
                            return Err(SchemaError::validation(
                                tree,
                                member,
                                format!("conflicting combine values {prev:?} and {c:?}"),
                            ));
                        }
                        _ => combine = Some(c),
                    }
                }
                None => without_combine += 1,
            }
        }
        if without_combine > 1 {
            let what = if key.is_empty() {
                "start".to_string()
            } else {
                format!("define {key:?}")
            };
            return Err(SchemaError::validation(
                tree,
                members[1],
                format!("duplicate {what} without a combine attribute"),
            ));
        }
        let combine = combine.unwrap_or_else(|| "choice".to_string());

        // Merge everything into the first member, wrapping the combined
        // bodies in a single combinator element.  A body with several
        // children forms an implicit group, which must survive the merge.
        let first = members[0];
        let combinator = new_rng(tree, &combine);
        for &member in &members {
            let body = if tree.child_count(member) > 1 {
                let group = new_rng(tree, "group");
                tree.grab_children(group, member);
                group
            } else {
                tree.first_child(member)
                    .ok_or_else(|| SchemaError::validation(tree, member, "empty definition"))?
            };
            tree.append(combinator, body);
            if member != first {
                tree.remove_child(grammar, member)
                    .expect("member is a grammar child");
            }
        }
        tree.append(first, combinator);
        tree.remove_attr(first, "combine");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MapLoader;
    use assert_matches::assert_matches;

    fn run(schema: &str, loader: &MapLoader) -> Result<(Tree, NodeId), SchemaError> {
        let mut tree = Tree::new();
        let root = parse::parse_into(&mut tree, schema).unwrap();
        let base = Url::parse("memory:/main.rng").unwrap();
        resolve(&mut tree, root, &base, loader)?;
        Ok((tree, root))
    }

    const RNG: &str = r#"xmlns="http://relaxng.org/ns/structure/1.0""#;

    #[test]
    fn external_ref_is_inlined() {
        let loader = MapLoader::new().add(
            "memory:/other.rng",
            &format!(r#"<element name="b" {RNG}><empty/></element>"#),
        );
        let schema = format!(
            r#"<element name="a" {RNG}><externalRef href="other.rng"/></element>"#
        );
        let (tree, root) = run(&schema, &loader).unwrap();
        let child = tree.children(root)[0];
        assert_eq!(tree.local(child), "element");
        assert_eq!(tree.attr(child, "name"), Some("b"));
        // Inlined roots get an explicit datatypeLibrary.
        assert_eq!(tree.attr(child, "datatypeLibrary"), Some(""));
    }

    #[test]
    fn include_cycle_detected() {
        let loader = MapLoader::new().add(
            "memory:/loop.rng",
            &format!(r#"<grammar {RNG}><include href="loop.rng"/></grammar>"#),
        );
        let schema = format!(r#"<grammar {RNG}><include href="loop.rng"/><start><text/></start></grammar>"#);
        // The cycle is loop.rng including itself.
        let err = run(&schema, &loader).unwrap_err();
        assert_matches!(err, SchemaError::IncludeCycle { .. });
    }

    #[test]
    fn include_overrides_define() {
        let loader = MapLoader::new().add(
            "memory:/lib.rng",
            &format!(
                r#"<grammar {RNG}>
                     <define name="x"><text/></define>
                     <define name="y"><empty/></define>
                   </grammar>"#
            ),
        );
        let schema = format!(
            r#"<grammar {RNG}>
                 <start><ref name="x"/></start>
                 <include href="lib.rng">
                   <define name="x"><empty/></define>
                 </include>
               </grammar>"#
        );
        let (tree, root) = run(&schema, &loader).unwrap();
        // One start, one y define, one overriding x define.
        let defines: Vec<_> = tree
            .children(root)
            .iter()
            .filter(|&&c| is_rng(&tree, c, "define"))
            .map(|&c| {
                (
                    tree.attr(c, "name").unwrap().to_string(),
                    tree.local(tree.children(c)[0]).to_string(),
                )
            })
            .collect();
        assert!(defines.contains(&("x".to_string(), "empty".to_string())));
        assert!(defines.contains(&("y".to_string(), "text".to_string())));
        assert_eq!(defines.len(), 2);
    }

    #[test]
    fn include_override_must_match() {
        let loader = MapLoader::new().add(
            "memory:/lib.rng",
            &format!(r#"<grammar {RNG}><define name="x"><text/></define></grammar>"#),
        );
        let schema = format!(
            r#"<grammar {RNG}>
                 <include href="lib.rng"><define name="zz"><empty/></define></include>
               </grammar>"#
        );
        let err = run(&schema, &loader).unwrap_err();
        assert_matches!(err, SchemaError::Validation { .. });
    }

    #[test]
    fn combine_by_choice() {
        let schema = format!(
            r#"<grammar {RNG}>
                 <start><ref name="a"/></start>
                 <define name="a" combine="choice"><text/></define>
                 <define name="a" combine="choice"><empty/></define>
               </grammar>"#
        );
        let (tree, root) = run(&schema, &MapLoader::new()).unwrap();
        let defines: Vec<_> = tree
            .children(root)
            .iter()
            .filter(|&&c| is_rng(&tree, c, "define"))
            .copied()
            .collect();
        assert_eq!(defines.len(), 1);
        let body = tree.children(defines[0]);
        assert_eq!(body.len(), 1);
        assert!(is_rng(&tree, body[0], "choice"));
        assert_eq!(tree.child_count(body[0]), 2);
        assert_eq!(tree.attr(defines[0], "combine"), None);
    }

    #[test]
    fn duplicate_define_without_combine_is_an_error() {
        let schema = format!(
            r#"<grammar {RNG}>
                 <define name="a"><text/></define>
                 <define name="a"><empty/></define>
               </grammar>"#
        );
        let err = run(&schema, &MapLoader::new()).unwrap_err();
        assert_matches!(err, SchemaError::Validation { .. });
    }

    #[test]
    fn conflicting_combines_are_an_error() {
        let schema = format!(
            r#"<grammar {RNG}>
                 <define name="a" combine="choice"><text/></define>
                 <define name="a" combine="interleave"><empty/></define>
               </grammar>"#
        );
        let err = run(&schema, &MapLoader::new()).unwrap_err();
        assert_matches!(err, SchemaError::Validation { .. });
    }

    #[test]
    fn divs_are_flattened() {
        let schema = format!(
            r#"<grammar {RNG}>
                 <div>
                   <start><text/></start>
                   <div><define name="a"><text/></define></div>
                 </div>
               </grammar>"#
        );
        let (tree, root) = run(&schema, &MapLoader::new()).unwrap();
        let locals: Vec<_> = tree
            .children(root)
            .iter()
            .map(|&c| tree.local(c).to_string())
            .collect();
        assert_eq!(locals, vec!["start", "define"]);
    }
}
