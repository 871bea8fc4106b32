//! Parsing an XML document into the mutable element tree.

use crate::tree::{Attribute, NodeId, Tree};

/// Parse `text` and graft the document element into `tree`, returning its
/// node.  Namespace declarations are recorded on the element that makes
/// them, so prefix resolution keeps working after subtrees are moved.
pub fn parse_into(tree: &mut Tree, text: &str) -> Result<NodeId, roxmltree::Error> {
    let doc = roxmltree::Document::parse(text)?;
    Ok(convert(tree, doc.root_element(), None))
}

fn convert(tree: &mut Tree, node: roxmltree::Node, parent: Option<NodeId>) -> NodeId {
    let uri = node.tag_name().namespace().unwrap_or("");
    let prefix = node.lookup_prefix(uri).unwrap_or("");
    let id = tree.add_element(prefix, node.tag_name().name(), uri);

    for ns in node.namespaces() {
        let prefix = ns.name().unwrap_or("");
        let declared_here = match parent {
            None => true,
            // Only record declarations that change the in-scope binding.
            Some(p) => tree.resolve_prefix(p, prefix).as_deref() != Some(ns.uri()),
        };
        if declared_here {
            tree.element_mut(id)
                .ns_decls
                .insert(prefix.to_string(), ns.uri().to_string());
        }
    }
    // Parent link is needed for the declared-here check of children.
    if let Some(p) = parent {
        tree.append(p, id);
    }

    for attr in node.attributes() {
        let uri = attr.namespace().unwrap_or("");
        let key = crate::tree::attr_key(uri, attr.name());
        tree.element_mut(id).attributes.insert(
            key,
            Attribute {
                prefix: String::new(),
                local: attr.name().to_string(),
                uri: uri.to_string(),
                value: attr.value().to_string(),
            },
        );
    }

    for child in node.children() {
        if child.is_element() {
            convert(tree, child, Some(id));
        } else if child.is_text()
            && let Some(t) = child.text()
        {
            let text = tree.add_text(t);
            tree.append(id, text);
        }
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespaced_schema() {
        let mut tree = Tree::new();
        let root = parse_into(
            &mut tree,
            r#"<element name="a" xmlns="http://relaxng.org/ns/structure/1.0"
                        xmlns:p="urn:p"><p:note/><empty/></element>"#,
        )
        .unwrap();
        assert_eq!(tree.local(root), "element");
        assert_eq!(tree.element(root).uri, "http://relaxng.org/ns/structure/1.0");
        assert_eq!(tree.attr(root, "name"), Some("a"));
        let kids = tree.children(root).to_vec();
        assert_eq!(kids.len(), 2);
        assert_eq!(tree.element(kids[0]).uri, "urn:p");
        assert_eq!(tree.resolve_prefix(kids[1], "p"), Some("urn:p".to_string()));
    }

    #[test]
    fn declared_only_on_declaring_element() {
        let mut tree = Tree::new();
        let root = parse_into(
            &mut tree,
            r#"<a xmlns:p="urn:p"><b><c xmlns:q="urn:q"/></b></a>"#,
        )
        .unwrap();
        let b = tree.children(root)[0];
        let c = tree.children(b)[0];
        assert!(tree.element(b).ns_decls.is_empty());
        assert_eq!(tree.element(c).ns_decls.get("q"), Some(&"urn:q".to_string()));
        assert_eq!(tree.resolve_prefix(c, "p"), Some("urn:p".to_string()));
    }

    #[test]
    fn keeps_text_nodes() {
        let mut tree = Tree::new();
        let root = parse_into(&mut tree, "<value> hello </value>").unwrap();
        assert_eq!(tree.text_content(root), " hello ");
    }
}
