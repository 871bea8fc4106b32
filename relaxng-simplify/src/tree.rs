//! The simplifier's working representation: a mutable, parent-linked XML
//! tree stored in an arena.
//!
//! Nodes are addressed by [`NodeId`] indices into a flat vector, so subtrees
//! loaded from different resources can be grafted into one another without
//! ownership gymnastics.  Every mutator maintains the invariant that a node
//! with a parent appears in that parent's child list exactly once.

use fnv::FnvHashMap;
use thiserror::Error;

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_NS: &str = "http://www.w3.org/2000/xmlns/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("node is not a child of this element")]
    NotAChild,
    #[error("node has no parent")]
    NoParent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub prefix: String,
    pub local: String,
    pub uri: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ElementData {
    pub prefix: String,
    pub local: String,
    pub uri: String,
    /// Namespace declarations made on this element (prefix → uri; the empty
    /// prefix is the default namespace).
    pub ns_decls: FnvHashMap<String, String>,
    /// Attributes keyed by expanded name (`local` or `{uri}local`).
    pub attributes: FnvHashMap<String, Attribute>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    kind: NodeKind,
}

/// Expanded-name key used by the attribute map.
pub fn attr_key(uri: &str, local: &str) -> String {
    if uri.is_empty() {
        local.to_string()
    } else {
        format!("{{{uri}}}{local}")
    }
}

#[derive(Debug, Default, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Tree {
        Tree::default()
    }

    pub fn add_element(&mut self, prefix: &str, local: &str, uri: &str) -> NodeId {
        self.push(NodeKind::Element(ElementData {
            prefix: prefix.to_string(),
            local: local.to_string(),
            uri: uri.to_string(),
            ns_decls: FnvHashMap::default(),
            attributes: FnvHashMap::default(),
            children: Vec::new(),
        }))
    }

    pub fn add_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { parent: None, kind });
        id
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.index()].kind, NodeKind::Element(_))
    }

    /// Element payload; panics on a text node.
    pub fn element(&self, id: NodeId) -> &ElementData {
        match &self.nodes[id.index()].kind {
            NodeKind::Element(e) => e,
            NodeKind::Text(_) => panic!("expected an element node"),
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> &mut ElementData {
        match &mut self.nodes[id.index()].kind {
            NodeKind::Element(e) => e,
            NodeKind::Text(_) => panic!("expected an element node"),
        }
    }

    pub fn as_element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.nodes[id.index()].kind {
            NodeKind::Element(e) => Some(e),
            NodeKind::Text(_) => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.index()].kind {
            NodeKind::Text(t) => Some(t),
            NodeKind::Element(_) => None,
        }
    }

    pub fn local(&self, id: NodeId) -> &str {
        &self.element(id).local
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.index()].kind {
            NodeKind::Element(e) => &e.children,
            NodeKind::Text(_) => &[],
        }
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.children(id).len()
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).first().copied()
    }

    /// Value of the un-namespaced attribute `local`.
    pub fn attr<'t>(&'t self, id: NodeId, local: &str) -> Option<&'t str> {
        self.as_element(id)?
            .attributes
            .get(local)
            .map(|a| a.value.as_str())
    }

    pub fn set_attr(&mut self, id: NodeId, local: &str, value: &str) {
        self.element_mut(id).attributes.insert(
            local.to_string(),
            Attribute {
                prefix: String::new(),
                local: local.to_string(),
                uri: String::new(),
                value: value.to_string(),
            },
        );
    }

    pub fn remove_attr(&mut self, id: NodeId, local: &str) -> Option<String> {
        self.element_mut(id).attributes.remove(local).map(|a| a.value)
    }

    // --- structural mutators ---

    /// Append `child` to `parent`, detaching it from any current parent.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.element_mut(parent).children.push(child);
        self.nodes[child.index()].parent = Some(parent);
    }

    pub fn prepend(&mut self, parent: NodeId, child: NodeId) {
        self.insert(parent, 0, child);
    }

    pub fn insert(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        self.element_mut(parent).children.insert(index, child);
        self.nodes[child.index()].parent = Some(parent);
    }

    /// Remove `child` from `parent`'s child list.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        let index = self.index_of_child(parent, child)?;
        self.element_mut(parent).children.remove(index);
        self.nodes[child.index()].parent = None;
        Ok(())
    }

    /// Detach `node` from its parent, if any.
    pub fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.index()].parent {
            let index = self
                .index_of_child(parent, node)
                .expect("parent link without a child entry");
            self.element_mut(parent).children.remove(index);
            self.nodes[node.index()].parent = None;
        }
    }

    pub fn index_of_child(&self, parent: NodeId, child: NodeId) -> Result<usize, TreeError> {
        self.children(parent)
            .iter()
            .position(|&c| c == child)
            .ok_or(TreeError::NotAChild)
    }

    /// Replace `child` with `replacement` in place.  The replacement is
    /// detached from its current parent first.
    pub fn replace_child_with(
        &mut self,
        parent: NodeId,
        child: NodeId,
        replacement: NodeId,
    ) -> Result<(), TreeError> {
        if child == replacement {
            return Ok(());
        }
        let index = self.index_of_child(parent, child)?;
        self.detach(replacement);
        // Detaching the replacement may have shifted the child's position.
        let index = if self.children(parent).get(index) == Some(&child) {
            index
        } else {
            self.index_of_child(parent, child)?
        };
        self.element_mut(parent).children[index] = replacement;
        self.nodes[replacement.index()].parent = Some(parent);
        self.nodes[child.index()].parent = None;
        Ok(())
    }

    /// Replace `node` within its parent by `replacement`.
    pub fn replace_with(&mut self, node: NodeId, replacement: NodeId) -> Result<(), TreeError> {
        let parent = self.parent(node).ok_or(TreeError::NoParent)?;
        self.replace_child_with(parent, node, replacement)
    }

    /// Move all of `src`'s children to the end of `dst`'s child list.
    pub fn grab_children(&mut self, dst: NodeId, src: NodeId) {
        let children = std::mem::take(&mut self.element_mut(src).children);
        for &child in &children {
            self.nodes[child.index()].parent = Some(dst);
        }
        self.element_mut(dst).children.extend(children);
    }

    /// Drop all children of `node`.
    pub fn empty(&mut self, node: NodeId) -> Vec<NodeId> {
        let children = std::mem::take(&mut self.element_mut(node).children);
        for &child in &children {
            self.nodes[child.index()].parent = None;
        }
        children
    }

    /// Deep copy of the subtree rooted at `node`; the copy is detached and
    /// its attribute maps are fresh.
    pub fn clone_subtree(&mut self, node: NodeId) -> NodeId {
        let copy = match self.nodes[node.index()].kind.clone() {
            NodeKind::Text(t) => return self.push(NodeKind::Text(t)),
            NodeKind::Element(e) => self.push(NodeKind::Element(ElementData {
                children: Vec::new(),
                ..e
            })),
        };
        let children: Vec<NodeId> = self.children(node).to_vec();
        for child in children {
            let child_copy = self.clone_subtree(child);
            self.append(copy, child_copy);
        }
        copy
    }

    // --- namespace resolution ---

    /// Resolve `prefix` by walking the ancestor-or-self chain; the `xml` and
    /// `xmlns` prefixes are fixed.
    pub fn resolve_prefix(&self, node: NodeId, prefix: &str) -> Option<String> {
        match prefix {
            "xml" => return Some(XML_NS.to_string()),
            "xmlns" => return Some(XMLNS_NS.to_string()),
            _ => {}
        }
        let mut current = Some(node);
        while let Some(id) = current {
            if let Some(e) = self.as_element(id)
                && let Some(uri) = e.ns_decls.get(prefix)
            {
                return Some(uri.clone());
            }
            current = self.parent(id);
        }
        None
    }

    // --- diagnostics ---

    /// A human-readable label for a node, derived from the ancestor chain
    /// and any `name` attributes: `grammar/define[@name="inline"]/element`.
    pub fn path(&self, node: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            if let Some(e) = self.as_element(id) {
                match e.attributes.get("name") {
                    Some(name) => segments.push(format!("{}[@name={:?}]", e.local, name.value)),
                    None => segments.push(e.local.clone()),
                }
            } else {
                segments.push("#text".to_string());
            }
            current = self.parent(id);
        }
        segments.reverse();
        segments.join("/")
    }

    /// Structural comparison of two subtrees, ignoring prefixes and
    /// namespace declarations (which carry no meaning after simplification).
    pub fn semantic_eq(a: &Tree, a_root: NodeId, b: &Tree, b_root: NodeId) -> bool {
        match (&a.nodes[a_root.index()].kind, &b.nodes[b_root.index()].kind) {
            (NodeKind::Text(t1), NodeKind::Text(t2)) => t1 == t2,
            (NodeKind::Element(e1), NodeKind::Element(e2)) => {
                if e1.local != e2.local || e1.uri != e2.uri {
                    return false;
                }
                if e1.attributes.len() != e2.attributes.len() {
                    return false;
                }
                for (key, attr) in &e1.attributes {
                    match e2.attributes.get(key) {
                        Some(other) if other.value == attr.value => {}
                        _ => return false,
                    }
                }
                e1.children.len() == e2.children.len()
                    && e1
                        .children
                        .iter()
                        .zip(&e2.children)
                        .all(|(&c1, &c2)| Tree::semantic_eq(a, c1, b, c2))
            }
            _ => false,
        }
    }

    /// Concatenated text content of the node's direct text children.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(node) {
            if let Some(t) = self.text(child) {
                out.push_str(t);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn append_and_remove_preserve_parent_links() {
        let mut t = Tree::new();
        let root = t.add_element("", "root", "");
        let a = t.add_element("", "a", "");
        let b = t.add_element("", "b", "");
        t.append(root, a);
        t.append(root, b);
        assert_eq!(t.children(root), &[a, b]);
        assert_eq!(t.parent(a), Some(root));

        // Re-appending an attached node moves it rather than duplicating it.
        t.append(root, a);
        assert_eq!(t.children(root), &[b, a]);

        t.remove_child(root, b).unwrap();
        assert_eq!(t.parent(b), None);
        assert_matches!(t.remove_child(root, b), Err(TreeError::NotAChild));
    }

    #[test]
    fn insert_and_prepend() {
        let mut t = Tree::new();
        let root = t.add_element("", "root", "");
        let a = t.add_element("", "a", "");
        let b = t.add_element("", "b", "");
        let c = t.add_element("", "c", "");
        t.append(root, a);
        t.prepend(root, b);
        t.insert(root, 1, c);
        assert_eq!(t.children(root), &[b, c, a]);
    }

    #[test]
    fn replace_child_detaches_replacement() {
        let mut t = Tree::new();
        let root = t.add_element("", "root", "");
        let old_parent = t.add_element("", "old", "");
        let child = t.add_element("", "child", "");
        let replacement = t.add_element("", "r", "");
        t.append(root, child);
        t.append(old_parent, replacement);
        t.replace_child_with(root, child, replacement).unwrap();
        assert_eq!(t.children(root), &[replacement]);
        assert_eq!(t.children(old_parent), &[] as &[NodeId]);
        assert_eq!(t.parent(child), None);
        assert_eq!(t.parent(replacement), Some(root));
    }

    #[test]
    fn replace_with_requires_parent() {
        let mut t = Tree::new();
        let root = t.add_element("", "root", "");
        let r = t.add_element("", "r", "");
        assert_matches!(t.replace_with(root, r), Err(TreeError::NoParent));
    }

    #[test]
    fn grab_children_moves_everything() {
        let mut t = Tree::new();
        let src = t.add_element("", "src", "");
        let dst = t.add_element("", "dst", "");
        let kids: Vec<NodeId> = (0..3)
            .map(|i| {
                let k = t.add_text(&format!("{i}"));
                t.append(src, k);
                k
            })
            .collect();
        let existing = t.add_text("x");
        t.append(dst, existing);
        t.grab_children(dst, src);
        assert_eq!(t.child_count(src), 0);
        assert_eq!(t.children(dst)[0], existing);
        assert_eq!(&t.children(dst)[1..], &kids[..]);
        assert!(kids.iter().all(|&k| t.parent(k) == Some(dst)));
    }

    #[test]
    fn clone_subtree_is_deep_and_fresh() {
        let mut t = Tree::new();
        let root = t.add_element("", "root", "");
        t.set_attr(root, "name", "n");
        let child = t.add_text("hello");
        t.append(root, child);
        let copy = t.clone_subtree(root);
        assert_ne!(copy, root);
        assert_eq!(t.parent(copy), None);
        assert!(Tree::semantic_eq(&t, root, &t, copy));
        // Mutating the copy's attributes leaves the original alone.
        t.set_attr(copy, "name", "changed");
        assert_eq!(t.attr(root, "name"), Some("n"));
    }

    #[test]
    fn prefix_resolution_walks_ancestors() {
        let mut t = Tree::new();
        let root = t.add_element("", "root", "");
        t.element_mut(root)
            .ns_decls
            .insert("p".to_string(), "urn:p".to_string());
        let child = t.add_element("", "child", "");
        t.append(root, child);
        assert_eq!(t.resolve_prefix(child, "p"), Some("urn:p".to_string()));
        assert_eq!(t.resolve_prefix(child, "xml"), Some(XML_NS.to_string()));
        assert_eq!(t.resolve_prefix(child, "q"), None);
    }

    #[test]
    fn path_labels() {
        let mut t = Tree::new();
        let g = t.add_element("", "grammar", "");
        let d = t.add_element("", "define", "");
        t.set_attr(d, "name", "inline");
        let e = t.add_element("", "element", "");
        t.append(g, d);
        t.append(d, e);
        assert_eq!(t.path(e), "grammar/define[@name=\"inline\"]/element");
    }
}
