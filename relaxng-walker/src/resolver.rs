//! Prefix → namespace-uri resolution with scoped contexts.
//!
//! The driver enters a context per element, declares the prefixes it sees,
//! and the walker resolves qualified names against the innermost binding.
//! The `xml` and `xmlns` prefixes are fixed by the XML namespaces
//! recommendation and cannot be redeclared here.

use crate::event::ExpandedName;
use fnv::FnvHashMap;

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_NS: &str = "http://www.w3.org/2000/xmlns/";

pub trait NameResolver: Clone {
    fn enter_context(&mut self);
    fn leave_context(&mut self);
    fn define_prefix(&mut self, prefix: &str, uri: &str);
    fn resolve_prefix(&self, prefix: &str) -> Option<&str>;

    /// Resolve `prefix:local` (or a bare local name) to an expanded name.
    /// Unprefixed attribute names are never in the default namespace.
    fn resolve_name(&self, qname: &str, is_attribute: bool) -> Option<ExpandedName> {
        match qname.split_once(':') {
            Some((prefix, local)) => {
                let ns = self.resolve_prefix(prefix)?;
                Some(ExpandedName::new(ns, local))
            }
            None => {
                let ns = if is_attribute {
                    ""
                } else {
                    self.resolve_prefix("").unwrap_or("")
                };
                Some(ExpandedName::new(ns, qname))
            }
        }
    }
}

/// XML 1.0 rules over a stack of scope maps.
#[derive(Debug, Clone)]
pub struct DefaultNameResolver {
    contexts: Vec<FnvHashMap<String, String>>,
}

impl Default for DefaultNameResolver {
    fn default() -> Self {
        DefaultNameResolver {
            contexts: vec![FnvHashMap::default()],
        }
    }
}

impl DefaultNameResolver {
    pub fn new() -> DefaultNameResolver {
        DefaultNameResolver::default()
    }
}

impl NameResolver for DefaultNameResolver {
    fn enter_context(&mut self) {
        self.contexts.push(FnvHashMap::default());
    }

    fn leave_context(&mut self) {
        assert!(
            self.contexts.len() > 1,
            "leaving a context that was never entered"
        );
        self.contexts.pop();
    }

    fn define_prefix(&mut self, prefix: &str, uri: &str) {
        self.contexts
            .last_mut()
            .expect("at least the root context exists")
            .insert(prefix.to_string(), uri.to_string());
    }

    fn resolve_prefix(&self, prefix: &str) -> Option<&str> {
        match prefix {
            "xml" => return Some(XML_NS),
            "xmlns" => return Some(XMLNS_NS),
            _ => {}
        }
        for context in self.contexts.iter().rev() {
            if let Some(uri) = context.get(prefix) {
                // An empty re-declaration undefines the binding.
                if uri.is_empty() && !prefix.is_empty() {
                    return None;
                }
                return Some(uri);
            }
        }
        if prefix.is_empty() { Some("") } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_bindings() {
        let mut r = DefaultNameResolver::new();
        r.define_prefix("p", "urn:outer");
        r.enter_context();
        r.define_prefix("p", "urn:inner");
        assert_eq!(r.resolve_prefix("p"), Some("urn:inner"));
        r.leave_context();
        assert_eq!(r.resolve_prefix("p"), Some("urn:outer"));
    }

    #[test]
    fn fixed_prefixes() {
        let r = DefaultNameResolver::new();
        assert_eq!(r.resolve_prefix("xml"), Some(XML_NS));
        assert_eq!(r.resolve_prefix("xmlns"), Some(XMLNS_NS));
        assert_eq!(r.resolve_prefix("nope"), None);
    }

    #[test]
    fn default_namespace_applies_to_elements_only() {
        let mut r = DefaultNameResolver::new();
        r.define_prefix("", "urn:d");
        assert_eq!(
            r.resolve_name("a", false),
            Some(ExpandedName::new("urn:d", "a"))
        );
        assert_eq!(r.resolve_name("a", true), Some(ExpandedName::new("", "a")));
    }

    #[test]
    fn resolve_qualified_names() {
        let mut r = DefaultNameResolver::new();
        r.define_prefix("p", "urn:p");
        assert_eq!(
            r.resolve_name("p:x", true),
            Some(ExpandedName::new("urn:p", "x"))
        );
        assert_eq!(r.resolve_name("q:x", true), None);
    }
}
