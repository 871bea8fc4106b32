//! The compiled pattern model produced by schema simplification.
//!
//! A [`Grammar`] owns an arena of element definitions; `Ref` patterns carry
//! the define name plus an index resolved by [`Grammar::link`].  After
//! linking the grammar is immutable and may be shared freely between
//! walkers, including across threads.

use crate::datatype::{Datatype, Datatypes, DatatypeValues};
use crate::nameclass::NameClass;
use fnv::{FnvHashMap, FnvHashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name} cannot be resolved")]
pub struct UnresolvedRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    Empty,
    NotAllowed,
    Text,
    Choice(Box<Pattern>, Box<Pattern>),
    Group(Box<Pattern>, Box<Pattern>),
    Interleave(Box<Pattern>, Box<Pattern>),
    OneOrMore(Box<Pattern>),
    List(Box<Pattern>),
    Attribute(NameClass, Box<Pattern>),
    Data {
        datatype: Datatypes,
        except: Option<Box<Pattern>>,
    },
    Value(DatatypeValues),
    Ref(RefPattern),
}

/// A reference to a named element definition.  `index` is `None` until the
/// grammar is linked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefPattern {
    pub name: String,
    index: Option<u32>,
}

impl RefPattern {
    pub fn new(name: impl Into<String>) -> RefPattern {
        RefPattern {
            name: name.into(),
            index: None,
        }
    }

    /// The resolved define index.  Panics if the grammar was not linked.
    pub fn resolved(&self) -> u32 {
        self.index
            .unwrap_or_else(|| panic!("ref {:?} used before linking", self.name))
    }
}

/// The body of a define: exactly one element pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementPat {
    pub name: NameClass,
    pub content: Pattern,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Define {
    pub name: String,
    pub element: ElementPat,
}

#[derive(Debug, Clone, Default)]
pub struct Grammar {
    pub start: Pattern,
    pub defines: Vec<Define>,
    /// local name → define indices, for misplaced-element recovery.
    element_index: FnvHashMap<String, Vec<u32>>,
    /// Namespaces used anywhere in the grammar, with the `"*"`/`"::except"`
    /// markers of the name-class algebra.
    namespaces: Vec<String>,
    linked: bool,
}

impl Default for Pattern {
    fn default() -> Pattern {
        Pattern::NotAllowed
    }
}

impl PartialEq for Grammar {
    fn eq(&self, other: &Self) -> bool {
        // Derived state (index, namespaces) is a function of the rest.
        self.start == other.start && self.defines == other.defines
    }
}
impl Eq for Grammar {}

impl Grammar {
    pub fn new(start: Pattern, defines: Vec<Define>) -> Grammar {
        Grammar {
            start,
            defines,
            element_index: FnvHashMap::default(),
            namespaces: Vec::new(),
            linked: false,
        }
    }

    /// Resolve every `Ref` to its define, collect the namespaces used in the
    /// pattern tree, and build the misplaced-element recovery index.
    pub fn link(&mut self) -> Result<(), UnresolvedRef> {
        let by_name: FnvHashMap<String, u32> = self
            .defines
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i as u32))
            .collect();

        let mut start = std::mem::take(&mut self.start);
        Self::link_pattern(&mut start, &by_name)?;
        self.start = start;
        let mut defines = std::mem::take(&mut self.defines);
        for define in &mut defines {
            Self::link_pattern(&mut define.element.content, &by_name)?;
        }
        self.defines = defines;

        let mut index: FnvHashMap<String, Vec<u32>> = FnvHashMap::default();
        let mut namespaces = FnvHashSet::default();
        for (i, define) in self.defines.iter().enumerate() {
            if let Some(names) = define.element.name.to_name_list() {
                for (_, local) in names {
                    let slot = index.entry(local).or_default();
                    if !slot.contains(&(i as u32)) {
                        slot.push(i as u32);
                    }
                }
            }
            define.element.name.namespaces(&mut namespaces);
            Self::collect_namespaces(&define.element.content, &mut namespaces);
        }
        Self::collect_namespaces(&self.start, &mut namespaces);
        self.element_index = index;
        let mut namespaces: Vec<String> = namespaces.into_iter().collect();
        namespaces.sort();
        self.namespaces = namespaces;
        self.linked = true;
        Ok(())
    }

    fn link_pattern(
        pattern: &mut Pattern,
        by_name: &FnvHashMap<String, u32>,
    ) -> Result<(), UnresolvedRef> {
        match pattern {
            Pattern::Ref(r) => match by_name.get(&r.name) {
                Some(&i) => {
                    r.index = Some(i);
                    Ok(())
                }
                None => Err(UnresolvedRef {
                    name: r.name.clone(),
                }),
            },
            Pattern::Choice(a, b) | Pattern::Group(a, b) | Pattern::Interleave(a, b) => {
                Self::link_pattern(a, by_name)?;
                Self::link_pattern(b, by_name)
            }
            Pattern::OneOrMore(p) | Pattern::List(p) | Pattern::Attribute(_, p) => {
                Self::link_pattern(p, by_name)
            }
            Pattern::Data {
                except: Some(e), ..
            } => Self::link_pattern(e, by_name),
            Pattern::Empty
            | Pattern::NotAllowed
            | Pattern::Text
            | Pattern::Data { except: None, .. }
            | Pattern::Value(_) => Ok(()),
        }
    }

    fn collect_namespaces(pattern: &Pattern, out: &mut FnvHashSet<String>) {
        match pattern {
            Pattern::Attribute(nc, p) => {
                nc.namespaces(out);
                Self::collect_namespaces(p, out);
            }
            Pattern::Choice(a, b) | Pattern::Group(a, b) | Pattern::Interleave(a, b) => {
                Self::collect_namespaces(a, out);
                Self::collect_namespaces(b, out);
            }
            Pattern::OneOrMore(p) | Pattern::List(p) => Self::collect_namespaces(p, out),
            Pattern::Data {
                except: Some(e), ..
            } => Self::collect_namespaces(e, out),
            Pattern::Value(v) => {
                out.insert(v.ns().to_string());
            }
            Pattern::Empty
            | Pattern::NotAllowed
            | Pattern::Text
            | Pattern::Data { except: None, .. }
            | Pattern::Ref(_) => {}
        }
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn define(&self, index: u32) -> &Define {
        &self.defines[index as usize]
    }

    /// The define a ref resolves to.
    pub fn resolve(&self, r: &RefPattern) -> &Define {
        self.define(r.resolved())
    }

    /// Element definitions whose name class includes `local` (by local name),
    /// used for misplaced-element recovery.
    pub fn element_definitions(&self, local: &str) -> &[u32] {
        self.element_index
            .get(local)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All namespaces mentioned by the grammar, sorted, including the
    /// `"*"`/`"::except"` markers.
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Does `pattern` accept the empty event sequence?  This is the
    /// `hasEmptyPattern` predicate; it agrees with `can_end` on a freshly
    /// constructed walker.
    pub fn nullable(&self, pattern: &Pattern) -> bool {
        match pattern {
            Pattern::Empty | Pattern::Text => true,
            // NotAllowed never matches anything, but it also carries no
            // outstanding obligation.
            Pattern::NotAllowed => true,
            Pattern::Choice(a, b) => self.nullable(a) || self.nullable(b),
            Pattern::Group(a, b) | Pattern::Interleave(a, b) => {
                self.nullable(a) && self.nullable(b)
            }
            Pattern::OneOrMore(p) | Pattern::List(p) => self.nullable(p),
            Pattern::Attribute(_, _) => false,
            Pattern::Ref(_) => false,
            Pattern::Data { .. } | Pattern::Value(_) => self.matches_empty_text(pattern),
        }
    }

    /// Would feeding the empty string as text satisfy `pattern`?  Used for
    /// empty elements and empty attribute values.
    pub fn matches_empty_text(&self, pattern: &Pattern) -> bool {
        match pattern {
            Pattern::Empty | Pattern::Text => true,
            Pattern::NotAllowed => false,
            Pattern::Choice(a, b) => self.matches_empty_text(a) || self.matches_empty_text(b),
            Pattern::Group(a, b) | Pattern::Interleave(a, b) => {
                self.matches_empty_text(a) && self.matches_empty_text(b)
            }
            Pattern::OneOrMore(p) => self.matches_empty_text(p),
            // An empty string tokenizes to no tokens at all.
            Pattern::List(p) => self.nullable(p),
            Pattern::Attribute(_, _) | Pattern::Ref(_) => false,
            Pattern::Data { datatype, except } => {
                datatype.is_valid("")
                    && !except.as_ref().is_some_and(|e| self.matches_empty_text(e))
            }
            Pattern::Value(v) => v.is_valid(""),
        }
    }
}
