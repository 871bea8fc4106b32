//! Name classes and the set algebra over them.
//!
//! A name class is a predicate over expanded names `(namespace-uri, local)`.
//! Wildcard classes (`NsName`, `AnyName`) denote infinite sets; their
//! `except` clauses are restricted by RELAX NG so that an exception can only
//! remove a finite set of names from an `NsName`, which keeps intersection
//! and subtraction decidable.

use fnv::FnvHashSet;
use std::fmt;

/// Marker recorded by [`NameClass::namespaces`] when a class matches names in
/// any namespace.
pub const NS_ANY: &str = "*";
/// Marker recorded by [`NameClass::namespaces`] when a negated (except)
/// clause is present.
pub const NS_EXCEPT: &str = "::except";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NameClass {
    /// Matches one expanded name exactly.
    Name { ns: String, local: String },
    /// Union; trees of these represent arbitrary finite unions.
    NameChoice {
        a: Box<NameClass>,
        b: Box<NameClass>,
    },
    /// Any local name in `ns`, minus the exception.
    NsName {
        ns: String,
        except: Option<Box<NameClass>>,
    },
    /// Any expanded name, minus the exception.
    AnyName { except: Option<Box<NameClass>> },
}

impl NameClass {
    pub fn name(ns: impl Into<String>, local: impl Into<String>) -> NameClass {
        NameClass::Name {
            ns: ns.into(),
            local: local.into(),
        }
    }

    pub fn choice(a: NameClass, b: NameClass) -> NameClass {
        NameClass::NameChoice {
            a: Box::new(a),
            b: Box::new(b),
        }
    }

    /// Does this class match the expanded name `(ns, local)`?
    pub fn contains(&self, ns: &str, local: &str) -> bool {
        match self {
            NameClass::Name { ns: n, local: l } => n == ns && l == local,
            NameClass::NameChoice { a, b } => a.contains(ns, local) || b.contains(ns, local),
            NameClass::NsName { ns: n, except } => {
                n == ns && !except.as_ref().is_some_and(|e| e.contains(ns, local))
            }
            NameClass::AnyName { except } => {
                !except.as_ref().is_some_and(|e| e.contains(ns, local))
            }
        }
    }

    /// Like [`contains`](NameClass::contains), but true only when the match
    /// happens through a wildcard arm (`NsName`/`AnyName`).
    pub fn wildcard_match(&self, ns: &str, local: &str) -> bool {
        match self {
            NameClass::Name { .. } => false,
            NameClass::NameChoice { a, b } => {
                a.wildcard_match(ns, local) || b.wildcard_match(ns, local)
            }
            NameClass::NsName { .. } | NameClass::AnyName { .. } => self.contains(ns, local),
        }
    }

    /// The finite list of names this class matches, or `None` when the class
    /// is infinite (contains a wildcard arm).
    pub fn to_name_list(&self) -> Option<Vec<(String, String)>> {
        match self {
            NameClass::Name { ns, local } => Some(vec![(ns.clone(), local.clone())]),
            NameClass::NameChoice { a, b } => {
                let mut names = a.to_name_list()?;
                names.extend(b.to_name_list()?);
                Some(names)
            }
            NameClass::NsName { .. } | NameClass::AnyName { .. } => None,
        }
    }

    /// Record every namespace this class mentions into `out`.  `"*"` stands
    /// for "any namespace", `"::except"` for "a negation is present".
    pub fn namespaces(&self, out: &mut FnvHashSet<String>) {
        match self {
            NameClass::Name { ns, .. } => {
                out.insert(ns.clone());
            }
            NameClass::NameChoice { a, b } => {
                a.namespaces(out);
                b.namespaces(out);
            }
            NameClass::NsName { ns, except } => {
                out.insert(ns.clone());
                if except.is_some() {
                    out.insert(NS_EXCEPT.to_string());
                }
            }
            NameClass::AnyName { except } => {
                out.insert(NS_ANY.to_string());
                if except.is_some() {
                    out.insert(NS_EXCEPT.to_string());
                }
            }
        }
    }

    /// Do the two classes share at least one name?  Mirrors
    /// `intersection(..).is_some()` but short-circuits the cheap cases.
    pub fn intersects(&self, other: &NameClass) -> bool {
        match (self, other) {
            (NameClass::Name { ns, local }, _) => other.contains(ns, local),
            (_, NameClass::Name { ns, local }) => self.contains(ns, local),
            (NameClass::NameChoice { a, b }, _) => a.intersects(other) || b.intersects(other),
            (_, NameClass::NameChoice { a, b }) => self.intersects(a) || self.intersects(b),
            // Exceptions on an NsName remove only finitely many names from an
            // infinite set, so two NsNames intersect iff the namespaces agree.
            (NameClass::NsName { ns: n1, .. }, NameClass::NsName { ns: n2, .. }) => n1 == n2,
            // AnyName exceptions may contain whole-namespace wildcards, so
            // fall back on the full intersection.
            _ => self.intersection(other).is_some(),
        }
    }

    /// The class matching exactly the names matched by both operands, or
    /// `None` when that set is empty.
    pub fn intersection(&self, other: &NameClass) -> Option<NameClass> {
        match (self, other) {
            (NameClass::Name { ns, local }, _) => {
                if other.contains(ns, local) {
                    Some(self.clone())
                } else {
                    None
                }
            }
            (_, NameClass::Name { ns, local }) => {
                if self.contains(ns, local) {
                    Some(other.clone())
                } else {
                    None
                }
            }
            (NameClass::NameChoice { a, b }, _) => {
                combine_choice(a.intersection(other), b.intersection(other))
            }
            (_, NameClass::NameChoice { a, b }) => {
                combine_choice(self.intersection(a), self.intersection(b))
            }
            (
                NameClass::NsName { ns: n1, except: e1 },
                NameClass::NsName { ns: n2, except: e2 },
            ) => {
                if n1 != n2 {
                    return None;
                }
                // Exceptions union: both sides are finite Name sets.
                let except = merge_name_sets(e1.as_deref(), e2.as_deref());
                Some(NameClass::NsName {
                    ns: n1.clone(),
                    except: except.map(Box::new),
                })
            }
            (NameClass::AnyName { except }, _) => match except {
                None => Some(other.clone()),
                Some(e) => match e.intersection(other) {
                    None => Some(other.clone()),
                    Some(overlap) => other.subtract(&overlap),
                },
            },
            (_, NameClass::AnyName { .. }) => other.intersection(self),
        }
    }

    /// The class matching the names matched by `self` but not by `other`, or
    /// `None` when nothing remains.
    ///
    /// Defined for `other` in `{Name, NsName, NameChoice}` (the only classes
    /// RELAX NG allows inside `except` clauses); an `AnyName` operand is
    /// reduced through its exception.
    pub fn subtract(&self, other: &NameClass) -> Option<NameClass> {
        // Distribute over a choice operand: (x \ (a|b)) = (x \ a) \ b
        if let NameClass::NameChoice { a, b } = other {
            return self.subtract(a)?.subtract(b);
        }
        match (self, other) {
            (NameClass::Name { ns, local }, _) => {
                if other.contains(ns, local) {
                    None
                } else {
                    Some(self.clone())
                }
            }
            (NameClass::NameChoice { a, b }, _) => {
                combine_choice(a.subtract(other), b.subtract(other))
            }
            (NameClass::NsName { ns, except }, NameClass::Name { ns: ons, .. }) => {
                if ns != ons {
                    return Some(self.clone());
                }
                let except = merge_name_sets(except.as_deref(), Some(other));
                Some(NameClass::NsName {
                    ns: ns.clone(),
                    except: except.map(Box::new),
                })
            }
            (
                NameClass::NsName { ns, except },
                NameClass::NsName {
                    ns: ons,
                    except: oexcept,
                },
            ) => {
                if ns != ons {
                    return Some(self.clone());
                }
                match oexcept {
                    // The other side covers the whole namespace.
                    None => None,
                    // What remains is the other side's exception, minus ours.
                    Some(oe) => diff_name_sets(oe, except.as_deref()),
                }
            }
            (NameClass::NsName { .. }, NameClass::AnyName { except: oexcept }) => match oexcept {
                None => None,
                Some(oe) => self.intersection(oe),
            },
            // A choice operand was distributed above.
            (NameClass::NsName { .. }, NameClass::NameChoice { .. }) => unreachable!(),
            (NameClass::AnyName { except }, _) => {
                let except = match except {
                    None => other.clone(),
                    Some(e) => NameClass::choice((**e).clone(), other.clone()),
                };
                Some(NameClass::AnyName {
                    except: Some(Box::new(except)),
                })
            }
        }
    }

    /// One-line rendering used in diagnostics.
    pub fn describe(&self, out: &mut String) {
        match self {
            NameClass::Name { ns, local } => {
                if ns.is_empty() {
                    out.push_str(local);
                } else {
                    out.push('{');
                    out.push_str(ns);
                    out.push('}');
                    out.push_str(local);
                }
            }
            NameClass::NameChoice { a, b } => {
                a.describe(out);
                out.push('|');
                b.describe(out);
            }
            NameClass::NsName { ns, except } => {
                out.push('{');
                out.push_str(ns);
                out.push_str("}*");
                if let Some(except) = except {
                    out.push('-');
                    except.describe(out);
                }
            }
            NameClass::AnyName { except } => {
                out.push('*');
                if let Some(except) = except {
                    out.push('-');
                    except.describe(out);
                }
            }
        }
    }
}

impl fmt::Display for NameClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        self.describe(&mut s);
        f.write_str(&s)
    }
}

fn combine_choice(a: Option<NameClass>, b: Option<NameClass>) -> Option<NameClass> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x),
        (Some(a), Some(b)) => Some(NameClass::choice(a, b)),
    }
}

/// Union of two finite Name sets (choice trees of `Name`), deduplicated by
/// the `{ns}local` key, rebuilt as a left-leaning choice tree.
fn merge_name_sets(a: Option<&NameClass>, b: Option<&NameClass>) -> Option<NameClass> {
    let mut seen = FnvHashSet::default();
    let mut names = Vec::new();
    for set in [a, b].into_iter().flatten() {
        for (ns, local) in set
            .to_name_list()
            .expect("except clause of an nsName must be a finite name set")
        {
            if seen.insert(format!("{{{ns}}}{local}")) {
                names.push((ns, local));
            }
        }
    }
    build_name_choice(names)
}

/// Finite set difference `a \ b`, rebuilt as a choice tree.
fn diff_name_sets(a: &NameClass, b: Option<&NameClass>) -> Option<NameClass> {
    let exclude: FnvHashSet<String> = match b {
        None => FnvHashSet::default(),
        Some(b) => b
            .to_name_list()
            .expect("except clause of an nsName must be a finite name set")
            .into_iter()
            .map(|(ns, local)| format!("{{{ns}}}{local}"))
            .collect(),
    };
    let names: Vec<_> = a
        .to_name_list()
        .expect("except clause of an nsName must be a finite name set")
        .into_iter()
        .filter(|(ns, local)| !exclude.contains(&format!("{{{ns}}}{local}")))
        .collect();
    build_name_choice(names)
}

fn build_name_choice(names: Vec<(String, String)>) -> Option<NameClass> {
    let mut iter = names.into_iter();
    let first = iter.next()?;
    let mut result = NameClass::name(first.0, first.1);
    for (ns, local) in iter {
        result = NameClass::choice(result, NameClass::name(ns, local));
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nsname(ns: &str, except: Option<NameClass>) -> NameClass {
        NameClass::NsName {
            ns: ns.to_string(),
            except: except.map(Box::new),
        }
    }

    fn anyname(except: Option<NameClass>) -> NameClass {
        NameClass::AnyName {
            except: except.map(Box::new),
        }
    }

    #[test]
    fn name_contains() {
        let nc = NameClass::name("urn:x", "a");
        assert!(nc.contains("urn:x", "a"));
        assert!(!nc.contains("urn:x", "b"));
        assert!(!nc.contains("urn:y", "a"));
    }

    #[test]
    fn nsname_except() {
        let nc = nsname("urn:x", Some(NameClass::name("urn:x", "bad")));
        assert!(nc.contains("urn:x", "ok"));
        assert!(!nc.contains("urn:x", "bad"));
        assert!(!nc.contains("urn:y", "ok"));
        assert!(nc.wildcard_match("urn:x", "ok"));
        assert!(!NameClass::name("urn:x", "ok").wildcard_match("urn:x", "ok"));
    }

    #[test]
    fn intersection_agrees_with_contains() {
        // For a grid of classes and names, p∩q matches a name iff both match.
        let classes = vec![
            NameClass::name("", "a"),
            NameClass::name("urn:x", "a"),
            NameClass::choice(NameClass::name("urn:x", "a"), NameClass::name("urn:x", "b")),
            nsname("urn:x", None),
            nsname("urn:x", Some(NameClass::name("urn:x", "a"))),
            anyname(None),
            anyname(Some(NameClass::name("urn:x", "b"))),
            anyname(Some(nsname("urn:x", None))),
        ];
        let names = [("", "a"), ("urn:x", "a"), ("urn:x", "b"), ("urn:y", "c")];
        for p in &classes {
            for q in &classes {
                let i = p.intersection(q);
                for (ns, local) in names {
                    let expect = p.contains(ns, local) && q.contains(ns, local);
                    let got = i.as_ref().is_some_and(|i| i.contains(ns, local));
                    assert_eq!(
                        expect, got,
                        "p={p} q={q} name=({ns},{local}) intersection={i:?}"
                    );
                }
                // intersects agrees with a non-empty intersection over this
                // (finite-witness) grid as long as some witness exists.
                if names
                    .iter()
                    .any(|(ns, l)| p.contains(ns, l) && q.contains(ns, l))
                {
                    assert!(p.intersects(q), "p={p} q={q}");
                }
            }
        }
    }

    #[test]
    fn nsname_intersection_merges_exceptions() {
        let p = nsname("urn:x", Some(NameClass::name("urn:x", "a")));
        let q = nsname("urn:x", Some(NameClass::name("urn:x", "b")));
        let i = p.intersection(&q).unwrap();
        assert!(!i.contains("urn:x", "a"));
        assert!(!i.contains("urn:x", "b"));
        assert!(i.contains("urn:x", "c"));
    }

    #[test]
    fn nsname_intersection_dedups_exceptions() {
        let e = NameClass::name("urn:x", "a");
        let p = nsname("urn:x", Some(e.clone()));
        let q = nsname("urn:x", Some(e.clone()));
        let i = p.intersection(&q).unwrap();
        assert_eq!(i, nsname("urn:x", Some(e)));
    }

    #[test]
    fn subtract_name_from_nsname() {
        let p = nsname("urn:x", None);
        let r = p.subtract(&NameClass::name("urn:x", "a")).unwrap();
        assert!(!r.contains("urn:x", "a"));
        assert!(r.contains("urn:x", "b"));
        // Different namespace leaves the class untouched.
        let r2 = p.subtract(&NameClass::name("urn:y", "a")).unwrap();
        assert_eq!(r2, p);
    }

    #[test]
    fn subtract_nsname_absorbs() {
        let p = nsname("urn:x", Some(NameClass::name("urn:x", "a")));
        // urn:x:* with no exception covers everything p matches.
        assert_eq!(p.subtract(&nsname("urn:x", None)), None);
        // (urn:x:* - a) \ (urn:x:* - (a|b)) = {b}
        let q = nsname(
            "urn:x",
            Some(NameClass::choice(
                NameClass::name("urn:x", "a"),
                NameClass::name("urn:x", "b"),
            )),
        );
        assert_eq!(p.subtract(&q), Some(NameClass::name("urn:x", "b")));
    }

    #[test]
    fn subtract_is_inverse_of_union() {
        // (p - n) where n was unioned into the exception gives back p's gaps.
        let n = NameClass::name("urn:x", "a");
        let p = nsname("urn:x", None);
        let minus = p.subtract(&n).unwrap();
        assert!(p.contains("urn:x", "a"));
        assert!(!minus.contains("urn:x", "a"));
        for local in ["b", "c"] {
            assert_eq!(p.contains("urn:x", local), minus.contains("urn:x", local));
        }
    }

    #[test]
    fn anyname_intersection() {
        let any = anyname(Some(nsname("urn:x", None)));
        // AnyName minus the whole urn:x namespace shares nothing with it.
        assert_eq!(any.intersection(&nsname("urn:x", None)), None);
        assert!(!any.intersects(&nsname("urn:x", None)));
        // But the part of urn:y it keeps survives.
        let i = any.intersection(&nsname("urn:y", None)).unwrap();
        assert!(i.contains("urn:y", "q"));
        // AnyName ∩ AnyName unions the exceptions.
        let a1 = anyname(Some(NameClass::name("", "a")));
        let a2 = anyname(Some(NameClass::name("", "b")));
        let i = a1.intersection(&a2).unwrap();
        assert!(!i.contains("", "a"));
        assert!(!i.contains("", "b"));
        assert!(i.contains("", "c"));
    }

    #[test]
    fn to_name_list() {
        let nc = NameClass::choice(NameClass::name("", "a"), NameClass::name("urn:x", "b"));
        assert_eq!(
            nc.to_name_list(),
            Some(vec![
                ("".to_string(), "a".to_string()),
                ("urn:x".to_string(), "b".to_string())
            ])
        );
        assert_eq!(nsname("urn:x", None).to_name_list(), None);
    }

    #[test]
    fn namespace_markers() {
        let mut out = FnvHashSet::default();
        anyname(Some(NameClass::name("urn:x", "a"))).namespaces(&mut out);
        assert!(out.contains(NS_ANY));
        assert!(out.contains(NS_EXCEPT));
        let mut out = FnvHashSet::default();
        nsname("urn:x", None).namespaces(&mut out);
        assert_eq!(out.len(), 1);
        assert!(out.contains("urn:x"));
    }
}
