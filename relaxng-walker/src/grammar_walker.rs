//! The top-level walker driving a whole document.
//!
//! A stack of frames holds the live candidate walkers at each element
//! depth; `frames[0]` walks the grammar's start pattern.  The grammar
//! walker owns the whitespace policy, attribute-value swallowing after a
//! rejected attribute name, and misplaced-element recovery, so the
//! per-pattern walkers below it only ever see events they might accept.

use crate::error::ValidationError;
use crate::event::{Event, ExpandedName, ExpectedEvent, is_whitespace_str};
use crate::resolver::NameResolver;
use crate::walk::{Walker, new_walker};
use relaxng_grammar::{Define, Grammar};
use smallvec::SmallVec;
use tracing::trace;

type Frame<'g> = SmallVec<[Walker<'g>; 2]>;

#[derive(Clone)]
pub struct GrammarWalker<'g, R: NameResolver> {
    grammar: &'g Grammar,
    resolver: R,
    frames: Vec<Frame<'g>>,
    /// One buffered run of pure-whitespace text, not yet forwarded.
    suspended_ws: Option<String>,
    /// Set right after an `endTag`: whitespace that follows separates
    /// element-only siblings and is never significant.
    ignore_next_ws: bool,
    /// Discard exactly one `attributeValue` after a rejected
    /// `attributeName`.
    swallow_attribute_value: bool,
    /// Depth inside an unknown-element region ("dumb mode").
    misplaced_depth: u32,
}

struct Outcome<'g> {
    matched: bool,
    errors: Vec<ValidationError>,
    refs: Vec<&'g Define>,
}

impl<'g, R: NameResolver> GrammarWalker<'g, R> {
    pub fn new(grammar: &'g Grammar, resolver: R) -> GrammarWalker<'g, R> {
        assert!(grammar.is_linked(), "grammar must be linked before walking");
        let mut root = Frame::new();
        root.push(new_walker(grammar, &grammar.start));
        GrammarWalker {
            grammar,
            resolver,
            frames: vec![root],
            suspended_ws: None,
            ignore_next_ws: false,
            swallow_attribute_value: false,
            misplaced_depth: 0,
        }
    }

    pub fn grammar(&self) -> &'g Grammar {
        self.grammar
    }

    // --- name resolution, delegated to the pluggable resolver ---

    pub fn enter_context(&mut self) {
        self.resolver.enter_context();
    }

    pub fn leave_context(&mut self) {
        self.resolver.leave_context();
    }

    pub fn define_prefix(&mut self, prefix: &str, uri: &str) {
        self.resolver.define_prefix(prefix, uri);
    }

    pub fn resolve_name(&self, qname: &str, is_attribute: bool) -> Option<ExpandedName> {
        self.resolver.resolve_name(qname, is_attribute)
    }

    /// Feed one event; returns the errors it provoked (empty means the
    /// event was fine).
    pub fn fire_event(&mut self, event: &Event<'_>) -> Vec<ValidationError> {
        trace!(?event, depth = self.frames.len(), "fire");
        match *event {
            Event::Text { text } => self.handle_text(text),
            Event::EnterStartTag { ns, local } => self.handle_enter(ns, local),
            Event::AttributeName { .. } | Event::AttributeNameAndValue { .. } => {
                self.handle_attribute(event)
            }
            Event::AttributeValue { .. } => self.handle_attribute_value(event),
            Event::LeaveStartTag => self.handle_leave(),
            Event::EndTag { ns, local } => self.handle_end_tag(ns, local),
        }
    }

    /// Atomic whole-open-tag form: start tag, attributes, end of start tag.
    pub fn fire_start_tag_and_attributes(
        &mut self,
        ns: &str,
        local: &str,
        attributes: &[(String, String, String)],
    ) -> Vec<ValidationError> {
        let mut errors = self.fire_event(&Event::EnterStartTag { ns, local });
        for (ans, alocal, value) in attributes {
            errors.extend(self.fire_event(&Event::AttributeNameAndValue {
                ns: ans,
                local: alocal,
                value,
            }));
        }
        errors.extend(self.fire_event(&Event::LeaveStartTag));
        errors
    }

    fn handle_text(&mut self, text: &str) -> Vec<ValidationError> {
        if text.is_empty() {
            panic!("firing empty text events makes no sense");
        }
        if self.misplaced_depth > 0 {
            return vec![];
        }
        if is_whitespace_str(text) {
            if self.ignore_next_ws {
                self.ignore_next_ws = false;
                return vec![];
            }
            match &mut self.suspended_ws {
                Some(ws) => ws.push_str(text),
                None => self.suspended_ws = Some(text.to_string()),
            }
            return vec![];
        }
        self.ignore_next_ws = false;
        self.suspended_ws = None;
        let outcome = self.dispatch(&Event::Text { text });
        if outcome.matched {
            vec![]
        } else if outcome.errors.is_empty() {
            vec![ValidationError::text_not_allowed()]
        } else {
            outcome.errors
        }
    }

    fn handle_enter(&mut self, ns: &str, local: &str) -> Vec<ValidationError> {
        self.suspended_ws = None;
        self.ignore_next_ws = false;
        if self.misplaced_depth > 0 {
            self.misplaced_depth += 1;
            return vec![];
        }
        let outcome = self.dispatch(&Event::EnterStartTag { ns, local });
        if outcome.matched && !outcome.refs.is_empty() {
            self.push_frame(&outcome.refs);
            return vec![];
        }
        // Nothing accepted the tag: diagnose and recover.
        let name = ExpandedName::new(ns, local);
        let error = ValidationError::element_name("tag not allowed here", &name);
        let candidates = self.grammar.element_definitions(local);
        if candidates.len() == 1 {
            // A single plausible definition: continue as if it were meant.
            let define = self.grammar.define(candidates[0]);
            trace!(define = %define.name, "misplaced element, resuming with sole candidate");
            self.push_frame(&[define]);
        } else {
            // Ambiguous or unknown: swallow everything up to the matching
            // end tag.
            trace!(candidates = candidates.len(), "misplaced element, entering dumb mode");
            self.misplaced_depth = 1;
        }
        vec![error]
    }

    fn handle_attribute(&mut self, event: &Event<'_>) -> Vec<ValidationError> {
        if self.misplaced_depth > 0 {
            return vec![];
        }
        let outcome = self.dispatch(event);
        if outcome.matched {
            return vec![];
        }
        if !outcome.errors.is_empty() {
            return outcome.errors;
        }
        let (ns, local) = match *event {
            Event::AttributeName { ns, local } => (ns, local),
            Event::AttributeNameAndValue { ns, local, .. } => (ns, local),
            _ => unreachable!("handle_attribute is only called for attribute events"),
        };
        if matches!(event, Event::AttributeName { .. }) {
            // The paired value event is on its way; it explains nothing.
            self.swallow_attribute_value = true;
        }
        vec![ValidationError::AttributeName {
            msg: "attribute not allowed here",
            name: ExpandedName::new(ns, local).to_string(),
        }]
    }

    fn handle_attribute_value(&mut self, event: &Event<'_>) -> Vec<ValidationError> {
        if self.misplaced_depth > 0 {
            return vec![];
        }
        if self.swallow_attribute_value {
            self.swallow_attribute_value = false;
            return vec![];
        }
        let outcome = self.dispatch(event);
        if outcome.matched {
            vec![]
        } else if outcome.errors.is_empty() {
            vec![ValidationError::Generic(
                "attribute value required".to_string(),
            )]
        } else {
            outcome.errors
        }
    }

    fn handle_leave(&mut self) -> Vec<ValidationError> {
        if self.misplaced_depth > 0 {
            return vec![];
        }
        let outcome = self.dispatch(&Event::LeaveStartTag);
        if outcome.matched {
            vec![]
        } else {
            outcome.errors
        }
    }

    fn handle_end_tag(&mut self, _ns: &str, _local: &str) -> Vec<ValidationError> {
        if self.misplaced_depth > 0 {
            self.misplaced_depth -= 1;
            return vec![];
        }
        let mut errors = Vec::new();
        if let Some(ws) = self.suspended_ws.take()
            && !self.ignore_next_ws
        {
            // Text-sensitive content needs the buffered whitespace before
            // it can settle its obligations.
            let outcome = self.dispatch(&Event::Text { text: &ws });
            if !outcome.matched {
                errors.extend(outcome.errors);
            }
        }
        let frame = self.frames.last().expect("at least the root frame");
        let mut any_clean = false;
        let mut end_errors = Vec::new();
        for walker in frame {
            let e = walker.end(self.grammar);
            if e.is_empty() {
                any_clean = true;
            } else {
                for err in e {
                    if !end_errors.contains(&err) {
                        end_errors.push(err);
                    }
                }
            }
        }
        if !any_clean {
            errors.extend(end_errors);
        }
        // Never pop below the root frame, whatever the driver does.
        if self.frames.len() > 1 {
            self.frames.pop();
        }
        self.ignore_next_ws = true;
        errors
    }

    /// Fire `event` on every walker of the live frame, keep the branches
    /// that accepted it, and collect the element definitions to descend
    /// into.
    fn dispatch(&mut self, event: &Event<'_>) -> Outcome<'g> {
        let grammar = self.grammar;
        let frame = self.frames.last_mut().expect("at least the root frame");
        let mut matched = SmallVec::<[bool; 2]>::new();
        let mut any = false;
        let mut errors = Vec::new();
        let mut refs: Vec<&'g Define> = Vec::new();
        for walker in frame.iter_mut() {
            let r = walker.fire_event(grammar, event);
            if r.matched {
                any = true;
                for d in r.refs {
                    if !refs.iter().any(|x| std::ptr::eq(*x, d)) {
                        refs.push(d);
                    }
                }
            } else {
                for e in r.errors {
                    if !errors.contains(&e) {
                        errors.push(e);
                    }
                }
            }
            matched.push(r.matched);
        }
        if any {
            // Branches that rejected the event cannot describe this
            // document any more.
            let mut i = 0;
            frame.retain(|_| {
                let keep = matched[i];
                i += 1;
                keep
            });
            Outcome {
                matched: true,
                errors: vec![],
                refs,
            }
        } else {
            Outcome {
                matched: false,
                errors,
                refs: vec![],
            }
        }
    }

    fn push_frame(&mut self, defines: &[&'g Define]) {
        let frame: Frame<'g> = defines
            .iter()
            .map(|d| new_walker(self.grammar, &d.element.content))
            .collect();
        self.frames.push(frame);
    }

    /// True when the document may stop here: back at the root frame with a
    /// candidate that has no outstanding obligations.
    pub fn can_end(&self) -> bool {
        self.frames.len() == 1
            && self.frames[0]
                .iter()
                .any(|w| w.can_end(self.grammar))
    }

    /// Close the document, reporting whatever is still owed.
    pub fn end(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.frames.len() > 1 {
            errors.push(ValidationError::Generic(
                "document ended inside an element".to_string(),
            ));
        }
        let frame = self.frames.last().expect("at least the root frame");
        let mut any_clean = false;
        let mut end_errors = Vec::new();
        for walker in frame {
            let e = walker.end(self.grammar);
            if e.is_empty() {
                any_clean = true;
            } else {
                for err in e {
                    if !end_errors.contains(&err) {
                        end_errors.push(err);
                    }
                }
            }
        }
        if !any_clean {
            errors.extend(end_errors);
        }
        errors
    }

    /// Union of the events the live candidates would accept next.
    pub fn possible(&self) -> Vec<ExpectedEvent<'g>> {
        let mut out = Vec::new();
        let frame = self.frames.last().expect("at least the root frame");
        for walker in frame {
            for e in walker.possible(self.grammar) {
                if !out.contains(&e) {
                    out.push(e);
                }
            }
        }
        if self.frames.len() > 1 && frame.iter().any(|w| w.can_end(self.grammar)) {
            out.push(ExpectedEvent::EndTag);
        }
        out
    }

    pub fn possible_attributes(&self) -> Vec<ExpectedEvent<'g>> {
        let mut out = self.possible();
        out.retain(|e| {
            matches!(
                e,
                ExpectedEvent::AttributeName(_) | ExpectedEvent::AttributeValue(_)
            )
        });
        out
    }
}
