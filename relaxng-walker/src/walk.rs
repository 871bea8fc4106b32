//! Per-pattern walkers.
//!
//! A walker is the incremental state of matching one pattern against the
//! event stream.  Each pattern variant has a walker variant holding a
//! borrow of its pattern data plus its own progress; walkers are deep
//! clones of owned state over shared `&'g` pattern borrows, so cloning one
//! candidate branch never disturbs another.
//!
//! `fire_event` is the single transition function.  A result with
//! `matched` and a non-empty `refs` list means the event opened an element
//! and the grammar walker should descend into the listed definitions.

use crate::error::ValidationError;
use crate::event::{Event, ExpectedEvent, is_whitespace_str};
use relaxng_grammar::datatype::{Datatype, Datatypes, DatatypeValues};
use relaxng_grammar::{Define, Grammar, NameClass, Pattern};

#[derive(Debug, Default)]
pub struct FireResult<'g> {
    pub matched: bool,
    pub errors: Vec<ValidationError>,
    /// Element definitions to descend into (start-tag events only).
    pub refs: Vec<&'g Define>,
}

impl<'g> FireResult<'g> {
    pub fn matched() -> FireResult<'g> {
        FireResult {
            matched: true,
            errors: Vec::new(),
            refs: Vec::new(),
        }
    }

    pub fn matched_refs(refs: Vec<&'g Define>) -> FireResult<'g> {
        FireResult {
            matched: true,
            errors: Vec::new(),
            refs,
        }
    }

    /// A rejection with no explanation of its own; the caller supplies
    /// context.
    pub fn rejected() -> FireResult<'g> {
        FireResult::default()
    }

    pub fn rejected_with(errors: Vec<ValidationError>) -> FireResult<'g> {
        FireResult {
            matched: false,
            errors,
            refs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Walker<'g> {
    Empty,
    Text,
    /// Stateless and constant; every clone is the same value.
    NotAllowed,
    Value(ValueWalker<'g>),
    Data(DataWalker<'g>),
    List(ListWalker<'g>),
    Attribute(AttributeWalker<'g>),
    Ref(RefWalker<'g>),
    Choice(ChoiceWalker<'g>),
    Group(GroupWalker<'g>),
    Interleave(InterleaveWalker<'g>),
    OneOrMore(OneOrMoreWalker<'g>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueWalker<'g> {
    value: &'g DatatypeValues,
    matched: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataWalker<'g> {
    datatype: &'g Datatypes,
    except: Option<&'g Pattern>,
    matched: bool,
    nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListWalker<'g> {
    pat: &'g Pattern,
    matched: bool,
    nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeWalker<'g> {
    name: &'g NameClass,
    content: &'g Pattern,
    seen_name: bool,
    done: bool,
}

#[derive(Debug, Clone)]
pub struct RefWalker<'g> {
    define: &'g Define,
    started: bool,
}

// Branch dedup compares refs by identity; the definitions are immutable
// and shared, so pointer equality is enough.
impl PartialEq for RefWalker<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.define, other.define) && self.started == other.started
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceWalker<'g> {
    a: Option<Box<Walker<'g>>>,
    b: Option<Box<Walker<'g>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupWalker<'g> {
    /// Live alternative states.  An event both operands could own forks
    /// the state; later events prune the readings that turn out wrong.
    branches: Vec<GroupBranch<'g>>,
}

#[derive(Debug, Clone, PartialEq)]
struct GroupBranch<'g> {
    a: Box<Walker<'g>>,
    b: Box<Walker<'g>>,
    /// Set once a content event has committed this branch past `a`.
    a_done: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterleaveWalker<'g> {
    branches: Vec<InterleaveBranch<'g>>,
}

#[derive(Debug, Clone, PartialEq)]
struct InterleaveBranch<'g> {
    a: Box<Walker<'g>>,
    b: Box<Walker<'g>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OneOrMoreWalker<'g> {
    pat: &'g Pattern,
    current: Box<Walker<'g>>,
}

pub fn new_walker<'g>(g: &'g Grammar, pat: &'g Pattern) -> Walker<'g> {
    match pat {
        Pattern::Empty => Walker::Empty,
        Pattern::Text => Walker::Text,
        Pattern::NotAllowed => Walker::NotAllowed,
        Pattern::Value(v) => Walker::Value(ValueWalker {
            value: v,
            matched: false,
        }),
        Pattern::Data { datatype, except } => Walker::Data(DataWalker {
            datatype,
            except: except.as_deref(),
            matched: false,
            nullable: g.matches_empty_text(pat),
        }),
        Pattern::List(p) => Walker::List(ListWalker {
            pat: p,
            matched: false,
            nullable: g.nullable(p),
        }),
        Pattern::Attribute(name, content) => Walker::Attribute(AttributeWalker {
            name,
            content,
            seen_name: false,
            done: false,
        }),
        Pattern::Ref(r) => Walker::Ref(RefWalker {
            define: g.resolve(r),
            started: false,
        }),
        Pattern::Choice(a, b) => Walker::Choice(ChoiceWalker {
            a: Some(Box::new(new_walker(g, a))),
            b: Some(Box::new(new_walker(g, b))),
        }),
        Pattern::Group(a, b) => Walker::Group(GroupWalker {
            branches: vec![GroupBranch {
                a: Box::new(new_walker(g, a)),
                b: Box::new(new_walker(g, b)),
                a_done: false,
            }],
        }),
        Pattern::Interleave(a, b) => Walker::Interleave(InterleaveWalker {
            branches: vec![InterleaveBranch {
                a: Box::new(new_walker(g, a)),
                b: Box::new(new_walker(g, b)),
            }],
        }),
        Pattern::OneOrMore(p) => Walker::OneOrMore(OneOrMoreWalker {
            pat: p,
            current: Box::new(new_walker(g, p)),
        }),
    }
}

fn merge_refs<'g>(dst: &mut Vec<&'g Define>, src: Vec<&'g Define>) {
    for r in src {
        if !dst.iter().any(|x| std::ptr::eq(*x, r)) {
            dst.push(r);
        }
    }
}

fn merge_errors(dst: &mut Vec<ValidationError>, src: Vec<ValidationError>) {
    for e in src {
        if !dst.contains(&e) {
            dst.push(e);
        }
    }
}

fn push_branch<T: PartialEq>(branches: &mut Vec<T>, branch: T) {
    if !branches.contains(&branch) {
        branches.push(branch);
    }
}

/// Would feeding `text` (alone) satisfy `pat`?  Used for attribute values,
/// list tokens and `data/except` checks.
pub(crate) fn text_satisfies(g: &Grammar, pat: &Pattern, text: &str) -> bool {
    if text.is_empty() {
        return g.matches_empty_text(pat);
    }
    let mut w = new_walker(g, pat);
    let r = w.fire_event(g, &Event::Text { text });
    r.matched && w.end(g).is_empty()
}

impl<'g> Walker<'g> {
    pub fn fire_event(&mut self, g: &'g Grammar, event: &Event<'_>) -> FireResult<'g> {
        match self {
            Walker::Empty => match event {
                // Pure whitespace is ignored, not consumed as content.
                Event::Text { text } if is_whitespace_str(text) => FireResult::matched(),
                Event::Text { .. } => {
                    FireResult::rejected_with(vec![ValidationError::text_not_allowed()])
                }
                Event::LeaveStartTag => FireResult::matched(),
                _ => FireResult::rejected(),
            },
            Walker::Text => match event {
                Event::Text { .. } | Event::LeaveStartTag => FireResult::matched(),
                _ => FireResult::rejected(),
            },
            Walker::NotAllowed => FireResult::rejected(),
            Walker::Value(w) => w.fire_event(g, event),
            Walker::Data(w) => w.fire_event(g, event),
            Walker::List(w) => w.fire_event(g, event),
            Walker::Attribute(w) => w.fire_event(g, event),
            Walker::Ref(w) => w.fire_event(event),
            Walker::Choice(w) => w.fire_event(g, event),
            Walker::Group(w) => w.fire_event(g, event),
            Walker::Interleave(w) => w.fire_event(g, event),
            Walker::OneOrMore(w) => w.fire_event(g, event),
        }
    }

    /// May this walker terminate here with no further content events?
    pub fn can_end(&self, g: &Grammar) -> bool {
        match self {
            Walker::Empty | Walker::Text | Walker::NotAllowed => true,
            Walker::Value(w) => w.matched || w.value.is_valid(""),
            Walker::Data(w) => w.matched || w.nullable,
            Walker::List(w) => w.matched || w.nullable,
            Walker::Attribute(w) => w.done,
            Walker::Ref(w) => w.started,
            Walker::Choice(w) => w.active().any(|c| c.can_end(g)),
            Walker::Group(w) => w
                .branches
                .iter()
                .any(|br| (br.a_done || br.a.can_end(g)) && br.b.can_end(g)),
            Walker::Interleave(w) => w
                .branches
                .iter()
                .any(|br| br.a.can_end(g) && br.b.can_end(g)),
            Walker::OneOrMore(w) => w.current.can_end(g),
        }
    }

    /// Like [`can_end`](Walker::can_end), restricted to attribute-phase
    /// obligations.
    pub fn can_end_attribute(&self, g: &Grammar) -> bool {
        match self {
            Walker::Attribute(w) => w.done,
            Walker::Choice(w) => w.active().any(|c| c.can_end_attribute(g)),
            Walker::Group(w) => w.branches.iter().any(|br| {
                (br.a_done || br.a.can_end_attribute(g)) && br.b.can_end_attribute(g)
            }),
            Walker::Interleave(w) => w
                .branches
                .iter()
                .any(|br| br.a.can_end_attribute(g) && br.b.can_end_attribute(g)),
            Walker::OneOrMore(w) => w.current.can_end_attribute(g),
            _ => true,
        }
    }

    /// Assert that no more events arrive at this level; report outstanding
    /// obligations.
    pub fn end(&self, g: &Grammar) -> Vec<ValidationError> {
        match self {
            Walker::Empty | Walker::Text | Walker::NotAllowed => vec![],
            Walker::Value(w) => {
                if w.matched || w.value.is_valid("") {
                    vec![]
                } else {
                    vec![ValidationError::Generic(format!(
                        "expected value {:?}",
                        w.value.value()
                    ))]
                }
            }
            Walker::Data(w) => {
                if w.matched || w.nullable {
                    vec![]
                } else {
                    vec![ValidationError::Generic(format!(
                        "expected a {} value",
                        w.datatype.type_name()
                    ))]
                }
            }
            Walker::List(w) => {
                if w.matched || w.nullable {
                    vec![]
                } else {
                    vec![ValidationError::Generic("expected a token list".to_string())]
                }
            }
            Walker::Attribute(w) => w.end(),
            Walker::Ref(w) => w.end(),
            Walker::Choice(w) => {
                let ends: Vec<Vec<ValidationError>> =
                    w.active().map(|c| c.end(g)).collect();
                if ends.iter().any(|e| e.is_empty()) {
                    vec![]
                } else {
                    let mut iter = ends.into_iter();
                    let a = iter.next().unwrap_or_default();
                    let b = iter.next().unwrap_or_default();
                    ValidationError::choice(a, b)
                }
            }
            Walker::Group(w) => {
                let mut all = Vec::new();
                for br in &w.branches {
                    let mut errors = if br.a_done { vec![] } else { br.a.end(g) };
                    errors.extend(br.b.end(g));
                    if errors.is_empty() {
                        return vec![];
                    }
                    merge_errors(&mut all, errors);
                }
                all
            }
            Walker::Interleave(w) => {
                let mut all = Vec::new();
                for br in &w.branches {
                    let mut errors = br.a.end(g);
                    errors.extend(br.b.end(g));
                    if errors.is_empty() {
                        return vec![];
                    }
                    merge_errors(&mut all, errors);
                }
                all
            }
            Walker::OneOrMore(w) => w.current.end(g),
        }
    }

    /// Attribute-phase obligations only.
    pub fn end_attributes(&self, g: &Grammar) -> Vec<ValidationError> {
        match self {
            Walker::Attribute(w) => w.end(),
            Walker::Choice(w) => {
                let ends: Vec<Vec<ValidationError>> =
                    w.active().map(|c| c.end_attributes(g)).collect();
                if ends.iter().any(|e| e.is_empty()) {
                    vec![]
                } else {
                    let mut iter = ends.into_iter();
                    let a = iter.next().unwrap_or_default();
                    let b = iter.next().unwrap_or_default();
                    ValidationError::choice(a, b)
                }
            }
            Walker::Group(w) => {
                let mut all = Vec::new();
                for br in &w.branches {
                    let mut errors = if br.a_done {
                        vec![]
                    } else {
                        br.a.end_attributes(g)
                    };
                    errors.extend(br.b.end_attributes(g));
                    if errors.is_empty() {
                        return vec![];
                    }
                    merge_errors(&mut all, errors);
                }
                all
            }
            Walker::Interleave(w) => {
                let mut all = Vec::new();
                for br in &w.branches {
                    let mut errors = br.a.end_attributes(g);
                    errors.extend(br.b.end_attributes(g));
                    if errors.is_empty() {
                        return vec![];
                    }
                    merge_errors(&mut all, errors);
                }
                all
            }
            Walker::OneOrMore(w) => w.current.end_attributes(g),
            _ => vec![],
        }
    }

    /// The set of events `fire_event` would accept next.
    pub fn possible(&self, g: &'g Grammar) -> Vec<ExpectedEvent<'g>> {
        let mut out = Vec::new();
        self.collect_possible(g, &mut out);
        out
    }

    pub fn possible_attributes(&self, g: &'g Grammar) -> Vec<ExpectedEvent<'g>> {
        let mut out = self.possible(g);
        out.retain(|e| {
            matches!(
                e,
                ExpectedEvent::AttributeName(_) | ExpectedEvent::AttributeValue(_)
            )
        });
        out
    }

    fn collect_possible(&self, g: &'g Grammar, out: &mut Vec<ExpectedEvent<'g>>) {
        fn push<'g>(out: &mut Vec<ExpectedEvent<'g>>, e: ExpectedEvent<'g>) {
            if !out.contains(&e) {
                out.push(e);
            }
        }
        match self {
            Walker::Empty | Walker::NotAllowed => {}
            Walker::Text => push(out, ExpectedEvent::Text),
            Walker::Value(w) => {
                if !w.matched {
                    push(out, ExpectedEvent::Text);
                }
            }
            Walker::Data(w) => {
                if !w.matched {
                    push(out, ExpectedEvent::Text);
                }
            }
            Walker::List(w) => {
                if !w.matched {
                    push(out, ExpectedEvent::Text);
                }
            }
            Walker::Attribute(w) => {
                if !w.seen_name && !w.done {
                    push(out, ExpectedEvent::AttributeName(w.name));
                } else if !w.done {
                    push(out, ExpectedEvent::AttributeValue(describe_pattern(w.content)));
                }
            }
            Walker::Ref(w) => {
                if !w.started {
                    push(out, ExpectedEvent::EnterStartTag(&w.define.element.name));
                }
            }
            Walker::Choice(w) => {
                for c in w.active() {
                    c.collect_possible(g, out);
                }
            }
            Walker::Group(w) => {
                for br in &w.branches {
                    if !br.a_done {
                        br.a.collect_possible(g, out);
                    }
                    if br.a_done || br.a.can_end(g) {
                        br.b.collect_possible(g, out);
                    } else {
                        // Attribute order is free within a group.
                        for e in br.b.possible_attributes(g) {
                            push(out, e);
                        }
                    }
                }
            }
            Walker::Interleave(w) => {
                for br in &w.branches {
                    br.a.collect_possible(g, out);
                    br.b.collect_possible(g, out);
                }
            }
            Walker::OneOrMore(w) => {
                w.current.collect_possible(g, out);
                if w.current.can_end(g) {
                    new_walker(g, w.pat).collect_possible(g, out);
                }
            }
        }
    }
}

fn describe_pattern(pat: &Pattern) -> String {
    match pat {
        Pattern::Text => "text".to_string(),
        Pattern::Value(v) => format!("{:?}", v.value()),
        Pattern::Data { datatype, .. } => format!("of type {}", datatype.type_name()),
        Pattern::List(_) => "token list".to_string(),
        _ => "value".to_string(),
    }
}

impl<'g> ValueWalker<'g> {
    fn fire_event(&mut self, _g: &Grammar, event: &Event<'_>) -> FireResult<'g> {
        match event {
            Event::Text { text } => {
                if !self.matched && self.value.is_valid(text) {
                    self.matched = true;
                    FireResult::matched()
                } else {
                    FireResult::rejected_with(vec![ValidationError::Generic(format!(
                        "expected value {:?}",
                        self.value.value()
                    ))])
                }
            }
            Event::LeaveStartTag => FireResult::matched(),
            _ => FireResult::rejected(),
        }
    }
}

impl<'g> DataWalker<'g> {
    fn fire_event(&mut self, g: &Grammar, event: &Event<'_>) -> FireResult<'g> {
        match event {
            Event::Text { text } => {
                let excluded = self
                    .except
                    .is_some_and(|except| text_satisfies(g, except, text));
                if !self.matched && self.datatype.is_valid(text) && !excluded {
                    self.matched = true;
                    FireResult::matched()
                } else {
                    FireResult::rejected_with(vec![ValidationError::Generic(format!(
                        "invalid value {:?} for type {}",
                        text,
                        self.datatype.type_name()
                    ))])
                }
            }
            Event::LeaveStartTag => FireResult::matched(),
            _ => FireResult::rejected(),
        }
    }
}

impl<'g> ListWalker<'g> {
    fn fire_event(&mut self, g: &Grammar, event: &Event<'_>) -> FireResult<'g> {
        match event {
            Event::Text { text } => {
                if self.matched {
                    return FireResult::rejected();
                }
                // Split on whitespace and re-fire each token as its own
                // synthetic text event against the item pattern.
                let mut w = new_walker(g, self.pat);
                for token in text.split_whitespace() {
                    let r = w.fire_event(g, &Event::Text { text: token });
                    if !r.matched {
                        return FireResult::rejected_with(vec![ValidationError::Generic(
                            format!("invalid list token {token:?}"),
                        )]);
                    }
                }
                let outstanding = w.end(g);
                if outstanding.is_empty() {
                    self.matched = true;
                    FireResult::matched()
                } else {
                    FireResult::rejected_with(outstanding)
                }
            }
            Event::LeaveStartTag => FireResult::matched(),
            _ => FireResult::rejected(),
        }
    }
}

impl<'g> AttributeWalker<'g> {
    fn fire_event(&mut self, g: &Grammar, event: &Event<'_>) -> FireResult<'g> {
        match event {
            Event::AttributeName { ns, local } => {
                if !self.done && !self.seen_name && self.name.contains(ns, local) {
                    self.seen_name = true;
                    FireResult::matched()
                } else {
                    FireResult::rejected()
                }
            }
            Event::AttributeValue { value } => {
                if !self.seen_name || self.done {
                    return FireResult::rejected();
                }
                // The obligation is discharged either way; a bad value is
                // reported but validation moves on.
                self.done = true;
                if text_satisfies(g, self.content, value) {
                    FireResult::matched()
                } else {
                    FireResult::rejected_with(vec![ValidationError::AttributeValue {
                        name: self.name.to_string(),
                        value: value.to_string(),
                    }])
                }
            }
            Event::AttributeNameAndValue { ns, local, value } => {
                if self.done || !self.name.contains(ns, local) {
                    return FireResult::rejected();
                }
                self.done = true;
                self.seen_name = true;
                if text_satisfies(g, self.content, value) {
                    FireResult::matched()
                } else {
                    FireResult::rejected_with(vec![ValidationError::AttributeValue {
                        name: self.name.to_string(),
                        value: value.to_string(),
                    }])
                }
            }
            Event::LeaveStartTag => {
                if self.done {
                    FireResult::matched()
                } else {
                    FireResult::rejected_with(self.end())
                }
            }
            _ => FireResult::rejected(),
        }
    }

    fn end(&self) -> Vec<ValidationError> {
        if self.done {
            vec![]
        } else {
            vec![ValidationError::AttributeName {
                msg: "required attribute missing",
                name: self.name.to_string(),
            }]
        }
    }
}

impl<'g> RefWalker<'g> {
    fn fire_event(&mut self, event: &Event<'_>) -> FireResult<'g> {
        match event {
            Event::EnterStartTag { ns, local } => {
                if !self.started && self.define.element.name.contains(ns, local) {
                    // Spent after a single acceptance; the content is
                    // matched by a fresh frame in the grammar walker.
                    self.started = true;
                    FireResult::matched_refs(vec![self.define])
                } else {
                    FireResult::rejected()
                }
            }
            // Inter-element whitespace is ignored here, not consumed.
            Event::Text { text } if is_whitespace_str(text) => FireResult::matched(),
            Event::LeaveStartTag => FireResult::matched(),
            _ => FireResult::rejected(),
        }
    }

    fn end(&self) -> Vec<ValidationError> {
        if self.started {
            vec![]
        } else {
            vec![ValidationError::ElementName {
                msg: "tag required",
                name: self.define.element.name.to_string(),
            }]
        }
    }
}

impl<'g> ChoiceWalker<'g> {
    fn active(&self) -> impl Iterator<Item = &Walker<'g>> {
        self.a.as_deref().into_iter().chain(self.b.as_deref())
    }

    fn fire_event(&mut self, g: &'g Grammar, event: &Event<'_>) -> FireResult<'g> {
        let ra = self.a.as_mut().map(|w| w.fire_event(g, event));
        let rb = self.b.as_mut().map(|w| w.fire_event(g, event));
        let a_matched = ra.as_ref().is_some_and(|r| r.matched);
        let b_matched = rb.as_ref().is_some_and(|r| r.matched);
        match (a_matched, b_matched) {
            (false, false) => {
                let a_errors = ra.map(|r| r.errors).unwrap_or_default();
                let b_errors = rb.map(|r| r.errors).unwrap_or_default();
                FireResult::rejected_with(ValidationError::choice(a_errors, b_errors))
            }
            (true, false) => {
                // The other branch can no longer describe this content.
                self.b = None;
                FireResult::matched_refs(ra.expect("a fired").refs)
            }
            (false, true) => {
                self.a = None;
                FireResult::matched_refs(rb.expect("b fired").refs)
            }
            (true, true) => {
                let mut refs = ra.expect("a fired").refs;
                merge_refs(&mut refs, rb.expect("b fired").refs);
                FireResult::matched_refs(refs)
            }
        }
    }
}

impl<'g> GroupWalker<'g> {
    fn fire_event(&mut self, g: &'g Grammar, event: &Event<'_>) -> FireResult<'g> {
        let mut next: Vec<GroupBranch<'g>> = Vec::new();
        let mut refs: Vec<&'g Define> = Vec::new();
        let mut errors: Vec<ValidationError> = Vec::new();
        for branch in &self.branches {
            if let Event::LeaveStartTag = event {
                // The end of the start tag settles every operand's
                // attribute obligations at once.
                let mut candidate = branch.clone();
                let ra = if candidate.a_done {
                    FireResult::matched()
                } else {
                    candidate.a.fire_event(g, event)
                };
                let rb = candidate.b.fire_event(g, event);
                if ra.matched && rb.matched {
                    push_branch(&mut next, candidate);
                } else {
                    merge_errors(&mut errors, ra.errors);
                    merge_errors(&mut errors, rb.errors);
                }
                continue;
            }
            if event.is_attribute_event() {
                // Attribute order is free: either operand may own the
                // attribute, and doing so commits nothing.
                if !branch.a_done {
                    let mut candidate = branch.clone();
                    let r = candidate.a.fire_event(g, event);
                    if r.matched {
                        merge_refs(&mut refs, r.refs);
                        push_branch(&mut next, candidate);
                    } else {
                        merge_errors(&mut errors, r.errors);
                    }
                }
                let mut candidate = branch.clone();
                let r = candidate.b.fire_event(g, event);
                if r.matched {
                    merge_refs(&mut refs, r.refs);
                    push_branch(&mut next, candidate);
                } else {
                    merge_errors(&mut errors, r.errors);
                }
                continue;
            }
            if branch.a_done {
                let mut candidate = branch.clone();
                let r = candidate.b.fire_event(g, event);
                if r.matched {
                    merge_refs(&mut refs, r.refs);
                    push_branch(&mut next, candidate);
                } else {
                    merge_errors(&mut errors, r.errors);
                }
                continue;
            }
            // The event may extend `a`, or it may be the first event of
            // `b` with `a` complete.  Both readings stay live until later
            // events prune one.
            let may_advance = branch.a.can_end(g);
            let mut candidate = branch.clone();
            let ra = candidate.a.fire_event(g, event);
            if ra.matched {
                merge_refs(&mut refs, ra.refs);
                push_branch(&mut next, candidate);
            } else {
                merge_errors(&mut errors, ra.errors);
            }
            if may_advance {
                let mut candidate = branch.clone();
                let rb = candidate.b.fire_event(g, event);
                if rb.matched {
                    candidate.a_done = true;
                    merge_refs(&mut refs, rb.refs);
                    push_branch(&mut next, candidate);
                } else {
                    merge_errors(&mut errors, rb.errors);
                }
            }
        }
        if next.is_empty() {
            FireResult::rejected_with(errors)
        } else {
            self.branches = next;
            FireResult::matched_refs(refs)
        }
    }
}

impl<'g> InterleaveWalker<'g> {
    fn fire_event(&mut self, g: &'g Grammar, event: &Event<'_>) -> FireResult<'g> {
        let mut next: Vec<InterleaveBranch<'g>> = Vec::new();
        let mut refs: Vec<&'g Define> = Vec::new();
        let mut errors: Vec<ValidationError> = Vec::new();
        for branch in &self.branches {
            if let Event::LeaveStartTag = event {
                let mut candidate = branch.clone();
                let ra = candidate.a.fire_event(g, event);
                let rb = candidate.b.fire_event(g, event);
                if ra.matched && rb.matched {
                    push_branch(&mut next, candidate);
                } else {
                    merge_errors(&mut errors, ra.errors);
                    merge_errors(&mut errors, rb.errors);
                }
                continue;
            }
            // Order is free: either side may own the event, and both
            // readings stay live until later events prune one.
            let mut candidate = branch.clone();
            let ra = candidate.a.fire_event(g, event);
            if ra.matched {
                merge_refs(&mut refs, ra.refs);
                push_branch(&mut next, candidate);
            } else {
                merge_errors(&mut errors, ra.errors);
            }
            let mut candidate = branch.clone();
            let rb = candidate.b.fire_event(g, event);
            if rb.matched {
                merge_refs(&mut refs, rb.refs);
                push_branch(&mut next, candidate);
            } else {
                merge_errors(&mut errors, rb.errors);
            }
        }
        if next.is_empty() {
            FireResult::rejected_with(errors)
        } else {
            self.branches = next;
            FireResult::matched_refs(refs)
        }
    }
}

impl<'g> OneOrMoreWalker<'g> {
    fn fire_event(&mut self, g: &'g Grammar, event: &Event<'_>) -> FireResult<'g> {
        let r = self.current.fire_event(g, event);
        if r.matched {
            return r;
        }
        if self.current.can_end(g) {
            // The live iteration is complete; spawn the next one lazily and
            // offer it the event.
            let mut fresh = new_walker(g, self.pat);
            let r2 = fresh.fire_event(g, event);
            if r2.matched {
                self.current = Box::new(fresh);
                return r2;
            }
            let mut errors = r.errors;
            merge_errors(&mut errors, r2.errors);
            return FireResult::rejected_with(errors);
        }
        FireResult::rejected_with(r.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaxng_grammar::pattern::{Define as GDefine, ElementPat, RefPattern};

    fn grammar(start: Pattern, defines: Vec<(&str, &str, Pattern)>) -> Grammar {
        let defines = defines
            .into_iter()
            .map(|(name, local, content)| GDefine {
                name: name.to_string(),
                element: ElementPat {
                    name: NameClass::name("", local),
                    content,
                },
            })
            .collect();
        let mut g = Grammar::new(start, defines);
        g.link().unwrap();
        g
    }

    fn text<'a>(t: &'a str) -> Event<'a> {
        Event::Text { text: t }
    }

    #[test]
    fn empty_ignores_whitespace() {
        let g = grammar(Pattern::Empty, vec![]);
        let mut w = new_walker(&g, &g.start);
        assert!(w.fire_event(&g, &text("  \n")).matched);
        assert!(!w.fire_event(&g, &text("x")).matched);
        assert!(w.can_end(&g));
    }

    #[test]
    fn value_walker_matches_once() {
        let g = grammar(
            Pattern::Value(DatatypeValues::from_type("", "token", "go", "").unwrap()),
            vec![],
        );
        let mut w = new_walker(&g, &g.start);
        assert!(!w.can_end(&g));
        assert!(w.fire_event(&g, &text(" go ")).matched);
        assert!(w.can_end(&g));
        assert!(w.end(&g).is_empty());
    }

    #[test]
    fn data_except_subtracts() {
        let g = grammar(
            Pattern::Data {
                datatype: Datatypes::Token,
                except: Some(Box::new(Pattern::Value(
                    DatatypeValues::from_type("", "token", "forbidden", "").unwrap(),
                ))),
            },
            vec![],
        );
        let mut w = new_walker(&g, &g.start);
        assert!(!w.fire_event(&g, &text("forbidden")).matched);
        assert!(w.fire_event(&g, &text("fine")).matched);
    }

    #[test]
    fn list_splits_tokens() {
        // list { "one", "two" }
        let g = grammar(
            Pattern::List(Box::new(Pattern::Group(
                Box::new(Pattern::Value(
                    DatatypeValues::from_type("", "token", "one", "").unwrap(),
                )),
                Box::new(Pattern::Value(
                    DatatypeValues::from_type("", "token", "two", "").unwrap(),
                )),
            ))),
            vec![],
        );
        let mut w = new_walker(&g, &g.start);
        assert!(w.fire_event(&g, &text(" one\ttwo ")).matched);
        assert!(w.end(&g).is_empty());

        let mut w = new_walker(&g, &g.start);
        assert!(!w.fire_event(&g, &text("one")).matched);
        let mut w = new_walker(&g, &g.start);
        assert!(!w.fire_event(&g, &text("one three")).matched);
    }

    #[test]
    fn attribute_walker_phases() {
        let g = grammar(
            Pattern::Attribute(NameClass::name("", "x"), Box::new(Pattern::Text)),
            vec![],
        );
        let mut w = new_walker(&g, &g.start);
        assert!(!w.can_end_attribute(&g));
        assert!(
            w.fire_event(&g, &Event::AttributeName { ns: "", local: "x" })
                .matched
        );
        assert!(
            w.fire_event(&g, &Event::AttributeValue { value: "v" })
                .matched
        );
        assert!(w.can_end_attribute(&g));
        assert!(w.fire_event(&g, &Event::LeaveStartTag).matched);

        // A second attribute of the same name is rejected.
        let r = w.fire_event(&g, &Event::AttributeName { ns: "", local: "x" });
        assert!(!r.matched);
    }

    #[test]
    fn missing_attribute_reported_at_leave() {
        let g = grammar(
            Pattern::Attribute(NameClass::name("", "x"), Box::new(Pattern::Text)),
            vec![],
        );
        let mut w = new_walker(&g, &g.start);
        let r = w.fire_event(&g, &Event::LeaveStartTag);
        assert!(!r.matched);
        assert!(matches!(
            r.errors[0],
            ValidationError::AttributeName {
                msg: "required attribute missing",
                ..
            }
        ));
    }

    #[test]
    fn ref_walker_is_spent_after_one_acceptance() {
        let g = grammar(
            Pattern::Ref(RefPattern::new("e")),
            vec![("e", "e", Pattern::Empty)],
        );
        let mut w = new_walker(&g, &g.start);
        assert!(!w.can_end(&g));
        let r = w.fire_event(&g, &Event::EnterStartTag { ns: "", local: "e" });
        assert!(r.matched);
        assert_eq!(r.refs.len(), 1);
        assert!(w.can_end(&g));
        let r = w.fire_event(&g, &Event::EnterStartTag { ns: "", local: "e" });
        assert!(!r.matched);
    }

    #[test]
    fn choice_discards_dead_branch() {
        let g = grammar(
            Pattern::Choice(
                Box::new(Pattern::Ref(RefPattern::new("b"))),
                Box::new(Pattern::Ref(RefPattern::new("c"))),
            ),
            vec![("b", "b", Pattern::Empty), ("c", "c", Pattern::Empty)],
        );
        let mut w = new_walker(&g, &g.start);
        let r = w.fire_event(&g, &Event::EnterStartTag { ns: "", local: "c" });
        assert!(r.matched);
        assert_eq!(r.refs.len(), 1);
        assert_eq!(r.refs[0].name, "c");
        // The b branch is gone; only c's obligations remain, and they are
        // satisfied.
        assert!(w.end(&g).is_empty());
    }

    #[test]
    fn group_orders_content_but_not_attributes() {
        let attr = |local: &str| {
            Pattern::Attribute(NameClass::name("", local), Box::new(Pattern::Text))
        };
        let g = grammar(Pattern::Group(Box::new(attr("a")), Box::new(attr("b"))), vec![]);
        let mut w = new_walker(&g, &g.start);
        // b before a is fine for attributes.
        assert!(
            w.fire_event(
                &g,
                &Event::AttributeNameAndValue {
                    ns: "",
                    local: "b",
                    value: "1"
                }
            )
            .matched
        );
        assert!(
            w.fire_event(
                &g,
                &Event::AttributeNameAndValue {
                    ns: "",
                    local: "a",
                    value: "2"
                }
            )
            .matched
        );
        assert!(w.fire_event(&g, &Event::LeaveStartTag).matched);
    }

    #[test]
    fn group_advances_when_first_operand_can_end() {
        // group(text, element b): a start tag moves past the text.
        let g = grammar(
            Pattern::Group(
                Box::new(Pattern::Text),
                Box::new(Pattern::Ref(RefPattern::new("b"))),
            ),
            vec![("b", "b", Pattern::Empty)],
        );
        let mut w = new_walker(&g, &g.start);
        assert!(w.fire_event(&g, &text("foo ")).matched);
        let r = w.fire_event(&g, &Event::EnterStartTag { ns: "", local: "b" });
        assert!(r.matched);
        assert_eq!(r.refs.len(), 1);
        assert!(w.can_end(&g));
    }

    #[test]
    fn interleave_accepts_either_order() {
        let g = grammar(
            Pattern::Interleave(
                Box::new(Pattern::Ref(RefPattern::new("b"))),
                Box::new(Pattern::Ref(RefPattern::new("c"))),
            ),
            vec![("b", "b", Pattern::Empty), ("c", "c", Pattern::Empty)],
        );
        for order in [["b", "c"], ["c", "b"]] {
            let mut w = new_walker(&g, &g.start);
            for local in order {
                let r = w.fire_event(&g, &Event::EnterStartTag { ns: "", local });
                assert!(r.matched, "order {order:?}, tag {local}");
            }
            assert!(w.can_end(&g));
        }
    }

    #[test]
    fn one_or_more_spawns_iterations() {
        let g = grammar(
            Pattern::OneOrMore(Box::new(Pattern::Ref(RefPattern::new("b")))),
            vec![("b", "b", Pattern::Empty)],
        );
        let mut w = new_walker(&g, &g.start);
        assert!(!w.can_end(&g));
        for _ in 0..3 {
            let r = w.fire_event(&g, &Event::EnterStartTag { ns: "", local: "b" });
            assert!(r.matched);
        }
        assert!(w.can_end(&g));
        assert!(!w.fire_event(&g, &Event::EnterStartTag { ns: "", local: "c" }).matched);
    }

    #[test]
    fn group_forks_between_iteration_and_successor() {
        // group(oneOrMore(ref a), ref a): the second element may extend the
        // repetition or satisfy the trailing operand; only later events can
        // tell.  Two elements is the minimal match.
        let g = grammar(
            Pattern::Group(
                Box::new(Pattern::OneOrMore(Box::new(Pattern::Ref(RefPattern::new(
                    "a",
                ))))),
                Box::new(Pattern::Ref(RefPattern::new("a"))),
            ),
            vec![("a", "a", Pattern::Empty)],
        );
        let mut w = new_walker(&g, &g.start);
        for _ in 0..2 {
            let r = w.fire_event(&g, &Event::EnterStartTag { ns: "", local: "a" });
            assert!(r.matched);
        }
        assert!(w.can_end(&g));
        assert!(w.end(&g).is_empty());

        // One element leaves the mandatory trailing operand unsatisfied.
        let mut w = new_walker(&g, &g.start);
        assert!(
            w.fire_event(&g, &Event::EnterStartTag { ns: "", local: "a" })
                .matched
        );
        assert!(!w.can_end(&g));
        assert!(!w.end(&g).is_empty());

        // With three, the repetition absorbs the extra one.
        let mut w = new_walker(&g, &g.start);
        for _ in 0..3 {
            assert!(
                w.fire_event(&g, &Event::EnterStartTag { ns: "", local: "a" })
                    .matched
            );
        }
        assert!(w.can_end(&g));
        assert!(w.end(&g).is_empty());
    }

    #[test]
    fn interleave_forks_between_overlapping_operands() {
        let g = grammar(
            Pattern::Interleave(
                Box::new(Pattern::OneOrMore(Box::new(Pattern::Ref(RefPattern::new(
                    "a",
                ))))),
                Box::new(Pattern::Ref(RefPattern::new("a"))),
            ),
            vec![("a", "a", Pattern::Empty)],
        );
        let mut w = new_walker(&g, &g.start);
        assert!(
            w.fire_event(&g, &Event::EnterStartTag { ns: "", local: "a" })
                .matched
        );
        assert!(!w.can_end(&g));
        assert!(
            w.fire_event(&g, &Event::EnterStartTag { ns: "", local: "a" })
                .matched
        );
        assert!(w.can_end(&g));
        assert!(w.end(&g).is_empty());
    }

    #[test]
    fn clone_isolation() {
        let g = grammar(
            Pattern::OneOrMore(Box::new(Pattern::Ref(RefPattern::new("b")))),
            vec![("b", "b", Pattern::Empty)],
        );
        let mut w = new_walker(&g, &g.start);
        let snapshot = w.clone();
        let mut clone = w.clone();
        assert!(
            clone
                .fire_event(&g, &Event::EnterStartTag { ns: "", local: "b" })
                .matched
        );
        // The original is untouched by driving the clone.
        assert!(!w.can_end(&g));
        assert_eq!(format!("{snapshot:?}"), format!("{w:?}"));
        // And a second clone behaves like the first did.
        let mut clone2 = w.clone();
        assert!(
            clone2
                .fire_event(&g, &Event::EnterStartTag { ns: "", local: "b" })
                .matched
        );
        assert!(clone2.can_end(&g));
    }

    #[test]
    fn nullable_agrees_with_fresh_can_end() {
        let patterns = vec![
            Pattern::Empty,
            Pattern::Text,
            Pattern::NotAllowed,
            Pattern::Ref(RefPattern::new("b")),
            Pattern::Choice(
                Box::new(Pattern::Ref(RefPattern::new("b"))),
                Box::new(Pattern::Empty),
            ),
            Pattern::OneOrMore(Box::new(Pattern::Text)),
            Pattern::Attribute(NameClass::name("", "x"), Box::new(Pattern::Text)),
            Pattern::Data {
                datatype: Datatypes::Token,
                except: None,
            },
            Pattern::Value(DatatypeValues::from_type("", "token", "x", "").unwrap()),
            Pattern::List(Box::new(Pattern::Text)),
        ];
        for pat in patterns {
            let g = grammar(pat, vec![("b", "b", Pattern::Empty)]);
            let w = new_walker(&g, &g.start);
            assert_eq!(
                g.nullable(&g.start),
                w.can_end(&g),
                "nullable/can_end disagree for {:?}",
                g.start
            );
        }
    }

    #[test]
    fn possible_reports_expectations() {
        let g = grammar(
            Pattern::Group(
                Box::new(Pattern::Attribute(
                    NameClass::name("", "x"),
                    Box::new(Pattern::Text),
                )),
                Box::new(Pattern::Ref(RefPattern::new("b"))),
            ),
            vec![("b", "b", Pattern::Empty)],
        );
        let mut w = new_walker(&g, &g.start);
        let possible = w.possible(&g);
        assert!(
            possible
                .iter()
                .any(|e| matches!(e, ExpectedEvent::AttributeName(_)))
        );
        // The required attribute gates the element content.
        assert!(
            !possible
                .iter()
                .any(|e| matches!(e, ExpectedEvent::EnterStartTag(_)))
        );
        let attrs = w.possible_attributes(&g);
        assert!(
            attrs
                .iter()
                .all(|e| matches!(e, ExpectedEvent::AttributeName(_)))
        );
        // Once the attribute is satisfied the element becomes possible.
        assert!(
            w.fire_event(
                &g,
                &Event::AttributeNameAndValue {
                    ns: "",
                    local: "x",
                    value: "1"
                }
            )
            .matched
        );
        assert!(
            w.possible(&g)
                .iter()
                .any(|e| matches!(e, ExpectedEvent::EnterStartTag(_)))
        );
    }
}
