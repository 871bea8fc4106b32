//! Drives a [`GrammarWalker`] from an `xmlparser` token stream.
//!
//! The driver owns everything the walker core does not: namespace
//! declaration tracking, entity decoding, text buffering (character data
//! may arrive in pieces split by CDATA sections or character references),
//! and mapping errors back to source spans for diagnostics.

use crate::error::ValidationError;
use crate::event::Event;
use crate::grammar_walker::GrammarWalker;
use crate::resolver::DefaultNameResolver;
use lazy_static::lazy_static;
use relaxng_grammar::Grammar;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use xmlparser::{ElementEnd, EntityDefinition, StrSpan, Token, Tokenizer};

#[derive(Debug)]
pub enum DocErrorKind {
    Xml(xmlparser::Error),
    Validation(ValidationError),
    UndefinedNamespacePrefix(String),
    UndefinedEntity(String),
    InvalidOrUnclosedEntity,
}

impl fmt::Display for DocErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocErrorKind::Xml(e) => write!(f, "{e}"),
            DocErrorKind::Validation(e) => write!(f, "{e}"),
            DocErrorKind::UndefinedNamespacePrefix(p) => {
                write!(f, "the prefix {p:?} is not defined")
            }
            DocErrorKind::UndefinedEntity(name) => write!(f, "the entity &{name}; is not defined"),
            DocErrorKind::InvalidOrUnclosedEntity => {
                f.write_str("invalid or unclosed entity reference")
            }
        }
    }
}

#[derive(Debug)]
pub struct DocError {
    pub kind: DocErrorKind,
    pub span: Range<usize>,
}

struct PendingTag<'input> {
    prefix: StrSpan<'input>,
    local: StrSpan<'input>,
    span: Range<usize>,
    ns_decls: Vec<(String, String)>,
    attributes: Vec<PendingAttr<'input>>,
}

struct PendingAttr<'input> {
    prefix: StrSpan<'input>,
    local: StrSpan<'input>,
    value: String,
    span: Range<usize>,
}

pub struct Validator<'g, 'input> {
    walker: GrammarWalker<'g, DefaultNameResolver>,
    tokenizer: Tokenizer<'input>,
    open: Option<PendingTag<'input>>,
    /// Resolved names of open elements, for `endTag` events.
    names: Vec<(String, String)>,
    /// Character data accumulated until the next structural event.
    text_buffer: String,
    text_span: Range<usize>,
    entities: HashMap<String, String>,
    errors: Vec<DocError>,
}

lazy_static! {
    static ref PREDEFINED_ENTITIES: HashMap<String, String> = [
        ("lt", "<"),
        ("gt", ">"),
        ("amp", "&"),
        ("apos", "'"),
        ("quot", "\""),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
}

impl<'g, 'input> Validator<'g, 'input> {
    pub fn new(grammar: &'g Grammar, xml: &'input str) -> Validator<'g, 'input> {
        let entities = PREDEFINED_ENTITIES.clone();
        Validator {
            walker: GrammarWalker::new(grammar, DefaultNameResolver::new()),
            tokenizer: Tokenizer::from(xml),
            open: None,
            names: Vec::new(),
            text_buffer: String::new(),
            text_span: 0..0,
            entities,
            errors: Vec::new(),
        }
    }

    /// Consume the whole document and return every error found.
    pub fn run(mut self) -> Vec<DocError> {
        loop {
            match self.tokenizer.next() {
                Some(Ok(token)) => {
                    if !self.process(token) {
                        return self.errors;
                    }
                }
                Some(Err(e)) => {
                    // The error's own position carries the location.
                    self.errors.push(DocError {
                        kind: DocErrorKind::Xml(e),
                        span: 0..0,
                    });
                    return self.errors;
                }
                None => break,
            }
        }
        let end = self.text_span.end;
        for error in self.walker.end() {
            self.errors.push(DocError {
                kind: DocErrorKind::Validation(error),
                span: end..end,
            });
        }
        self.errors
    }

    /// Handle one token; false aborts the run (unrecoverable input).
    fn process(&mut self, token: Token<'input>) -> bool {
        match token {
            Token::Declaration { .. }
            | Token::DtdStart { .. }
            | Token::DtdEnd { .. }
            | Token::EmptyDtd { .. } => true,
            // Comments and PIs may split text content ("x<?pi?>y" is the
            // single text node "xy"); the buffer carries across them.
            Token::Comment { .. } | Token::ProcessingInstruction { .. } => true,
            Token::EntityDeclaration {
                name, definition, ..
            } => {
                match definition {
                    EntityDefinition::EntityValue(value) => {
                        self.entities
                            .insert(name.as_str().to_string(), value.as_str().to_string());
                    }
                    EntityDefinition::ExternalId(_) => {
                        // External entities are not resolved.
                        let span = name.range();
                        self.errors.push(DocError {
                            kind: DocErrorKind::UndefinedEntity(name.as_str().to_string()),
                            span,
                        });
                    }
                }
                true
            }
            Token::ElementStart {
                prefix,
                local,
                span,
            } => {
                self.flush_text();
                self.open = Some(PendingTag {
                    prefix,
                    local,
                    span: span.range(),
                    ns_decls: Vec::new(),
                    attributes: Vec::new(),
                });
                true
            }
            Token::Attribute {
                prefix,
                local,
                value,
                span,
            } => {
                let decoded = match self.decode(value.as_str(), value.start()) {
                    Some(v) => v,
                    None => return true,
                };
                let open = self.open.as_mut().expect("attribute outside a start tag");
                if prefix.as_str() == "xmlns" {
                    open.ns_decls.push((local.as_str().to_string(), decoded));
                } else if prefix.as_str().is_empty() && local.as_str() == "xmlns" {
                    open.ns_decls.push((String::new(), decoded));
                } else {
                    open.attributes.push(PendingAttr {
                        prefix,
                        local,
                        value: decoded,
                        span: span.range(),
                    });
                }
                true
            }
            Token::ElementEnd { end, span } => match end {
                ElementEnd::Open => {
                    self.open_tag();
                    true
                }
                ElementEnd::Empty => {
                    let (ns, local) = self.open_tag();
                    self.names.pop();
                    self.close_tag(&ns, &local, span.range());
                    true
                }
                ElementEnd::Close(_, _) => {
                    self.flush_text();
                    let (ns, local) = self.names.pop().unwrap_or_default();
                    self.close_tag(&ns, &local, span.range());
                    true
                }
            },
            Token::Text { text } => {
                if let Some(decoded) = self.decode(text.as_str(), text.start()) {
                    self.buffer_text(&decoded, text.range());
                }
                true
            }
            Token::Cdata { text, .. } => {
                let piece = text.as_str().to_string();
                self.buffer_text(&piece, text.range());
                true
            }
        }
    }

    fn buffer_text(&mut self, piece: &str, span: Range<usize>) {
        if self.text_buffer.is_empty() {
            self.text_span = span;
        } else {
            self.text_span.end = span.end;
        }
        self.text_buffer.push_str(piece);
    }

    fn flush_text(&mut self) {
        if self.text_buffer.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text_buffer);
        let span = self.text_span.clone();
        self.fire(&Event::Text { text: &text }, span);
    }

    /// Deliver the pending start tag: context, namespace declarations, the
    /// enter event, attributes, and the end of the start tag.
    fn open_tag(&mut self) -> (String, String) {
        let pending = self.open.take().expect("open_tag without ElementStart");
        self.walker.enter_context();
        for (prefix, uri) in &pending.ns_decls {
            self.walker.define_prefix(prefix, uri);
        }
        let name = self.resolve(pending.prefix, pending.local, false, &pending.span);
        let (ns, local) = name;
        self.fire(
            &Event::EnterStartTag {
                ns: &ns,
                local: &local,
            },
            pending.span.clone(),
        );
        for attr in &pending.attributes {
            let (ans, alocal) = self.resolve(attr.prefix, attr.local, true, &attr.span);
            self.fire(
                &Event::AttributeName {
                    ns: &ans,
                    local: &alocal,
                },
                attr.span.clone(),
            );
            self.fire(
                &Event::AttributeValue { value: &attr.value },
                attr.span.clone(),
            );
        }
        self.fire(&Event::LeaveStartTag, pending.span.clone());
        self.names.push((ns.clone(), local.clone()));
        (ns, local)
    }

    fn close_tag(&mut self, ns: &str, local: &str, span: Range<usize>) {
        self.fire(&Event::EndTag { ns, local }, span);
        self.walker.leave_context();
    }

    fn resolve(
        &mut self,
        prefix: StrSpan<'input>,
        local: StrSpan<'input>,
        is_attribute: bool,
        span: &Range<usize>,
    ) -> (String, String) {
        let qname = if prefix.as_str().is_empty() {
            local.as_str().to_string()
        } else {
            format!("{}:{}", prefix.as_str(), local.as_str())
        };
        match self.walker.resolve_name(&qname, is_attribute) {
            Some(name) => (name.ns, name.local),
            None => {
                self.errors.push(DocError {
                    kind: DocErrorKind::UndefinedNamespacePrefix(prefix.as_str().to_string()),
                    span: span.clone(),
                });
                (String::new(), local.as_str().to_string())
            }
        }
    }

    fn fire(&mut self, event: &Event<'_>, span: Range<usize>) {
        for error in self.walker.fire_event(event) {
            self.errors.push(DocError {
                kind: DocErrorKind::Validation(error),
                span: span.clone(),
            });
        }
    }

    /// Resolve character and entity references; `None` means the text was
    /// unusable and an error has been recorded.
    fn decode(&mut self, text: &str, pos: usize) -> Option<String> {
        if !text.contains('&') {
            return Some(text.to_string());
        }
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        let mut offset = 0;
        while let Some(amp) = rest.find('&') {
            out.push_str(&rest[..amp]);
            let after = &rest[amp + 1..];
            let semi = match after.find(';') {
                Some(i) => i,
                None => {
                    self.errors.push(DocError {
                        kind: DocErrorKind::InvalidOrUnclosedEntity,
                        span: pos + offset + amp..pos + offset + amp + 1,
                    });
                    return None;
                }
            };
            let entity = &after[..semi];
            if let Some(num) = entity.strip_prefix('#') {
                let code = if let Some(hex) = num.strip_prefix('x') {
                    u32::from_str_radix(hex, 16).ok()
                } else {
                    num.parse().ok()
                };
                match code.and_then(std::char::from_u32) {
                    Some(c) => out.push(c),
                    None => {
                        self.errors.push(DocError {
                            kind: DocErrorKind::InvalidOrUnclosedEntity,
                            span: pos + offset + amp..pos + offset + amp + semi + 2,
                        });
                        return None;
                    }
                }
            } else {
                match self.entities.get(entity) {
                    Some(value) => out.push_str(value),
                    None => {
                        self.errors.push(DocError {
                            kind: DocErrorKind::UndefinedEntity(entity.to_string()),
                            span: pos + offset + amp..pos + offset + amp + semi + 2,
                        });
                        return None;
                    }
                }
            }
            offset += amp + semi + 2;
            rest = &rest[amp + semi + 2..];
        }
        out.push_str(rest);
        Some(out)
    }
}

/// Validate `xml` against `grammar`, collecting every error with its span.
pub fn validate_str(grammar: &Grammar, xml: &str) -> Vec<DocError> {
    Validator::new(grammar, xml).run()
}

/// Render an error against the document source for terminal display.
pub fn diagnostic(
    name: String,
    source: String,
    err: &DocError,
) -> (codemap::CodeMap, Vec<codemap_diagnostic::Diagnostic>) {
    let mut map = codemap::CodeMap::new();
    let file = map.add_file(name, source);
    let span = file
        .span
        .subspan(err.span.start as u64, err.span.end as u64);
    let label = codemap_diagnostic::SpanLabel {
        span,
        label: Some("not allowed".to_string()),
        style: codemap_diagnostic::SpanStyle::Primary,
    };
    let diagnostics = vec![codemap_diagnostic::Diagnostic {
        level: codemap_diagnostic::Level::Error,
        message: format!("{}", err.kind),
        code: None,
        spans: vec![label],
    }];
    (map, diagnostics)
}
