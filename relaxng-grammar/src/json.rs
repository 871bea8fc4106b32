//! JSON representation of a compiled grammar.
//!
//! Every pattern object carries a `"pattern"` discriminator; name classes
//! are identified by shape (`{ns,name}` for a single name, `{a,b}` for a
//! choice, `{ns}` for a namespace wildcard) except `AnyName`, which needs an
//! explicit discriminator.  `read_grammar_json` re-links the grammar, so the
//! round-trip yields a grammar structurally equal to the input.

use crate::datatype::{Datatypes, DatatypeValues, StrFacets};
use crate::nameclass::NameClass;
use crate::pattern::{Define, ElementPat, Grammar, Pattern, RefPattern};
use serde_json::{Map, Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GrammarJsonError {
    #[error("expected {expected} at {path}")]
    Expected { expected: &'static str, path: String },
    #[error("unknown pattern kind {kind:?} at {path}")]
    UnknownKind { kind: String, path: String },
    #[error("bad datatype in JSON: {0}")]
    Datatype(#[from] crate::datatype::DatatypeError),
    #[error(transparent)]
    Link(#[from] crate::pattern::UnresolvedRef),
}

pub fn write_grammar_json(grammar: &Grammar) -> Value {
    let defines: Vec<Value> = grammar
        .defines
        .iter()
        .map(|d| {
            json!({
                "name": d.name,
                "element": {
                    "pattern": "Element",
                    "name": write_name_class(&d.element.name),
                    "content": write_pattern(&d.element.content),
                },
            })
        })
        .collect();
    json!({
        "pattern": "Grammar",
        "start": write_pattern(&grammar.start),
        "defines": defines,
    })
}

pub fn read_grammar_json(value: &Value) -> Result<Grammar, GrammarJsonError> {
    let obj = as_object(value, "top-level grammar object", "$")?;
    expect_kind(obj, "Grammar", "$")?;
    let start = read_pattern(field(obj, "start", "$")?, "$.start")?;
    let defines_val = field(obj, "defines", "$")?;
    let defines_arr = defines_val
        .as_array()
        .ok_or_else(|| expected("defines array", "$.defines"))?;
    let mut defines = Vec::with_capacity(defines_arr.len());
    for (i, d) in defines_arr.iter().enumerate() {
        let path = format!("$.defines[{i}]");
        let d = as_object(d, "define object", &path)?;
        let name = string_field(d, "name", &path)?;
        let element = as_object(field(d, "element", &path)?, "element object", &path)?;
        expect_kind(element, "Element", &path)?;
        let name_class = read_name_class(field(element, "name", &path)?, &path)?;
        let content = read_pattern(field(element, "content", &path)?, &path)?;
        defines.push(Define {
            name,
            element: ElementPat {
                name: name_class,
                content,
            },
        });
    }
    let mut grammar = Grammar::new(start, defines);
    grammar.link()?;
    Ok(grammar)
}

fn write_pattern(pattern: &Pattern) -> Value {
    match pattern {
        Pattern::Empty => json!({"pattern": "Empty"}),
        Pattern::NotAllowed => json!({"pattern": "NotAllowed"}),
        Pattern::Text => json!({"pattern": "Text"}),
        Pattern::Choice(a, b) => {
            json!({"pattern": "Choice", "a": write_pattern(a), "b": write_pattern(b)})
        }
        Pattern::Group(a, b) => {
            json!({"pattern": "Group", "a": write_pattern(a), "b": write_pattern(b)})
        }
        Pattern::Interleave(a, b) => {
            json!({"pattern": "Interleave", "a": write_pattern(a), "b": write_pattern(b)})
        }
        Pattern::OneOrMore(p) => json!({"pattern": "OneOrMore", "p": write_pattern(p)}),
        Pattern::List(p) => json!({"pattern": "List", "p": write_pattern(p)}),
        Pattern::Attribute(nc, p) => json!({
            "pattern": "Attribute",
            "name": write_name_class(nc),
            "content": write_pattern(p),
        }),
        Pattern::Data { datatype, except } => {
            let mut obj = Map::new();
            obj.insert("pattern".into(), "Data".into());
            obj.insert("type".into(), datatype.type_name().into());
            obj.insert("library".into(), datatype.library().into());
            let params = write_facets(datatype.facets());
            if !params.is_empty() {
                obj.insert("params".into(), Value::Object(params));
            }
            if let Some(except) = except {
                obj.insert("except".into(), write_pattern(except));
            }
            Value::Object(obj)
        }
        Pattern::Value(v) => json!({
            "pattern": "Value",
            "type": v.type_name(),
            "value": v.value(),
            "ns": v.ns(),
        }),
        Pattern::Ref(r) => json!({"pattern": "Ref", "name": r.name}),
    }
}

fn write_facets(facets: &StrFacets) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(l) = facets.length {
        params.insert("length".into(), l.to_string().into());
    }
    if let Some(l) = facets.min_length {
        params.insert("minLength".into(), l.to_string().into());
    }
    if let Some(l) = facets.max_length {
        params.insert("maxLength".into(), l.to_string().into());
    }
    if let Some(p) = &facets.pattern {
        params.insert("pattern".into(), p.source().into());
    }
    params
}

fn write_name_class(nc: &NameClass) -> Value {
    match nc {
        NameClass::Name { ns, local } => json!({"ns": ns, "name": local}),
        NameClass::NameChoice { a, b } => {
            json!({"a": write_name_class(a), "b": write_name_class(b)})
        }
        NameClass::NsName { ns, except } => {
            let mut obj = Map::new();
            obj.insert("ns".into(), ns.as_str().into());
            if let Some(except) = except {
                obj.insert("except".into(), write_name_class(except));
            }
            Value::Object(obj)
        }
        NameClass::AnyName { except } => {
            let mut obj = Map::new();
            obj.insert("pattern".into(), "AnyName".into());
            if let Some(except) = except {
                obj.insert("except".into(), write_name_class(except));
            }
            Value::Object(obj)
        }
    }
}

fn read_pattern(value: &Value, path: &str) -> Result<Pattern, GrammarJsonError> {
    let obj = as_object(value, "pattern object", path)?;
    let kind = string_field(obj, "pattern", path)?;
    let sub = |name: &'static str| -> Result<Pattern, GrammarJsonError> {
        read_pattern(field(obj, name, path)?, &format!("{path}.{name}"))
    };
    match kind.as_str() {
        "Empty" => Ok(Pattern::Empty),
        "NotAllowed" => Ok(Pattern::NotAllowed),
        "Text" => Ok(Pattern::Text),
        "Choice" => Ok(Pattern::Choice(Box::new(sub("a")?), Box::new(sub("b")?))),
        "Group" => Ok(Pattern::Group(Box::new(sub("a")?), Box::new(sub("b")?))),
        "Interleave" => Ok(Pattern::Interleave(
            Box::new(sub("a")?),
            Box::new(sub("b")?),
        )),
        "OneOrMore" => Ok(Pattern::OneOrMore(Box::new(sub("p")?))),
        "List" => Ok(Pattern::List(Box::new(sub("p")?))),
        "Attribute" => {
            let nc = read_name_class(field(obj, "name", path)?, path)?;
            Ok(Pattern::Attribute(nc, Box::new(sub("content")?)))
        }
        "Data" => {
            let type_name = string_field(obj, "type", path)?;
            let library = string_field(obj, "library", path)?;
            let mut params = Vec::new();
            if let Some(p) = obj.get("params") {
                let p = as_object(p, "params object", path)?;
                for (k, v) in p {
                    let v = v
                        .as_str()
                        .ok_or_else(|| expected("string param value", path))?;
                    params.push((k.clone(), v.to_string()));
                }
            }
            let datatype = Datatypes::from_params(&library, &type_name, &params)?;
            let except = match obj.get("except") {
                Some(e) => Some(Box::new(read_pattern(e, &format!("{path}.except"))?)),
                None => None,
            };
            Ok(Pattern::Data { datatype, except })
        }
        "Value" => {
            let type_name = string_field(obj, "type", path)?;
            let value = string_field(obj, "value", path)?;
            let ns = string_field(obj, "ns", path)?;
            Ok(Pattern::Value(DatatypeValues::from_type(
                "", &type_name, &value, &ns,
            )?))
        }
        "Ref" => Ok(Pattern::Ref(RefPattern::new(string_field(
            obj, "name", path,
        )?))),
        other => Err(GrammarJsonError::UnknownKind {
            kind: other.to_string(),
            path: path.to_string(),
        }),
    }
}

fn read_name_class(value: &Value, path: &str) -> Result<NameClass, GrammarJsonError> {
    let obj = as_object(value, "name-class object", path)?;
    let except = match obj.get("except") {
        Some(e) => Some(Box::new(read_name_class(e, &format!("{path}.except"))?)),
        None => None,
    };
    if obj.get("pattern").and_then(Value::as_str) == Some("AnyName") {
        return Ok(NameClass::AnyName { except });
    }
    if obj.contains_key("a") || obj.contains_key("b") {
        let a = read_name_class(field(obj, "a", path)?, &format!("{path}.a"))?;
        let b = read_name_class(field(obj, "b", path)?, &format!("{path}.b"))?;
        return Ok(NameClass::choice(a, b));
    }
    let ns = string_field(obj, "ns", path)?;
    if obj.contains_key("name") {
        Ok(NameClass::Name {
            ns,
            local: string_field(obj, "name", path)?,
        })
    } else {
        Ok(NameClass::NsName { ns, except })
    }
}

fn as_object<'v>(
    value: &'v Value,
    expected_what: &'static str,
    path: &str,
) -> Result<&'v Map<String, Value>, GrammarJsonError> {
    value
        .as_object()
        .ok_or_else(|| expected(expected_what, path))
}

fn field<'v>(
    obj: &'v Map<String, Value>,
    name: &'static str,
    path: &str,
) -> Result<&'v Value, GrammarJsonError> {
    obj.get(name).ok_or_else(|| expected(name, path))
}

fn string_field(
    obj: &Map<String, Value>,
    name: &'static str,
    path: &str,
) -> Result<String, GrammarJsonError> {
    Ok(field(obj, name, path)?
        .as_str()
        .ok_or_else(|| expected(name, path))?
        .to_string())
}

fn expect_kind(
    obj: &Map<String, Value>,
    kind: &'static str,
    path: &str,
) -> Result<(), GrammarJsonError> {
    if obj.get("pattern").and_then(Value::as_str) == Some(kind) {
        Ok(())
    } else {
        Err(expected(kind, path))
    }
}

fn expected(expected: &'static str, path: &str) -> GrammarJsonError {
    GrammarJsonError::Expected {
        expected,
        path: path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Datatypes;

    fn sample() -> Grammar {
        let content = Pattern::Group(
            Box::new(Pattern::Attribute(
                NameClass::name("", "x"),
                Box::new(Pattern::Data {
                    datatype: Datatypes::from_params(
                        crate::datatype::XSD_NAMESPACE_URI,
                        "token",
                        &[("maxLength".to_string(), "4".to_string())],
                    )
                    .unwrap(),
                    except: Some(Box::new(Pattern::Value(
                        DatatypeValues::from_type("", "token", "no", "").unwrap(),
                    ))),
                }),
            )),
            Box::new(Pattern::Choice(
                Box::new(Pattern::Ref(RefPattern::new("b"))),
                Box::new(Pattern::Empty),
            )),
        );
        let defines = vec![
            Define {
                name: "a".to_string(),
                element: ElementPat {
                    name: NameClass::name("urn:x", "a"),
                    content,
                },
            },
            Define {
                name: "b".to_string(),
                element: ElementPat {
                    name: NameClass::NsName {
                        ns: "urn:x".to_string(),
                        except: Some(Box::new(NameClass::name("urn:x", "bad"))),
                    },
                    content: Pattern::Interleave(
                        Box::new(Pattern::Text),
                        Box::new(Pattern::OneOrMore(Box::new(Pattern::List(Box::new(
                            Pattern::Text,
                        ))))),
                    ),
                },
            },
        ];
        let mut g = Grammar::new(Pattern::Ref(RefPattern::new("a")), defines);
        g.link().unwrap();
        g
    }

    #[test]
    fn round_trip() {
        let g = sample();
        let v = write_grammar_json(&g);
        let back = read_grammar_json(&v).unwrap();
        assert_eq!(g, back);
        // And the JSON itself is stable under a second pass.
        assert_eq!(v, write_grammar_json(&back));
    }

    #[test]
    fn name_class_shapes() {
        let v = write_name_class(&NameClass::name("urn:x", "a"));
        assert_eq!(v, json!({"ns": "urn:x", "name": "a"}));
        let v = write_name_class(&NameClass::NsName {
            ns: "urn:x".to_string(),
            except: None,
        });
        assert_eq!(v, json!({"ns": "urn:x"}));
        let v = write_name_class(&NameClass::AnyName { except: None });
        assert_eq!(v, json!({"pattern": "AnyName"}));
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = read_pattern(&json!({"pattern": "Frob"}), "$").unwrap_err();
        assert!(matches!(err, GrammarJsonError::UnknownKind { .. }));
    }

    #[test]
    fn rejects_missing_field() {
        let err = read_grammar_json(&json!({"pattern": "Grammar"})).unwrap_err();
        assert!(matches!(err, GrammarJsonError::Expected { .. }));
    }
}
