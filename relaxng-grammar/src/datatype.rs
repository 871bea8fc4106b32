//! Datatype support for `data` and `value` patterns.
//!
//! Two libraries are available: the built-in RELAX NG library (empty URI,
//! types `string` and `token`) and the `string`/`token` types of the XML
//! Schema datatypes namespace, which additionally accept the `length`,
//! `minLength`, `maxLength` and `pattern` parameters.

use lazy_static::lazy_static;
use std::borrow::Cow;
use std::fmt;

pub const XSD_NAMESPACE_URI: &str = "http://www.w3.org/2001/XMLSchema-datatypes";

/// Prefix → namespace-uri lookup, implemented by whoever holds the document
/// context.  Value comparison is namespace-sensitive for QName-like types;
/// the types supported here ignore it, but the context is threaded through
/// so a datatype never needs to reach out for it.
pub trait Namespaces {
    fn resolve(&self, prefix: &str) -> Option<&str>;
}

/// A namespace context with no bindings at all.
pub struct NoNamespaces;

impl Namespaces for NoNamespaces {
    fn resolve(&self, _prefix: &str) -> Option<&str> {
        None
    }
}

pub trait Datatype {
    fn is_valid(&self, value: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatatypeError {
    UnknownLibrary(String),
    UnknownType { library: String, name: String },
    UnknownParam { name: String, param: String },
    InvalidParamValue { param: String, value: String },
}

impl fmt::Display for DatatypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatatypeError::UnknownLibrary(lib) => write!(f, "unknown datatype library {lib:?}"),
            DatatypeError::UnknownType { library, name } => {
                write!(f, "unknown type {name:?} in datatype library {library:?}")
            }
            DatatypeError::UnknownParam { name, param } => {
                write!(f, "type {name:?} does not accept the parameter {param:?}")
            }
            DatatypeError::InvalidParamValue { param, value } => {
                write!(f, "invalid value {value:?} for parameter {param:?}")
            }
        }
    }
}

impl std::error::Error for DatatypeError {}

/// Collapse whitespace per the `token` rules: leading/trailing stripped,
/// internal runs replaced by a single space.
pub fn normalize_whitespace(value: &str) -> Cow<'_, str> {
    if value
        .split(' ')
        .all(|piece| !piece.is_empty() && !piece.chars().any(is_xml_whitespace))
        && !value.starts_with(' ')
        && !value.ends_with(' ')
    {
        return Cow::Borrowed(value);
    }
    Cow::Owned(value.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn is_xml_whitespace(c: char) -> bool {
    matches!(c, '\x20' | '\x09' | '\x0d' | '\x0a')
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StrFacets {
    pub length: Option<usize>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<PatternFacet>,
}

impl StrFacets {
    fn is_valid(&self, value: &str) -> bool {
        let len = value.chars().count();
        self.length.map(|l| len == l).unwrap_or(true)
            && self.min_length.map(|l| len >= l).unwrap_or(true)
            && self.max_length.map(|l| len <= l).unwrap_or(true)
            && self
                .pattern
                .as_ref()
                .map(|p| p.matches(value))
                .unwrap_or(true)
    }

}

/// A compiled `pattern` parameter.  Equality and hashing use the source
/// text, which also keeps the JSON round-trip exact.
#[derive(Debug, Clone)]
pub struct PatternFacet {
    source: String,
    regex: regex::Regex,
}

impl PatternFacet {
    pub fn new(source: &str) -> Result<PatternFacet, DatatypeError> {
        // XSD patterns are anchored over the whole value.
        let regex = regex::Regex::new(&format!("^(?:{source})$")).map_err(|_| {
            DatatypeError::InvalidParamValue {
                param: "pattern".to_string(),
                value: source.to_string(),
            }
        })?;
        Ok(PatternFacet {
            source: source.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for PatternFacet {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}
impl Eq for PatternFacet {}
impl std::hash::Hash for PatternFacet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

/// A `data` pattern's datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Datatypes {
    /// Built-in `string`: any character data.
    String,
    /// Built-in `token`: any character data, compared whitespace-collapsed.
    Token,
    XsdString(StrFacets),
    XsdToken(StrFacets),
}

lazy_static! {
    static ref NO_FACETS: StrFacets = StrFacets::default();
}

impl Datatypes {
    /// Look up `(library, type)` and apply `params`.
    pub fn from_params(
        library: &str,
        name: &str,
        params: &[(String, String)],
    ) -> Result<Datatypes, DatatypeError> {
        match library {
            "" => {
                // The built-in library takes no parameters.
                if let Some((param, _)) = params.first() {
                    return Err(DatatypeError::UnknownParam {
                        name: name.to_string(),
                        param: param.clone(),
                    });
                }
                match name {
                    "string" => Ok(Datatypes::String),
                    "token" => Ok(Datatypes::Token),
                    _ => Err(DatatypeError::UnknownType {
                        library: library.to_string(),
                        name: name.to_string(),
                    }),
                }
            }
            XSD_NAMESPACE_URI => {
                let facets = Self::str_facets(name, params)?;
                match name {
                    "string" => Ok(Datatypes::XsdString(facets)),
                    "token" => Ok(Datatypes::XsdToken(facets)),
                    _ => Err(DatatypeError::UnknownType {
                        library: library.to_string(),
                        name: name.to_string(),
                    }),
                }
            }
            _ => Err(DatatypeError::UnknownLibrary(library.to_string())),
        }
    }

    fn str_facets(name: &str, params: &[(String, String)]) -> Result<StrFacets, DatatypeError> {
        let mut facets = StrFacets::default();
        for (param, value) in params {
            let parse_len = || {
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| DatatypeError::InvalidParamValue {
                        param: param.clone(),
                        value: value.clone(),
                    })
            };
            match param.as_str() {
                "length" => facets.length = Some(parse_len()?),
                "minLength" => facets.min_length = Some(parse_len()?),
                "maxLength" => facets.max_length = Some(parse_len()?),
                "pattern" => facets.pattern = Some(PatternFacet::new(value)?),
                _ => {
                    return Err(DatatypeError::UnknownParam {
                        name: name.to_string(),
                        param: param.clone(),
                    });
                }
            }
        }
        Ok(facets)
    }

    pub fn library(&self) -> &'static str {
        match self {
            Datatypes::String | Datatypes::Token => "",
            Datatypes::XsdString(_) | Datatypes::XsdToken(_) => XSD_NAMESPACE_URI,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Datatypes::String | Datatypes::XsdString(_) => "string",
            Datatypes::Token | Datatypes::XsdToken(_) => "token",
        }
    }

    pub fn facets(&self) -> &StrFacets {
        match self {
            Datatypes::String | Datatypes::Token => &NO_FACETS,
            Datatypes::XsdString(f) | Datatypes::XsdToken(f) => f,
        }
    }

    /// Does the datatype collapse whitespace before comparing?
    pub fn is_token(&self) -> bool {
        matches!(self, Datatypes::Token | Datatypes::XsdToken(_))
    }
}

impl Datatype for Datatypes {
    fn is_valid(&self, value: &str) -> bool {
        match self {
            Datatypes::String | Datatypes::Token => true,
            Datatypes::XsdString(facets) => facets.is_valid(value),
            Datatypes::XsdToken(facets) => facets.is_valid(&normalize_whitespace(value)),
        }
    }
}

/// A `value` pattern: a fixed literal of a given type, carrying the `ns`
/// in scope where the literal was written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatatypeValues {
    String { value: String, ns: String },
    Token { value: String, ns: String },
}

impl DatatypeValues {
    pub fn from_type(
        library: &str,
        name: &str,
        value: &str,
        ns: &str,
    ) -> Result<DatatypeValues, DatatypeError> {
        match library {
            "" | XSD_NAMESPACE_URI => match name {
                "string" => Ok(DatatypeValues::String {
                    value: value.to_string(),
                    ns: ns.to_string(),
                }),
                "token" => Ok(DatatypeValues::Token {
                    value: value.to_string(),
                    ns: ns.to_string(),
                }),
                _ => Err(DatatypeError::UnknownType {
                    library: library.to_string(),
                    name: name.to_string(),
                }),
            },
            _ => Err(DatatypeError::UnknownLibrary(library.to_string())),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            DatatypeValues::String { value, .. } | DatatypeValues::Token { value, .. } => value,
        }
    }

    pub fn ns(&self) -> &str {
        match self {
            DatatypeValues::String { ns, .. } | DatatypeValues::Token { ns, .. } => ns,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            DatatypeValues::String { .. } => "string",
            DatatypeValues::Token { .. } => "token",
        }
    }

    pub fn is_valid_with_ns(&self, candidate: &str, _ns: &dyn Namespaces) -> bool {
        self.is_valid(candidate)
    }
}

impl Datatype for DatatypeValues {
    fn is_valid(&self, candidate: &str) -> bool {
        match self {
            DatatypeValues::String { value, .. } => value == candidate,
            DatatypeValues::Token { value, .. } => {
                normalize_whitespace(value) == normalize_whitespace(candidate)
            }
        }
    }
}
