//! Type descriptions: parsed, checkable descriptions of acceptable values.
//!
//! Descriptors are two-part strings, `"<namespace>::<spec>"`:
//!
//! - `primitive::string`, `primitive::integer`, `primitive::float`,
//!   `primitive::boolean` accept exactly that scalar type.
//! - `primitive::integer[]` accepts an array of any length whose items are
//!   all integers; `primitive::integer[3]` accepts exactly three.
//! - `class::app.Citation` accepts instances of `app.Citation` or any of
//!   its subtypes.
//!
//! There is no coercion: `1.0` is not an integer and `true` is not `1`.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scalar kinds understood by `primitive::` descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    String,
    Integer,
    Float,
    Boolean,
}

impl PrimitiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Boolean => "boolean",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(PrimitiveKind::String),
            "integer" => Some(PrimitiveKind::Integer),
            "float" => Some(PrimitiveKind::Float),
            "boolean" => Some(PrimitiveKind::Boolean),
            _ => None,
        }
    }

    /// Exact scalar match.
    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (PrimitiveKind::String, Value::String(_))
                | (PrimitiveKind::Integer, Value::Int(_))
                | (PrimitiveKind::Float, Value::Float(_))
                | (PrimitiveKind::Boolean, Value::Bool(_))
        )
    }
}

/// How many values a primitive descriptor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// A single scalar.
    One,
    /// An array of any length.
    Many,
    /// An array of exactly this length.
    Exactly(usize),
}

/// A parsed type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeDescription {
    Primitive {
        kind: PrimitiveKind,
        cardinality: Cardinality,
    },
    Class {
        name: String,
    },
}

/// Why a descriptor string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeDescriptionError {
    #[error("descriptor '{0}' has no '<namespace>::' prefix")]
    MissingNamespace(String),

    #[error("unknown type namespace '{0}'")]
    UnknownNamespace(String),

    #[error("unknown primitive type '{0}'")]
    UnknownPrimitive(String),

    #[error("malformed array specification '{0}'")]
    MalformedArray(String),

    #[error("multi-dimensional arrays are not supported: '{0}'")]
    MultiDimensional(String),

    #[error("invalid array cardinality '{0}'")]
    InvalidCardinality(String),
}

impl TypeDescription {
    /// Parse a full descriptor, returning `None` for anything malformed.
    ///
    /// Safe to call on arbitrary strings; use [`str::parse`] to learn why a
    /// descriptor was rejected.
    pub fn parse(descriptor: &str) -> Option<Self> {
        descriptor.parse().ok()
    }

    /// Parse the part after `primitive::`, e.g. `"integer[]"`.
    pub fn primitive(spec: &str) -> Option<Self> {
        parse_primitive(spec).ok()
    }

    /// A class descriptor. Names are not validated until a value is checked.
    pub fn class(name: impl Into<String>) -> Self {
        TypeDescription::Class { name: name.into() }
    }

    /// Check whether a value has the shape this descriptor describes.
    pub fn is_compatible(&self, value: &Value) -> bool {
        match self {
            TypeDescription::Primitive { kind, cardinality } => match cardinality {
                Cardinality::One => kind.matches(value),
                Cardinality::Many => value
                    .as_array()
                    .is_some_and(|items| items.iter().all(|item| kind.matches(item))),
                Cardinality::Exactly(n) => value.as_array().is_some_and(|items| {
                    items.len() == *n && items.iter().all(|item| kind.matches(item))
                }),
            },
            TypeDescription::Class { name } => value
                .as_instance()
                .is_some_and(|instance| instance.is_a(name)),
        }
    }

    pub fn namespace(&self) -> &'static str {
        match self {
            TypeDescription::Primitive { .. } => "primitive",
            TypeDescription::Class { .. } => "class",
        }
    }
}

impl FromStr for TypeDescription {
    type Err = TypeDescriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, spec) = s
            .split_once("::")
            .ok_or_else(|| TypeDescriptionError::MissingNamespace(s.to_string()))?;

        match namespace {
            "primitive" => parse_primitive(spec),
            "class" => Ok(TypeDescription::class(spec)),
            other => Err(TypeDescriptionError::UnknownNamespace(other.to_string())),
        }
    }
}

fn parse_primitive(spec: &str) -> Result<TypeDescription, TypeDescriptionError> {
    let (name, cardinality) = match spec.find('[') {
        None => (spec, Cardinality::One),
        Some(open) => {
            let (name, brackets) = spec.split_at(open);
            let inner = brackets
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(|| TypeDescriptionError::MalformedArray(spec.to_string()))?;

            if inner.contains('[') || inner.contains(']') {
                return Err(TypeDescriptionError::MultiDimensional(spec.to_string()));
            }

            let cardinality = if inner.is_empty() {
                Cardinality::Many
            } else {
                // Only plain decimal digits; `parse` would also accept a leading '+'.
                if !inner.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(TypeDescriptionError::InvalidCardinality(inner.to_string()));
                }
                let n = inner
                    .parse::<usize>()
                    .map_err(|_| TypeDescriptionError::InvalidCardinality(inner.to_string()))?;
                Cardinality::Exactly(n)
            };
            (name, cardinality)
        }
    };

    let kind = PrimitiveKind::parse(name)
        .ok_or_else(|| TypeDescriptionError::UnknownPrimitive(name.to_string()))?;

    Ok(TypeDescription::Primitive { kind, cardinality })
}

impl fmt::Display for TypeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescription::Primitive { kind, cardinality } => {
                write!(f, "primitive::{}", kind.as_str())?;
                match cardinality {
                    Cardinality::One => Ok(()),
                    Cardinality::Many => f.write_str("[]"),
                    Cardinality::Exactly(n) => write!(f, "[{n}]"),
                }
            }
            TypeDescription::Class { name } => write!(f, "class::{name}"),
        }
    }
}

impl TryFrom<String> for TypeDescription {
    type Error = TypeDescriptionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TypeDescription> for String {
    fn from(desc: TypeDescription) -> Self {
        desc.to_string()
    }
}
