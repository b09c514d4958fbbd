//! Typed parameter declarations and their values.
//!
//! A [`Param`] declares a configuration input a link or outputter accepts:
//! name, description, type tag, optional shortcode for CLI binding,
//! optional default, required flag, optional regex validator, optional
//! string converter. Bound values are [`ParamValue`] variants covering the
//! primitive shapes, their sequences, and opaque Rust types.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::errors::ParamError;
use crate::payload::short_type_name;

/// A value bound to a parameter.
#[derive(Clone)]
pub enum ParamValue {
    /// A string.
    Str(String),
    /// A 64-bit integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// A boolean.
    Bool(bool),
    /// A sequence of strings.
    StrList(Vec<String>),
    /// A sequence of integers.
    IntList(Vec<i64>),
    /// A sequence of floats.
    FloatList(Vec<f64>),
    /// A sequence of booleans.
    BoolList(Vec<bool>),
    /// An opaque Rust value, matched by exact type.
    Opaque(OpaqueValue),
}

/// An opaque parameter value: any `Send + Sync` Rust type behind an `Arc`.
#[derive(Clone)]
pub struct OpaqueValue {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl OpaqueValue {
    /// Wraps a value.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: short_type_name::<T>(),
        }
    }

    /// The wrapped type's id.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        (*self.value).type_id()
    }

    /// The wrapped type's unqualified name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Extracts a clone of the wrapped value.
    pub fn extract<T: Any + Clone>(&self) -> Result<T, ParamError> {
        self.value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ParamError::WrongType {
                expected: short_type_name::<T>().to_string(),
                actual: self.type_name.to_string(),
            })
    }
}

impl ParamValue {
    /// Wraps an opaque Rust value.
    #[must_use]
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self::Opaque(OpaqueValue::new(value))
    }

    /// The type tag of this value, e.g. `"string"` or `"[]int"`.
    #[must_use]
    pub fn kind_name(&self) -> String {
        match self {
            Self::Str(_) => "string".into(),
            Self::Int(_) => "int".into(),
            Self::Float(_) => "float".into(),
            Self::Bool(_) => "bool".into(),
            Self::StrList(_) => "[]string".into(),
            Self::IntList(_) => "[]int".into(),
            Self::FloatList(_) => "[]float".into(),
            Self::BoolList(_) => "[]bool".into(),
            Self::Opaque(o) => o.type_name().to_string(),
        }
    }

    /// The [`ParamKind`] matching this value.
    #[must_use]
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Str(_) => ParamKind::Str,
            Self::Int(_) => ParamKind::Int,
            Self::Float(_) => ParamKind::Float,
            Self::Bool(_) => ParamKind::Bool,
            Self::StrList(_) => ParamKind::StrList,
            Self::IntList(_) => ParamKind::IntList,
            Self::FloatList(_) => ParamKind::FloatList,
            Self::BoolList(_) => ParamKind::BoolList,
            Self::Opaque(o) => ParamKind::Opaque {
                id: o.type_id(),
                name: o.type_name(),
            },
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::StrList(v) => write!(f, "{}", v.join(",")),
            Self::IntList(v) => write_joined(f, v),
            Self::FloatList(v) => write_joined(f, v),
            Self::BoolList(v) => write_joined(f, v),
            Self::Opaque(o) => write!(f, "<{}>", o.type_name()),
        }
    }
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind_name(), self)
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
    let joined = values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    write!(f, "{joined}")
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(v: Vec<String>) -> Self {
        Self::StrList(v)
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(v: Vec<&str>) -> Self {
        Self::StrList(v.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<i64>> for ParamValue {
    fn from(v: Vec<i64>) -> Self {
        Self::IntList(v)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        Self::FloatList(v)
    }
}

impl From<Vec<bool>> for ParamValue {
    fn from(v: Vec<bool>) -> Self {
        Self::BoolList(v)
    }
}

impl From<OpaqueValue> for ParamValue {
    fn from(v: OpaqueValue) -> Self {
        Self::Opaque(v)
    }
}

/// Typed extraction from a [`ParamValue`], used by `arg_as`.
pub trait FromParamValue: Sized {
    /// Extracts `Self` from a bound value.
    fn from_param_value(value: &ParamValue) -> Result<Self, ParamError>;
}

macro_rules! from_param_value {
    ($ty:ty, $variant:ident, $expected:expr) => {
        impl FromParamValue for $ty {
            fn from_param_value(value: &ParamValue) -> Result<Self, ParamError> {
                match value {
                    ParamValue::$variant(v) => Ok(v.clone()),
                    other => Err(ParamError::WrongType {
                        expected: $expected.to_string(),
                        actual: other.kind_name(),
                    }),
                }
            }
        }
    };
}

from_param_value!(String, Str, "string");
from_param_value!(i64, Int, "int");
from_param_value!(f64, Float, "float");
from_param_value!(bool, Bool, "bool");
from_param_value!(Vec<String>, StrList, "[]string");
from_param_value!(Vec<i64>, IntList, "[]int");
from_param_value!(Vec<f64>, FloatList, "[]float");
from_param_value!(Vec<bool>, BoolList, "[]bool");

/// The declared type of a parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// A string.
    Str,
    /// A 64-bit integer.
    Int,
    /// A 64-bit float.
    Float,
    /// A boolean.
    Bool,
    /// A sequence of strings.
    StrList,
    /// A sequence of integers.
    IntList,
    /// A sequence of floats.
    FloatList,
    /// A sequence of booleans.
    BoolList,
    /// An opaque Rust type, matched by `TypeId`.
    Opaque {
        /// The type's id.
        id: TypeId,
        /// The type's unqualified name.
        name: &'static str,
    },
}

impl ParamKind {
    /// Whether a built-in string converter exists for this kind.
    #[must_use]
    pub fn is_convertible(&self) -> bool {
        !matches!(self, Self::Opaque { .. })
    }

    /// Whether a value matches this kind.
    #[must_use]
    pub fn matches(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (Self::Str, ParamValue::Str(_))
            | (Self::Int, ParamValue::Int(_))
            | (Self::Float, ParamValue::Float(_))
            | (Self::Bool, ParamValue::Bool(_))
            | (Self::StrList, ParamValue::StrList(_))
            | (Self::IntList, ParamValue::IntList(_))
            | (Self::FloatList, ParamValue::FloatList(_))
            | (Self::BoolList, ParamValue::BoolList(_)) => true,
            (Self::Opaque { id, .. }, ParamValue::Opaque(o)) => *id == o.type_id(),
            _ => false,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Str => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::StrList => "[]string",
            Self::IntList => "[]int",
            Self::FloatList => "[]float",
            Self::BoolList => "[]bool",
            Self::Opaque { name, .. } => name,
        };
        write!(f, "{name}")
    }
}

/// Converts a CLI string into a value of the given kind using the built-in
/// primitive converters.
pub fn convert_primitive(kind: &ParamKind, value: &str) -> Result<ParamValue, ParamError> {
    let convert_err = |message: String| ParamError::Convert {
        value: value.to_string(),
        kind: kind.to_string(),
        message,
    };
    match kind {
        ParamKind::Str => Ok(ParamValue::Str(value.to_string())),
        ParamKind::Int => value
            .parse::<i64>()
            .map(ParamValue::Int)
            .map_err(|e| convert_err(e.to_string())),
        ParamKind::Float => value
            .parse::<f64>()
            .map(ParamValue::Float)
            .map_err(|e| convert_err(e.to_string())),
        ParamKind::Bool => parse_bool(value)
            .map(ParamValue::Bool)
            .ok_or_else(|| convert_err(format!("invalid boolean {value:?}"))),
        ParamKind::StrList => {
            if value.is_empty() {
                return Ok(ParamValue::StrList(Vec::new()));
            }
            Ok(ParamValue::StrList(
                value.split(',').map(str::to_string).collect(),
            ))
        }
        ParamKind::IntList => convert_list(value, |v| v.parse::<i64>().map_err(|e| e.to_string()))
            .map(ParamValue::IntList)
            .map_err(convert_err),
        ParamKind::FloatList => {
            convert_list(value, |v| v.parse::<f64>().map_err(|e| e.to_string()))
                .map(ParamValue::FloatList)
                .map_err(convert_err)
        }
        ParamKind::BoolList => convert_list(value, |v| {
            parse_bool(v).ok_or_else(|| format!("invalid boolean {v:?}"))
        })
        .map(ParamValue::BoolList)
        .map_err(convert_err),
        ParamKind::Opaque { .. } => Err(ParamError::NoConverter(kind.to_string())),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

fn convert_list<T, F>(value: &str, convert: F) -> Result<Vec<T>, String>
where
    F: Fn(&str) -> Result<T, String>,
{
    value
        .split(',')
        .enumerate()
        .map(|(i, v)| convert(v).map_err(|e| format!("error at index {i}: {e}")))
        .collect()
}

type Converter = Arc<dyn Fn(&str) -> Result<ParamValue, ParamError> + Send + Sync>;

/// A typed parameter declaration.
#[derive(Clone)]
pub struct Param {
    name: String,
    description: String,
    shortcode: Option<String>,
    kind: ParamKind,
    required: bool,
    value: Option<ParamValue>,
    has_default: bool,
    has_been_set: bool,
    converter: Option<Converter>,
    regex: Option<Regex>,
}

impl Param {
    fn with_kind(name: impl Into<String>, description: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            shortcode: None,
            kind,
            required: false,
            value: None,
            has_default: false,
            has_been_set: false,
            converter: None,
            regex: None,
        }
    }

    /// Declares a string parameter.
    #[must_use]
    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_kind(name, description, ParamKind::Str)
    }

    /// Declares an integer parameter.
    #[must_use]
    pub fn int(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_kind(name, description, ParamKind::Int)
    }

    /// Declares a float parameter.
    #[must_use]
    pub fn float(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_kind(name, description, ParamKind::Float)
    }

    /// Declares a boolean parameter.
    #[must_use]
    pub fn boolean(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_kind(name, description, ParamKind::Bool)
    }

    /// Declares a string-sequence parameter.
    #[must_use]
    pub fn string_list(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_kind(name, description, ParamKind::StrList)
    }

    /// Declares an integer-sequence parameter.
    #[must_use]
    pub fn int_list(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_kind(name, description, ParamKind::IntList)
    }

    /// Declares a float-sequence parameter.
    #[must_use]
    pub fn float_list(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_kind(name, description, ParamKind::FloatList)
    }

    /// Declares a boolean-sequence parameter.
    #[must_use]
    pub fn bool_list(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_kind(name, description, ParamKind::BoolList)
    }

    /// Declares a parameter holding an opaque Rust type.
    ///
    /// Opaque parameters cannot bind from CLI strings unless a converter is
    /// attached with [`with_converter`](Self::with_converter).
    #[must_use]
    pub fn opaque<T: Any + Send + Sync>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            name,
            description,
            ParamKind::Opaque {
                id: TypeId::of::<T>(),
                name: short_type_name::<T>(),
            },
        )
    }

    /// Declares a parameter whose kind is inferred from an observed value.
    /// Used when a chain propagates arguments to outputters that never
    /// declared them.
    #[must_use]
    pub fn dynamic(name: impl Into<String>, value: &ParamValue) -> Self {
        Self::with_kind(
            name,
            "dynamically propagated parameter from chain and links",
            value.kind(),
        )
    }

    /// Marks the parameter required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attaches a default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<ParamValue>) -> Self {
        self.value = Some(value.into());
        self.has_default = true;
        self
    }

    /// Attaches a CLI shortcode.
    #[must_use]
    pub fn with_shortcode(mut self, shortcode: impl Into<String>) -> Self {
        self.shortcode = Some(shortcode.into());
        self
    }

    /// Attaches a string converter, enabling CLI binding for opaque kinds.
    #[must_use]
    pub fn with_converter<F>(mut self, converter: F) -> Self
    where
        F: Fn(&str) -> Result<ParamValue, ParamError> + Send + Sync + 'static,
    {
        self.converter = Some(Arc::new(converter));
        self
    }

    /// Attaches a regex validator, applied to string values and every
    /// element of string-sequence values at validation time.
    #[must_use]
    pub fn with_regex(mut self, regex: Regex) -> Self {
        self.regex = Some(regex);
        self
    }

    /// The parameter's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parameter's description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The parameter's shortcode, if any.
    #[must_use]
    pub fn shortcode(&self) -> Option<&str> {
        self.shortcode.as_deref()
    }

    /// The CLI flag this parameter binds from: the shortcode when present,
    /// otherwise the name.
    #[must_use]
    pub fn flag(&self) -> &str {
        self.shortcode.as_deref().unwrap_or(&self.name)
    }

    /// The declared kind.
    #[must_use]
    pub fn kind(&self) -> &ParamKind {
        &self.kind
    }

    /// Whether the parameter is required.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Whether a default was attached.
    #[must_use]
    pub fn has_default(&self) -> bool {
        self.has_default
    }

    /// Whether any value (default or bound) is present.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Whether a value was explicitly bound, as opposed to defaulted.
    #[must_use]
    pub fn has_been_set(&self) -> bool {
        self.has_been_set
    }

    /// The current value, default included.
    #[must_use]
    pub fn value(&self) -> Option<&ParamValue> {
        self.value.as_ref()
    }

    /// The regex validator, if any.
    #[must_use]
    pub fn regex(&self) -> Option<&Regex> {
        self.regex.as_ref()
    }

    /// The identity tuple used for collision detection and deduplication.
    #[must_use]
    pub fn identifier(&self) -> String {
        let mut id = format!(
            "{}:{}:{}:{}",
            self.name, self.description, self.kind, self.required
        );
        if let Some(regex) = &self.regex {
            id.push(':');
            id.push_str(regex.as_str());
        }
        id
    }

    /// Binds a value. String values pass through the converter (or the
    /// built-in primitive converter for non-string kinds) first; all other
    /// values must match the declared kind exactly.
    pub fn set_value(&mut self, value: ParamValue) -> Result<(), ParamError> {
        let value = match value {
            ParamValue::Str(s) => self.convert_string(s)?,
            other => other,
        };
        if !self.kind.matches(&value) {
            return Err(ParamError::TypeMismatch {
                name: self.name.clone(),
                expected: self.kind.to_string(),
                actual: value.kind_name(),
            });
        }
        self.value = Some(value);
        self.has_been_set = true;
        Ok(())
    }

    fn convert_string(&self, value: String) -> Result<ParamValue, ParamError> {
        if let Some(converter) = &self.converter {
            return converter(&value);
        }
        if self.kind == ParamKind::Str {
            return Ok(ParamValue::Str(value));
        }
        convert_primitive(&self.kind, &value)
    }

    /// Checks that a declared shortcode can actually bind from a string.
    pub(crate) fn check_shortcode(&self) -> Result<(), ParamError> {
        if self.shortcode.is_none() || self.kind.is_convertible() || self.converter.is_some() {
            return Ok(());
        }
        Err(ParamError::Shortcode {
            name: self.name.clone(),
            kind: self.kind.to_string(),
        })
    }

    /// Checks the regex validator against the current value.
    pub(crate) fn check_regex(&self) -> Result<(), ParamError> {
        let Some(regex) = &self.regex else {
            return Ok(());
        };
        let check = |value: &str| -> Result<(), ParamError> {
            if regex.is_match(value) {
                return Ok(());
            }
            Err(ParamError::Regex {
                value: value.to_string(),
                pattern: regex.as_str().to_string(),
            })
        };
        match &self.value {
            Some(ParamValue::Str(s)) => check(s),
            Some(ParamValue::StrList(list)) => list.iter().try_for_each(|s| check(s)),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.description)?;
        if self.has_default {
            if let Some(value) = &self.value {
                write!(f, " (default: {})", truncate(&value.to_string()))?;
            }
        }
        if self.required {
            write!(f, " (required)")?;
        }
        Ok(())
    }
}

fn truncate(value: &str) -> String {
    if value.len() > 50 {
        format!("{} ...(truncated)", &value[..50])
    } else {
        value.to_string()
    }
}
