//! # Filter Expressions
//!
//! Parses a `field → expression` map into typed predicates.
//!
//! ## Grammar
//!
//! ```text
//! !X        complement of X
//! (a,b)     inclusive range
//! [a,b,c]   set membership (order irrelevant)
//! *sub%     case-insensitive glob; `%` any run, `_` any one character
//! text      substring on fragment fields, equality elsewhere
//! \! \[ \(  leading escape: take the character literally
//! ```
//!
//! `{"not": {...}}` negates a nested map, and `promoted_to` /
//! `promoted_from` take `kind:id` (optionally `!`-prefixed) and match
//! through promotion edges instead of a column.

use casebook_rbac::TargetRef;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::{CoreError, CoreResult};
use crate::promotion::PromotionEdge;
use crate::record::Record;
use crate::schema::{canonical_enum, coerce_datetime, coerce_int, EntitySchema, FieldType};

/// Raw filter input.
pub type FilterMap = Map<String, Value>;

/// Key that negates a nested filter map.
pub const NOT_KEY: &str = "not";
/// Key matching records promoted into the given target.
pub const PROMOTED_TO_KEY: &str = "promoted_to";
/// Key matching records promoted out of the given target.
pub const PROMOTED_FROM_KEY: &str = "promoted_from";

/// A typed value a column can be compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Text(String),
    Time(DateTime<Utc>),
}

impl Literal {
    /// Coerce a filter operand to the column type.
    fn parse(field: &str, ty: FieldType, value: &Value) -> CoreResult<Self> {
        let literal = match ty {
            FieldType::Int => coerce_int(value).map(Literal::Int),
            FieldType::DateTime => coerce_datetime(value).map(Literal::Time),
            FieldType::Enum(values) => value
                .as_str()
                .and_then(|s| canonical_enum(values, s))
                .map(|s| Literal::Text(s.to_string())),
            FieldType::String => match value {
                Value::String(s) => Some(Literal::Text(s.clone())),
                Value::Number(n) => Some(Literal::Text(n.to_string())),
                _ => None,
            },
            FieldType::Json => None,
        };
        literal.ok_or_else(|| CoreError::mismatch(field, ty.describe(), value))
    }

    /// Read a stored column value; `None` for nulls and anything that no
    /// longer fits the type.
    pub(crate) fn from_stored(ty: FieldType, value: &Value) -> Option<Self> {
        match ty {
            FieldType::Int => coerce_int(value).map(Literal::Int),
            FieldType::DateTime => coerce_datetime(value).map(Literal::Time),
            FieldType::Enum(_) | FieldType::String => match value {
                Value::String(s) => Some(Literal::Text(s.clone())),
                Value::Number(n) => Some(Literal::Text(n.to_string())),
                _ => None,
            },
            FieldType::Json => None,
        }
    }

    pub(crate) fn compare(&self, other: &Literal) -> Option<Ordering> {
        match (self, other) {
            (Literal::Int(a), Literal::Int(b)) => Some(a.cmp(b)),
            (Literal::Text(a), Literal::Text(b)) => Some(a.cmp(b)),
            (Literal::Time(a), Literal::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Positive test applied to one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals(Literal),
    /// Inclusive on both ends
    Range(Literal, Literal),
    OneOf(Vec<Literal>),
    /// LIKE pattern, matched case-insensitively
    Glob(String),
    /// Case-insensitive substring
    Contains(String),
}

impl Predicate {
    fn matches(&self, ty: FieldType, stored: Option<&Value>) -> bool {
        let Some(value) = stored.and_then(|v| Literal::from_stored(ty, v)) else {
            return false;
        };
        match self {
            Predicate::Equals(expected) => value.compare(expected) == Some(Ordering::Equal),
            Predicate::Range(lo, hi) => {
                matches!(value.compare(lo), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(value.compare(hi), Some(Ordering::Less | Ordering::Equal))
            }
            Predicate::OneOf(set) => set
                .iter()
                .any(|candidate| value.compare(candidate) == Some(Ordering::Equal)),
            Predicate::Glob(pattern) => match value {
                Literal::Text(text) => like(&text, pattern),
                _ => false,
            },
            Predicate::Contains(needle) => match value {
                Literal::Text(text) => text.to_lowercase().contains(needle.as_str()),
                _ => false,
            },
        }
    }
}

/// One parsed constraint. A record matches a filter list when it matches
/// every element.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Field {
        field: String,
        ty: FieldType,
        predicate: Predicate,
        negated: bool,
    },
    /// Complement of the conjunction of the nested filters
    Not(Vec<Filter>),
    PromotedTo {
        target: TargetRef,
        negated: bool,
    },
    PromotedFrom {
        target: TargetRef,
        negated: bool,
    },
}

impl Filter {
    /// Test a record. `edges` is the promotion edge table.
    pub(crate) fn matches(&self, record: &Record, edges: &[PromotionEdge]) -> bool {
        match self {
            Filter::Field {
                field,
                ty,
                predicate,
                negated,
            } => {
                let stored = record.field(field);
                predicate.matches(*ty, stored.as_ref()) != *negated
            }
            Filter::Not(inner) => !inner.iter().all(|f| f.matches(record, edges)),
            Filter::PromotedTo { target, negated } => {
                let own = record.target();
                edges.iter().any(|e| e.p0 == own && e.p1 == *target) != *negated
            }
            Filter::PromotedFrom { target, negated } => {
                let own = record.target();
                edges.iter().any(|e| e.p0 == *target && e.p1 == own) != *negated
            }
        }
    }
}

/// Parse a filter map against a kind's columns.
///
/// Unknown fields, non-filterable fields and malformed expressions are
/// [`CoreError::Validation`]; operands that do not coerce to the column type
/// are [`CoreError::TypeMismatch`].
pub fn parse_filters(schema: &EntitySchema, map: &FilterMap) -> CoreResult<Vec<Filter>> {
    map.iter()
        .map(|(key, value)| parse_entry(schema, key, value))
        .collect()
}

fn parse_entry(schema: &EntitySchema, key: &str, value: &Value) -> CoreResult<Filter> {
    match key {
        NOT_KEY => match value {
            Value::Object(nested) => Ok(Filter::Not(parse_filters(schema, nested)?)),
            _ => Err(CoreError::Validation(
                "'not' expects a nested filter object".to_string(),
            )),
        },
        PROMOTED_TO_KEY | PROMOTED_FROM_KEY => {
            let raw = value.as_str().ok_or_else(|| {
                CoreError::Validation(format!("'{}' expects a \"kind:id\" string", key))
            })?;
            let (negated, body) = split_negation(raw.trim());
            let target = TargetRef::parse(body)?;
            Ok(if key == PROMOTED_TO_KEY {
                Filter::PromotedTo { target, negated }
            } else {
                Filter::PromotedFrom { target, negated }
            })
        }
        _ => {
            let spec = schema.field(key).ok_or_else(|| {
                CoreError::Validation(format!("unknown field '{}' for {}", key, schema.kind))
            })?;
            if spec.ty == FieldType::Json {
                return Err(CoreError::Validation(format!(
                    "field '{}' is not filterable",
                    key
                )));
            }
            let (predicate, negated) = parse_expression(key, spec.ty, spec.fragment, value)?;
            Ok(Filter::Field {
                field: key.to_string(),
                ty: spec.ty,
                predicate,
                negated,
            })
        }
    }
}

fn parse_expression(
    field: &str,
    ty: FieldType,
    fragment: bool,
    value: &Value,
) -> CoreResult<(Predicate, bool)> {
    match value {
        Value::String(raw) => parse_string(field, ty, fragment, raw),
        Value::Array(items) => {
            let set = items
                .iter()
                .map(|item| Literal::parse(field, ty, item))
                .collect::<CoreResult<Vec<_>>>()?;
            Ok((Predicate::OneOf(set), false))
        }
        Value::Number(_) | Value::Bool(_) => {
            Ok((Predicate::Equals(Literal::parse(field, ty, value)?), false))
        }
        Value::Null | Value::Object(_) => Err(CoreError::Validation(format!(
            "unsupported filter value for '{}'",
            field
        ))),
    }
}

fn parse_string(
    field: &str,
    ty: FieldType,
    fragment: bool,
    raw: &str,
) -> CoreResult<(Predicate, bool)> {
    let text = |s: &str| Value::String(s.to_string());

    if let Some(literal) = strip_escape(raw) {
        return Ok((plain(field, ty, fragment, literal)?, false));
    }
    let (negated, body) = split_negation(raw);
    if let Some(literal) = strip_escape(body) {
        return Ok((plain(field, ty, fragment, literal)?, negated));
    }

    if let Some(inner) = body.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        let bounds: Vec<&str> = inner.split(',').map(str::trim).collect();
        let [lo, hi] = bounds.as_slice() else {
            return Err(CoreError::Validation(format!(
                "range for '{}' needs exactly two bounds: {}",
                field, raw
            )));
        };
        let lo = Literal::parse(field, ty, &text(*lo))?;
        let hi = Literal::parse(field, ty, &text(*hi))?;
        return Ok((Predicate::Range(lo, hi), negated));
    }

    if let Some(inner) = body.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        let set = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Literal::parse(field, ty, &text(s)))
            .collect::<CoreResult<Vec<_>>>()?;
        return Ok((Predicate::OneOf(set), negated));
    }

    if let Some(rest) = body.strip_prefix('*') {
        if !matches!(ty, FieldType::String | FieldType::Enum(_)) {
            return Err(CoreError::mismatch(field, ty.describe(), raw));
        }
        return Ok((Predicate::Glob(format!("%{}", rest)), negated));
    }

    Ok((plain(field, ty, fragment, body)?, negated))
}

fn plain(field: &str, ty: FieldType, fragment: bool, text: &str) -> CoreResult<Predicate> {
    if fragment && ty == FieldType::String {
        return Ok(Predicate::Contains(text.to_lowercase()));
    }
    Ok(Predicate::Equals(Literal::parse(
        field,
        ty,
        &Value::String(text.to_string()),
    )?))
}

fn split_negation(raw: &str) -> (bool, &str) {
    match raw.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, raw),
    }
}

fn strip_escape(raw: &str) -> Option<&str> {
    let rest = raw.strip_prefix('\\')?;
    rest.starts_with(['!', '[', '(']).then_some(rest)
}

/// Case-insensitive LIKE: `%` matches any run, `_` exactly one character.
pub(crate) fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    // matched[j]: pattern[..j] matches the text prefix consumed so far
    let mut matched = vec![false; pattern.len() + 1];
    matched[0] = true;
    for j in 1..=pattern.len() {
        matched[j] = matched[j - 1] && pattern[j - 1] == '%';
    }

    for c in text {
        let mut next = vec![false; pattern.len() + 1];
        for j in 1..=pattern.len() {
            next[j] = match pattern[j - 1] {
                '%' => next[j - 1] || matched[j],
                '_' => matched[j - 1],
                p => matched[j - 1] && p == c,
            };
        }
        matched = next;
    }
    matched[pattern.len()]
}
