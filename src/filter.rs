//! Client-side metadata filtering with a `field:operator:value` syntax.
//!
//! Exactly one expression is supported per run; there is no boolean
//! composition. Parsing happens before any remote call so malformed input
//! fails fast.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::contract::DocumentDescriptor;
use crate::error::{Result, SongbookError};

/// A tagged metadata value. Filter evaluation dispatches on the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Date(NaiveDate),
    Str(String),
    List(Vec<String>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => {
                // Integral numbers print without the trailing ".0" so that
                // `year:equals:2005` matches a numeric year field.
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            FieldValue::Date(d) => write!(f, "{d}"),
            FieldValue::Str(s) => write!(f, "{s}"),
            FieldValue::List(items) => write!(f, "{}", items.join(",")),
        }
    }
}

impl FieldValue {
    /// Classifies a raw string property into the most specific tag.
    /// Remote property maps are string-valued; comma-separated values
    /// become lists.
    pub fn from_property(raw: &str) -> FieldValue {
        if let Ok(n) = raw.parse::<f64>() {
            return FieldValue::Number(n);
        }
        if let Ok(d) = raw.parse::<NaiveDate>() {
            return FieldValue::Date(d);
        }
        if raw.contains(',') {
            return FieldValue::List(raw.split(',').map(|s| s.trim().to_string()).collect());
        }
        FieldValue::Str(raw.to_string())
    }
}

/// Supported comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equals,
    Contains,
    Gte,
    Lte,
    In,
}

impl FilterOp {
    fn parse(s: &str) -> Option<FilterOp> {
        match s {
            "equals" => Some(FilterOp::Equals),
            "contains" => Some(FilterOp::Contains),
            "gte" => Some(FilterOp::Gte),
            "lte" => Some(FilterOp::Lte),
            "in" => Some(FilterOp::In),
            _ => None,
        }
    }
}

/// Operand of an ordered comparison, fixed at parse time.
#[derive(Debug, Clone, PartialEq)]
enum Comparable {
    Number(f64),
    Date(NaiveDate),
}

/// A parsed `field:operator:value` expression, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpression {
    pub field: String,
    pub op: FilterOp,
    pub operand: String,
}

impl FilterExpression {
    /// Parses a single expression of the form `field:operator:value`.
    ///
    /// The value part may itself contain colons (e.g. a timestamp); only the
    /// first two separators are structural. For `gte`/`lte` the operand must
    /// already be a number or an ISO date, so a hopeless comparison fails
    /// before any remote call.
    pub fn parse(expression: &str) -> Result<FilterExpression> {
        let mut parts = expression.splitn(3, ':');
        let (field, op_text, operand) = match (parts.next(), parts.next(), parts.next()) {
            (Some(f), Some(o), Some(v)) if !f.is_empty() && !v.is_empty() => (f, o, v),
            _ => {
                return Err(SongbookError::InvalidFilterSyntax {
                    expression: expression.to_string(),
                    reason: "expected field:operator:value".to_string(),
                })
            }
        };

        let op = FilterOp::parse(op_text).ok_or_else(|| SongbookError::InvalidFilterSyntax {
            expression: expression.to_string(),
            reason: format!(
                "unknown operator {op_text:?} (expected equals, contains, gte, lte or in)"
            ),
        })?;

        let parsed = FilterExpression {
            field: field.to_string(),
            op,
            operand: operand.to_string(),
        };

        if matches!(op, FilterOp::Gte | FilterOp::Lte) {
            // Validate eagerly; the error names the field for diagnosis.
            parsed.comparable_operand()?;
        }

        Ok(parsed)
    }

    fn comparable_operand(&self) -> Result<Comparable> {
        coerce_comparable(&self.operand).ok_or_else(|| SongbookError::InvalidFilterValue {
            field: self.field.clone(),
            value: self.operand.clone(),
        })
    }

    /// Evaluates the expression against one document.
    ///
    /// A document without the referenced field never matches; only an
    /// incomparable field value on `gte`/`lte` is an error. Pure function of
    /// its inputs, so repeated runs partition a document set identically.
    pub fn matches(&self, document: &DocumentDescriptor) -> Result<bool> {
        let value = match document.metadata.get(&self.field) {
            Some(v) => v,
            None => return Ok(false),
        };

        match self.op {
            FilterOp::Equals => Ok(match value {
                FieldValue::List(items) => items.iter().any(|item| *item == self.operand),
                other => other.to_string() == self.operand,
            }),
            FilterOp::Contains => {
                let needle = self.operand.to_lowercase();
                Ok(match value {
                    FieldValue::List(items) => items
                        .iter()
                        .any(|item| item.to_lowercase().contains(&needle)),
                    other => other.to_string().to_lowercase().contains(&needle),
                })
            }
            FilterOp::Gte | FilterOp::Lte => {
                let operand = self.comparable_operand()?;
                let field = coerce_field_comparable(value).ok_or_else(|| {
                    SongbookError::InvalidFilterValue {
                        field: self.field.clone(),
                        value: value.to_string(),
                    }
                })?;
                let ordering = match (field, operand) {
                    (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(&b),
                    (Comparable::Date(a), Comparable::Date(b)) => Some(a.cmp(&b)),
                    // Mixed number/date comparison cannot be meaningful.
                    _ => None,
                }
                .ok_or_else(|| SongbookError::InvalidFilterValue {
                    field: self.field.clone(),
                    value: value.to_string(),
                })?;
                Ok(match self.op {
                    FilterOp::Gte => ordering != std::cmp::Ordering::Less,
                    _ => ordering != std::cmp::Ordering::Greater,
                })
            }
            FilterOp::In => {
                let wanted: Vec<&str> = self.operand.split(',').map(str::trim).collect();
                Ok(match value {
                    FieldValue::List(items) => items
                        .iter()
                        .any(|item| wanted.contains(&item.as_str())),
                    other => wanted.contains(&other.to_string().as_str()),
                })
            }
        }
    }
}

fn coerce_comparable(raw: &str) -> Option<Comparable> {
    if let Ok(n) = raw.parse::<f64>() {
        return Some(Comparable::Number(n));
    }
    raw.parse::<NaiveDate>().map(Comparable::Date).ok()
}

fn coerce_field_comparable(value: &FieldValue) -> Option<Comparable> {
    match value {
        FieldValue::Number(n) => Some(Comparable::Number(*n)),
        FieldValue::Date(d) => Some(Comparable::Date(*d)),
        FieldValue::Str(s) => coerce_comparable(s),
        FieldValue::List(_) => None,
    }
}
