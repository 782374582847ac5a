//! Closed catalog of transformation rules.
//!
//! Rules are declarative values. Nothing here parses or evaluates code: a plan
//! is a list of these variants, and [`parse_rules`] is the only way an
//! externally produced plan enters the crate.

use crate::domain::model::{CellValue, FieldPath};
use crate::utils::error::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rule families in the order a plan must apply them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Flatten,
    Rename,
    Drop,
    FillDefault,
    CoerceType,
}

impl RuleKind {
    pub const ALL: [RuleKind; 5] = [
        RuleKind::Flatten,
        RuleKind::Rename,
        RuleKind::Drop,
        RuleKind::FillDefault,
        RuleKind::CoerceType,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Flatten => "flatten",
            RuleKind::Rename => "rename",
            RuleKind::Drop => "drop",
            RuleKind::FillDefault => "fill_default",
            RuleKind::CoerceType => "coerce_type",
        }
    }

    pub fn from_tag(tag: &str) -> Option<RuleKind> {
        RuleKind::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Float,
    Integer,
    Boolean,
    Text,
}

impl TargetType {
    /// Converts a cell to this type. Null and unparseable values are errors;
    /// the caller applies the rule's on-error policy.
    pub fn coerce(&self, value: &CellValue) -> std::result::Result<CellValue, String> {
        match (self, value) {
            (_, CellValue::Null) => Err("value is missing or null".to_string()),
            (_, CellValue::Array(_)) => Err(format!("cannot convert an array to {}", self)),

            (TargetType::Float, CellValue::Float(f)) => Ok(CellValue::Float(*f)),
            (TargetType::Float, CellValue::Integer(i)) => Ok(CellValue::Float(*i as f64)),
            (TargetType::Float, CellValue::Bool(b)) => Ok(CellValue::Float(if *b { 1.0 } else { 0.0 })),
            (TargetType::Float, CellValue::Text(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(CellValue::Float)
                .ok_or_else(|| format!("cannot parse '{}' as float", s)),

            (TargetType::Integer, CellValue::Integer(i)) => Ok(CellValue::Integer(*i)),
            (TargetType::Integer, CellValue::Float(f)) => whole_number(*f)
                .map(CellValue::Integer)
                .ok_or_else(|| format!("{} is not a whole number", f)),
            (TargetType::Integer, CellValue::Bool(b)) => Ok(CellValue::Integer(i64::from(*b))),
            (TargetType::Integer, CellValue::Text(s)) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().and_then(whole_number))
                    .map(CellValue::Integer)
                    .ok_or_else(|| format!("cannot parse '{}' as integer", s))
            }

            (TargetType::Boolean, CellValue::Bool(b)) => Ok(CellValue::Bool(*b)),
            (TargetType::Boolean, CellValue::Integer(0)) => Ok(CellValue::Bool(false)),
            (TargetType::Boolean, CellValue::Integer(1)) => Ok(CellValue::Bool(true)),
            (TargetType::Boolean, CellValue::Text(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(CellValue::Bool(true)),
                "false" | "no" | "0" => Ok(CellValue::Bool(false)),
                _ => Err(format!("cannot parse '{}' as boolean", s)),
            },
            (TargetType::Boolean, other) => Err(format!("cannot convert {} to boolean", other)),

            (TargetType::Text, CellValue::Text(s)) => Ok(CellValue::Text(s.clone())),
            (TargetType::Text, other) => Ok(CellValue::Text(other.render())),
        }
    }
}

fn whole_number(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which does not fit
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetType::Float => "float",
            TargetType::Integer => "integer",
            TargetType::Boolean => "boolean",
            TargetType::Text => "text",
        };
        f.write_str(name)
    }
}

/// What the executor does when a coercion fails on a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum OnErrorPolicy {
    CoerceToDefault { default: CellValue },
    DropRow,
    FailFast,
}

impl OnErrorPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            OnErrorPolicy::CoerceToDefault { .. } => "coerce-to-default",
            OnErrorPolicy::DropRow => "drop-row",
            OnErrorPolicy::FailFast => "fail-fast",
        }
    }
}

/// A single declarative normalization step.
///
/// Column names refer to the schema produced by the rules before it, so a
/// `Drop` after a `Rename` names the renamed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    /// Columns under `prefix.` move to `replacement` + remainder; leaf paths
    /// listed in `except` keep their dotted name.
    Flatten {
        prefix: FieldPath,
        replacement: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        except: Vec<FieldPath>,
    },
    Rename { from: String, to: String },
    Drop { column: String },
    FillDefault { column: String, value: CellValue },
    CoerceType {
        column: String,
        target: TargetType,
        on_error: OnErrorPolicy,
    },
}

impl Rule {
    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Flatten { .. } => RuleKind::Flatten,
            Rule::Rename { .. } => RuleKind::Rename,
            Rule::Drop { .. } => RuleKind::Drop,
            Rule::FillDefault { .. } => RuleKind::FillDefault,
            Rule::CoerceType { .. } => RuleKind::CoerceType,
        }
    }

    /// The column (or prefix, for flatten) the rule targets.
    pub fn target(&self) -> String {
        match self {
            Rule::Flatten { prefix, .. } => format!("{}.", prefix),
            Rule::Rename { from, .. } => from.clone(),
            Rule::Drop { column } | Rule::FillDefault { column, .. } | Rule::CoerceType { column, .. } => {
                column.clone()
            }
        }
    }

    /// New name of `column` under a flatten or rename rule, if the rule applies to it.
    pub fn renamed(&self, column: &str) -> Option<String> {
        match self {
            Rule::Flatten {
                prefix,
                replacement,
                except,
            } => {
                if except.iter().any(|path| path.to_string() == column) {
                    return None;
                }
                column
                    .strip_prefix(prefix.to_string().as_str())
                    .and_then(|rest| rest.strip_prefix('.'))
                    .map(|rest| format!("{}{}", replacement, rest))
            }
            Rule::Rename { from, to } if column == from => Some(to.clone()),
            _ => None,
        }
    }

    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            Rule::CoerceType {
                on_error: OnErrorPolicy::FailFast,
                ..
            }
        )
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Flatten {
                prefix,
                replacement,
                except,
            } => {
                write!(f, "flatten({}. -> {}", prefix, replacement)?;
                if !except.is_empty() {
                    let kept: Vec<String> = except.iter().map(FieldPath::to_string).collect();
                    write!(f, ", keep {}", kept.join(", "))?;
                }
                f.write_str(")")
            }
            Rule::Rename { from, to } => write!(f, "rename({} -> {})", from, to),
            Rule::Drop { column } => write!(f, "drop({})", column),
            Rule::FillDefault { column, value } => write!(f, "fill_default({} = {})", column, value),
            Rule::CoerceType {
                column,
                target,
                on_error,
            } => match on_error {
                OnErrorPolicy::CoerceToDefault { default } => write!(
                    f,
                    "coerce_type({}: {}, on_error={} {})",
                    column,
                    target,
                    on_error.name(),
                    default
                ),
                _ => write!(f, "coerce_type({}: {}, on_error={})", column, target, on_error.name()),
            },
        }
    }
}

/// Reads a rule list produced outside the catalog planner, e.g. by a model-backed
/// planner. Unknown kinds and malformed parameters are rejected here; ordering and
/// parameter checks happen again in `synthesize`.
pub fn parse_rules(document: &serde_json::Value) -> Result<Vec<Rule>> {
    let items = document.as_array().ok_or_else(|| EtlError::UnsupportedRule {
        rule: "<plan>".to_string(),
        reason: "a plan must be a JSON array of rules".to_string(),
    })?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let tag = item
                .get("kind")
                .and_then(|k| k.as_str())
                .ok_or_else(|| EtlError::UnsupportedRule {
                    rule: format!("#{}", index),
                    reason: "rule has no 'kind' tag".to_string(),
                })?;
            if RuleKind::from_tag(tag).is_none() {
                return Err(EtlError::UnsupportedRule {
                    rule: format!("#{} {}", index, tag),
                    reason: "rule kind is not in the catalog".to_string(),
                });
            }
            serde_json::from_value(item.clone()).map_err(|e| EtlError::UnsupportedRule {
                rule: format!("#{} {}", index, tag),
                reason: e.to_string(),
            })
        })
        .collect()
}
