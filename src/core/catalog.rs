use crate::core::rules::{OnErrorPolicy, RuleKind, TargetType};
use crate::domain::model::{CellValue, FieldPath};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{validate_non_empty_string, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Structural features the planner recognizes, in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heuristic {
    NestedObjectPrefix,
    KnownPrefixAliases,
    ArrayField,
    PathMissingInSummary,
    NumericTargetColumn,
}

impl Heuristic {
    pub const ALL: [Heuristic; 5] = [
        Heuristic::NestedObjectPrefix,
        Heuristic::KnownPrefixAliases,
        Heuristic::ArrayField,
        Heuristic::PathMissingInSummary,
        Heuristic::NumericTargetColumn,
    ];

    pub fn emits(&self) -> RuleKind {
        match self {
            Heuristic::NestedObjectPrefix => RuleKind::Flatten,
            Heuristic::KnownPrefixAliases => RuleKind::Rename,
            Heuristic::ArrayField => RuleKind::Drop,
            Heuristic::PathMissingInSummary => RuleKind::FillDefault,
            Heuristic::NumericTargetColumn => RuleKind::CoerceType,
        }
    }
}

/// Short name for the columns under an object path, e.g. `payment` → `pay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixAlias {
    pub prefix: String,
    pub alias: String,
    /// Higher wins when several aliases match one column.
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnErrorKind {
    CoerceToDefault,
    DropRow,
    FailFast,
}

/// Columns whose values should be converted to a scalar type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoercionSpec {
    /// Regular expression matched against the whole final column name.
    pub column: String,
    pub target: TargetType,
    #[serde(default = "default_on_error")]
    pub on_error: OnErrorKind,
    #[serde(default)]
    pub default: Option<CellValue>,
    #[serde(default)]
    pub priority: i32,
}

fn default_on_error() -> OnErrorKind {
    OnErrorKind::CoerceToDefault
}

impl CoercionSpec {
    pub fn matcher(&self) -> Result<Regex> {
        Regex::new(&format!("^(?:{})$", self.column)).map_err(|e| EtlError::InvalidConfigValueError {
            field: "catalog.coercions.column".to_string(),
            value: self.column.clone(),
            reason: format!("Invalid column pattern: {}", e),
        })
    }

    pub fn policy(&self) -> OnErrorPolicy {
        match self.on_error {
            OnErrorKind::CoerceToDefault => OnErrorPolicy::CoerceToDefault {
                default: self.default.clone().unwrap_or(CellValue::Null),
            },
            OnErrorKind::DropRow => OnErrorPolicy::DropRow,
            OnErrorKind::FailFast => OnErrorPolicy::FailFast,
        }
    }
}

/// Configuration of the heuristics the planner may apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleCatalog {
    pub separator: String,
    pub heuristics: Vec<Heuristic>,
    pub prefix_aliases: Vec<PrefixAlias>,
    /// Expected output columns and the value used when a row lacks them.
    pub defaults: BTreeMap<String, CellValue>,
    pub coercions: Vec<CoercionSpec>,
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self {
            separator: "_".to_string(),
            heuristics: Heuristic::ALL.to_vec(),
            prefix_aliases: vec![
                PrefixAlias {
                    prefix: "customer.details".to_string(),
                    alias: "cust".to_string(),
                    priority: 20,
                },
                PrefixAlias {
                    prefix: "customer".to_string(),
                    alias: "cust".to_string(),
                    priority: 10,
                },
                PrefixAlias {
                    prefix: "payment".to_string(),
                    alias: "pay".to_string(),
                    priority: 10,
                },
            ],
            defaults: BTreeMap::from([(
                "discount_code".to_string(),
                CellValue::Text("NONE".to_string()),
            )]),
            coercions: vec![CoercionSpec {
                column: "total_amount".to_string(),
                target: TargetType::Float,
                on_error: OnErrorKind::CoerceToDefault,
                default: Some(CellValue::Float(0.0)),
                priority: 0,
            }],
        }
    }
}

impl RuleCatalog {
    /// A catalog with no heuristics; useful as a base for explicit configuration.
    pub fn empty() -> Self {
        Self {
            separator: "_".to_string(),
            heuristics: Vec::new(),
            prefix_aliases: Vec::new(),
            defaults: BTreeMap::new(),
            coercions: Vec::new(),
        }
    }

    /// 從 TOML 檔案載入規則目錄
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EtlError::ConfigValidationError {
            field: "catalog".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    pub fn is_enabled(&self, heuristic: Heuristic) -> bool {
        self.heuristics.contains(&heuristic)
    }

    pub fn alias_paths(&self) -> Result<Vec<(FieldPath, &PrefixAlias)>> {
        self.prefix_aliases
            .iter()
            .map(|a| FieldPath::parse(&a.prefix).map(|p| (p, a)))
            .collect()
    }

    pub fn compiled_coercions(&self) -> Result<Vec<(Regex, &CoercionSpec)>> {
        self.coercions
            .iter()
            .map(|spec| spec.matcher().map(|re| (re, spec)))
            .collect()
    }
}

impl Validate for RuleCatalog {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("catalog.separator", &self.separator)?;

        for alias in &self.prefix_aliases {
            FieldPath::parse(&alias.prefix)?;
            validate_non_empty_string("catalog.prefix_aliases.alias", &alias.alias)?;
        }

        for (column, value) in &self.defaults {
            validate_non_empty_string("catalog.defaults", column)?;
            if matches!(value, CellValue::Null | CellValue::Array(_)) {
                return Err(EtlError::InvalidConfigValueError {
                    field: format!("catalog.defaults.{}", column),
                    value: value.to_string(),
                    reason: "Default values must be non-null scalars".to_string(),
                });
            }
        }

        for spec in &self.coercions {
            spec.matcher()?;
            if spec.on_error == OnErrorKind::CoerceToDefault {
                let default = spec.default.as_ref().ok_or_else(|| EtlError::MissingConfigError {
                    field: format!("catalog.coercions[{}].default", spec.column),
                })?;
                spec.target
                    .coerce(default)
                    .map_err(|reason| EtlError::InvalidConfigValueError {
                        field: format!("catalog.coercions[{}].default", spec.column),
                        value: default.to_string(),
                        reason,
                    })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_is_valid() {
        let catalog = RuleCatalog::default();
        assert!(catalog.validate().is_ok());
        assert_eq!(catalog.heuristics.len(), 5);
        assert!(catalog.is_enabled(Heuristic::ArrayField));
    }

    #[test]
    fn test_heuristic_priority_follows_rule_order() {
        let kinds: Vec<RuleKind> = Heuristic::ALL.iter().map(Heuristic::emits).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);
    }

    #[test]
    fn test_catalog_from_toml() {
        let content = r#"
separator = "__"
heuristics = ["nested_object_prefix", "array_field"]

[[prefix_aliases]]
prefix = "shipping.address"
alias = "ship"

[defaults]
coupon = "NONE"
quantity = 1

[[coercions]]
column = ".*_amount"
target = "float"
on_error = "drop-row"
"#;

        let catalog = RuleCatalog::from_toml_str(content).unwrap();

        assert_eq!(catalog.separator, "__");
        assert!(!catalog.is_enabled(Heuristic::KnownPrefixAliases));
        assert_eq!(catalog.prefix_aliases[0].priority, 0);
        assert_eq!(catalog.defaults.get("quantity"), Some(&CellValue::Integer(1)));
        assert_eq!(catalog.coercions[0].policy(), OnErrorPolicy::DropRow);
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn test_catalog_validation_rejects_bad_entries() {
        let mut catalog = RuleCatalog::empty();
        catalog.coercions.push(CoercionSpec {
            column: "total_amount".to_string(),
            target: TargetType::Float,
            on_error: OnErrorKind::CoerceToDefault,
            default: Some(CellValue::Text("zero".to_string())),
            priority: 0,
        });
        assert!(catalog.validate().is_err());

        let mut catalog = RuleCatalog::empty();
        catalog.coercions.push(CoercionSpec {
            column: "(unclosed".to_string(),
            target: TargetType::Float,
            on_error: OnErrorKind::FailFast,
            default: None,
            priority: 0,
        });
        assert!(catalog.validate().is_err());

        let mut catalog = RuleCatalog::empty();
        catalog.defaults.insert("code".to_string(), CellValue::Null);
        assert!(catalog.validate().is_err());
    }
}
