use crate::core::rules::{OnErrorPolicy, Rule, RuleKind, TargetType};
use crate::domain::model::CellValue;
use crate::utils::error::{EtlError, Result};

/// Compiled form of one rule.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    /// `prefix` carries the trailing `.`
    Flatten {
        prefix: String,
        replacement: String,
        except: Vec<String>,
    },
    Rename { from: String, to: String },
    Drop { column: String },
    FillDefault { column: String, value: CellValue },
    Coerce {
        column: String,
        target: TargetType,
        on_error: OnErrorPolicy,
    },
}

/// An ordered rule list bound into one executable pipeline.
///
/// Immutable once built and stateless: the same batch always produces the
/// same table.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformationUnit {
    rules: Vec<Rule>,
    steps: Vec<Step>,
}

impl TransformationUnit {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn has_fail_fast(&self) -> bool {
        self.rules.iter().any(Rule::is_fail_fast)
    }

    /// Columns the output schema must contain even when no row carries them.
    pub fn required_columns(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::FillDefault { column, .. } => Some(column.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn steps(&self) -> impl Iterator<Item = (usize, &Rule, &Step)> {
        self.rules
            .iter()
            .zip(self.steps.iter())
            .enumerate()
            .map(|(index, (rule, step))| (index, rule, step))
    }
}

/// Binds an ordered rule list into a transformation unit.
///
/// Never looks at data. Rejects rules out of stage order and rules whose
/// parameters cannot be executed, whichever planner produced them.
pub fn synthesize(rules: &[Rule]) -> Result<TransformationUnit> {
    let mut steps = Vec::with_capacity(rules.len());
    let mut stage = RuleKind::Flatten;

    for (index, rule) in rules.iter().enumerate() {
        if rule.kind() < stage {
            return Err(unsupported(
                index,
                rule,
                format!(
                    "{} rules must come before {} rules",
                    rule.kind().as_str(),
                    stage.as_str()
                ),
            ));
        }
        stage = rule.kind();
        steps.push(compile(index, rule)?);
    }

    tracing::debug!("🧩 Synthesized transformation unit with {} steps", steps.len());

    Ok(TransformationUnit {
        rules: rules.to_vec(),
        steps,
    })
}

fn compile(index: usize, rule: &Rule) -> Result<Step> {
    let step = match rule {
        Rule::Flatten {
            prefix,
            replacement,
            except,
        } => {
            let outside = except
                .iter()
                .find(|path| path.depth() <= prefix.depth() || !path.starts_with(prefix));
            if let Some(outside) = outside {
                return Err(unsupported(
                    index,
                    rule,
                    format!("kept path '{}' is not under the prefix", outside),
                ));
            }
            Step::Flatten {
                prefix: format!("{}.", prefix),
                replacement: replacement.clone(),
                except: except.iter().map(|path| path.to_string()).collect(),
            }
        }
        Rule::Rename { from, to } => {
            if from.is_empty() || to.is_empty() {
                return Err(unsupported(index, rule, "rename needs both column names".to_string()));
            }
            if from == to {
                return Err(unsupported(index, rule, "rename source and target are equal".to_string()));
            }
            Step::Rename {
                from: from.clone(),
                to: to.clone(),
            }
        }
        Rule::Drop { column } => Step::Drop {
            column: non_empty(index, rule, column)?,
        },
        Rule::FillDefault { column, value } => {
            if matches!(value, CellValue::Null | CellValue::Array(_)) {
                return Err(unsupported(
                    index,
                    rule,
                    "fill value must be a non-null scalar".to_string(),
                ));
            }
            Step::FillDefault {
                column: non_empty(index, rule, column)?,
                value: value.clone(),
            }
        }
        Rule::CoerceType {
            column,
            target,
            on_error,
        } => {
            if let OnErrorPolicy::CoerceToDefault { default } = on_error {
                if !default.is_null() {
                    target.coerce(default).map_err(|reason| {
                        unsupported(index, rule, format!("default does not fit the target: {}", reason))
                    })?;
                }
            }
            Step::Coerce {
                column: non_empty(index, rule, column)?,
                target: *target,
                on_error: on_error.clone(),
            }
        }
    };
    Ok(step)
}

fn non_empty(index: usize, rule: &Rule, column: &str) -> Result<String> {
    if column.is_empty() {
        return Err(unsupported(index, rule, "column name is empty".to_string()));
    }
    Ok(column.to_string())
}

fn unsupported(index: usize, rule: &Rule, reason: String) -> EtlError {
    EtlError::UnsupportedRule {
        rule: format!("#{} {}", index, rule),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::parse_rules;
    use crate::domain::model::FieldPath;
    use serde_json::json;

    fn drop_rule(column: &str) -> Rule {
        Rule::Drop {
            column: column.to_string(),
        }
    }

    #[test]
    fn test_synthesize_keeps_rule_order() {
        let rules = vec![
            Rule::Flatten {
                prefix: FieldPath::parse("customer").unwrap(),
                replacement: "cust_".to_string(),
                except: Vec::new(),
            },
            drop_rule("items"),
            Rule::FillDefault {
                column: "discount_code".to_string(),
                value: CellValue::Text("NONE".to_string()),
            },
        ];

        let unit = synthesize(&rules).unwrap();

        assert_eq!(unit.rules(), rules.as_slice());
        assert_eq!(unit.required_columns(), vec!["discount_code".to_string()]);
        assert!(!unit.has_fail_fast());
    }

    #[test]
    fn test_synthesize_rejects_out_of_order_rules() {
        let rules = vec![
            drop_rule("items"),
            Rule::Rename {
                from: "a".to_string(),
                to: "b".to_string(),
            },
        ];

        let err = synthesize(&rules).unwrap_err();

        match err {
            EtlError::UnsupportedRule { rule, reason } => {
                assert_eq!(rule, "#1 rename(a -> b)");
                assert!(reason.contains("before drop"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_synthesize_rejects_bad_parameters() {
        assert!(synthesize(&[drop_rule("")]).is_err());
        assert!(synthesize(&[Rule::Flatten {
            prefix: FieldPath::parse("a").unwrap(),
            replacement: "a_".to_string(),
            except: vec![FieldPath::parse("b.c").unwrap()],
        }])
        .is_err());
        assert!(synthesize(&[Rule::FillDefault {
            column: "code".to_string(),
            value: CellValue::Null,
        }])
        .is_err());
        assert!(synthesize(&[Rule::CoerceType {
            column: "amount".to_string(),
            target: TargetType::Float,
            on_error: OnErrorPolicy::CoerceToDefault {
                default: CellValue::Text("zero".to_string()),
            },
        }])
        .is_err());
    }

    #[test]
    fn test_externally_planned_rules_pass_the_same_checks() {
        let document = json!([
            {"kind": "coerce_type", "column": "total_amount", "target": "float",
             "on_error": {"policy": "fail-fast"}},
            {"kind": "drop", "column": "items"}
        ]);

        let rules = parse_rules(&document).unwrap();

        assert!(synthesize(&rules).is_err());
    }
}
