use crate::core::rules::{OnErrorPolicy, Rule};
use crate::core::synthesizer::{Step, TransformationUnit};
use crate::domain::model::{
    CellValue, ExecutionReport, IssueResolution, Outcome, RawRecord, Row, RowIssue,
    RuleApplication, TabularResult,
};
use crate::utils::error::{EtlError, Result};

/// Table and report produced by one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub table: TabularResult,
    pub report: ExecutionReport,
}

/// Runs a transformation unit over a batch.
///
/// Row-level coercion failures are handled by the rule's on-error policy and
/// recorded in the report. Only a fail-fast rule stops the batch; it returns
/// `ExecutionAborted` carrying the failure report and no table.
pub fn execute(unit: &TransformationUnit, batch: &[RawRecord]) -> Result<Execution> {
    let mut applied = vec![0usize; unit.len()];
    let mut issues = Vec::new();
    let mut rows = Vec::with_capacity(batch.len());
    let mut dropped_rows = 0;

    'rows: for (row_index, record) in batch.iter().enumerate() {
        let mut row = normalize(record);

        for (index, rule, step) in unit.steps() {
            let message = match apply_step(step, &mut row) {
                Ok(true) => {
                    applied[index] += 1;
                    continue;
                }
                Ok(false) => continue,
                Err(message) => message,
            };

            let Step::Coerce { column, on_error, .. } = step else {
                continue;
            };
            let mut issue = RowIssue {
                row: row_index,
                rule_index: index,
                rule: rule.to_string(),
                column: column.clone(),
                message,
                resolution: IssueResolution::Defaulted,
            };

            match on_error {
                OnErrorPolicy::CoerceToDefault { default } => {
                    tracing::debug!("⚙️ {}; using default {}", issue.to_error(), default);
                    row.insert(column.clone(), default.clone());
                    issues.push(issue);
                }
                OnErrorPolicy::DropRow => {
                    tracing::debug!("⚙️ {}; dropping row", issue.to_error());
                    issue.resolution = IssueResolution::RowDropped;
                    issues.push(issue);
                    dropped_rows += 1;
                    continue 'rows;
                }
                OnErrorPolicy::FailFast => {
                    issue.resolution = IssueResolution::Aborted;
                    issues.push(issue.clone());
                    let report = ExecutionReport {
                        outcome: Outcome::Failure,
                        input_rows: batch.len(),
                        row_count: 0,
                        dropped_rows,
                        rule_applications: applications(unit, &applied),
                        issues,
                        error: Some(issue),
                    };
                    tracing::error!("⚙️ Execution aborted: {}", report.failure_message());
                    return Err(EtlError::ExecutionAborted {
                        report: Box::new(report),
                    });
                }
            }
        }

        rows.push(row);
    }

    let table = TabularResult::from_rows(rows, &unit.required_columns());
    let report = ExecutionReport {
        outcome: Outcome::Success,
        input_rows: batch.len(),
        row_count: table.len(),
        dropped_rows,
        rule_applications: applications(unit, &applied),
        issues,
        error: None,
    };

    tracing::info!(
        "⚙️ Transformed {} of {} records into {} columns ({} issues recovered)",
        report.row_count,
        report.input_rows,
        table.columns().len(),
        report.issues.len()
    );

    Ok(Execution { table, report })
}

fn applications(unit: &TransformationUnit, applied: &[usize]) -> Vec<RuleApplication> {
    unit.rules()
        .iter()
        .enumerate()
        .map(|(rule_index, rule): (usize, &Rule)| RuleApplication {
            rule_index,
            rule: rule.to_string(),
            applied: applied[rule_index],
        })
        .collect()
}

/// Flattens a record into dotted leaf columns in document order.
/// Arrays stay whole; empty objects contribute nothing.
fn normalize(record: &RawRecord) -> Row {
    let mut row = Row::new();
    collect_leaves(&record.data, "", &mut row);
    row
}

fn collect_leaves(object: &serde_json::Map<String, serde_json::Value>, prefix: &str, row: &mut Row) {
    for (key, value) in object {
        let column = format!("{}{}", prefix, key);
        match value {
            serde_json::Value::Object(nested) => {
                collect_leaves(nested, &format!("{}.", column), row);
            }
            serde_json::Value::Null => {
                row.insert(column, CellValue::Null);
            }
            serde_json::Value::Bool(b) => {
                row.insert(column, CellValue::Bool(*b));
            }
            serde_json::Value::Number(n) => {
                let cell = match n.as_i64() {
                    Some(i) => CellValue::Integer(i),
                    None => CellValue::Float(n.as_f64().unwrap_or(f64::NAN)),
                };
                row.insert(column, cell);
            }
            serde_json::Value::String(s) => {
                row.insert(column, CellValue::Text(s.clone()));
            }
            serde_json::Value::Array(items) => {
                row.insert(column, CellValue::Array(items.clone()));
            }
        }
    }
}

/// Moves `from` to `to` in place; an existing `to` is never overwritten.
fn move_column(row: &mut Row, from: &str, to: String) -> bool {
    if row.contains_key(&to) {
        tracing::debug!("⚙️ Column '{}' already present, '{}' keeps its name", to, from);
        return false;
    }
    match row.shift_remove_full(from) {
        Some((position, _, value)) => {
            row.shift_insert(position, to, value);
            true
        }
        None => false,
    }
}

/// Applies one step; `Ok(true)` when the row changed, `Err` on a coercion failure.
fn apply_step(step: &Step, row: &mut Row) -> std::result::Result<bool, String> {
    match step {
        Step::Flatten {
            prefix,
            replacement,
            except,
        } => {
            let keys: Vec<String> = row
                .keys()
                .filter(|k| k.starts_with(prefix.as_str()) && !except.contains(*k))
                .cloned()
                .collect();
            let mut moved = false;
            for key in keys {
                let target = format!("{}{}", replacement, &key[prefix.len()..]);
                moved |= move_column(row, &key, target);
            }
            Ok(moved)
        }
        Step::Rename { from, to } => Ok(move_column(row, from, to.clone())),
        Step::Drop { column } => Ok(row.shift_remove(column).is_some()),
        Step::FillDefault { column, value } => match row.get_mut(column) {
            Some(existing) if existing.is_null() => {
                *existing = value.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                row.insert(column.clone(), value.clone());
                Ok(true)
            }
        },
        Step::Coerce { column, target, .. } => {
            let current = row.get(column).unwrap_or(&CellValue::Null);
            let converted = target.coerce(current)?;
            row.insert(column.clone(), converted);
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::TargetType;
    use crate::core::synthesizer::synthesize;
    use crate::domain::model::FieldPath;
    use serde_json::json;

    fn batch(values: Vec<serde_json::Value>) -> Vec<RawRecord> {
        values.into_iter().filter_map(RawRecord::from_value).collect()
    }

    fn coerce_amount(on_error: OnErrorPolicy) -> Rule {
        Rule::CoerceType {
            column: "total_amount".to_string(),
            target: TargetType::Float,
            on_error,
        }
    }

    fn to_default() -> OnErrorPolicy {
        OnErrorPolicy::CoerceToDefault {
            default: CellValue::Float(0.0),
        }
    }

    #[test]
    fn test_flatten_prefix_mapping_yields_short_column() {
        let unit = synthesize(&[Rule::Flatten {
            prefix: FieldPath::parse("customer.details").unwrap(),
            replacement: "cust_".to_string(),
            except: Vec::new(),
        }])
        .unwrap();
        let records = batch(vec![json!({"order_id": 1, "customer": {"details": {"name": "Ada"}}})]);

        let execution = execute(&unit, &records).unwrap();

        assert_eq!(execution.table.columns(), &["order_id", "cust_name"]);
        assert_eq!(
            execution.table.rows()[0].get("cust_name"),
            Some(&CellValue::Text("Ada".to_string()))
        );
        assert_eq!(execution.report.applied(0), Some(1));

        // 已攤平的欄位不會被還原成巢狀結構
        let again = batch(vec![json!({"order_id": 1, "cust_name": "Ada"})]);
        let rerun = execute(&unit, &again).unwrap();
        assert_eq!(rerun.table.columns(), &["order_id", "cust_name"]);
        assert_eq!(rerun.report.applied(0), Some(0));
    }

    #[test]
    fn test_fill_default_for_missing_and_null() {
        let unit = synthesize(&[Rule::FillDefault {
            column: "discount_code".to_string(),
            value: CellValue::Text("NONE".to_string()),
        }])
        .unwrap();
        let records = batch(vec![
            json!({"order_id": 1}),
            json!({"order_id": 2, "discount_code": null}),
            json!({"order_id": 3, "discount_code": "SAVE10"}),
        ]);

        let execution = execute(&unit, &records).unwrap();

        let codes: Vec<&CellValue> = execution.table.column_values("discount_code").collect();
        assert_eq!(
            codes,
            vec![
                &CellValue::Text("NONE".to_string()),
                &CellValue::Text("NONE".to_string()),
                &CellValue::Text("SAVE10".to_string()),
            ]
        );
        assert_eq!(execution.report.applied(0), Some(2));
    }

    #[test]
    fn test_coercion_with_default_never_raises() {
        let unit = synthesize(&[coerce_amount(to_default())]).unwrap();
        let records = batch(vec![
            json!({"total_amount": "12.5"}),
            json!({"total_amount": "abc"}),
            json!({"total_amount": null}),
            json!({}),
            json!({"total_amount": 7}),
        ]);

        let execution = execute(&unit, &records).unwrap();

        let amounts: Vec<&CellValue> = execution.table.column_values("total_amount").collect();
        assert_eq!(
            amounts,
            vec![
                &CellValue::Float(12.5),
                &CellValue::Float(0.0),
                &CellValue::Float(0.0),
                &CellValue::Float(0.0),
                &CellValue::Float(7.0),
            ]
        );
        assert!(execution.report.is_success());
        assert_eq!(execution.report.issues.len(), 3);
        assert_eq!(execution.report.issues[0].row, 1);
        assert_eq!(execution.report.issues[0].resolution, IssueResolution::Defaulted);
        assert_eq!(execution.report.applied(0), Some(2));
    }

    #[test]
    fn test_drop_row_policy_removes_only_bad_rows() {
        let unit = synthesize(&[coerce_amount(OnErrorPolicy::DropRow)]).unwrap();
        let records = batch(vec![
            json!({"id": 1, "total_amount": "1.5"}),
            json!({"id": 2, "total_amount": "oops"}),
            json!({"id": 3, "total_amount": 3}),
        ]);

        let execution = execute(&unit, &records).unwrap();

        assert_eq!(execution.table.len(), 2);
        assert_eq!(execution.report.row_count, 2);
        assert_eq!(execution.report.dropped_rows, 1);
        assert_eq!(execution.report.issues[0].resolution, IssueResolution::RowDropped);
        let ids: Vec<&CellValue> = execution.table.column_values("id").collect();
        assert_eq!(ids, vec![&CellValue::Integer(1), &CellValue::Integer(3)]);
    }

    #[test]
    fn test_fail_fast_aborts_with_failure_report() {
        let unit = synthesize(&[coerce_amount(OnErrorPolicy::FailFast)]).unwrap();
        let records = batch(vec![
            json!({"total_amount": "1"}),
            json!({"total_amount": "bad"}),
            json!({"total_amount": "also bad"}),
        ]);

        let err = execute(&unit, &records).unwrap_err();

        match err {
            EtlError::ExecutionAborted { report } => {
                assert_eq!(report.outcome, Outcome::Failure);
                assert_eq!(report.row_count, 0);
                let failure = report.error.as_ref().unwrap();
                assert_eq!(failure.row, 1);
                assert_eq!(failure.column, "total_amount");
                assert_eq!(report.applied(0), Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_execution_is_idempotent() {
        let unit = synthesize(&[
            Rule::Flatten {
                prefix: FieldPath::parse("payment").unwrap(),
                replacement: "pay_".to_string(),
                except: Vec::new(),
            },
            Rule::Drop {
                column: "items".to_string(),
            },
            coerce_amount(to_default()),
        ])
        .unwrap();
        let records = batch(vec![
            json!({"payment": {"method": "card"}, "items": [1], "total_amount": "3"}),
            json!({"payment": {"method": "cash"}, "total_amount": "x"}),
        ]);

        let first = execute(&unit, &records).unwrap();
        let second = execute(&unit, &records).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_flatten_leaves_kept_paths_in_every_row() {
        let unit = synthesize(&[
            Rule::Flatten {
                prefix: FieldPath::parse("a").unwrap(),
                replacement: "a_".to_string(),
                except: vec![FieldPath::parse("a.b").unwrap()],
            },
            Rule::Drop {
                column: "a.b".to_string(),
            },
        ])
        .unwrap();
        // 第二筆沒有 a_b，a.b 仍維持原名並被移除
        let records = batch(vec![
            json!({"a_b": 5, "a": {"b": [1, 2], "c": 1}}),
            json!({"a": {"b": [3], "c": 2}}),
        ]);

        let execution = execute(&unit, &records).unwrap();

        assert_eq!(execution.table.columns(), &["a_b", "a_c"]);
        let rows = execution.table.rows();
        assert_eq!(rows[0].get("a_b"), Some(&CellValue::Integer(5)));
        assert_eq!(rows[1].get("a_b"), Some(&CellValue::Null));
        assert_eq!(rows[1].get("a_c"), Some(&CellValue::Integer(2)));
        assert_eq!(execution.report.applied(1), Some(2));
    }

    #[test]
    fn test_rename_never_overwrites_existing_column() {
        let unit = synthesize(&[Rule::Rename {
            from: "a".to_string(),
            to: "b".to_string(),
        }])
        .unwrap();
        let records = batch(vec![json!({"a": 1, "b": 2})]);

        let execution = execute(&unit, &records).unwrap();

        let row = &execution.table.rows()[0];
        assert_eq!(row.get("a"), Some(&CellValue::Integer(1)));
        assert_eq!(row.get("b"), Some(&CellValue::Integer(2)));
        assert_eq!(execution.report.applied(0), Some(0));
    }

    #[test]
    fn test_empty_batch_still_has_required_columns() {
        let unit = synthesize(&[Rule::FillDefault {
            column: "discount_code".to_string(),
            value: CellValue::Text("NONE".to_string()),
        }])
        .unwrap();

        let execution = execute(&unit, &[]).unwrap();

        assert!(execution.table.is_empty());
        assert_eq!(execution.table.columns(), &["discount_code"]);
    }
}
