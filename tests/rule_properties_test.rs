use anyhow::Result;
use flatten_etl::core::catalog::RuleCatalog;
use flatten_etl::core::executor::execute;
use flatten_etl::core::planner::plan;
use flatten_etl::core::profiler::profile;
use flatten_etl::core::rules::{parse_rules, RuleKind};
use flatten_etl::core::synthesizer::synthesize;
use flatten_etl::domain::model::{CellValue, RawRecord};
use flatten_etl::EtlError;
use serde_json::json;

fn records(value: serde_json::Value) -> Vec<RawRecord> {
    match value {
        serde_json::Value::Array(items) => items.into_iter().filter_map(RawRecord::from_value).collect(),
        _ => Vec::new(),
    }
}

fn orders() -> Vec<RawRecord> {
    records(json!([
        {
            "order_id": "A-1",
            "customer": {"id": 7, "details": {"name": "Ada", "email": "ada@example.com"}},
            "payment": {"method": "card"},
            "items": [{"sku": "X"}],
            "total_amount": "19.99"
        },
        {
            "order_id": "A-2",
            "customer": {"id": 8, "details": {"name": "Bob", "email": "bob@example.com"}},
            "payment": {"method": "cash"},
            "total_amount": "n/a"
        },
        {"order_id": "A-3"}
    ]))
}

#[test]
fn test_plan_respects_stage_order_and_is_deterministic() -> Result<()> {
    let batch = orders();
    let summary = profile(&batch[..1])?;
    let catalog = RuleCatalog::default();

    let first = plan(&summary, &catalog)?;
    let second = plan(&summary, &catalog)?;

    assert_eq!(first, second);
    let kinds: Vec<RuleKind> = first.rules.iter().map(|r| r.kind()).collect();
    let mut sorted = kinds.clone();
    sorted.sort();
    assert_eq!(kinds, sorted);
    assert!(!first.log.conflicts.is_empty());

    Ok(())
}

#[test]
fn test_execution_never_raises_without_fail_fast() -> Result<()> {
    let batch = orders();
    let summary = profile(&batch[..1])?;
    let unit = synthesize(&plan(&summary, &RuleCatalog::default())?.rules)?;
    assert!(!unit.has_fail_fast());

    let execution = execute(&unit, &batch)?;

    assert_eq!(execution.table.len(), 3);
    assert_eq!(
        execution.table.columns(),
        &[
            "order_id",
            "cust_id",
            "cust_name",
            "cust_email",
            "pay_method",
            "total_amount",
            "discount_code"
        ]
    );
    let amounts: Vec<&CellValue> = execution.table.column_values("total_amount").collect();
    assert_eq!(
        amounts,
        vec![&CellValue::Float(19.99), &CellValue::Float(0.0), &CellValue::Float(0.0)]
    );
    assert!(execution
        .table
        .column_values("discount_code")
        .all(|v| v == &CellValue::Text("NONE".to_string())));
    assert_eq!(execution.table.rows()[2].get("cust_name"), Some(&CellValue::Null));

    Ok(())
}

#[test]
fn test_same_batch_same_table() -> Result<()> {
    let batch = orders();
    let summary = profile(&batch[..1])?;
    let unit = synthesize(&plan(&summary, &RuleCatalog::default())?.rules)?;

    let first = execute(&unit, &batch)?;
    let second = execute(&unit, &batch)?;

    assert_eq!(first.table, second.table);
    assert_eq!(first.report, second.report);

    Ok(())
}

#[test]
fn test_external_rules_are_checked_before_execution() -> Result<()> {
    let unknown = parse_rules(&json!([{"kind": "explode", "column": "items"}])).unwrap_err();
    assert!(matches!(unknown, EtlError::UnsupportedRule { .. }));

    let rules = parse_rules(&json!([
        {"kind": "flatten", "prefix": "customer.details", "replacement": "cust_"},
        {"kind": "fill_default", "column": "discount_code", "value": "NONE"}
    ]))?;
    let unit = synthesize(&rules)?;
    let execution = execute(&unit, &orders())?;

    assert_eq!(
        execution.table.rows()[0].get("cust_name"),
        Some(&CellValue::Text("Ada".to_string()))
    );
    assert_eq!(execution.report.applied(1), Some(3));

    Ok(())
}

#[test]
fn test_flatten_collision_keeps_existing_column() -> Result<()> {
    let batch = records(json!([
        {"a_b": 5, "a": {"b": [1, 2]}},
        {"a": {"b": [3]}}
    ]));
    let summary = profile(&batch[..1])?;
    let plan = plan(&summary, &RuleCatalog::default())?;
    let unit = synthesize(&plan.rules)?;

    let execution = execute(&unit, &batch)?;

    assert_eq!(execution.table.columns(), &["a_b", "discount_code"]);
    let kept: Vec<&CellValue> = execution.table.column_values("a_b").collect();
    assert_eq!(kept, vec![&CellValue::Integer(5), &CellValue::Null]);
    assert!(!execution.table.has_column("a.b"));

    Ok(())
}
