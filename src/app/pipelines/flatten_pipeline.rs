use crate::core::executor::execute;
use crate::core::loader::{Loader, Query};
use crate::core::planner::CatalogPlanner;
use crate::core::profiler::profile;
use crate::core::synthesizer::synthesize;
use crate::core::{ConfigProvider, Pipeline, RawRecord, RulePlanner, Storage, TableStore, TransformResult};
use crate::domain::model::{CellValue, LoadOutcome, QueryResult, TabularResult};
use crate::utils::error::{EtlError, Result};

/// Reads a JSON array of events, flattens it and loads it into a table store.
pub struct FlattenPipeline<S: Storage, C: ConfigProvider, T: TableStore, P: RulePlanner = CatalogPlanner> {
    pub(crate) storage: S,
    pub(crate) config: C,
    pub(crate) loader: Loader<T>,
    pub(crate) planner: P,
}

impl<S: Storage, C: ConfigProvider, T: TableStore> FlattenPipeline<S, C, T> {
    /// Plans with the catalog carried by the configuration.
    pub fn new(storage: S, config: C, store: T) -> Self {
        let planner = CatalogPlanner::new(config.catalog().clone());
        Self::with_planner(storage, config, store, planner)
    }
}

impl<S: Storage, C: ConfigProvider, T: TableStore, P: RulePlanner> FlattenPipeline<S, C, T, P> {
    pub fn with_planner(storage: S, config: C, store: T, planner: P) -> Self {
        Self {
            storage,
            config,
            loader: Loader::new(store),
            planner,
        }
    }

    pub fn loader(&self) -> &Loader<T> {
        &self.loader
    }

    fn verification_query(&self) -> Query {
        if self.config.verify_columns().is_empty() {
            Query::all()
        } else {
            Query::projection(self.config.verify_columns().iter().cloned())
        }
    }
}

fn ingestion_error(path: &str, message: String) -> EtlError {
    EtlError::Ingestion {
        source_name: path.to_string(),
        message,
    }
}

/// Parses a JSON document holding an array of objects.
pub fn parse_records(path: &str, bytes: &[u8]) -> Result<Vec<RawRecord>> {
    let document: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| ingestion_error(path, format!("malformed JSON: {}", e)))?;

    let serde_json::Value::Array(items) = document else {
        return Err(ingestion_error(path, "expected a JSON array of records".to_string()));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            serde_json::Value::Object(data) => Ok(RawRecord::new(data)),
            other => Err(ingestion_error(
                path,
                format!("record {} is not an object ({})", index, json_kind(&other)),
            )),
        })
        .collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn write_csv<'a, I, R>(columns: &[String], rows: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = &'a CellValue>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;
    for row in rows {
        writer.write_record(row.into_iter().map(CellValue::render))?;
    }
    writer
        .into_inner()
        .map_err(|e| EtlError::IoError(e.into_error()))
}

/// CSV with a header row; nulls become empty fields.
pub fn table_to_csv(table: &TabularResult) -> Result<Vec<u8>> {
    write_csv(table.columns(), table.rows().iter().map(|row| row.values()))
}

pub fn query_to_csv(result: &QueryResult) -> Result<Vec<u8>> {
    write_csv(&result.columns, result.rows.iter())
}

#[async_trait::async_trait]
impl<S: Storage, C: ConfigProvider, T: TableStore, P: RulePlanner> Pipeline for FlattenPipeline<S, C, T, P> {
    async fn extract(&self) -> Result<Vec<RawRecord>> {
        let path = self.config.input_path();
        tracing::debug!("📥 Reading events from {}", path);

        let bytes = self
            .storage
            .read_file(path)
            .await
            .map_err(|e| ingestion_error(path, e.to_string()))?;

        parse_records(path, &bytes)
    }

    async fn transform(&self, data: Vec<RawRecord>) -> Result<TransformResult> {
        let sample_count = self.config.sample_size().min(data.len());
        let summary = profile(&data[..sample_count])?;
        tracing::info!(
            "🔍 Profiled {} sample(s): {} fields, max depth {}",
            summary.sample_count,
            summary.len(),
            summary.max_depth()
        );

        let plan = self.planner.plan(&summary)?;
        for rule in &plan.rules {
            tracing::info!("💡 {}", rule);
        }

        let unit = synthesize(&plan.rules)?;
        let execution = execute(&unit, &data)?;

        Ok(TransformResult {
            summary,
            plan,
            table: execution.table,
            report: execution.report,
        })
    }

    async fn load(&self, table: TabularResult) -> Result<LoadOutcome> {
        let handle = self
            .loader
            .load(&table, self.config.table_name(), self.config.overwrite())
            .await?;
        let verification = self.loader.verify(&handle, &self.verification_query()).await?;

        if let Some(path) = self.config.export_path() {
            let bytes = table_to_csv(&table)?;
            self.storage
                .write_file(path, &bytes)
                .await
                .map_err(|e| EtlError::ExportFailed {
                    path: path.to_string(),
                    message: e.to_string(),
                })?;
            tracing::info!("📁 Exported {} rows to {}", table.len(), path);
        }

        Ok(LoadOutcome { handle, verification })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite_store::SqliteTableStore;
    use crate::config::cli::LocalStorage;
    use crate::config::CliConfig;
    use crate::core::planner::Plan;
    use crate::core::rules::parse_rules;
    use crate::domain::model::StructuralSummary;
    use clap::Parser;
    use serde_json::json;
    use tempfile::TempDir;

    const ORDERS: &str = r#"[
        {"order_id": 1, "customer": {"details": {"name": "Ada"}}, "items": [{"sku": "A"}], "total_amount": "12.5"},
        {"order_id": 2, "customer": {"details": {"name": "Bob"}}, "discount_code": "SAVE10", "total_amount": "abc"}
    ]"#;

    async fn pipeline(dir: &TempDir, args: &[&str]) -> FlattenPipeline<LocalStorage, CliConfig, SqliteTableStore> {
        let mut argv = vec!["flatten-etl"];
        argv.extend_from_slice(args);
        FlattenPipeline::new(
            LocalStorage::new(dir.path()),
            CliConfig::parse_from(argv),
            SqliteTableStore::in_memory().await.unwrap(),
        )
    }

    #[test]
    fn test_parse_records_rejects_bad_documents() {
        assert!(matches!(
            parse_records("d.json", b"{not json"),
            Err(EtlError::Ingestion { .. })
        ));
        assert!(matches!(
            parse_records("d.json", br#"{"order_id": 1}"#),
            Err(EtlError::Ingestion { .. })
        ));
        match parse_records("d.json", br#"[{"a": 1}, 2]"#) {
            Err(EtlError::Ingestion { message, .. }) => assert!(message.contains("record 1")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(parse_records("d.json", b"[]").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_input_is_ingestion_error() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, &[]).await;

        let err = pipeline.extract().await.unwrap_err();

        assert!(matches!(err, EtlError::Ingestion { .. }));
    }

    #[tokio::test]
    async fn test_transform_and_load_orders() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("data.json"), ORDERS).unwrap();
        let pipeline = pipeline(
            &dir,
            &[
                "--verify-columns",
                "order_id,cust_name,total_amount,discount_code",
                "--export-csv",
                "out/orders.csv",
            ],
        )
        .await;

        let records = pipeline.extract().await.unwrap();
        let result = pipeline.transform(records).await.unwrap();

        assert_eq!(
            result.table.columns(),
            &["order_id", "cust_name", "total_amount", "discount_code"]
        );
        assert_eq!(result.report.issues.len(), 1);

        let loaded = pipeline.load(result.table).await.unwrap();
        assert_eq!(loaded.handle.row_count, 2);
        assert_eq!(loaded.verification.columns, loaded.handle.columns);

        let csv = std::fs::read_to_string(dir.path().join("out/orders.csv")).unwrap();
        assert_eq!(
            csv,
            "order_id,cust_name,total_amount,discount_code\n1,Ada,12.5,NONE\n2,Bob,0,SAVE10\n"
        );
    }

    #[tokio::test]
    async fn test_export_failure_is_load_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("data.json"), ORDERS).unwrap();
        std::fs::write(dir.path().join("blocker"), "").unwrap();
        let pipeline = pipeline(&dir, &["--verify-columns", "*", "--export-csv", "blocker/out.csv"]).await;

        let records = pipeline.extract().await.unwrap();
        let result = pipeline.transform(records).await.unwrap();
        let err = pipeline.load(result.table).await.unwrap_err();

        match &err {
            EtlError::ExportFailed { path, .. } => assert_eq!(path, "blocker/out.csv"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.stage(), "load");
        assert!(err.user_friendly_message().contains("blocker/out.csv"));
    }

    struct FixedPlanner(serde_json::Value);

    impl RulePlanner for FixedPlanner {
        fn plan(&self, _summary: &StructuralSummary) -> Result<Plan> {
            Ok(Plan {
                rules: parse_rules(&self.0)?,
                log: Default::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_external_planner_backend() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("data.json"), ORDERS).unwrap();
        let planner = FixedPlanner(json!([
            {"kind": "drop", "column": "items"},
            {"kind": "drop", "column": "customer.details.name"}
        ]));
        let pipeline = FlattenPipeline::with_planner(
            LocalStorage::new(dir.path()),
            CliConfig::parse_from(["flatten-etl"]),
            SqliteTableStore::in_memory().await.unwrap(),
            planner,
        );

        let records = pipeline.extract().await.unwrap();
        let result = pipeline.transform(records).await.unwrap();

        assert_eq!(
            result.table.columns(),
            &["order_id", "total_amount", "discount_code"]
        );
    }
}
