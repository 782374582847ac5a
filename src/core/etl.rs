use crate::core::planner::Plan;
use crate::domain::model::{ExecutionReport, QueryResult, StructuralSummary, TableHandle};
use crate::domain::ports::Pipeline;
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything one run produced, from profile to verification.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input_records: usize,
    pub summary: StructuralSummary,
    pub plan: Plan,
    pub report: ExecutionReport,
    pub handle: TableHandle,
    pub verification: QueryResult,
}

impl RunSummary {
    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// Runs extract, transform and load once. A fail-fast abort surfaces
    /// from transform, so nothing is loaded for that batch.
    pub async fn run(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        tracing::info!("🚀 Starting ETL run");

        let records = self.pipeline.extract().await?;
        let input_records = records.len();
        tracing::info!("📥 Extracted {} records", input_records);

        let transformed = self.pipeline.transform(records).await?;
        tracing::info!(
            "🧩 Planned {} rules ({} conflicts resolved), produced {} rows",
            transformed.plan.rules.len(),
            transformed.plan.log.conflicts.len(),
            transformed.table.len()
        );

        let loaded = self.pipeline.load(transformed.table).await?;

        let finished_at = Utc::now();
        let summary = RunSummary {
            started_at,
            finished_at,
            input_records,
            summary: transformed.summary,
            plan: transformed.plan,
            report: transformed.report,
            handle: loaded.handle,
            verification: loaded.verification,
        };
        tracing::info!(
            "✅ ETL run finished in {} ms: table '{}' holds {} rows",
            summary.elapsed_ms(),
            summary.handle.name,
            summary.handle.row_count
        );

        Ok(summary)
    }
}
