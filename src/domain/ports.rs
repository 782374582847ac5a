use crate::core::catalog::RuleCatalog;
use crate::core::planner::Plan;
use crate::domain::model::{
    LoadOutcome, QueryResult, RawRecord, StructuralSummary, TabularResult, TransformResult,
};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn input_path(&self) -> &str;
    fn sample_size(&self) -> usize;
    fn table_name(&self) -> &str;
    fn overwrite(&self) -> bool;
    /// Columns projected by the verification query; empty means every column.
    fn verify_columns(&self) -> &[String];
    fn export_path(&self) -> Option<&str>;
    fn catalog(&self) -> &RuleCatalog;
}

/// Turns a structural summary into an ordered rule list.
///
/// The catalog rule engine is the default implementation. Any other backend
/// must hand its rules through `synthesize`, which re-checks them.
pub trait RulePlanner: Send + Sync {
    fn plan(&self, summary: &StructuralSummary) -> Result<Plan>;
}

/// Queryable tabular backing store.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Column names of an existing table, in declaration order.
    async fn table_columns(&self, name: &str) -> Result<Option<Vec<String>>>;
    async fn create_or_replace_table(&self, name: &str, table: &TabularResult) -> Result<()>;
    async fn query(&self, statement: &str) -> Result<QueryResult>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Vec<RawRecord>>;
    async fn transform(&self, data: Vec<RawRecord>) -> Result<TransformResult>;
    async fn load(&self, table: TabularResult) -> Result<LoadOutcome>;
}
