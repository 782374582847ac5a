pub mod cli;
pub mod toml_config;

use crate::core::catalog::RuleCatalog;
use crate::core::ConfigProvider;
use crate::utils::error::Result;
use crate::utils::validation::{
    validate_file_extension, validate_identifier, validate_path, validate_positive_number, Validate,
};
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "flatten-etl")]
#[command(about = "Flatten nested JSON events into a verified SQL table")]
pub struct CliConfig {
    /// JSON array of event records
    #[arg(long, default_value = "data.json")]
    pub input: String,

    /// Number of leading records the schema is inferred from
    #[arg(long, default_value = "1")]
    pub sample_size: usize,

    #[arg(long, default_value = "fact_orders")]
    pub table: String,

    /// Replace an existing table even when its columns differ
    #[arg(long)]
    pub overwrite: bool,

    /// Columns projected by the verification query; `*` selects every column
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "order_id,cust_name,pay_method,discount_code,total_amount"
    )]
    pub verify_columns: Vec<String>,

    #[arg(long)]
    pub export_csv: Option<String>,

    /// TOML rule catalog replacing the built-in one
    #[arg(long)]
    pub catalog: Option<String>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub log_json: bool,

    #[arg(skip)]
    #[serde(default)]
    pub rule_catalog: RuleCatalog,
}

impl CliConfig {
    /// 若有指定 --catalog，載入外部規則目錄
    pub fn load_catalog(&mut self) -> Result<()> {
        if let Some(path) = &self.catalog {
            self.rule_catalog = RuleCatalog::from_file(path)?;
            tracing::info!("📚 Loaded rule catalog from {}", path);
        }
        Ok(())
    }
}

impl ConfigProvider for CliConfig {
    fn input_path(&self) -> &str {
        &self.input
    }

    fn sample_size(&self) -> usize {
        self.sample_size
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn overwrite(&self) -> bool {
        self.overwrite
    }

    fn verify_columns(&self) -> &[String] {
        match self.verify_columns.as_slice() {
            [all] if all == "*" => &[],
            columns => columns,
        }
    }

    fn export_path(&self) -> Option<&str> {
        self.export_csv.as_deref()
    }

    fn catalog(&self) -> &RuleCatalog {
        &self.rule_catalog
    }
}

/// Checks shared by every configuration source.
pub(crate) fn validate_provider<C: ConfigProvider + ?Sized>(config: &C) -> Result<()> {
    validate_path("input", config.input_path())?;
    validate_file_extension("input", config.input_path(), &["json"])?;
    validate_positive_number("sample_size", config.sample_size(), 1)?;
    validate_identifier("table", config.table_name())?;
    for column in config.verify_columns() {
        validate_identifier("verify_columns", column)?;
    }
    if let Some(path) = config.export_path() {
        validate_path("export_csv", path)?;
        validate_file_extension("export_csv", path, &["csv"])?;
    }
    config.catalog().validate()
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_provider(self)
    }
}
