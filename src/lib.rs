pub mod adapters;
pub mod app;
#[cfg(feature = "cli")]
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::sqlite_store::SqliteTableStore;
pub use app::pipelines::FlattenPipeline;

#[cfg(feature = "cli")]
pub use config::{cli::LocalStorage, toml_config::TomlConfig, CliConfig};

pub use core::catalog::RuleCatalog;
pub use core::etl::{EtlEngine, RunSummary};
pub use core::planner::CatalogPlanner;
pub use utils::error::{EtlError, Result};
