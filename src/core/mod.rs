pub mod catalog;
pub mod etl;
pub mod executor;
pub mod loader;
pub mod planner;
pub mod profiler;
pub mod rules;
pub mod synthesizer;

pub use crate::domain::model::{RawRecord, TransformResult};
pub use crate::domain::ports::{ConfigProvider, Pipeline, RulePlanner, Storage, TableStore};
pub use crate::utils::error::Result;
