pub mod flatten_pipeline;

pub use flatten_pipeline::FlattenPipeline;
