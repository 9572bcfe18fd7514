pub mod batch;
pub mod config;
pub mod evaluation;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod scoring;
pub mod utils;
pub mod validation;

pub use pipeline::DecisionPipeline;
pub use utils::IdRiskError;
