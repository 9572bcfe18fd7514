pub mod error;

pub use error::IdRiskError;
