use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdRiskError {
    #[error("Image decode error: {0}")]
    ImageDecodeError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Velocity lookup error: {0}")]
    VelocityLookupError(String),
    #[error("Pipeline aborted at {stage}: {source}")]
    PipelineError {
        stage: String,
        #[source]
        source: Box<IdRiskError>,
    },
    #[error("{failed} of {total} cases failed")]
    BatchError {
        failed: usize,
        total: usize,
        data_quality: bool,
    },
}

impl IdRiskError {
    /// True when the fault comes from the submitted artifacts rather than configuration.
    pub fn is_data_quality(&self) -> bool {
        match self {
            IdRiskError::ImageDecodeError(_) => true,
            IdRiskError::PipelineError { source, .. } => source.is_data_quality(),
            IdRiskError::BatchError { data_quality, .. } => *data_quality,
            _ => false,
        }
    }
}

impl From<std::io::Error> for IdRiskError {
    fn from(err: std::io::Error) -> Self {
        IdRiskError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for IdRiskError {
    fn from(err: serde_json::Error) -> Self {
        IdRiskError::ParseError(err.to_string())
    }
}
