use crate::utils::IdRiskError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Component, Path, PathBuf};

/// Fetches raw artifact bytes (document front/back, selfie) by storage key.
pub trait ArtifactStore: Send + Sync {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, IdRiskError>;
}

/// Resolves keys as relative paths below a root directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        LocalArtifactStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, IdRiskError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(IdRiskError::IoError(format!("Invalid artifact key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, IdRiskError> {
        let path = self.resolve(key)?;
        std::fs::read(&path).map_err(|e| {
            IdRiskError::IoError(format!("Failed to read artifact {}: {}", path.display(), e))
        })
    }
}

/// Decode an inline base64 image as sent with an ingest request.
pub fn decode_inline_image(encoded: &str) -> Result<Vec<u8>, IdRiskError> {
    let trimmed = encoded.trim();
    // Data URLs carry a "data:image/png;base64," prefix
    let payload = match trimmed.split_once(";base64,") {
        Some((_, data)) => data,
        None => trimmed,
    };
    STANDARD
        .decode(payload)
        .map_err(|e| IdRiskError::ImageDecodeError(format!("Invalid base64 image: {}", e)))
}
