// Artifact Store
// Run-scoped storage of named byte blobs with content digests

pub mod fs;
pub mod memory;

pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;

use crate::execution::instance::{JobInstanceId, RunId};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact '{name}' from job instance {producer} not found in run {run_id}")]
    NotFound {
        run_id: RunId,
        name: String,
        producer: JobInstanceId,
    },

    #[error("invalid artifact name '{0}'")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt artifact metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Handle to a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub run_id: RunId,
    pub name: String,
    pub producer: JobInstanceId,
    /// Hex-encoded SHA-256 of the payload
    pub digest: String,
    pub size: u64,
    /// Advisory only; nothing is deleted automatically
    pub retention_days: Option<u32>,
}

impl ArtifactRef {
    pub fn new(
        run_id: RunId,
        name: &str,
        producer: JobInstanceId,
        payload: &[u8],
        retention_days: Option<u32>,
    ) -> Self {
        Self {
            run_id,
            name: name.to_string(),
            producer,
            digest: digest(payload),
            size: payload.len() as u64,
            retention_days,
        }
    }
}

/// Hex-encoded SHA-256 digest.
pub fn digest(payload: &[u8]) -> String {
    format!("{:x}", Sha256::digest(payload))
}

/// Names become path components, so separators and dot segments are refused.
pub fn validate_name(name: &str) -> ArtifactResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Storage keyed by `(run, name, producing job instance)`. Storing the same
/// key again replaces the payload.
#[async_trait::async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        run_id: RunId,
        name: &str,
        payload: Vec<u8>,
        producer: JobInstanceId,
        retention_days: Option<u32>,
    ) -> ArtifactResult<ArtifactRef>;

    async fn get(&self, artifact: &ArtifactRef) -> ArtifactResult<Vec<u8>>;

    /// All artifacts of `run_id` named `name`, ordered by producer.
    async fn query(&self, run_id: RunId, name: &str) -> ArtifactResult<Vec<ArtifactRef>>;
}
