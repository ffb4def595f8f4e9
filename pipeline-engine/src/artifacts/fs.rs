use crate::artifacts::{validate_name, ArtifactError, ArtifactRef, ArtifactResult, ArtifactStore};
use crate::execution::instance::{JobInstanceId, RunId};

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const META_DIR: &str = ".meta";

/// Artifact store persisting payloads under `<root>/<run>/<instance>/<name>`.
///
/// The [`ArtifactRef`] of each payload is kept next to it as JSON in
/// `<root>/<run>/<instance>/.meta/<name>.json`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: RunId) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    fn instance_dir(&self, run_id: RunId, producer: JobInstanceId) -> PathBuf {
        self.run_dir(run_id).join(producer.to_string())
    }

    /// Names must not shadow the metadata directory.
    fn check_name(name: &str) -> ArtifactResult<()> {
        validate_name(name)?;
        if name == META_DIR {
            return Err(ArtifactError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    fn meta_path(instance_dir: &Path, name: &str) -> PathBuf {
        instance_dir.join(META_DIR).join(format!("{}.json", name))
    }

    async fn read_meta(path: &Path) -> ArtifactResult<Option<ArtifactRef>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        run_id: RunId,
        name: &str,
        payload: Vec<u8>,
        producer: JobInstanceId,
        retention_days: Option<u32>,
    ) -> ArtifactResult<ArtifactRef> {
        Self::check_name(name)?;
        let artifact = ArtifactRef::new(run_id, name, producer, &payload, retention_days);

        let dir = self.instance_dir(run_id, producer);
        fs::create_dir_all(dir.join(META_DIR)).await?;
        fs::write(dir.join(name), &payload).await?;
        fs::write(
            Self::meta_path(&dir, name),
            serde_json::to_vec_pretty(&artifact)?,
        )
        .await?;

        debug!(path = %dir.join(name).display(), size = artifact.size, "Artifact written");
        Ok(artifact)
    }

    async fn get(&self, artifact: &ArtifactRef) -> ArtifactResult<Vec<u8>> {
        Self::check_name(&artifact.name)?;
        let path = self
            .instance_dir(artifact.run_id, artifact.producer)
            .join(&artifact.name);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ArtifactError::NotFound {
                run_id: artifact.run_id,
                name: artifact.name.clone(),
                producer: artifact.producer,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn query(&self, run_id: RunId, name: &str) -> ArtifactResult<Vec<ArtifactRef>> {
        Self::check_name(name)?;
        let mut entries = match fs::read_dir(self.run_dir(run_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(artifact) = Self::read_meta(&Self::meta_path(&entry.path(), name)).await? {
                found.push(artifact);
            }
        }

        found.sort_by_key(|artifact| artifact.producer);
        Ok(found)
    }
}
