use crate::artifacts::{validate_name, ArtifactError, ArtifactRef, ArtifactResult, ArtifactStore};
use crate::execution::instance::{JobInstanceId, RunId};

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Key = (RunId, String, JobInstanceId);

/// Artifact store that keeps payloads in memory for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactStore {
    entries: Arc<RwLock<BTreeMap<Key, (ArtifactRef, Arc<Vec<u8>>)>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(
        &self,
        run_id: RunId,
        name: &str,
        payload: Vec<u8>,
        producer: JobInstanceId,
        retention_days: Option<u32>,
    ) -> ArtifactResult<ArtifactRef> {
        validate_name(name)?;
        let artifact = ArtifactRef::new(run_id, name, producer, &payload, retention_days);
        self.entries.write().await.insert(
            (run_id, name.to_string(), producer),
            (artifact.clone(), Arc::new(payload)),
        );
        Ok(artifact)
    }

    async fn get(&self, artifact: &ArtifactRef) -> ArtifactResult<Vec<u8>> {
        let key = (artifact.run_id, artifact.name.clone(), artifact.producer);
        self.entries
            .read()
            .await
            .get(&key)
            .map(|(_, payload)| payload.as_ref().clone())
            .ok_or_else(|| ArtifactError::NotFound {
                run_id: artifact.run_id,
                name: artifact.name.clone(),
                producer: artifact.producer,
            })
    }

    async fn query(&self, run_id: RunId, name: &str) -> ArtifactResult<Vec<ArtifactRef>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|((run, artifact_name, _), _)| *run == run_id && artifact_name == name)
            .map(|(_, (artifact, _))| artifact.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::graph::JobId;

    fn instance(job: usize, index: usize) -> JobInstanceId {
        JobInstanceId::new(JobId(job), index)
    }

    #[tokio::test]
    async fn test_put_get_query() {
        let store = InMemoryArtifactStore::new();
        let run = RunId::new();

        let second = store
            .put(run, "report", b"windows".to_vec(), instance(1, 1), None)
            .await
            .unwrap();
        let first = store
            .put(run, "report", b"ubuntu".to_vec(), instance(1, 0), Some(7))
            .await
            .unwrap();
        store
            .put(run, "other", b"x".to_vec(), instance(1, 0), None)
            .await
            .unwrap();

        let found = store.query(run, "report").await.unwrap();
        assert_eq!(found, vec![first.clone(), second]);
        assert_eq!(store.get(&first).await.unwrap(), b"ubuntu");
        assert_eq!(first.size, 6);
        assert_eq!(first.retention_days, Some(7));
    }

    #[tokio::test]
    async fn test_runs_are_isolated() {
        let store = InMemoryArtifactStore::new();
        let run_a = RunId::new();
        let run_b = RunId::new();
        store
            .put(run_a, "jar", b"a".to_vec(), instance(0, 0), None)
            .await
            .unwrap();

        assert!(store.query(run_b, "jar").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = InMemoryArtifactStore::new();
        let missing = ArtifactRef::new(RunId::new(), "jar", instance(0, 0), b"", None);
        assert!(matches!(
            store.get(&missing).await,
            Err(ArtifactError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_put_replaces() {
        let store = InMemoryArtifactStore::new();
        let run = RunId::new();
        store
            .put(run, "jar", b"old".to_vec(), instance(0, 0), None)
            .await
            .unwrap();
        let newer = store
            .put(run, "jar", b"new".to_vec(), instance(0, 0), None)
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&newer).await.unwrap(), b"new");
    }
}
