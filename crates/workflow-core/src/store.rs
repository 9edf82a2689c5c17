//! JSON document store with atomic replace semantics

use std::path::Path;
use serde::de::DeserializeOwned;
use serde::Serialize;
use chrono::Utc;
use tokio::fs;
use uuid::Uuid;
use workflow_types::{
    MeetingMinutes, Proposal, ProposalDocument, ProposalRevision, WorkflowId, WorkflowState,
};
use crate::error::{WorkflowError, Result};
use crate::paths::WorkflowPaths;

/// Serialize `value` into a sibling temp file and rename it over `path`
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let write = async {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(value)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document");
        let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
        fs::write(&tmp_path, json).await?;
        if let Err(e) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(WorkflowError::Io(e));
        }
        Ok(())
    };

    write.await.map_err(|e: WorkflowError| {
        log::error!("Failed to persist {:?}: {}", path, e);
        WorkflowError::persistence(path, e)
    })
}

/// Read a JSON document, `None` when the file does not exist
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(WorkflowError::persistence(path, WorkflowError::Io(e))),
    };
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| WorkflowError::persistence(path, WorkflowError::Json(e)))?;
    Ok(Some(value))
}

/// Typed access to the per-workflow documents
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    paths: WorkflowPaths,
}

impl WorkflowStore {
    pub fn new(paths: WorkflowPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &WorkflowPaths {
        &self.paths
    }

    pub async fn save_state(&self, state: &WorkflowState) -> Result<()> {
        write_json_atomic(&self.paths.workflow_file(&state.workflow_id), state).await
    }

    pub async fn load_state(&self, id: &WorkflowId) -> Result<Option<WorkflowState>> {
        read_json(&self.paths.workflow_file(id)).await
    }

    /// Persist a freshly synthesized proposal, bumping the document version
    pub async fn save_proposal(&self, proposal: &Proposal, feedback: Option<String>) -> Result<ProposalDocument> {
        let path = self.paths.proposal_file(&proposal.workflow_id);
        let previous: Option<ProposalDocument> = read_json(&path).await?;
        let (version, mut revision_history) = match previous {
            Some(doc) => (doc.version + 1, doc.revision_history),
            None => (1, Vec::new()),
        };
        revision_history.push(ProposalRevision {
            version,
            created_at: Utc::now(),
            feedback,
        });
        let document = ProposalDocument {
            proposal: proposal.clone(),
            version,
            revision_history,
        };
        write_json_atomic(&path, &document).await?;
        log::info!("Saved proposal v{} for workflow {}", version, proposal.workflow_id);
        Ok(document)
    }

    pub async fn load_proposal(&self, id: &WorkflowId) -> Result<Option<ProposalDocument>> {
        read_json(&self.paths.proposal_file(id)).await
    }

    pub async fn save_minutes(&self, minutes: &MeetingMinutes) -> Result<()> {
        write_json_atomic(&self.paths.meeting_file(&minutes.workflow_id, &minutes.meeting_id), minutes).await
    }

    pub async fn load_minutes(&self, id: &WorkflowId, meeting_id: &str) -> Result<Option<MeetingMinutes>> {
        read_json(&self.paths.meeting_file(id, meeting_id)).await
    }

    /// Ids of every workflow directory under the data root
    pub async fn list_workflow_ids(&self) -> Result<Vec<WorkflowId>> {
        let dir = self.paths.workflows_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WorkflowError::persistence(&dir, WorkflowError::Io(e))),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().map(WorkflowId::from_string) {
                Some(Ok(id)) => ids.push(id),
                _ => log::warn!("Skipping unexpected entry {:?} in {:?}", name, dir),
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load every readable workflow document; unreadable ones are logged and skipped
    pub async fn load_all_states(&self) -> Result<Vec<WorkflowState>> {
        let mut states = Vec::new();
        for id in self.list_workflow_ids().await? {
            match self.load_state(&id).await {
                Ok(Some(state)) => states.push(state),
                Ok(None) => log::warn!("Workflow directory {} has no {}", id, crate::paths::WORKFLOW_FILE_NAME),
                Err(e) => log::error!("Failed to load workflow {}: {}", id, e),
            }
        }
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("doc.json");

        write_json_atomic(&path, &serde_json::json!({"a": 1})).await.unwrap();
        write_json_atomic(&path, &serde_json::json!({"a": 2})).await.unwrap();

        let value: serde_json::Value = read_json(&path).await.unwrap().unwrap();
        assert_eq!(value["a"], 2);
        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_document_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let value: Option<serde_json::Value> = read_json(&temp_dir.path().join("missing.json")).await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_document_is_persistence_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let result: Result<Option<WorkflowState>> = read_json(&path).await;
        assert!(matches!(result, Err(WorkflowError::Persistence { .. })));
    }

    #[tokio::test]
    async fn test_state_roundtrip_and_listing() {
        let temp_dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(WorkflowPaths::new(temp_dir.path()));

        let a = WorkflowState::new("first".to_string(), "p".to_string());
        let b = WorkflowState::new("second".to_string(), "p".to_string());
        store.save_state(&a).await.unwrap();
        store.save_state(&b).await.unwrap();
        std::fs::create_dir_all(store.paths().workflows_dir().join("empty-dir")).unwrap();

        let loaded = store.load_state(&a.workflow_id).await.unwrap().unwrap();
        assert_eq!(loaded, a);
        assert_eq!(store.list_workflow_ids().await.unwrap().len(), 3);
        assert_eq!(store.load_all_states().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_proposal_versions_accumulate() {
        let temp_dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(WorkflowPaths::new(temp_dir.path()));
        let proposal = Proposal {
            workflow_id: WorkflowId::from_string("wf-1").unwrap(),
            summary: "s".to_string(),
            scope: "scope".to_string(),
            task_breakdown: vec![],
            worker_assignments: vec![],
            risk_assessment: vec![],
            dependencies: vec![],
            meeting_ids: vec![],
            created_at: Utc::now(),
        };

        store.save_proposal(&proposal, None).await.unwrap();
        let doc = store.save_proposal(&proposal, Some("tighten scope".to_string())).await.unwrap();

        assert_eq!(doc.version, 2);
        assert_eq!(doc.revision_history.len(), 2);
        assert_eq!(doc.revision_history[1].feedback.as_deref(), Some("tighten scope"));
        let reloaded = store.load_proposal(&proposal.workflow_id).await.unwrap().unwrap();
        assert_eq!(reloaded.version, 2);
    }
}
