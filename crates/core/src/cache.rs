//! Per-project storage on top of a [`KvStore`].
//!
//! Every project owns a fixed family of keys under
//! `{prefix}:project:{id}:`. All writes carry the configured TTL, so an
//! abandoned project disappears on its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tk_protocol::document_models::TenderDocument;
use tk_protocol::ipc::SseMessageRecord;
use tk_protocol::pipeline_models::DocumentVariant;
use tk_protocol::process_models::{AgentState, DocumentRef, StateSnapshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::store::{KvStore, StoreResult};

/// One key in a project's family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKey {
    Snapshot,
    StateHistory,
    Messages,
    Document(DocumentVariant),
    Source,
}

impl ProjectKey {
    /// Every key a project can own.
    pub fn all() -> Vec<ProjectKey> {
        let mut keys = vec![
            ProjectKey::Snapshot,
            ProjectKey::StateHistory,
            ProjectKey::Messages,
            ProjectKey::Source,
        ];
        keys.extend(DocumentVariant::ALL.into_iter().map(ProjectKey::Document));
        keys
    }

    fn suffix(self) -> String {
        match self {
            ProjectKey::Snapshot => "snapshot".into(),
            ProjectKey::StateHistory => "state_history".into(),
            ProjectKey::Messages => "messages".into(),
            ProjectKey::Document(variant) => format!("document:{variant}"),
            ProjectKey::Source => "source".into(),
        }
    }
}

/// A stored document revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub variant: DocumentVariant,
    pub revision: Uuid,
    pub produced_at: DateTime<Utc>,
    pub document: TenderDocument,
}

impl StoredDocument {
    pub fn reference(&self) -> DocumentRef {
        DocumentRef {
            variant: self.variant,
            revision: self.revision,
        }
    }
}

/// Outcome of deleting one key during cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum CleanupOutcome {
    Deleted,
    /// Nothing to delete. Counts as success.
    Absent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyCleanup {
    pub key: String,
    #[serde(flatten)]
    pub outcome: CleanupOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub project_id: String,
    pub keys: Vec<KeyCleanup>,
}

impl CleanupReport {
    /// Every key is gone, whether deleted now or already absent.
    pub fn is_complete(&self) -> bool {
        self.keys
            .iter()
            .all(|k| !matches!(k.outcome, CleanupOutcome::Failed(_)))
    }
}

#[derive(Clone)]
pub struct CacheService {
    store: Arc<dyn KvStore>,
    prefix: String,
    config: CacheConfig,
}

impl CacheService {
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn key(&self, project_id: &str, key: ProjectKey) -> String {
        format!("{}:project:{}:{}", self.prefix, project_id, key.suffix())
    }

    /// Lock key for a project. Lives outside the project family so cleanup
    /// never deletes a lock someone holds.
    pub fn lock_key(&self, project_id: &str) -> String {
        format!("{}:lock:{}", self.prefix, project_id)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key, &raw, self.config.ttl()).await
    }

    pub async fn load_snapshot(&self, project_id: &str) -> StoreResult<Option<StateSnapshot>> {
        self.get_json(&self.key(project_id, ProjectKey::Snapshot))
            .await
    }

    pub async fn save_snapshot(&self, snapshot: &StateSnapshot) -> StoreResult<()> {
        let key = self.key(&snapshot.state.project_id, ProjectKey::Snapshot);
        debug!(%key, state = %snapshot.state.current_state, "saving snapshot");
        self.set_json(&key, snapshot).await
    }

    /// Store a new revision of `variant`, replacing any earlier one.
    pub async fn store_document(
        &self,
        project_id: &str,
        variant: DocumentVariant,
        document: &TenderDocument,
    ) -> StoreResult<DocumentRef> {
        let stored = StoredDocument {
            variant,
            revision: Uuid::new_v4(),
            produced_at: Utc::now(),
            document: document.clone(),
        };
        self.set_json(&self.key(project_id, ProjectKey::Document(variant)), &stored)
            .await?;
        Ok(stored.reference())
    }

    pub async fn load_document(
        &self,
        project_id: &str,
        variant: DocumentVariant,
    ) -> StoreResult<Option<StoredDocument>> {
        self.get_json(&self.key(project_id, ProjectKey::Document(variant)))
            .await
    }

    pub async fn append_state_history(&self, state: &AgentState) -> StoreResult<()> {
        let raw = serde_json::to_string(state)?;
        self.store
            .push_capped(
                &self.key(&state.project_id, ProjectKey::StateHistory),
                &raw,
                self.config.state_history_limit,
                self.config.ttl(),
            )
            .await
    }

    /// Oldest first. Entries that no longer parse are skipped.
    pub async fn state_history(&self, project_id: &str) -> StoreResult<Vec<AgentState>> {
        let raw = self
            .store
            .list(&self.key(project_id, ProjectKey::StateHistory))
            .await?;
        Ok(parse_entries(project_id, raw))
    }

    pub async fn append_message(&self, record: &SseMessageRecord) -> StoreResult<()> {
        let raw = serde_json::to_string(record)?;
        self.store
            .push_capped(
                &self.key(&record.project_id, ProjectKey::Messages),
                &raw,
                self.config.message_history_limit,
                self.config.ttl(),
            )
            .await
    }

    pub async fn messages(&self, project_id: &str) -> StoreResult<Vec<SseMessageRecord>> {
        let raw = self
            .store
            .list(&self.key(project_id, ProjectKey::Messages))
            .await?;
        Ok(parse_entries(project_id, raw))
    }

    /// Remember where the uploaded file lives.
    pub async fn save_source(&self, project_id: &str, source: &str) -> StoreResult<()> {
        self.store
            .set(
                &self.key(project_id, ProjectKey::Source),
                source,
                self.config.ttl(),
            )
            .await
    }

    pub async fn load_source(&self, project_id: &str) -> StoreResult<Option<String>> {
        self.store
            .get(&self.key(project_id, ProjectKey::Source))
            .await
    }

    /// Delete every key of the project.
    pub async fn cleanup(&self, project_id: &str) -> CleanupReport {
        self.cleanup_keys(project_id, &ProjectKey::all()).await
    }

    /// Delete the given keys, reporting each one. A failure on one key does
    /// not stop the others.
    pub async fn cleanup_keys(&self, project_id: &str, keys: &[ProjectKey]) -> CleanupReport {
        let mut report = CleanupReport {
            project_id: project_id.to_string(),
            keys: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            let key = self.key(project_id, *key);
            let outcome = match self.store.delete(&key).await {
                Ok(true) => CleanupOutcome::Deleted,
                Ok(false) => CleanupOutcome::Absent,
                Err(e) => {
                    warn!(%key, error = %e, "cleanup failed");
                    CleanupOutcome::Failed(e.to_string())
                }
            };
            report.keys.push(KeyCleanup { key, outcome });
        }
        report
    }

    /// Ids of every project that still has a snapshot.
    pub async fn known_projects(&self) -> StoreResult<Vec<String>> {
        let family = format!("{}:project:", self.prefix);
        let suffix = format!(":{}", ProjectKey::Snapshot.suffix());

        let mut ids: Vec<String> = self
            .store
            .keys_with_prefix(&family)
            .await?
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(&family)
                    .and_then(|rest| rest.strip_suffix(&suffix))
                    .map(str::to_string)
            })
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

fn parse_entries<T: serde::de::DeserializeOwned>(project_id: &str, raw: Vec<String>) -> Vec<T> {
    raw.into_iter()
        .filter_map(|entry| match serde_json::from_str(&entry) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(project_id, error = %e, "skipping unreadable history entry");
                None
            }
        })
        .collect()
}
