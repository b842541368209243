//! Workspace and context management
//!
//! Workspaces are the isolation boundary for memories and associations;
//! contexts are optional finer partitions whose unset settings inherit
//! from their workspace. Ingestion creates workspace rows lazily so
//! all-workspace maintenance passes see every workspace that has ever
//! received a memory.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::{new_id, Context, Workspace, WorkspaceSettings};

/// Workspace service
pub struct WorkspaceService {
    storage: Arc<dyn StorageBackend>,
    default_tenant: String,
}

impl WorkspaceService {
    pub fn new(storage: Arc<dyn StorageBackend>, default_tenant: impl Into<String>) -> Self {
        Self {
            storage,
            default_tenant: default_tenant.into(),
        }
    }

    /// Fetch a workspace, creating it on first use.
    ///
    /// A concurrent first use may race on the insert; the loser re-reads
    /// the winner's row.
    pub async fn get_or_create(&self, workspace_id: &str) -> Result<Workspace> {
        if let Some(workspace) = self.storage.get_workspace(workspace_id).await? {
            return Ok(workspace);
        }

        let workspace = Workspace::new(workspace_id, self.default_tenant.clone(), workspace_id);
        match self.storage.create_workspace(workspace).await {
            Ok(workspace) => {
                debug!(workspace_id, "created workspace on first use");
                Ok(workspace)
            }
            Err(e) => match self.storage.get_workspace(workspace_id).await? {
                Some(workspace) => Ok(workspace),
                None => Err(e),
            },
        }
    }

    /// Replace a workspace's settings map.
    pub async fn update_settings(
        &self,
        workspace_id: &str,
        settings: WorkspaceSettings,
    ) -> Result<Workspace> {
        let mut workspace = self.get_or_create(workspace_id).await?;
        workspace.settings = settings;
        self.storage.update_workspace(workspace).await
    }

    /// Create a context inside a workspace.
    pub async fn create_context(
        &self,
        workspace_id: &str,
        name: &str,
        settings: WorkspaceSettings,
    ) -> Result<Context> {
        self.get_or_create(workspace_id).await?;
        let context = Context {
            id: new_id("ctx"),
            workspace_id: workspace_id.to_string(),
            name: name.to_string(),
            settings,
            created_at: chrono::Utc::now(),
        };
        self.storage.create_context(context).await
    }

    /// Effective settings for a workspace, with context inheritance
    /// applied when a context id is given.
    pub async fn effective_settings(
        &self,
        workspace_id: &str,
        context_id: Option<&str>,
    ) -> Result<WorkspaceSettings> {
        let workspace = self.get_or_create(workspace_id).await?;
        match context_id {
            Some(context_id) => {
                match self.storage.get_context(workspace_id, context_id).await? {
                    Some(context) => Ok(context.effective_settings(&workspace)),
                    None => Ok(workspace.settings),
                }
            }
            None => Ok(workspace.settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    fn service() -> (Arc<SqliteStorage>, WorkspaceService) {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let service = WorkspaceService::new(storage.clone(), "tenant_test");
        (storage, service)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (storage, service) = service();
        let first = service.get_or_create("ws_lazy").await.unwrap();
        let second = service.get_or_create("ws_lazy").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(storage.list_all_workspace_ids().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_context_inherits_workspace_settings() {
        let (storage, service) = service();

        let mut workspace = Workspace::new("ws_inherit", "tenant_test", "inherit");
        workspace.settings.default_importance = Some(0.7);
        workspace.settings.embedding_dimensions = Some(384);
        storage.create_workspace(workspace).await.unwrap();

        let context = service
            .create_context(
                "ws_inherit",
                "research",
                WorkspaceSettings {
                    default_importance: Some(0.9),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let effective = service
            .effective_settings("ws_inherit", Some(&context.id))
            .await
            .unwrap();
        assert_eq!(effective.default_importance, Some(0.9));
        assert_eq!(effective.embedding_dimensions, Some(384));
    }

    #[tokio::test]
    async fn test_update_settings_persists() {
        let (storage, service) = service();
        service
            .update_settings(
                "ws_settings",
                WorkspaceSettings {
                    default_importance: Some(0.8),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stored = storage.get_workspace("ws_settings").await.unwrap().unwrap();
        assert_eq!(stored.settings.default_importance, Some(0.8));
    }

    #[tokio::test]
    async fn test_unknown_context_falls_back_to_workspace() {
        let (_storage, service) = service();
        let effective = service
            .effective_settings("ws_fallback", Some("ctx_missing"))
            .await
            .unwrap();
        assert_eq!(effective, WorkspaceSettings::default());
    }
}
