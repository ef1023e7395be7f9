//! Workspace services reached over RPC: feature flags and provider accounts

use crate::domain::shared::{ProviderCredentials, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFeature {
    pub name: String,
    pub is_enabled: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FoundationRpc: Send + Sync {
    /// `None` when the workspace has no record of the feature
    async fn workspace_feature(&self, workspace_id: Uuid, name: &str) -> Result<Option<WorkspaceFeature>>;

    async fn provider_credentials(&self, workspace_id: Uuid) -> Result<ProviderCredentials>;
}
