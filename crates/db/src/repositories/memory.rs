//! In-memory fakes for tests and tools that do not want a database.

use std::collections::HashMap;

use tokio::sync::RwLock;

use permitflow_core::domain::extension::{ExtensionRequest, ExtensionStatus};
use permitflow_core::domain::workflow::{InstanceId, LogEntry, WorkflowInstance};

use super::{ExtensionRepository, InstanceRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryInstanceRepository {
    instances: RwLock<HashMap<String, WorkflowInstance>>,
    logs: RwLock<Vec<LogEntry>>,
}

#[async_trait::async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn find_by_id(
        &self,
        id: &InstanceId,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Ok(self.instances.read().await.get(&id.0).cloned())
    }

    async fn save(&self, instance: WorkflowInstance) -> Result<(), RepositoryError> {
        self.instances.write().await.insert(instance.id.0.clone(), instance);
        Ok(())
    }

    async fn append_log(&self, entry: LogEntry) -> Result<(), RepositoryError> {
        self.logs.write().await.push(entry);
        Ok(())
    }

    async fn list_logs(&self, id: &InstanceId) -> Result<Vec<LogEntry>, RepositoryError> {
        Ok(self.logs.read().await.iter().filter(|e| &e.instance_id == id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryExtensionRepository {
    requests: RwLock<HashMap<String, ExtensionRequest>>,
}

#[async_trait::async_trait]
impl ExtensionRepository for InMemoryExtensionRepository {
    async fn save(&self, request: ExtensionRequest) -> Result<(), RepositoryError> {
        self.requests.write().await.insert(request.id.clone(), request);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ExtensionRequest>, RepositoryError> {
        Ok(self.requests.read().await.get(id).cloned())
    }

    async fn find_pending(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<ExtensionRequest>, RepositoryError> {
        Ok(self
            .requests
            .read()
            .await
            .values()
            .find(|r| &r.instance_id == instance_id && r.status == ExtensionStatus::Pending)
            .cloned())
    }

    async fn list_for_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<ExtensionRequest>, RepositoryError> {
        let mut list: Vec<ExtensionRequest> = self
            .requests
            .read()
            .await
            .values()
            .filter(|r| &r.instance_id == instance_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }
}
