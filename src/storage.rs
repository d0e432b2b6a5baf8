use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::EngineError;
use crate::models::Task;

/// Boundary to wherever task definitions live. The engine only ever reads
/// snapshots and writes back last-run info.
#[async_trait]
pub trait TaskStore: Send + Sync {
  async fn get_task(&self, task_id: &str) -> Result<Task, EngineError>;
  async fn list_tasks(&self) -> Vec<Task>;
  async fn update_last_run_info(
    &self,
    task_id: &str,
    last_run_time: DateTime<Utc>,
    last_run_status: &str,
    last_run_result: &str,
  ) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Default)]
pub struct LastRunInfo {
  pub time: Option<DateTime<Utc>>,
  pub status: Option<String>,
  pub result: Option<String>,
}

#[derive(Default)]
pub struct InMemoryTaskStore {
  tasks: RwLock<HashMap<String, (Task, LastRunInfo)>>,
}

impl InMemoryTaskStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn put_task(&self, task: Task) {
    self
      .tasks
      .write()
      .await
      .insert(task.id.clone(), (task, LastRunInfo::default()));
  }

  pub async fn remove_task(&self, task_id: &str) -> bool {
    self.tasks.write().await.remove(task_id).is_some()
  }

  pub async fn last_run_info(&self, task_id: &str) -> Option<LastRunInfo> {
    self.tasks.read().await.get(task_id).map(|(_, info)| info.clone())
  }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
  async fn get_task(&self, task_id: &str) -> Result<Task, EngineError> {
    self
      .tasks
      .read()
      .await
      .get(task_id)
      .map(|(task, _)| task.clone())
      .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))
  }

  async fn list_tasks(&self) -> Vec<Task> {
    self.tasks.read().await.values().map(|(task, _)| task.clone()).collect()
  }

  async fn update_last_run_info(
    &self,
    task_id: &str,
    last_run_time: DateTime<Utc>,
    last_run_status: &str,
    last_run_result: &str,
  ) -> Result<(), EngineError> {
    let mut tasks = self.tasks.write().await;
    let (_, info) = tasks
      .get_mut(task_id)
      .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
    info.time = Some(last_run_time);
    info.status = Some(last_run_status.to_string());
    info.result = Some(last_run_result.to_string());
    Ok(())
  }
}
