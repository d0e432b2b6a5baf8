use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use reqwest::Client;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatcher::{self, RunContext};
use crate::error::{EngineError, EngineResult};
use crate::models::{
  ExecutionLog, ProgressSnapshot, ScheduleStatus, Task, TaskScheduleInfo, TestResult,
};
use crate::progress::{ProgressRegistry, RunProgress};
use crate::runner::{self, RunnerOptions};
use crate::scheduler::{describe_cron, CronScheduler, Due};
use crate::storage::TaskStore;

/// The control surface: run lifecycle, progress, logs, schedules and the
/// engine-level variable map, shared behind an `Arc` by every route and the
/// scheduler timing loop.
pub struct Engine {
  config: Config,
  client: Client,
  store: Arc<dyn TaskStore>,
  progress: ProgressRegistry,
  logs: RwLock<HashMap<Uuid, ExecutionLog>>,
  scheduler: CronScheduler,
  vars: RwLock<HashMap<String, String>>,
}

impl Engine {
  pub fn new(config: Config, store: Arc<dyn TaskStore>) -> Arc<Self> {
    Arc::new(Self {
      config,
      client: Client::new(),
      store,
      progress: ProgressRegistry::new(),
      logs: RwLock::new(HashMap::new()),
      scheduler: CronScheduler::new(),
      vars: RwLock::new(HashMap::new()),
    })
  }

  /// Validate and dispatch a run in the background. Config errors surface
  /// here, before anything is spawned.
  pub async fn start_run(self: &Arc<Self>, task: Task) -> EngineResult<Uuid> {
    task.validate()?;
    let snapshot = task.materialize(&*self.vars.read().await);
    let run_id = Uuid::new_v4();
    let progress = Arc::new(RunProgress::new(snapshot.times));
    self.progress.insert(run_id, progress.clone()).await;

    let engine = self.clone();
    tokio::spawn(async move {
      engine.run_to_completion(run_id, snapshot, progress).await;
    });
    Ok(run_id)
  }

  /// Soft cancel: no new requests are claimed, in-flight ones finish.
  pub async fn cancel_run(&self, run_id: Uuid) -> EngineResult<()> {
    let progress = self
      .progress
      .get(&run_id)
      .await
      .ok_or(EngineError::RunNotFound(run_id))?;
    progress.cancel();
    info!(%run_id, "run cancellation requested");
    Ok(())
  }

  pub async fn get_progress(&self, run_id: Uuid) -> EngineResult<ProgressSnapshot> {
    self
      .progress
      .get(&run_id)
      .await
      .map(|p| p.snapshot())
      .ok_or(EngineError::RunNotFound(run_id))
  }

  pub async fn get_execution_log(&self, run_id: Uuid) -> EngineResult<ExecutionLog> {
    self
      .logs
      .read()
      .await
      .get(&run_id)
      .cloned()
      .ok_or(EngineError::RunNotFound(run_id))
  }

  /// Single request, no concurrency; the "try it" surface.
  pub async fn test_once(&self, task: Task) -> TestResult {
    let snapshot = task.materialize(&*self.vars.read().await);
    runner::test_once(&self.client, &snapshot, &RunnerOptions::from_config(&self.config)).await
  }

  pub async fn register_schedule(&self, task: Task) -> EngineResult<TaskScheduleInfo> {
    task.validate()?;
    self.scheduler.register(&task).await
  }

  pub async fn unregister_schedule(&self, task_id: &str) -> bool {
    self.scheduler.unregister(task_id).await
  }

  pub async fn get_schedule_info(&self, task_id: &str) -> EngineResult<TaskScheduleInfo> {
    if let Some(info) = self.scheduler.info(task_id).await {
      return Ok(info);
    }
    // Not registered: report the idle view of the stored task.
    let task = self.store.get_task(task_id).await?;
    let cron_expr = task.cron_expr.unwrap_or_default();
    Ok(TaskScheduleInfo {
      task_id: task_id.to_string(),
      is_scheduled: false,
      cron_description: describe_cron(&cron_expr),
      cron_expr,
      next_run_time: None,
      status: ScheduleStatus::Idle,
      last_run_time: None,
      last_run_status: None,
      last_run_result: None,
    })
  }

  pub async fn variables(&self) -> HashMap<String, String> {
    self.vars.read().await.clone()
  }

  pub async fn set_variable(&self, name: String, value: String) {
    self.vars.write().await.insert(name, value);
  }

  pub async fn remove_variable(&self, name: &str) -> bool {
    self.vars.write().await.remove(name).is_some()
  }

  /// Spawn the background timing loop that fires due schedules. Call once
  /// at startup.
  pub fn start_scheduler(self: &Arc<Self>) {
    let engine = self.clone();
    tokio::spawn(async move {
      engine.scheduler_loop().await;
    });
  }

  async fn scheduler_loop(self: Arc<Self>) {
    loop {
      match self.scheduler.next_wakeup().await {
        Some(when) => {
          let wait = (when - Utc::now()).to_std().unwrap_or(Duration::ZERO);
          tokio::select! {
            _ = sleep(wait) => {}
            _ = self.scheduler.notified() => continue,
          }
        }
        None => {
          self.scheduler.notified().await;
          continue;
        }
      }

      for due in self.scheduler.collect_due(Utc::now()).await {
        match due {
          Due::Fire(task_id) => {
            let engine = self.clone();
            tokio::spawn(async move {
              engine.fire_scheduled(&task_id).await;
            });
          }
          Due::Skipped(task_id) => {
            warn!(task_id, "schedule fire skipped, previous run still in progress");
          }
        }
      }
    }
  }

  async fn fire_scheduled(self: Arc<Self>, task_id: &str) {
    let fired_at = Utc::now();
    let task = match self.store.get_task(task_id).await {
      Ok(task) => task,
      Err(e) => {
        error!(task_id, error = %e, "scheduled task cannot be loaded");
        self.scheduler.complete(task_id, fired_at, "errored", &e.to_string(), true).await;
        return;
      }
    };
    if let Err(e) = task.validate() {
      error!(task_id, error = %e, "scheduled task has invalid config");
      self.scheduler.complete(task_id, fired_at, "errored", &e.to_string(), true).await;
      return;
    }

    let snapshot = task.materialize(&*self.vars.read().await);
    let run_id = Uuid::new_v4();
    let progress = Arc::new(RunProgress::new(snapshot.times));
    self.progress.insert(run_id, progress.clone()).await;
    info!(task_id, %run_id, "scheduled fire");

    match self.run_to_completion(run_id, snapshot, progress).await {
      Some(log) => {
        let (status, result) = summarize(&log);
        self.scheduler.complete(task_id, fired_at, &status, &result, false).await;
      }
      None => {
        self
          .scheduler
          .complete(task_id, fired_at, "errored", "run aborted by internal fault", true)
          .await;
      }
    }
  }

  /// Drive one run to its end and publish the log plus last-run info.
  /// Returns None only on an internal fault; the run is still left in a
  /// terminal state rather than silently dropped.
  async fn run_to_completion(
    &self,
    run_id: Uuid,
    snapshot: crate::models::TaskSnapshot,
    progress: Arc<RunProgress>,
  ) -> Option<ExecutionLog> {
    let task_id = snapshot.task_id.clone();
    let ctx = Arc::new(RunContext::new(run_id, snapshot, progress.clone()));
    let opts = RunnerOptions::from_config(&self.config);
    let outcome = std::panic::AssertUnwindSafe(dispatcher::execute_run(self.client.clone(), ctx, opts))
      .catch_unwind()
      .await;

    let log = match outcome {
      Ok(log) => log,
      Err(_) => {
        error!(%run_id, "run dispatch panicked");
        progress.finish();
        if !task_id.is_empty() {
          let _ = self
            .store
            .update_last_run_info(&task_id, Utc::now(), "errored", "run aborted by internal fault")
            .await;
        }
        return None;
      }
    };

    self.logs.write().await.insert(run_id, log.clone());
    if !task_id.is_empty() {
      let (status, result) = summarize(&log);
      if let Err(e) = self.store.update_last_run_info(&task_id, Utc::now(), &status, &result).await {
        debug!(task_id, error = %e, "last-run info not persisted");
      }
    }
    Some(log)
  }
}

fn summarize(log: &ExecutionLog) -> (String, String) {
  let status = if log.total_requests == 0 || log.success_count == 0 {
    "failed"
  } else if log.success_count < log.total_requests {
    "partial"
  } else {
    "success"
  };
  let result = format!("{} succeeded, {} failed", log.success_count, log.failed_count);
  (status.to_string(), result)
}
