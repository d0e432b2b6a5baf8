use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::ProgressSnapshot;

/// Live counters for one in-flight run. Shared between the workers (writes)
/// and any number of pollers (reads); `current` is monotonically
/// non-decreasing until `running` flips false.
#[derive(Debug)]
pub struct RunProgress {
  total: u32,
  current: AtomicU32,
  start_time: DateTime<Utc>,
  running: AtomicBool,
  cancelled: AtomicBool,
}

impl RunProgress {
  pub fn new(total: u32) -> Self {
    Self {
      total,
      current: AtomicU32::new(0),
      start_time: Utc::now(),
      running: AtomicBool::new(true),
      cancelled: AtomicBool::new(false),
    }
  }

  pub fn increment(&self) {
    self.current.fetch_add(1, Ordering::SeqCst);
  }

  pub fn current(&self) -> u32 {
    self.current.load(Ordering::SeqCst)
  }

  pub fn total(&self) -> u32 {
    self.total
  }

  pub fn start_time(&self) -> DateTime<Utc> {
    self.start_time
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }

  pub fn finish(&self) {
    self.running.store(false, Ordering::SeqCst);
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }

  pub fn snapshot(&self) -> ProgressSnapshot {
    ProgressSnapshot {
      current: self.current(),
      total: self.total,
      start_time: self.start_time,
      is_running: self.is_running(),
      elapsed_secs: (Utc::now() - self.start_time).num_seconds().max(0) as u64,
    }
  }
}

/// Registry of live runs keyed by run id.
#[derive(Debug, Default)]
pub struct ProgressRegistry {
  runs: RwLock<HashMap<Uuid, Arc<RunProgress>>>,
}

impl ProgressRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn insert(&self, run_id: Uuid, progress: Arc<RunProgress>) {
    self.runs.write().await.insert(run_id, progress);
  }

  pub async fn get(&self, run_id: &Uuid) -> Option<Arc<RunProgress>> {
    self.runs.read().await.get(run_id).cloned()
  }

  pub async fn remove(&self, run_id: &Uuid) {
    self.runs.write().await.remove(run_id);
  }
}
