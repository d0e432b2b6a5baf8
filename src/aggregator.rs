use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{ExecutionLog, RequestRecord};

/// Folds per-request records into the run's execution log. Workers feed it
/// through an mpsc channel, so the single draining task is the only writer;
/// records land in completion order, not dispatch order.
#[derive(Debug)]
pub struct LogAggregator {
  run_id: Uuid,
  task_id: String,
  started: DateTime<Utc>,
  records: Vec<RequestRecord>,
}

impl LogAggregator {
  pub fn new(run_id: Uuid, task_id: String, started: DateTime<Utc>) -> Self {
    Self {
      run_id,
      task_id,
      started,
      records: Vec::new(),
    }
  }

  pub fn append(&mut self, record: RequestRecord) {
    self.records.push(record);
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// Close the log. Duration runs from dispatch start to the last record's
  /// timestamp; a zero-record run (cancelled before any request) yields a
  /// zero duration and a summary that avoids dividing by zero.
  pub fn finalize(self) -> ExecutionLog {
    let total_requests = self.records.len() as u32;
    let success_count = self.records.iter().filter(|r| r.success).count() as u32;
    let failed_count = total_requests - success_count;

    let duration_ms = self
      .records
      .iter()
      .map(|r| r.timestamp + chrono::Duration::milliseconds(r.latency_ms as i64))
      .max()
      .map(|end| (end - self.started).num_milliseconds().max(0) as u64)
      .unwrap_or(0);

    let summary = if total_requests == 0 {
      "no requests executed".to_string()
    } else {
      format!(
        "completed {} requests, success rate {:.1}%",
        total_requests,
        success_count as f64 / total_requests as f64 * 100.0
      )
    };

    ExecutionLog {
      run_id: self.run_id,
      task_id: self.task_id,
      records: self.records,
      total_requests,
      success_count,
      failed_count,
      duration_ms,
      summary,
    }
  }
}
