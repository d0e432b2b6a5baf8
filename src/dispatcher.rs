//! Worker-pool execution of one run: `times` requests spread over `threads`
//! workers, with uniform delay jitter between a worker's successive claims.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregator::LogAggregator;
use crate::models::{ExecutionLog, TaskSnapshot};
use crate::progress::RunProgress;
use crate::runner::{self, RunnerOptions};

/// Shared state for one run, owned by the coordinator and handed to every
/// worker. Request ids are assigned at claim time, so ids reflect issuance
/// order even though completion order differs.
pub struct RunContext {
  pub run_id: Uuid,
  pub snapshot: Arc<TaskSnapshot>,
  pub progress: Arc<RunProgress>,
  remaining: AtomicU32,
}

impl RunContext {
  pub fn new(run_id: Uuid, snapshot: TaskSnapshot, progress: Arc<RunProgress>) -> Self {
    let remaining = AtomicU32::new(snapshot.times);
    Self {
      run_id,
      snapshot: Arc::new(snapshot),
      progress,
      remaining,
    }
  }

  /// Claim one unit of work. Returns the 1-based request id, or None once
  /// the countdown is exhausted or cancellation was signalled.
  fn claim(&self) -> Option<u64> {
    if self.progress.is_cancelled() {
      return None;
    }
    self
      .remaining
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .ok()
      .map(|prev| (self.snapshot.times - prev + 1) as u64)
  }
}

/// Execute a run to completion and return its finalized log. Individual
/// request failures never abort the run; it ends when every worker has
/// exited, either exhausting `times` or observing cancellation.
pub async fn execute_run(client: Client, ctx: Arc<RunContext>, opts: RunnerOptions) -> ExecutionLog {
  let started = Utc::now();
  let mut aggregator = LogAggregator::new(ctx.run_id, ctx.snapshot.task_id.clone(), started);
  let (tx, mut rx) = mpsc::unbounded_channel();

  info!(
    run_id = %ctx.run_id,
    task = %ctx.snapshot.name,
    times = ctx.snapshot.times,
    threads = ctx.snapshot.threads,
    "dispatching run"
  );

  for worker_id in 0..ctx.snapshot.threads {
    let ctx = ctx.clone();
    let client = client.clone();
    let tx = tx.clone();
    let opts = opts.clone();
    tokio::spawn(async move {
      worker_loop(worker_id, ctx, client, tx, opts).await;
    });
  }
  drop(tx);

  // The channel closes once every worker has dropped its sender, which is
  // the run's completion point.
  while let Some(record) = rx.recv().await {
    aggregator.append(record);
  }

  ctx.progress.finish();
  let log = aggregator.finalize();
  info!(
    run_id = %ctx.run_id,
    total = log.total_requests,
    success = log.success_count,
    failed = log.failed_count,
    duration_ms = log.duration_ms,
    "run finalized"
  );
  log
}

async fn worker_loop(
  worker_id: u32,
  ctx: Arc<RunContext>,
  client: Client,
  tx: mpsc::UnboundedSender<crate::models::RequestRecord>,
  opts: RunnerOptions,
) {
  // A worker's first claim skips the delay; jitter applies between its
  // successive claims only.
  let mut first = true;
  while let Some(seq) = ctx.claim() {
    if !first {
      let delay = jitter_ms(ctx.snapshot.delay_min_ms, ctx.snapshot.delay_max_ms);
      if delay > 0 {
        sleep(Duration::from_millis(delay)).await;
      }
    }
    first = false;

    let record = runner::execute(&client, &ctx.snapshot, seq, &opts).await;
    ctx.progress.increment();
    if tx.send(record).is_err() {
      warn!(run_id = %ctx.run_id, worker = worker_id, "record channel closed early");
      break;
    }
  }
}

fn jitter_ms(min: u64, max: u64) -> u64 {
  if max <= min {
    min
  } else {
    fastrand::u64(min..=max)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::HttpMethod;
  use std::collections::HashMap;

  fn snapshot(times: u32, threads: u32) -> TaskSnapshot {
    TaskSnapshot {
      task_id: "t1".into(),
      name: "probe".into(),
      url: "http://localhost/x".into(),
      method: HttpMethod::GET,
      headers: HashMap::new(),
      body: String::new(),
      times,
      threads,
      delay_min_ms: 0,
      delay_max_ms: 0,
      success_condition: None,
      use_virtual_source: false,
    }
  }

  #[test]
  fn claims_are_issued_in_order_and_bounded() {
    let progress = Arc::new(RunProgress::new(4));
    let ctx = RunContext::new(Uuid::new_v4(), snapshot(4, 2), progress);
    assert_eq!(ctx.claim(), Some(1));
    assert_eq!(ctx.claim(), Some(2));
    assert_eq!(ctx.claim(), Some(3));
    assert_eq!(ctx.claim(), Some(4));
    assert_eq!(ctx.claim(), None);
    assert_eq!(ctx.claim(), None);
  }

  #[test]
  fn cancellation_stops_new_claims() {
    let progress = Arc::new(RunProgress::new(10));
    let ctx = RunContext::new(Uuid::new_v4(), snapshot(10, 2), progress.clone());
    assert_eq!(ctx.claim(), Some(1));
    progress.cancel();
    assert_eq!(ctx.claim(), None);
  }

  #[test]
  fn jitter_stays_within_bounds() {
    for _ in 0..100 {
      let d = jitter_ms(20, 50);
      assert!((20..=50).contains(&d));
    }
    assert_eq!(jitter_ms(0, 0), 0);
    assert_eq!(jitter_ms(7, 7), 7);
  }
}
