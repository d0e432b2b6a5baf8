//! Recurring-task scheduling: one priority queue of (next fire time, task)
//! slots drained by a single timing loop, instead of a timer per task.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::{Mutex, Notify};
use tracing::info;

use crate::error::EngineError;
use crate::models::{ScheduleStatus, Task, TaskScheduleInfo};

#[derive(Debug)]
struct FireSlot {
  when: DateTime<Utc>,
  task_id: String,
}

impl Eq for FireSlot {}

impl PartialEq for FireSlot {
  fn eq(&self, other: &Self) -> bool {
    self.when == other.when
  }
}

impl PartialOrd for FireSlot {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for FireSlot {
  fn cmp(&self, other: &Self) -> Ordering {
    // Reversed so the BinaryHeap pops the earliest fire time first.
    other.when.cmp(&self.when)
  }
}

struct ScheduleEntry {
  cron_expr: String,
  schedule: Schedule,
  status: ScheduleStatus,
  next_fire: Option<DateTime<Utc>>,
  last_run_time: Option<DateTime<Utc>>,
  last_run_status: Option<String>,
  last_run_result: Option<String>,
}

struct SchedulerState {
  entries: HashMap<String, ScheduleEntry>,
  queue: BinaryHeap<FireSlot>,
}

/// What the timing loop should do for a due task.
#[derive(Debug, PartialEq, Eq)]
pub enum Due {
  Fire(String),
  /// The task was still running at its nominal fire time; recorded, not
  /// double-executed.
  Skipped(String),
}

pub struct CronScheduler {
  state: Mutex<SchedulerState>,
  notify: Notify,
}

impl CronScheduler {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(SchedulerState {
        entries: HashMap::new(),
        queue: BinaryHeap::new(),
      }),
      notify: Notify::new(),
    }
  }

  pub async fn register(&self, task: &Task) -> Result<TaskScheduleInfo, EngineError> {
    let expr = task
      .cron_expr
      .as_deref()
      .filter(|e| !e.trim().is_empty())
      .ok_or_else(|| EngineError::InvalidScheduleExpression("task has no cron expression".into()))?;
    let schedule = parse_cron(expr)?;
    let next_fire = schedule
      .after(&Utc::now())
      .next()
      .ok_or_else(|| EngineError::InvalidScheduleExpression("expression yields no upcoming fire time".into()))?;

    let mut state = self.state.lock().await;
    let previous = state.entries.insert(
      task.id.clone(),
      ScheduleEntry {
        cron_expr: expr.to_string(),
        schedule,
        status: ScheduleStatus::Scheduled,
        next_fire: Some(next_fire),
        last_run_time: None,
        last_run_status: None,
        last_run_result: None,
      },
    );
    state.queue.push(FireSlot {
      when: next_fire,
      task_id: task.id.clone(),
    });
    drop(state);
    self.notify.notify_one();

    if previous.is_some() {
      info!(task_id = %task.id, "schedule replaced");
    } else {
      info!(task_id = %task.id, next_fire = %next_fire, "schedule registered");
    }
    self.info(&task.id).await.ok_or(EngineError::ScheduleNotFound(task.id.clone()))
  }

  /// Idempotent; never disturbs an in-flight run. Stale queue slots are
  /// discarded when they surface.
  pub async fn unregister(&self, task_id: &str) -> bool {
    let removed = self.state.lock().await.entries.remove(task_id).is_some();
    if removed {
      info!(task_id, "schedule unregistered");
      self.notify.notify_one();
    }
    removed
  }

  pub async fn info(&self, task_id: &str) -> Option<TaskScheduleInfo> {
    let state = self.state.lock().await;
    state.entries.get(task_id).map(|entry| TaskScheduleInfo {
      task_id: task_id.to_string(),
      is_scheduled: true,
      cron_expr: entry.cron_expr.clone(),
      next_run_time: entry.next_fire,
      cron_description: describe_cron(&entry.cron_expr),
      status: entry.status,
      last_run_time: entry.last_run_time,
      last_run_status: entry.last_run_status.clone(),
      last_run_result: entry.last_run_result.clone(),
    })
  }

  /// Earliest queued fire time, if any. The timing loop sleeps until this.
  pub async fn next_wakeup(&self) -> Option<DateTime<Utc>> {
    self.state.lock().await.queue.peek().map(|slot| slot.when)
  }

  pub async fn notified(&self) {
    self.notify.notified().await;
  }

  /// Drain every slot due at `now`. For each due task the next nominal
  /// fire is queued immediately, so the cadence is independent of run
  /// duration; a task still running is reported as skipped.
  pub async fn collect_due(&self, now: DateTime<Utc>) -> Vec<Due> {
    let mut due = Vec::new();
    let mut guard = self.state.lock().await;
    let state = &mut *guard;

    while let Some(slot) = state.queue.peek() {
      if slot.when > now {
        break;
      }
      let slot = state.queue.pop().unwrap();
      let entry = match state.entries.get_mut(&slot.task_id) {
        Some(entry) => entry,
        // Unregistered since the slot was queued.
        None => continue,
      };
      if entry.next_fire != Some(slot.when) {
        continue;
      }

      let next = entry.schedule.after(&slot.when).next();
      entry.next_fire = next;
      match entry.status {
        ScheduleStatus::Running => {
          entry.last_run_time = Some(now);
          entry.last_run_status = Some("skipped".into());
          entry.last_run_result = Some("previous run still in progress".into());
          due.push(Due::Skipped(slot.task_id.clone()));
        }
        _ => {
          entry.status = ScheduleStatus::Running;
          due.push(Due::Fire(slot.task_id.clone()));
        }
      }
      if let Some(next) = next {
        state.queue.push(FireSlot {
          when: next,
          task_id: slot.task_id,
        });
      }
    }

    due
  }

  /// Publish the outcome of a scheduled run and return the entry to its
  /// scheduled state. A task unregistered mid-run is left alone.
  pub async fn complete(
    &self,
    task_id: &str,
    run_time: DateTime<Utc>,
    status: &str,
    result: &str,
    errored: bool,
  ) {
    let mut state = self.state.lock().await;
    if let Some(entry) = state.entries.get_mut(task_id) {
      entry.last_run_time = Some(run_time);
      entry.last_run_status = Some(status.to_string());
      entry.last_run_result = Some(result.to_string());
      entry.status = if errored { ScheduleStatus::Error } else { ScheduleStatus::Scheduled };
    }
  }
}

/// Parse a 5-field (minute-resolution) or 6-field (second-resolution) cron
/// expression; 5-field input gets a zero seconds column prepended.
pub fn parse_cron(expr: &str) -> Result<Schedule, EngineError> {
  let expr = expr.trim();
  let normalized = match expr.split_whitespace().count() {
    5 => format!("0 {}", expr),
    6 => expr.to_string(),
    n => {
      return Err(EngineError::InvalidScheduleExpression(format!(
        "expected 5 or 6 fields, got {}",
        n
      )));
    }
  };
  Schedule::from_str(&normalized)
    .map_err(|e| EngineError::InvalidScheduleExpression(e.to_string()))
}

/// Human-readable description for the common cron shapes; anything more
/// exotic is echoed back verbatim.
pub fn describe_cron(expr: &str) -> String {
  let fields: Vec<&str> = expr.split_whitespace().collect();
  let (second, minute, hour, day, month, weekday) = match fields.len() {
    6 => (fields[0], fields[1], fields[2], fields[3], fields[4], fields[5]),
    5 => ("0", fields[0], fields[1], fields[2], fields[3], fields[4]),
    _ => return expr.to_string(),
  };

  if minute == "*" && hour == "*" && day == "*" && month == "*" && weekday == "*" {
    if second == "0" || second == "*" {
      return "every minute".into();
    }
    return format!("every minute at second {}", second);
  }

  if hour == "*" && day == "*" && month == "*" && weekday == "*" {
    if minute == "0" {
      return "every hour on the hour".into();
    }
    if let Some(interval) = minute.strip_prefix("*/") {
      return format!("every {} minutes", interval);
    }
    return format!("every hour at minute {}", minute);
  }

  if day == "*" && month == "*" && weekday == "*" {
    if minute == "0" && (second == "0" || second == "*") {
      if let Some(interval) = hour.strip_prefix("*/") {
        return format!("every {} hours", interval);
      }
      return format!("daily at {}:00", hour);
    }
    return format!("daily at {}:{:0>2}", hour, minute);
  }

  if month == "*" && weekday != "*" {
    let days = match weekday {
      "1-5" => "weekdays".to_string(),
      "6,0" | "0,6" => "weekends".to_string(),
      other => format!("weekday {}", other),
    };
    if minute == "0" {
      return format!("{} at {}:00", days, hour);
    }
    return format!("{} at {}:{:0>2}", days, hour, minute);
  }

  expr.to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap as StdHashMap;

  fn scheduled_task(id: &str, cron_expr: &str) -> Task {
    Task {
      id: id.into(),
      name: "probe".into(),
      url: "https://example.test/ok".into(),
      method: crate::models::HttpMethod::GET,
      headers: StdHashMap::new(),
      headers_text: String::new(),
      body: String::new(),
      times: 1,
      threads: 1,
      delay_min_ms: 0,
      delay_max_ms: 0,
      tags: vec![],
      cron_expr: Some(cron_expr.into()),
      success_condition: None,
      use_virtual_source: false,
      created_at: None,
      updated_at: None,
    }
  }

  #[test]
  fn parses_five_and_six_field_expressions() {
    assert!(parse_cron("*/5 * * * *").is_ok());
    assert!(parse_cron("0 0 12 * * *").is_ok());
  }

  #[test]
  fn rejects_malformed_expressions() {
    assert!(matches!(parse_cron("invalid cron"), Err(EngineError::InvalidScheduleExpression(_))));
    assert!(matches!(parse_cron("99 99 99 99 99"), Err(EngineError::InvalidScheduleExpression(_))));
    assert!(matches!(parse_cron(""), Err(EngineError::InvalidScheduleExpression(_))));
  }

  #[test]
  fn describes_common_shapes() {
    assert_eq!(describe_cron("* * * * *"), "every minute");
    assert_eq!(describe_cron("*/10 * * * *"), "every 10 minutes");
    assert_eq!(describe_cron("0 * * * *"), "every hour on the hour");
    assert_eq!(describe_cron("30 8 * * *"), "daily at 8:30");
    assert_eq!(describe_cron("0 9 * * 1-5"), "weekdays at 9:00");
  }

  #[tokio::test]
  async fn register_rejects_invalid_expression_without_entry() {
    let scheduler = CronScheduler::new();
    let task = scheduled_task("t1", "invalid cron");
    assert!(scheduler.register(&task).await.is_err());
    assert!(scheduler.info("t1").await.is_none());
  }

  #[tokio::test]
  async fn register_then_fire_then_skip_when_running() {
    let scheduler = CronScheduler::new();
    let task = scheduled_task("t1", "0 0 * * * *");
    let registered = scheduler.register(&task).await.unwrap();
    assert_eq!(registered.status, ScheduleStatus::Scheduled);
    let first_fire = registered.next_run_time.unwrap();

    let due = scheduler.collect_due(first_fire).await;
    assert_eq!(due, vec![Due::Fire("t1".to_string())]);

    // Still running at the next nominal fire: skipped, not re-fired.
    let second_fire = scheduler.info("t1").await.unwrap().next_run_time.unwrap();
    assert!(second_fire > first_fire);
    let due = scheduler.collect_due(second_fire).await;
    assert_eq!(due, vec![Due::Skipped("t1".to_string())]);
    let info = scheduler.info("t1").await.unwrap();
    assert_eq!(info.last_run_status.as_deref(), Some("skipped"));

    scheduler.complete("t1", Utc::now(), "success", "completed 1 requests", false).await;
    let info = scheduler.info("t1").await.unwrap();
    assert_eq!(info.status, ScheduleStatus::Scheduled);
    assert_eq!(info.last_run_status.as_deref(), Some("success"));
  }

  #[tokio::test]
  async fn unregister_is_idempotent_and_drops_queued_slots() {
    let scheduler = CronScheduler::new();
    let task = scheduled_task("t1", "0 0 * * * *");
    let next = scheduler.register(&task).await.unwrap().next_run_time.unwrap();
    assert!(scheduler.unregister("t1").await);
    assert!(!scheduler.unregister("t1").await);
    assert!(scheduler.collect_due(next).await.is_empty());
  }
}
