use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
  GET,
  POST,
  PUT,
  DELETE,
  PATCH,
  HEAD,
  OPTIONS,
}

impl HttpMethod {
  pub fn as_reqwest(&self) -> reqwest::Method {
    match self {
      HttpMethod::GET => reqwest::Method::GET,
      HttpMethod::POST => reqwest::Method::POST,
      HttpMethod::PUT => reqwest::Method::PUT,
      HttpMethod::DELETE => reqwest::Method::DELETE,
      HttpMethod::PATCH => reqwest::Method::PATCH,
      HttpMethod::HEAD => reqwest::Method::HEAD,
      HttpMethod::OPTIONS => reqwest::Method::OPTIONS,
    }
  }
}

impl Default for HttpMethod {
  fn default() -> Self {
    HttpMethod::GET
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operator {
  Equals,
  NotEquals,
  Contains,
  GreaterThan,
  LessThan,
  Exists,
  NotExists,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuccessCondition {
  pub enabled: bool,
  #[serde(default)]
  pub json_path: String,
  pub operator: Option<Operator>,
  #[serde(default)]
  pub expected_value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorType {
  Timeout,
  Connection,
  HttpStatus,
  PredicateFailed,
  Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
  #[serde(default)]
  pub id: String,
  pub name: String,
  pub url: String,
  #[serde(default)]
  pub method: HttpMethod,
  #[serde(default)]
  pub headers: HashMap<String, String>,
  #[serde(default)]
  pub headers_text: String,
  #[serde(default)]
  pub body: String,
  #[serde(default = "default_repeat")]
  pub times: u32,
  #[serde(default = "default_repeat")]
  pub threads: u32,
  #[serde(default)]
  pub delay_min_ms: u64,
  #[serde(default)]
  pub delay_max_ms: u64,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub cron_expr: Option<String>,
  #[serde(default)]
  pub success_condition: Option<SuccessCondition>,
  #[serde(default)]
  pub use_virtual_source: bool,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
  pub fn validate(&self) -> Result<(), EngineError> {
    if self.times < 1 {
      return Err(EngineError::ConcurrencyConfig("times must be at least 1".into()));
    }
    if self.threads < 1 {
      return Err(EngineError::ConcurrencyConfig("threads must be at least 1".into()));
    }
    if self.threads > self.times {
      return Err(EngineError::ConcurrencyConfig(format!(
        "threads ({}) must not exceed times ({})",
        self.threads, self.times
      )));
    }
    if self.delay_min_ms > self.delay_max_ms {
      return Err(EngineError::ConcurrencyConfig(format!(
        "delay_min_ms ({}) must not exceed delay_max_ms ({})",
        self.delay_min_ms, self.delay_max_ms
      )));
    }
    Ok(())
  }

  /// Immutable per-run snapshot with `{{VAR}}` placeholders substituted.
  /// Concurrent edits to the stored task never affect a dispatched run.
  pub fn materialize(&self, vars: &HashMap<String, String>) -> TaskSnapshot {
    let headers = if self.headers.is_empty() && !self.headers_text.is_empty() {
      parse_headers_text(&self.headers_text)
    } else {
      self.headers.clone()
    };
    let headers = headers
      .into_iter()
      .map(|(k, v)| (replace_variables(&k, vars), replace_variables(&v, vars)))
      .collect();

    TaskSnapshot {
      task_id: self.id.clone(),
      name: self.name.clone(),
      url: replace_variables(&self.url, vars),
      method: self.method,
      headers,
      body: replace_variables(&self.body, vars),
      times: self.times,
      threads: self.threads,
      delay_min_ms: self.delay_min_ms,
      delay_max_ms: self.delay_max_ms,
      success_condition: self.success_condition.clone(),
      use_virtual_source: self.use_virtual_source,
    }
  }
}

/// The frozen view of a task that a single run executes against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
  pub task_id: String,
  pub name: String,
  pub url: String,
  pub method: HttpMethod,
  pub headers: HashMap<String, String>,
  pub body: String,
  pub times: u32,
  pub threads: u32,
  pub delay_min_ms: u64,
  pub delay_max_ms: u64,
  pub success_condition: Option<SuccessCondition>,
  pub use_virtual_source: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionOutcome {
  pub json_path: String,
  pub operator: Option<Operator>,
  pub expected_value: String,
  pub actual_value: String,
  pub result: bool,
  pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
  pub request_id: u64,
  pub timestamp: DateTime<Utc>,
  pub url: String,
  pub method: HttpMethod,
  pub status_code: u16,
  pub latency_ms: u64,
  pub response: String,
  pub success: bool,
  pub error: Option<String>,
  pub error_type: Option<ErrorType>,
  pub condition: Option<ConditionOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
  pub run_id: Uuid,
  pub task_id: String,
  pub records: Vec<RequestRecord>,
  pub total_requests: u32,
  pub success_count: u32,
  pub failed_count: u32,
  pub duration_ms: u64,
  pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
  pub current: u32,
  pub total: u32,
  pub start_time: DateTime<Utc>,
  pub is_running: bool,
  pub elapsed_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
  Idle,
  Scheduled,
  Running,
  Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskScheduleInfo {
  pub task_id: String,
  pub is_scheduled: bool,
  pub cron_expr: String,
  pub next_run_time: Option<DateTime<Utc>>,
  pub cron_description: String,
  pub status: ScheduleStatus,
  pub last_run_time: Option<DateTime<Utc>>,
  pub last_run_status: Option<String>,
  pub last_run_result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
  pub success: bool,
  pub status_code: u16,
  pub status_text: String,
  pub response_time_ms: u64,
  pub request_headers: HashMap<String, String>,
  pub response_headers: HashMap<String, String>,
  pub response_body: String,
  pub error: Option<String>,
  pub request_url: String,
  pub request_method: HttpMethod,
  pub request_body_size: usize,
  pub sensitive_headers: Vec<String>,
  pub condition: Option<ConditionOutcome>,
}

fn default_repeat() -> u32 {
  1
}

/// Parse "Key: Value" lines into a header map. Blank lines and lines
/// without a colon are skipped.
pub fn parse_headers_text(headers_text: &str) -> HashMap<String, String> {
  let mut headers = HashMap::new();
  for line in headers_text.lines() {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    if let Some(idx) = line.find(':') {
      let key = line[..idx].trim();
      let value = line[idx + 1..].trim();
      if !key.is_empty() && !value.is_empty() {
        headers.insert(key.to_string(), value.to_string());
      }
    }
  }
  headers
}

/// Substitute `{{NAME}}` placeholders. Bounded passes so a variable whose
/// value contains another placeholder still resolves without recursing forever.
pub fn replace_variables(text: &str, vars: &HashMap<String, String>) -> String {
  if text.is_empty() || vars.is_empty() {
    return text.to_string();
  }
  let mut result = text.to_string();
  for _ in 0..10 {
    let before = result.clone();
    for (key, value) in vars {
      result = result.replace(&format!("{{{{{}}}}}", key), value);
    }
    if result == before {
      break;
    }
  }
  result
}
