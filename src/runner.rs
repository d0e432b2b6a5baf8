use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Client;
use tracing::debug;

use crate::condition;
use crate::config::Config;
use crate::models::{ErrorType, RequestRecord, TaskSnapshot, TestResult};

#[derive(Debug, Clone)]
pub struct RunnerOptions {
  pub timeout: Duration,
  pub body_limit: usize,
  pub redacted_headers: Vec<String>,
}

impl RunnerOptions {
  pub fn from_config(config: &Config) -> Self {
    Self {
      timeout: Duration::from_secs(config.request_timeout_secs),
      body_limit: config.response_body_limit,
      redacted_headers: config.redacted_headers.clone(),
    }
  }
}

/// Perform one HTTP call for the given snapshot and produce the per-request
/// record. Transport failures are recorded, never raised.
pub async fn execute(client: &Client, snapshot: &TaskSnapshot, seq: u64, opts: &RunnerOptions) -> RequestRecord {
  let started = Instant::now();
  let mut record = RequestRecord {
    request_id: seq,
    timestamp: Utc::now(),
    url: snapshot.url.clone(),
    method: snapshot.method,
    status_code: 0,
    latency_ms: 0,
    response: String::new(),
    success: false,
    error: None,
    error_type: None,
    condition: None,
  };

  let response = build_request(client, snapshot, opts).send().await;
  let response = match response {
    Ok(resp) => resp,
    Err(e) => {
      record.latency_ms = started.elapsed().as_millis() as u64;
      record.error_type = Some(classify_transport_error(&e));
      record.error = Some(e.to_string());
      return record;
    }
  };

  record.status_code = response.status().as_u16();
  let body = match read_body(response, opts.body_limit).await {
    Ok(body) => body,
    Err(e) => {
      record.latency_ms = started.elapsed().as_millis() as u64;
      record.error_type = Some(ErrorType::Other);
      record.error = Some(format!("failed to read response body: {}", e));
      return record;
    }
  };
  record.latency_ms = started.elapsed().as_millis() as u64;
  record.response = body;

  match snapshot.success_condition.as_ref().filter(|c| c.enabled) {
    Some(cond) => {
      let outcome = condition::evaluate(cond, &record.response);
      record.success = outcome.result;
      if !outcome.result {
        record.error_type = Some(ErrorType::PredicateFailed);
        record.error = Some(outcome.reason.clone());
      }
      record.condition = Some(outcome);
    }
    None => {
      // 2xx/3xx counts as success when no condition is configured.
      if (200..400).contains(&record.status_code) {
        record.success = true;
      } else {
        record.error_type = Some(ErrorType::HttpStatus);
        record.error = Some(format!("HTTP {}", record.status_code));
      }
    }
  }

  record
}

/// Single-shot "try it" request. No concurrency, full header echo with
/// sensitive values masked.
pub async fn test_once(client: &Client, snapshot: &TaskSnapshot, opts: &RunnerOptions) -> TestResult {
  let started = Instant::now();
  let (request_headers, sensitive_headers) = redact_headers(&snapshot.headers, &opts.redacted_headers);
  let mut result = TestResult {
    success: false,
    status_code: 0,
    status_text: String::new(),
    response_time_ms: 0,
    request_headers,
    response_headers: HashMap::new(),
    response_body: String::new(),
    error: None,
    request_url: snapshot.url.clone(),
    request_method: snapshot.method,
    request_body_size: snapshot.body.len(),
    sensitive_headers,
    condition: None,
  };

  let response = match build_request(client, snapshot, opts).send().await {
    Ok(resp) => resp,
    Err(e) => {
      result.response_time_ms = started.elapsed().as_millis() as u64;
      result.error = Some(e.to_string());
      return result;
    }
  };

  result.status_code = response.status().as_u16();
  result.status_text = response
    .status()
    .canonical_reason()
    .unwrap_or("")
    .to_string();
  for (name, value) in response.headers() {
    result
      .response_headers
      .insert(name.to_string(), String::from_utf8_lossy(value.as_bytes()).to_string());
  }

  let body = match read_body(response, opts.body_limit).await {
    Ok(body) => body,
    Err(e) => {
      result.response_time_ms = started.elapsed().as_millis() as u64;
      result.error = Some(format!("failed to read response body: {}", e));
      return result;
    }
  };
  result.response_time_ms = started.elapsed().as_millis() as u64;
  result.response_body = body;

  match snapshot.success_condition.as_ref().filter(|c| c.enabled) {
    Some(cond) => {
      let outcome = condition::evaluate(cond, &result.response_body);
      result.success = outcome.result;
      result.condition = Some(outcome);
    }
    None => {
      result.success = (200..400).contains(&result.status_code);
    }
  }

  result
}

fn build_request(client: &Client, snapshot: &TaskSnapshot, opts: &RunnerOptions) -> reqwest::RequestBuilder {
  let mut req = client
    .request(snapshot.method.as_reqwest(), &snapshot.url)
    .timeout(opts.timeout);

  for (key, value) in &snapshot.headers {
    req = req.header(key.as_str(), value.as_str());
  }

  if let Some(content_type) = sniff_content_type(snapshot) {
    debug!(url = %snapshot.url, content_type, "defaulting Content-Type");
    req = req.header("Content-Type", content_type);
  }

  if !snapshot.body.is_empty() {
    req = req.body(snapshot.body.clone());
  }

  req
}

/// Pick a Content-Type for non-GET bodies when the user set none: form
/// payloads look like `a=1&b=2`, JSON starts with `{` or `[`.
fn sniff_content_type(snapshot: &TaskSnapshot) -> Option<&'static str> {
  if snapshot.method == crate::models::HttpMethod::GET || snapshot.body.is_empty() {
    return None;
  }
  let has_content_type = snapshot
    .headers
    .keys()
    .any(|k| k.eq_ignore_ascii_case("content-type"));
  if has_content_type {
    return None;
  }
  let trimmed = snapshot.body.trim_start();
  if snapshot.body.contains('=') && snapshot.body.contains('&') {
    Some("application/x-www-form-urlencoded")
  } else if trimmed.starts_with('{') || trimmed.starts_with('[') {
    Some("application/json")
  } else {
    None
  }
}

async fn read_body(response: reqwest::Response, limit: usize) -> Result<String, reqwest::Error> {
  let bytes = response.bytes().await?;
  let text = String::from_utf8_lossy(&bytes);
  if text.chars().count() > limit {
    let truncated: String = text.chars().take(limit).collect();
    Ok(format!("{}\n... (truncated, {} chars total)", truncated, text.chars().count()))
  } else {
    Ok(text.to_string())
  }
}

fn classify_transport_error(e: &reqwest::Error) -> ErrorType {
  if e.is_timeout() {
    ErrorType::Timeout
  } else if e.is_connect() {
    ErrorType::Connection
  } else {
    ErrorType::Other
  }
}

/// Mask values of configured sensitive headers. Matching is a lowercase
/// substring check, so "token" also covers "X-Api-Token".
pub fn redact_headers(
  headers: &HashMap<String, String>,
  redacted: &[String],
) -> (HashMap<String, String>, Vec<String>) {
  let mut masked = HashMap::new();
  let mut sensitive = Vec::new();
  for (key, value) in headers {
    if is_sensitive(key, redacted) {
      sensitive.push(key.clone());
      masked.insert(key.clone(), mask_value(value));
    } else {
      masked.insert(key.clone(), value.clone());
    }
  }
  sensitive.sort();
  (masked, sensitive)
}

fn is_sensitive(name: &str, redacted: &[String]) -> bool {
  let lower = name.to_lowercase();
  redacted.iter().any(|r| lower.contains(r.as_str()))
}

fn mask_value(value: &str) -> String {
  let chars: Vec<char> = value.chars().collect();
  if chars.len() > 20 {
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 7..].iter().collect();
    format!("{}***{}", head, tail)
  } else {
    "***".to_string()
  }
}
