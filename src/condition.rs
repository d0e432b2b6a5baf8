//! Success-condition evaluation: a JSON path walker plus operator
//! comparisons over the resolved node. Pure functions, safe to call from
//! any number of workers at once.

use serde_json::Value;

use crate::models::{ConditionOutcome, Operator, SuccessCondition};

enum Resolved {
  Found(Value),
  NotFound,
}

pub fn evaluate(condition: &SuccessCondition, body: &str) -> ConditionOutcome {
  let mut outcome = ConditionOutcome {
    json_path: condition.json_path.clone(),
    operator: condition.operator,
    expected_value: condition.expected_value.clone(),
    actual_value: String::new(),
    result: false,
    reason: String::new(),
  };

  if !condition.enabled {
    outcome.result = true;
    outcome.reason = "condition disabled".into();
    return outcome;
  }

  let operator = match condition.operator {
    Some(op) => op,
    None => {
      outcome.reason = "no operator configured".into();
      return outcome;
    }
  };

  let cleaned = clean_body(body);
  let parsed: Value = match serde_json::from_str(&cleaned) {
    Ok(v) => v,
    Err(e) => {
      outcome.reason = format!("response body is not valid JSON: {}", e);
      return outcome;
    }
  };

  match resolve_path(&parsed, &condition.json_path) {
    Resolved::NotFound => {
      outcome.result = operator == Operator::NotExists;
      outcome.reason = if outcome.result {
        format!("path {} not found, as required", condition.json_path)
      } else {
        format!("path {} not found", condition.json_path)
      };
      outcome
    }
    Resolved::Found(value) => {
      outcome.actual_value = value_to_string(&value);
      let (result, reason) = apply_operator(operator, &value, &outcome.actual_value, &condition.expected_value);
      outcome.result = result;
      outcome.reason = reason;
      outcome
    }
  }
}

fn apply_operator(operator: Operator, value: &Value, actual: &str, expected: &str) -> (bool, String) {
  match operator {
    Operator::Exists => (true, format!("path resolved to '{}'", actual)),
    Operator::NotExists => (false, format!("path resolved to '{}' but was required to be absent", actual)),
    Operator::Equals => {
      let result = loose_eq(actual, expected);
      (result, format!("checked '{}' equals '{}'", actual, expected))
    }
    Operator::NotEquals => {
      let result = !loose_eq(actual, expected);
      (result, format!("checked '{}' differs from '{}'", actual, expected))
    }
    Operator::Contains => match value {
      Value::String(s) => (
        s.contains(expected),
        format!("checked string '{}' contains '{}'", s, expected),
      ),
      Value::Array(items) => (
        items.iter().any(|item| value_to_string(item) == expected),
        format!("checked array of {} elements for member '{}'", items.len(), expected),
      ),
      _ => (false, format!("value '{}' is neither a string nor an array", actual)),
    },
    Operator::GreaterThan => numeric_cmp(actual, expected, |a, b| a > b, "greater than"),
    Operator::LessThan => numeric_cmp(actual, expected, |a, b| a < b, "less than"),
  }
}

// Numeric comparison when both sides parse as numbers, else plain string equality.
fn loose_eq(actual: &str, expected: &str) -> bool {
  match (actual.parse::<f64>(), expected.parse::<f64>()) {
    (Ok(a), Ok(b)) => a == b,
    _ => actual == expected,
  }
}

fn numeric_cmp(actual: &str, expected: &str, cmp: fn(f64, f64) -> bool, label: &str) -> (bool, String) {
  match (actual.parse::<f64>(), expected.parse::<f64>()) {
    (Ok(a), Ok(b)) => (cmp(a, b), format!("checked {} is {} {}", a, label, b)),
    _ => (
      false,
      format!("cannot compare '{}' and '{}' numerically", actual, expected),
    ),
  }
}

fn resolve_path(data: &Value, path: &str) -> Resolved {
  let path = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);
  if path.is_empty() {
    return Resolved::Found(data.clone());
  }

  let mut current = data;
  for part in path.split('.') {
    current = match current {
      Value::Object(map) => match map.get(part) {
        Some(v) => v,
        None => return Resolved::NotFound,
      },
      Value::Array(items) => match part.parse::<usize>().ok().and_then(|i| items.get(i)) {
        Some(v) => v,
        None => return Resolved::NotFound,
      },
      _ => return Resolved::NotFound,
    };
  }
  Resolved::Found(current.clone())
}

fn value_to_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Strip BOMs and stray control characters some servers prepend; without
/// this, otherwise-valid JSON fails to parse.
pub fn clean_body(body: &str) -> String {
  let bytes = body.as_bytes();
  let bytes = if bytes.len() >= 3 && bytes[..3] == [0xEF, 0xBB, 0xBF] {
    &bytes[3..]
  } else {
    bytes
  };
  String::from_utf8_lossy(bytes)
    .trim_matches(|c: char| c.is_control() && c != '\n' && c != '\r' && c != '\t')
    .trim()
    .to_string()
}
