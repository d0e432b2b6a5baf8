use std::env;

#[derive(Debug, Clone)]
pub struct Config {
  pub server_port: u16,
  pub request_timeout_secs: u64,
  pub response_body_limit: usize,
  pub redacted_headers: Vec<String>,
}

impl Config {
  pub fn from_env() -> Self {
    Self {
      server_port: env::var("SERVER_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()
        .unwrap_or(8080),
      request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
        .unwrap_or_else(|_| "30".into())
        .parse()
        .unwrap_or(30),
      response_body_limit: env::var("RESPONSE_BODY_LIMIT")
        .unwrap_or_else(|_| "10240".into())
        .parse()
        .unwrap_or(10240),
      redacted_headers: env::var("REDACTED_HEADERS")
        .unwrap_or_else(|_| "authorization,cookie,token".into())
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect(),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      server_port: 8080,
      request_timeout_secs: 30,
      response_body_limit: 10240,
      redacted_headers: vec!["authorization".into(), "cookie".into(), "token".into()],
    }
  }
}
