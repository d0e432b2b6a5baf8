use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use uuid::Uuid;
use warp::Filter;

use httprunner::config::Config;
use httprunner::engine::Engine;
use httprunner::error::EngineError;
use httprunner::models::{ErrorType, ExecutionLog, HttpMethod, Operator, SuccessCondition, Task};
use httprunner::storage::InMemoryTaskStore;

fn task(url: String, times: u32, threads: u32) -> Task {
  Task {
    id: "t1".into(),
    name: "probe".into(),
    url,
    method: HttpMethod::GET,
    headers: HashMap::new(),
    headers_text: String::new(),
    body: String::new(),
    times,
    threads,
    delay_min_ms: 0,
    delay_max_ms: 0,
    tags: vec![],
    cron_expr: None,
    success_condition: None,
    use_virtual_source: false,
    created_at: None,
    updated_at: None,
  }
}

fn engine_with_timeout(timeout_secs: u64) -> Arc<Engine> {
  let config = Config {
    request_timeout_secs: timeout_secs,
    ..Config::default()
  };
  Engine::new(config, Arc::new(InMemoryTaskStore::new()))
}

async fn wait_for_log(engine: &Arc<Engine>, run_id: Uuid) -> ExecutionLog {
  for _ in 0..400 {
    if let Ok(log) = engine.get_execution_log(run_id).await {
      return log;
    }
    sleep(Duration::from_millis(25)).await;
  }
  panic!("run {} did not finalize in time", run_id);
}

#[tokio::test]
async fn completed_run_produces_exactly_times_records() {
  let stub = warp::path!("ok").map(|| warp::reply::json(&json!({"status":"ok"})));
  let (addr, server) = warp::serve(stub).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  let engine = engine_with_timeout(5);

  let run_id = engine
    .start_run(task(format!("http://{}/ok", addr), 10, 3))
    .await
    .unwrap();
  let log = wait_for_log(&engine, run_id).await;

  assert_eq!(log.total_requests, 10);
  assert_eq!(log.success_count, 10);
  assert_eq!(log.failed_count, 0);
  assert_eq!(log.records.len(), 10);

  // Ids reflect issuance order even though completion order may differ.
  let mut ids: Vec<u64> = log.records.iter().map(|r| r.request_id).collect();
  ids.sort_unstable();
  assert_eq!(ids, (1..=10).collect::<Vec<u64>>());

  let progress = engine.get_progress(run_id).await.unwrap();
  assert!(!progress.is_running);
  assert_eq!(progress.current, 10);
}

#[tokio::test]
async fn predicate_mismatch_fails_every_request_with_details() {
  let stub = warp::path!("fail").map(|| warp::reply::json(&json!({"status":"fail"})));
  let (addr, server) = warp::serve(stub).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  let engine = engine_with_timeout(5);

  let mut probe = task(format!("http://{}/fail", addr), 3, 1);
  probe.success_condition = Some(SuccessCondition {
    enabled: true,
    json_path: "$.status".into(),
    operator: Some(Operator::Equals),
    expected_value: "ok".into(),
  });

  let run_id = engine.start_run(probe).await.unwrap();
  let log = wait_for_log(&engine, run_id).await;

  assert_eq!(log.total_requests, 3);
  assert_eq!(log.success_count, 0);
  assert_eq!(log.failed_count, 3);
  for record in &log.records {
    assert_eq!(record.status_code, 200);
    assert_eq!(record.error_type, Some(ErrorType::PredicateFailed));
    let outcome = record.condition.as_ref().unwrap();
    assert!(!outcome.result);
    assert_eq!(outcome.actual_value, "fail");
    assert!(outcome.reason.contains("equals"));
  }
}

#[tokio::test]
async fn timeouts_are_classified_per_record() {
  let stub = warp::path!("slow").and_then(|| async {
    sleep(Duration::from_secs(3)).await;
    Ok::<_, warp::Rejection>(warp::reply::json(&json!({"status":"ok"})))
  });
  let (addr, server) = warp::serve(stub).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  let engine = engine_with_timeout(1);

  let run_id = engine
    .start_run(task(format!("http://{}/slow", addr), 5, 5))
    .await
    .unwrap();
  let log = wait_for_log(&engine, run_id).await;

  assert_eq!(log.total_requests, 5);
  assert_eq!(log.success_count, 0);
  assert_eq!(log.failed_count, 5);
  for record in &log.records {
    assert_eq!(record.status_code, 0);
    assert_eq!(record.error_type, Some(ErrorType::Timeout));
    assert!(!record.success);
  }
}

#[tokio::test]
async fn http_error_statuses_fail_without_condition() {
  let stub = warp::path!("missing").map(|| {
    warp::reply::with_status(warp::reply::json(&json!({"error":"gone"})), warp::http::StatusCode::NOT_FOUND)
  });
  let (addr, server) = warp::serve(stub).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  let engine = engine_with_timeout(5);

  let run_id = engine
    .start_run(task(format!("http://{}/missing", addr), 2, 1))
    .await
    .unwrap();
  let log = wait_for_log(&engine, run_id).await;

  assert_eq!(log.success_count, 0);
  assert_eq!(log.failed_count, 2);
  for record in &log.records {
    assert_eq!(record.status_code, 404);
    assert_eq!(record.error_type, Some(ErrorType::HttpStatus));
  }
}

#[tokio::test]
async fn concurrency_never_exceeds_thread_count() {
  let inflight = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));
  let stub = {
    let inflight = inflight.clone();
    let peak = peak.clone();
    warp::path!("gauged").and_then(move || {
      let inflight = inflight.clone();
      let peak = peak.clone();
      async move {
        let now = inflight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        sleep(Duration::from_millis(50)).await;
        inflight.fetch_sub(1, Ordering::SeqCst);
        Ok::<_, warp::Rejection>(warp::reply::json(&json!({"status":"ok"})))
      }
    })
  };
  let (addr, server) = warp::serve(stub).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  let engine = engine_with_timeout(5);

  let run_id = engine
    .start_run(task(format!("http://{}/gauged", addr), 12, 3))
    .await
    .unwrap();
  let log = wait_for_log(&engine, run_id).await;

  assert_eq!(log.total_requests, 12);
  assert!(peak.load(Ordering::SeqCst) <= 3, "peak in-flight {}", peak.load(Ordering::SeqCst));
}

#[tokio::test]
async fn cancellation_stops_new_claims_and_finalizes() {
  let stub = warp::path!("steady").and_then(|| async {
    sleep(Duration::from_millis(200)).await;
    Ok::<_, warp::Rejection>(warp::reply::json(&json!({"status":"ok"})))
  });
  let (addr, server) = warp::serve(stub).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  let engine = engine_with_timeout(5);

  let run_id = engine
    .start_run(task(format!("http://{}/steady", addr), 50, 2))
    .await
    .unwrap();

  sleep(Duration::from_millis(350)).await;
  engine.cancel_run(run_id).await.unwrap();

  let log = wait_for_log(&engine, run_id).await;
  let progress = engine.get_progress(run_id).await.unwrap();

  assert!(!progress.is_running);
  assert!(log.total_requests < 50);
  assert_eq!(log.total_requests, progress.current);
  assert_eq!(log.success_count + log.failed_count, log.total_requests);
}

#[tokio::test]
async fn single_worker_respects_delay_between_requests() {
  let stub = warp::path!("ok").map(|| warp::reply::json(&json!({"status":"ok"})));
  let (addr, server) = warp::serve(stub).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  let engine = engine_with_timeout(5);

  let mut probe = task(format!("http://{}/ok", addr), 3, 1);
  probe.delay_min_ms = 100;
  probe.delay_max_ms = 150;

  let started = std::time::Instant::now();
  let run_id = engine.start_run(probe).await.unwrap();
  let log = wait_for_log(&engine, run_id).await;

  // First request skips the delay; the two remaining gaps take >= 200ms.
  assert_eq!(log.total_requests, 3);
  assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn invalid_cron_is_rejected_without_schedule_info() {
  let engine = engine_with_timeout(5);
  let mut probe = task("http://localhost/ok".into(), 1, 1);
  probe.cron_expr = Some("invalid cron".into());

  let result = engine.register_schedule(probe).await;
  assert!(matches!(result, Err(EngineError::InvalidScheduleExpression(_))));
  assert!(matches!(
    engine.get_schedule_info("t1").await,
    Err(EngineError::TaskNotFound(_))
  ));
}

#[tokio::test]
async fn schedule_fires_and_records_last_run() {
  let stub = warp::path!("ok").map(|| warp::reply::json(&json!({"status":"ok"})));
  let (addr, server) = warp::serve(stub).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);

  let store = Arc::new(InMemoryTaskStore::new());
  let mut probe = task(format!("http://{}/ok", addr), 1, 1);
  probe.cron_expr = Some("* * * * * *".into());
  store.put_task(probe.clone()).await;

  let engine = Engine::new(Config::default(), store.clone());
  engine.start_scheduler();
  engine.register_schedule(probe).await.unwrap();

  // Every-second cadence: at least one fire comfortably fits in the window.
  sleep(Duration::from_secs(4)).await;

  let info = engine.get_schedule_info("t1").await.unwrap();
  assert!(info.is_scheduled);
  assert_eq!(info.last_run_status.as_deref(), Some("success"));
  assert!(info.next_run_time.is_some());

  let stored = store.last_run_info("t1").await.unwrap();
  assert_eq!(stored.status.as_deref(), Some("success"));
}

#[tokio::test]
async fn unregistered_task_with_cron_reports_idle() {
  let store = Arc::new(InMemoryTaskStore::new());
  let mut probe = task("http://localhost/ok".into(), 1, 1);
  probe.cron_expr = Some("*/5 * * * *".into());
  store.put_task(probe).await;

  let engine = Engine::new(Config::default(), store);
  let info = engine.get_schedule_info("t1").await.unwrap();
  assert!(!info.is_scheduled);
  assert_eq!(info.cron_description, "every 5 minutes");
}

#[tokio::test]
async fn test_once_redacts_sensitive_headers() {
  let stub = warp::path!("ok").map(|| warp::reply::json(&json!({"status":"ok"})));
  let (addr, server) = warp::serve(stub).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  let engine = engine_with_timeout(5);

  let mut probe = task(format!("http://{}/ok", addr), 1, 1);
  probe.headers.insert("Authorization".into(), "Bearer 0123456789abcdefghijklmn".into());
  probe.headers.insert("Accept".into(), "application/json".into());

  let result = engine.test_once(probe).await;
  assert!(result.success);
  assert_eq!(result.status_code, 200);
  assert_eq!(result.sensitive_headers, vec!["Authorization".to_string()]);
  let masked = result.request_headers.get("Authorization").unwrap();
  assert!(masked.contains("***"));
  assert_ne!(masked, "Bearer 0123456789abcdefghijklmn");
  assert!(result.response_body.contains("ok"));
}

#[tokio::test]
async fn unreachable_target_still_yields_complete_log() {
  // Nothing listens on the discard port; every attempt fails in transport.
  let engine = engine_with_timeout(2);
  let run_id = engine
    .start_run(task("http://127.0.0.1:9/nope".into(), 3, 3))
    .await
    .unwrap();
  let log = wait_for_log(&engine, run_id).await;

  assert_eq!(log.total_requests, 3);
  assert_eq!(log.success_count, 0);
  assert_eq!(log.failed_count, 3);
  for record in &log.records {
    assert_eq!(record.status_code, 0);
    assert!(record.error.is_some());
  }
}
