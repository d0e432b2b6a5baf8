use std::sync::Arc;

use regex::Regex;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::Filter;

use crate::engine::Engine;
use crate::models::Task;
use super::{error_reply, with_engine};

fn valid_header_names(task: &Task) -> Result<(), String> {
  let re = Regex::new(r"^[\w\-]+$").unwrap();
  for key in task.headers.keys() {
    if !re.is_match(key) {
      return Err(format!("invalid header name '{}'", key));
    }
  }
  Ok(())
}

pub fn run_routes(
  engine: Arc<Engine>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  let start = warp::path!("runs")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_engine(engine.clone()))
    .and_then(handle_start_run);

  let cancel = warp::path!("runs" / Uuid)
    .and(warp::delete())
    .and(with_engine(engine.clone()))
    .and_then(handle_cancel_run);

  let progress = warp::path!("runs" / Uuid / "progress")
    .and(warp::get())
    .and(with_engine(engine.clone()))
    .and_then(handle_get_progress);

  let log = warp::path!("runs" / Uuid / "log")
    .and(warp::get())
    .and(with_engine(engine.clone()))
    .and_then(handle_get_log);

  let test = warp::path!("test")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_engine(engine))
    .and_then(handle_test_once);

  start.or(cancel).or(progress).or(log).or(test)
}

async fn handle_start_run(task: Task, engine: Arc<Engine>) -> Result<impl warp::Reply, warp::Rejection> {
  if let Err(e) = valid_header_names(&task) {
    error!("run payload validation failed: {}", e);
    return Ok(warp::reply::with_status(
      warp::reply::json(&json!({ "error": e })),
      StatusCode::BAD_REQUEST,
    ));
  }

  match engine.start_run(task).await {
    Ok(run_id) => {
      info!(%run_id, "run started");
      Ok(warp::reply::with_status(
        warp::reply::json(&json!({
          "run_id": run_id,
          "sse_url": format!("/sse?run_id={}", run_id),
        })),
        StatusCode::OK,
      ))
    }
    Err(e) => Ok(error_reply(&e)),
  }
}

async fn handle_cancel_run(run_id: Uuid, engine: Arc<Engine>) -> Result<impl warp::Reply, warp::Rejection> {
  match engine.cancel_run(run_id).await {
    Ok(()) => Ok(warp::reply::with_status(
      warp::reply::json(&json!({ "run_id": run_id, "status": "cancelling" })),
      StatusCode::OK,
    )),
    Err(e) => Ok(error_reply(&e)),
  }
}

async fn handle_get_progress(run_id: Uuid, engine: Arc<Engine>) -> Result<impl warp::Reply, warp::Rejection> {
  match engine.get_progress(run_id).await {
    Ok(snapshot) => Ok(warp::reply::with_status(warp::reply::json(&snapshot), StatusCode::OK)),
    Err(e) => Ok(error_reply(&e)),
  }
}

async fn handle_get_log(run_id: Uuid, engine: Arc<Engine>) -> Result<impl warp::Reply, warp::Rejection> {
  match engine.get_execution_log(run_id).await {
    Ok(log) => Ok(warp::reply::with_status(warp::reply::json(&log), StatusCode::OK)),
    Err(e) => Ok(error_reply(&e)),
  }
}

async fn handle_test_once(task: Task, engine: Arc<Engine>) -> Result<impl warp::Reply, warp::Rejection> {
  if let Err(e) = valid_header_names(&task) {
    return Ok(warp::reply::with_status(
      warp::reply::json(&json!({ "error": e })),
      StatusCode::BAD_REQUEST,
    ));
  }
  let result = engine.test_once(task).await;
  Ok(warp::reply::with_status(warp::reply::json(&result), StatusCode::OK))
}
