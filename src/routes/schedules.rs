use std::sync::Arc;

use serde_json::json;
use tracing::info;
use warp::http::StatusCode;
use warp::Filter;

use crate::engine::Engine;
use crate::models::Task;
use super::{error_reply, with_engine};

pub fn schedule_routes(
  engine: Arc<Engine>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  let register = warp::path!("schedules")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_engine(engine.clone()))
    .and_then(handle_register);

  let unregister = warp::path!("schedules" / String)
    .and(warp::delete())
    .and(with_engine(engine.clone()))
    .and_then(handle_unregister);

  let info = warp::path!("schedules" / String)
    .and(warp::get())
    .and(with_engine(engine))
    .and_then(handle_info);

  register.or(unregister).or(info)
}

async fn handle_register(task: Task, engine: Arc<Engine>) -> Result<impl warp::Reply, warp::Rejection> {
  match engine.register_schedule(task).await {
    Ok(info) => {
      info!(task_id = %info.task_id, "schedule registered via api");
      Ok(warp::reply::with_status(warp::reply::json(&info), StatusCode::OK))
    }
    Err(e) => Ok(error_reply(&e)),
  }
}

async fn handle_unregister(task_id: String, engine: Arc<Engine>) -> Result<impl warp::Reply, warp::Rejection> {
  let removed = engine.unregister_schedule(&task_id).await;
  Ok(warp::reply::with_status(
    warp::reply::json(&json!({ "task_id": task_id, "removed": removed })),
    StatusCode::OK,
  ))
}

async fn handle_info(task_id: String, engine: Arc<Engine>) -> Result<impl warp::Reply, warp::Rejection> {
  match engine.get_schedule_info(&task_id).await {
    Ok(info) => Ok(warp::reply::with_status(warp::reply::json(&info), StatusCode::OK)),
    Err(e) => Ok(error_reply(&e)),
  }
}
