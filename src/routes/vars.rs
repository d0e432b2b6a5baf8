use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;
use warp::Filter;

use crate::engine::Engine;
use super::with_engine;

#[derive(Deserialize)]
struct VariableBody {
  value: String,
}

pub fn variable_routes(
  engine: Arc<Engine>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  let list = warp::path!("variables")
    .and(warp::get())
    .and(with_engine(engine.clone()))
    .and_then(handle_list);

  let set = warp::path!("variables" / String)
    .and(warp::put())
    .and(warp::body::json())
    .and(with_engine(engine.clone()))
    .and_then(handle_set);

  let remove = warp::path!("variables" / String)
    .and(warp::delete())
    .and(with_engine(engine))
    .and_then(handle_remove);

  list.or(set).or(remove)
}

async fn handle_list(engine: Arc<Engine>) -> Result<impl warp::Reply, warp::Rejection> {
  Ok(warp::reply::json(&engine.variables().await))
}

async fn handle_set(
  name: String,
  body: VariableBody,
  engine: Arc<Engine>,
) -> Result<impl warp::Reply, warp::Rejection> {
  if name.is_empty() {
    return Ok(warp::reply::with_status(
      warp::reply::json(&json!({ "error": "variable name must not be empty" })),
      StatusCode::BAD_REQUEST,
    ));
  }
  engine.set_variable(name.clone(), body.value).await;
  Ok(warp::reply::with_status(
    warp::reply::json(&json!({ "name": name, "status": "set" })),
    StatusCode::OK,
  ))
}

async fn handle_remove(name: String, engine: Arc<Engine>) -> Result<impl warp::Reply, warp::Rejection> {
  let removed = engine.remove_variable(&name).await;
  Ok(warp::reply::json(&json!({ "name": name, "removed": removed })))
}
