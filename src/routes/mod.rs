use std::convert::Infallible;
use std::sync::Arc;
use warp::Filter;

use crate::engine::Engine;
use crate::error::EngineError;

pub mod runs;
pub mod schedules;
pub mod sse;
pub mod vars;

pub fn routes(
  engine: Arc<Engine>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  runs::run_routes(engine.clone())
    .or(schedules::schedule_routes(engine.clone()))
    .or(vars::variable_routes(engine.clone()))
    .or(sse::sse_route(engine))
}

pub fn with_engine(
  engine: Arc<Engine>,
) -> impl Filter<Extract = (Arc<Engine>,), Error = Infallible> + Clone {
  warp::any().map(move || engine.clone())
}

pub fn error_reply(e: &EngineError) -> warp::reply::WithStatus<warp::reply::Json> {
  let status = match e {
    EngineError::RunNotFound(_) | EngineError::TaskNotFound(_) | EngineError::ScheduleNotFound(_) => {
      warp::http::StatusCode::NOT_FOUND
    }
    _ => warp::http::StatusCode::BAD_REQUEST,
  };
  warp::reply::with_status(
    warp::reply::json(&serde_json::json!({ "error": e.to_string() })),
    status,
  )
}
