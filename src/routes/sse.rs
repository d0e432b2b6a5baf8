use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use uuid::Uuid;
use warp::Filter;

use crate::engine::Engine;
use super::with_engine;

#[derive(Debug)]
struct CustomError {
  message: String,
}
impl warp::reject::Reject for CustomError {}

pub fn sse_route(
  engine: Arc<Engine>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("sse")
    .and(warp::get())
    .and(warp::query::<std::collections::HashMap<String, String>>())
    .and(with_engine(engine))
    .and_then(handle_sse)
}

async fn handle_sse(
  query: std::collections::HashMap<String, String>,
  engine: Arc<Engine>,
) -> Result<impl warp::Reply, warp::Rejection> {
  let run_id = query
    .get("run_id")
    .and_then(|v| Uuid::parse_str(v).ok())
    .ok_or_else(|| {
      warp::reject::custom(CustomError {
        message: "missing or invalid run_id".to_string(),
      })
    })?;

  let interval = IntervalStream::new(tokio::time::interval(Duration::from_secs(1)));
  let stream = interval
    .then(move |_| {
      let engine = engine.clone();
      async move {
        match engine.get_progress(run_id).await {
          Ok(snapshot) => {
            let event = warp::sse::Event::default().data(
              json!({
                "run_id": run_id,
                "current": snapshot.current,
                "total": snapshot.total,
                "is_running": snapshot.is_running,
                "elapsed_secs": snapshot.elapsed_secs,
              })
              .to_string(),
            );
            Some(Ok::<_, Infallible>(event))
          }
          Err(_) => None,
        }
      }
    })
    .filter_map(|x| x);

  Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)))
}
