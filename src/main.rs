use std::sync::Arc;

use tracing_subscriber;
use httprunner::{config::Config, engine::Engine, routes::routes, storage::InMemoryTaskStore};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt::init();
  let config = Config::from_env();
  let port = config.server_port;

  let store = Arc::new(InMemoryTaskStore::new());
  let engine = Engine::new(config, store);
  engine.start_scheduler();

  let api = routes(engine);

  warp::serve(api)
    .run(([0, 0, 0, 0], port))
    .await;
}
