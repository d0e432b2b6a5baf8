use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("invalid schedule expression: {0}")]
  InvalidScheduleExpression(String),
  #[error("invalid concurrency config: {0}")]
  ConcurrencyConfig(String),
  #[error("no run with id {0}")]
  RunNotFound(Uuid),
  #[error("no task with id {0}")]
  TaskNotFound(String),
  #[error("task {0} has no schedule registered")]
  ScheduleNotFound(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
