mod kubectl;


use thiserror::Error;

pub use kubectl::KubectlClient;

#[derive(Error, Debug)]
pub enum OrchestratorError {
  #[error("Failed to execute: {command}: {source}")]
  SpawnError {
    command: String,
    source: std::io::Error,
  },
  #[error("Command timed out after {seconds}s: {command}")]
  Timeout { command: String, seconds: u64 },
  #[error("Unable to run command: {command} (exit code {status:?}).\n err: {stderr}")]
  CommandFailed {
    command: String,
    status: Option<i32>,
    stderr: String,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
  Deleted,
  NotFound,
}

/// Control plane of the orchestrator sharing the node with PBS.
pub trait Orchestrator {
  /// Deletes a pod by name. A pod that does not exist is `NotFound`, not an error.
  fn delete_pod(&self, name: &str) -> Result<DeleteOutcome, OrchestratorError>;
}
