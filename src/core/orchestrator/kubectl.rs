use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use log::{debug, trace};

use crate::core::hook_config::HookConfig;
use crate::core::orchestrator::{DeleteOutcome, Orchestrator, OrchestratorError};

/// Exit status of coreutils `timeout` when the command ran out of time.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Talks to the API server through the `kubectl` binary.
#[derive(Debug, Clone, PartialEq)]
pub struct KubectlClient {
  pub kubectl_path: PathBuf,
  /// Exported as KUBERNETES_MASTER when set.
  pub endpoint: Option<String>,
  pub timeout: Option<Duration>,
}

impl KubectlClient {
  pub fn from_config(config: &HookConfig) -> Self {
    KubectlClient {
      kubectl_path: config.kubectl_path.clone(),
      endpoint: config.orchestrator_endpoint.clone(),
      timeout: config.delete_timeout(),
    }
  }

  fn command_line(&self, args: &[&str]) -> String {
    let mut line = self.kubectl_path.display().to_string();
    for arg in args {
      line.push(' ');
      line.push_str(arg);
    }
    line
  }

  fn build_command(&self, args: &[&str]) -> Command {
    let mut command = match self.timeout {
      Some(timeout) => {
        let mut timeout_cmd = Command::new("timeout");
        timeout_cmd
          .arg(timeout.as_secs().max(1).to_string())
          .arg(&self.kubectl_path);
        timeout_cmd
      }
      None => Command::new(&self.kubectl_path),
    };
    command
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    if let Some(endpoint) = &self.endpoint {
      command.env("KUBERNETES_MASTER", endpoint);
    }
    command
  }
}

/// kubectl reports a missing object as `Error from server (NotFound): pods "x" not found`.
fn is_not_found(stderr: &str) -> bool {
  stderr.contains("(NotFound)") || (stderr.contains("pods \"") && stderr.contains("not found"))
}

impl Orchestrator for KubectlClient {
  fn delete_pod(&self, name: &str) -> Result<DeleteOutcome, OrchestratorError> {
    let args = ["delete", "pod", name];
    let command_line = self.command_line(&args);
    trace!("Running: {}", command_line);

    let output = self
      .build_command(&args)
      .output()
      .map_err(|source| OrchestratorError::SpawnError {
        command: command_line.clone(),
        source,
      })?;

    let status = output.status.code();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if output.status.success() {
      debug!(
        "{}: {}",
        command_line,
        String::from_utf8_lossy(&output.stdout).trim()
      );
      return Ok(DeleteOutcome::Deleted);
    }
    if self.timeout.is_some() && status == Some(TIMEOUT_EXIT_CODE) {
      return Err(OrchestratorError::Timeout {
        command: command_line,
        seconds: self.timeout.map(|t| t.as_secs().max(1)).unwrap_or_default(),
      });
    }
    if is_not_found(&stderr) {
      return Ok(DeleteOutcome::NotFound);
    }
    Err(OrchestratorError::CommandFailed {
      command: command_line,
      status,
      stderr,
    })
  }
}
