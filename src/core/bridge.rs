use std::path::PathBuf;

use log::{debug, error, info, trace};

use crate::core::HookError;
use crate::core::events::{EventKind, HookEvent, Job};
use crate::core::hook_config::HookConfig;
use crate::core::orchestrator::{DeleteOutcome, Orchestrator};
use crate::core::placeholders::{PlaceholderStore, RemoveOutcome, ShadowPlaceholder};


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
  /// Placeholder manifest written at this path.
  Created(PathBuf),
  /// The job names its own pod; nothing written.
  ExternallyManaged(String),
  /// Writing failed; logged and ignored.
  WriteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
  Removed,
  AlreadyAbsent,
  /// Deletion failed; the placeholder may be orphaned.
  DeleteFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
  Accept,
  Reject(String),
}

/// Mirrors a PBS job's lifecycle onto a shadow placeholder pod.
pub struct ReservationBridge<'a> {
  config: &'a HookConfig,
  store: PlaceholderStore,
  orchestrator: &'a dyn Orchestrator,
}

impl<'a> ReservationBridge<'a> {
  pub fn new(config: &'a HookConfig, orchestrator: &'a dyn Orchestrator) -> Self {
    ReservationBridge {
      config,
      store: PlaceholderStore::from_config(config),
      orchestrator,
    }
  }

  /// Writes the placeholder for a starting job. Only malformed resource
  /// requests are returned as errors; write failures never block the launch.
  pub fn on_job_launch(&self, job: &Job) -> Result<LaunchOutcome, HookError> {
    trace!("on_job_launch: job {}", job.id);
    if let Some(name) = job.external_pod_name(&self.config.external_name_variable) {
      debug!(
        "Job {} manages its own pod {}, no placeholder created",
        job.id, name
      );
      return Ok(LaunchOutcome::ExternallyManaged(name.to_string()));
    }

    let spec = job.resource_spec(self.config.unit_mapping)?;
    let placeholder = ShadowPlaceholder::for_job(&spec, self.config);
    match self.store.write(&spec.job_name, &placeholder) {
      Ok(path) => {
        info!(
          "Created placeholder pod {} for job {} (cpu {}, memory {})",
          placeholder.name, job.id, placeholder.cpu_limit, placeholder.memory_limit
        );
        Ok(LaunchOutcome::Created(path))
      }
      Err(e) => {
        error!(
          "I/O error in writing placeholder for job {} to {:?}: {}",
          job.id,
          self.store.root(),
          e
        );
        Ok(LaunchOutcome::WriteFailed)
      }
    }
  }

  /// Removes the job's placeholder. Never fails: errors are logged and the
  /// placeholder is left for out-of-band cleanup.
  pub fn on_job_end(&self, job: &Job) -> EndOutcome {
    trace!("on_job_end: job {}", job.id);
    match job.external_pod_name(&self.config.external_name_variable) {
      None => {
        debug!("Deleting the Pod associated with job {}", job.id);
        match self.store.remove(&job.name) {
          Ok(RemoveOutcome::Removed) => EndOutcome::Removed,
          Ok(RemoveOutcome::NotFound) => {
            debug!("Placeholder for job {} not found, nothing to delete", job.id);
            EndOutcome::AlreadyAbsent
          }
          Err(e) => {
            error!("Pod deletion failed for job {}: {}", job.id, e);
            EndOutcome::DeleteFailed
          }
        }
      }
      Some(name) => {
        debug!("Deleting Pod {} associated with job {}", name, job.id);
        match self.orchestrator.delete_pod(name) {
          Ok(DeleteOutcome::Deleted) => EndOutcome::Removed,
          Ok(DeleteOutcome::NotFound) => {
            debug!("Pod {} not found, nothing to delete", name);
            EndOutcome::AlreadyAbsent
          }
          Err(e) => {
            error!("Pod deletion failed for job {}: {}", job.id, e);
            EndOutcome::DeleteFailed
          }
        }
      }
    }
  }

  pub fn dispatch(&self, event: &HookEvent) -> Result<(), HookError> {
    match event.kind() {
      Some(EventKind::ExecjobLaunch) => {
        self.on_job_launch(&event.job)?;
      }
      Some(EventKind::ExecjobEnd) => {
        self.on_job_end(&event.job);
      }
      None => debug!("Ignoring {} event for job {}", event.event_type, event.job.id),
    }
    Ok(())
  }

  /// Runs the event and turns any escaping error into a reject.
  pub fn handle(&self, event: &HookEvent) -> HookOutcome {
    match self.dispatch(event) {
      Ok(()) => HookOutcome::Accept,
      Err(e) => HookOutcome::Reject(reject_message(&event.hook_name, &event.event_type, &e)),
    }
  }
}

pub fn reject_message(hook_name: &str, event_type: &str, err: &HookError) -> String {
  let msg = format!(
    "Unexpected error in {} handling {} event: {} {}",
    hook_name,
    event_type,
    err.kind(),
    err
  );
  error!("{}", msg);
  msg
}
