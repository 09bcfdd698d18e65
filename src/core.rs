pub mod bridge;
pub mod events;
pub mod hook_config;
pub mod orchestrator;
pub mod placeholders;
pub mod resources;

#[cfg(test)]
pub mod tests;

use std::path::Path;

use log::debug;
use strum::IntoStaticStr;

use crate::core::bridge::{HookOutcome, ReservationBridge};
use crate::core::events::{DEFAULT_HOOK_NAME, EventError, HookEvent};
use crate::core::hook_config::HookConfig;
use crate::core::orchestrator::KubectlClient;
use crate::core::placeholders::{PlaceholderStore, StoredPlaceholder};

#[derive(thiserror::Error, Debug, IntoStaticStr)]
pub enum HookError {
  #[error("Config Error: {0}")]
  ConfigError(#[from] hook_config::HookConfigError),
  #[error("Event Error: {0}")]
  EventError(#[from] events::EventError),
  #[error("Placeholder Error: {0}")]
  PlaceholderError(#[from] placeholders::PlaceholderError),
}

impl HookError {
  pub fn kind(&self) -> &'static str {
    self.into()
  }
}

/// One hook invocation: the loaded config plus the clients built from it.
pub struct Hook {
  config: HookConfig,
  kubectl: KubectlClient,
}

impl Hook {
  /// Loads the config. Failing here aborts before any event is handled.
  pub fn new(config_path: &Path) -> Result<Self, HookError> {
    let config = HookConfig::load(config_path)?;
    Ok(Self::with_config(config))
  }

  pub fn with_config(config: HookConfig) -> Self {
    let kubectl = KubectlClient::from_config(&config);
    Hook { config, kubectl }
  }

  pub fn handle_event(&self, event: &HookEvent) -> HookOutcome {
    debug!("Handling {} event for job {}", event.event_type, event.job.id);
    ReservationBridge::new(&self.config, &self.kubectl).handle(event)
  }

  /// Parses a JSON event descriptor and handles it. An unreadable
  /// descriptor is rejected like any other unexpected error.
  pub fn handle_event_json(&self, text: &str) -> HookOutcome {
    match HookEvent::from_json(text) {
      Ok(event) => self.handle_event(&event),
      Err(e) => reject_unknown_event(e),
    }
  }

  pub fn list_placeholders(&self) -> Result<Vec<StoredPlaceholder>, HookError> {
    Ok(PlaceholderStore::from_config(&self.config).list()?)
  }
}

/// Reject for an event whose type and hook name could not be read.
pub fn reject_unknown_event(err: EventError) -> HookOutcome {
  HookOutcome::Reject(bridge::reject_message(
    DEFAULT_HOOK_NAME,
    "unknown",
    &HookError::from(err),
  ))
}
