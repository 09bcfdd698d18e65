use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::resources::UnitMapping;


#[derive(Error, Debug)]
pub enum HookConfigError {
  #[error("I/O error in reading config file {path:?}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("JSON parsing error in reading config file {path:?}: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Hook configuration, read once per invocation from the JSON file PBS
/// hands to the hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookConfig {
  /// Kubelet static pod directory; placeholders are written here.
  #[serde(rename = "kubelet_config")]
  pub placeholder_store_path: PathBuf,
  /// API server exported as KUBERNETES_MASTER to kubectl.
  #[serde(rename = "kubernetes_master", default)]
  pub orchestrator_endpoint: Option<String>,
  #[serde(default = "default_kubectl_path")]
  pub kubectl_path: PathBuf,
  /// Zero disables the timeout.
  #[serde(default = "default_delete_timeout_secs")]
  pub delete_timeout_secs: u64,
  #[serde(default = "default_placeholder_image")]
  pub placeholder_image: String,
  #[serde(default = "default_container_name")]
  pub container_name: String,
  #[serde(default)]
  pub unit_mapping: UnitMapping,
  /// Job variable that names an externally managed pod.
  #[serde(default = "default_external_name_variable")]
  pub external_name_variable: String,
  #[serde(default = "default_manifest_extension")]
  pub manifest_extension: String,
}

fn default_kubectl_path() -> PathBuf {
  PathBuf::from("/bin/kubectl")
}

fn default_delete_timeout_secs() -> u64 {
  30
}

fn default_placeholder_image() -> String {
  "gcr.io/google_containers/pause:0.8.0".to_string()
}

fn default_container_name() -> String {
  "sleep-forever".to_string()
}

fn default_external_name_variable() -> String {
  "PODNAME".to_string()
}

fn default_manifest_extension() -> String {
  "yaml".to_string()
}

impl HookConfig {
  /// Config with every optional key at its default.
  #[cfg(test)]
  pub fn new(placeholder_store_path: impl Into<PathBuf>) -> Self {
    HookConfig {
      placeholder_store_path: placeholder_store_path.into(),
      orchestrator_endpoint: None,
      kubectl_path: default_kubectl_path(),
      delete_timeout_secs: default_delete_timeout_secs(),
      placeholder_image: default_placeholder_image(),
      container_name: default_container_name(),
      unit_mapping: UnitMapping::default(),
      external_name_variable: default_external_name_variable(),
      manifest_extension: default_manifest_extension(),
    }
  }

  pub fn load(path: &Path) -> Result<Self, HookConfigError> {
    trace!("Loading hook config from {:?}", path);
    let text = fs::read_to_string(path).map_err(|source| HookConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config = Self::from_json(&text).map_err(|e| match e {
      HookConfigError::Parse { source, .. } => HookConfigError::Parse {
        path: path.to_path_buf(),
        source,
      },
      other => other,
    })?;
    debug!(
      "Hook config loaded: store {:?}, unit mapping {}",
      config.placeholder_store_path, config.unit_mapping
    );
    Ok(config)
  }

  pub fn from_json(text: &str) -> Result<Self, HookConfigError> {
    let config: HookConfig =
      serde_json::from_str(text).map_err(|source| HookConfigError::Parse {
        path: PathBuf::new(),
        source,
      })?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<(), HookConfigError> {
    if self.placeholder_store_path.as_os_str().is_empty() {
      return Err(HookConfigError::Invalid(
        "Kubelet config path not found".to_string(),
      ));
    }
    if self.external_name_variable.is_empty() {
      return Err(HookConfigError::Invalid(
        "external_name_variable must not be empty".to_string(),
      ));
    }
    if self.manifest_extension.is_empty() || self.manifest_extension.contains('/') {
      return Err(HookConfigError::Invalid(format!(
        "manifest_extension \"{}\" is not a file extension",
        self.manifest_extension
      )));
    }
    Ok(())
  }

  pub fn delete_timeout(&self) -> Option<Duration> {
    match self.delete_timeout_secs {
      0 => None,
      secs => Some(Duration::from_secs(secs)),
    }
  }
}
