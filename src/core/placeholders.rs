use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace};
use saphyr::{LoadableYamlNode, ScalarOwned, YamlOwned};
use thiserror::Error;

use crate::core::events::JobResourceSpec;
use crate::core::hook_config::HookConfig;
use crate::core::resources::{cpu_limit, memory_limit};

#[cfg(test)]
mod tests;

#[derive(Error, Debug)]
pub enum PlaceholderError {
  #[error("IO Error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Job name \"{0}\" cannot name a placeholder file")]
  InvalidJobName(String),
  #[error("Manifest parsing failed: {0}")]
  ManifestParseFailed(#[from] saphyr::ScanError),
  #[error("Manifest is empty!")]
  ManifestEmpty,
  #[error("Missing Key: {0}")]
  MissingKey(String),
}

/// Pause pod reserving a batch job's resources on the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowPlaceholder {
  pub name: String,
  pub container_name: String,
  pub image: String,
  pub cpu_limit: String,
  pub memory_limit: String,
}

impl ShadowPlaceholder {
  pub fn for_job(spec: &JobResourceSpec, config: &HookConfig) -> Self {
    ShadowPlaceholder {
      name: spec.job_id.clone(),
      container_name: config.container_name.clone(),
      image: config.placeholder_image.clone(),
      cpu_limit: cpu_limit(spec.cpu_millicores),
      memory_limit: memory_limit(spec.memory_mebibytes),
    }
  }

  /// Static pod manifest as the kubelet reads it from its manifest directory.
  pub fn to_manifest(&self) -> String {
    format!(
      "apiVersion: v1
kind: Pod
metadata:
  name: {}
spec:
  containers:
  - name: {}
    image: {}
    resources:
      limits:
        cpu: {}
        memory: {}
",
      yaml_scalar(&self.name),
      yaml_scalar(&self.container_name),
      yaml_scalar(&self.image),
      yaml_scalar(&self.cpu_limit),
      yaml_scalar(&self.memory_limit),
    )
  }

  pub fn from_manifest(text: &str) -> Result<Self, PlaceholderError> {
    let yaml = YamlOwned::load_from_str(text)?
      .into_iter()
      .next()
      .ok_or(PlaceholderError::ManifestEmpty)?;
    let container = match lookup_path(&yaml, &["spec", "containers"])? {
      YamlOwned::Sequence(seq) => seq
        .first()
        .ok_or_else(|| PlaceholderError::MissingKey("spec.containers[0]".to_string()))?,
      _ => return Err(PlaceholderError::MissingKey("spec.containers".to_string())),
    };
    Ok(ShadowPlaceholder {
      name: lookup_str(&yaml, &["metadata", "name"])?,
      container_name: lookup_str(container, &["name"])?,
      image: lookup_str(container, &["image"])?,
      cpu_limit: lookup_str(container, &["resources", "limits", "cpu"])?,
      memory_limit: lookup_str(container, &["resources", "limits", "memory"])?,
    })
  }
}

/// Plain scalars are written as-is; anything YAML could read as another
/// type, or that needs escaping, is written as a double-quoted string.
fn yaml_scalar(value: &str) -> String {
  let lower = value.to_ascii_lowercase();
  let plain = value
    .chars()
    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | ':'))
    && value.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
    && value.parse::<f64>().is_err()
    && !lower.starts_with("0x")
    && !lower.starts_with("0o")
    && !matches!(
      lower.as_str(),
      "true" | "false" | "yes" | "no" | "on" | "off" | "null" | "y" | "n"
    );
  if plain {
    value.to_string()
  } else {
    // JSON strings are valid YAML double-quoted scalars
    serde_json::Value::String(value.to_string()).to_string()
  }
}

fn key(k: &str) -> YamlOwned {
  YamlOwned::Value(ScalarOwned::String(k.to_string()))
}

fn lookup_path<'a>(node: &'a YamlOwned, path: &[&str]) -> Result<&'a YamlOwned, PlaceholderError> {
  let mut current = node;
  for k in path {
    current = match current {
      YamlOwned::Mapping(map) => map.get(&key(k)),
      _ => None,
    }
    .ok_or_else(|| PlaceholderError::MissingKey(path.join(".")))?;
  }
  Ok(current)
}

fn lookup_str(node: &YamlOwned, path: &[&str]) -> Result<String, PlaceholderError> {
  lookup_path(node, path)?
    .as_str()
    .map(str::to_string)
    .ok_or_else(|| PlaceholderError::MissingKey(path.join(".")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
  Removed,
  NotFound,
}

/// A manifest found in the store. Unreadable manifests keep their error so
/// callers can report them without aborting the listing.
#[derive(Debug)]
pub struct StoredPlaceholder {
  pub path: PathBuf,
  pub placeholder: Result<ShadowPlaceholder, PlaceholderError>,
}

/// Directory of placeholder manifests, one file per job, keyed by job name.
pub struct PlaceholderStore {
  root: PathBuf,
  extension: String,
}

impl PlaceholderStore {
  pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
    PlaceholderStore {
      root: root.into(),
      extension: extension.to_string(),
    }
  }

  pub fn from_config(config: &HookConfig) -> Self {
    Self::new(&config.placeholder_store_path, &config.manifest_extension)
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// `<root>/<job_name>.<extension>`
  pub fn path_for(&self, job_name: &str) -> Result<PathBuf, PlaceholderError> {
    if job_name.is_empty()
      || job_name == "."
      || job_name == ".."
      || job_name.contains('/')
      || job_name.contains('\0')
    {
      return Err(PlaceholderError::InvalidJobName(job_name.to_string()));
    }
    Ok(self.root.join(format!("{}.{}", job_name, self.extension)))
  }

  /// Writes the manifest through a hidden temp file in the same directory and
  /// renames it into place, so readers never see a partial manifest.
  pub fn write(
    &self,
    job_name: &str,
    placeholder: &ShadowPlaceholder,
  ) -> Result<PathBuf, PlaceholderError> {
    let path = self.path_for(job_name)?;
    trace!("Writing placeholder {} to {:?}", placeholder.name, path);

    // Kubelet skips dotfiles in its manifest directory
    let mut tmp = tempfile::Builder::new()
      .prefix(".placeholder-")
      .suffix(".tmp")
      .tempfile_in(&self.root)?;
    tmp.write_all(placeholder.to_manifest().as_bytes())?;
    tmp.as_file().sync_all()?;
    set_manifest_permissions(tmp.path())?;
    tmp.persist(&path).map_err(|e| PlaceholderError::IoError(e.error))?;

    debug!("Placeholder {} written to {:?}", placeholder.name, path);
    Ok(path)
  }

  pub fn remove(&self, job_name: &str) -> Result<RemoveOutcome, PlaceholderError> {
    let path = self.path_for(job_name)?;
    match fs::remove_file(&path) {
      Ok(()) => Ok(RemoveOutcome::Removed),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(RemoveOutcome::NotFound),
      Err(e) => Err(PlaceholderError::IoError(e)),
    }
  }

  /// Every manifest in the store, sorted by path. Hidden files and files
  /// with another extension are skipped.
  pub fn list(&self) -> Result<Vec<StoredPlaceholder>, PlaceholderError> {
    let mut stored = Vec::new();
    for entry in fs::read_dir(&self.root)? {
      let path = entry?.path();
      let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('.'));
      let matches_ext = path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str());
      if hidden || !matches_ext || !path.is_file() {
        continue;
      }
      let placeholder = fs::read_to_string(&path)
        .map_err(PlaceholderError::IoError)
        .and_then(|text| ShadowPlaceholder::from_manifest(&text));
      stored.push(StoredPlaceholder { path, placeholder });
    }
    stored.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(stored)
  }
}

#[cfg(unix)]
fn set_manifest_permissions(path: &Path) -> Result<(), PlaceholderError> {
  use std::os::unix::fs::PermissionsExt;
  let mut perms = fs::metadata(path)?.permissions();
  perms.set_mode(0o644);
  fs::set_permissions(path, perms)?;
  Ok(())
}

#[cfg(not(unix))]
fn set_manifest_permissions(_path: &Path) -> Result<(), PlaceholderError> {
  Ok(())
}
