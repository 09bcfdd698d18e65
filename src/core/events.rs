use std::collections::BTreeMap;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Deserializer};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::core::resources::{MemoryQuantity, QuantityError, SizeUnit, UnitMapping};


#[derive(Error, Debug)]
pub enum EventError {
  #[error("Unreadable event: {0}")]
  Unreadable(String),
  #[error("Malformed event: {0}")]
  Malformed(#[from] serde_json::Error),
  #[error("Invalid value \"{value}\" for resource {resource}")]
  InvalidCount { resource: String, value: String },
  #[error("Quantity Error: {0}")]
  QuantityError(#[from] QuantityError),
}

/// Event kinds the hook acts on. Any other kind is accepted untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
  ExecjobLaunch,
  ExecjobEnd,
}

/// The event descriptor passed to the hook for one invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct HookEvent {
  #[serde(rename = "type")]
  pub event_type: String,
  #[serde(default = "default_hook_name")]
  pub hook_name: String,
  pub job: Job,
}

/// Hook name PBS registers this hook under, used when the event omits it.
pub const DEFAULT_HOOK_NAME: &str = "pbs_kubernetes";

fn default_hook_name() -> String {
  DEFAULT_HOOK_NAME.to_string()
}

impl HookEvent {
  pub fn from_json(text: &str) -> Result<Self, EventError> {
    Ok(serde_json::from_str(text)?)
  }

  pub fn kind(&self) -> Option<EventKind> {
    EventKind::from_str(&self.event_type).ok()
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
  pub id: String,
  #[serde(rename = "Job_Name")]
  pub name: String,
  #[serde(rename = "Resource_List", default)]
  pub resources: ResourceList,
  #[serde(rename = "Variable_List", default)]
  pub variables: VariableList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceList {
  #[serde(default)]
  pub ncpus: Option<ResourceValue>,
  #[serde(default)]
  pub mem: Option<ResourceValue>,
}

/// PBS renders resource values either as JSON numbers or as strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ResourceValue {
  Number(u64),
  Text(String),
}

impl ResourceValue {
  fn as_count(&self, resource: &str) -> Result<u64, EventError> {
    match self {
      ResourceValue::Number(n) => Ok(*n),
      ResourceValue::Text(s) => s.trim().parse().map_err(|_| EventError::InvalidCount {
        resource: resource.to_string(),
        value: s.clone(),
      }),
    }
  }

  fn as_memory(&self) -> Result<MemoryQuantity, EventError> {
    match self {
      ResourceValue::Number(n) => Ok(MemoryQuantity::new(*n, SizeUnit::B)),
      ResourceValue::Text(s) => Ok(MemoryQuantity::from_str(s)?),
    }
  }
}

/// Job environment variables. PBS hands these over either as a mapping or
/// as its own `NAME=value,NAME=value` string with `\,` escaping commas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableList(BTreeMap<String, String>);

impl VariableList {
  pub fn get(&self, name: &str) -> Option<&str> {
    self.0.get(name).map(String::as_str)
  }

  pub fn parse_pbs(text: &str) -> Self {
    let mut variables = BTreeMap::new();
    let mut entry = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
      match ch {
        '\\' if chars.peek() == Some(&',') => {
          entry.push(',');
          chars.next();
        }
        ',' => {
          insert_pbs_entry(&mut variables, &entry);
          entry.clear();
        }
        _ => entry.push(ch),
      }
    }
    insert_pbs_entry(&mut variables, &entry);
    VariableList(variables)
  }
}

fn insert_pbs_entry(variables: &mut BTreeMap<String, String>, entry: &str) {
  if entry.trim().is_empty() {
    return;
  }
  match entry.split_once('=') {
    Some((name, value)) => variables.insert(name.trim().to_string(), value.to_string()),
    None => variables.insert(entry.trim().to_string(), String::new()),
  };
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableList {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    VariableList(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}

impl<'de> Deserialize<'de> for VariableList {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
      Empty,
      Map(BTreeMap<String, serde_json::Value>),
      Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
      Raw::Empty => VariableList::default(),
      Raw::Map(map) => VariableList(
        map
          .into_iter()
          .map(|(name, value)| match value {
            serde_json::Value::String(s) => (name, s),
            other => (name, other.to_string()),
          })
          .collect(),
      ),
      Raw::Text(text) => VariableList::parse_pbs(&text),
    })
  }
}

/// Resource footprint of a job, computed once when the job is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResourceSpec {
  pub job_id: String,
  pub job_name: String,
  pub cpu_millicores: u64,
  pub memory_mebibytes: u64,
}

impl Job {
  /// Name of the pod the job manages itself, if it declares one.
  /// A blank value counts as not declared.
  pub fn external_pod_name(&self, variable: &str) -> Option<&str> {
    self
      .variables
      .get(variable)
      .map(str::trim)
      .filter(|name| !name.is_empty())
  }

  pub fn ncpus(&self) -> Result<u64, EventError> {
    match &self.resources.ncpus {
      Some(value) => value.as_count("ncpus"),
      None => {
        debug!("Job {} has no ncpus request, reserving none", self.id);
        Ok(0)
      }
    }
  }

  pub fn mem(&self) -> Result<MemoryQuantity, EventError> {
    match &self.resources.mem {
      Some(value) => value.as_memory(),
      None => Ok(MemoryQuantity::zero()),
    }
  }

  pub fn resource_spec(&self, mapping: UnitMapping) -> Result<JobResourceSpec, EventError> {
    let cpu_millicores = mapping.cpu_millicores(self.ncpus()?)?;
    let memory_mebibytes = mapping.memory_mebibytes(&self.mem()?)?;
    Ok(JobResourceSpec {
      job_id: self.id.clone(),
      job_name: self.name.clone(),
      cpu_millicores,
      memory_mebibytes,
    })
  }
}
