use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use crate::core::bridge::HookOutcome;
use crate::core::events::{Job, ResourceList, ResourceValue, VariableList};
use crate::core::hook_config::HookConfig;
use crate::core::{Hook, HookError};

pub fn create_test_job(id: i32) -> Job {
  Job {
    id: format!("{}.pbs-server", id),
    name: format!("test_job_{}", id),
    resources: ResourceList {
      ncpus: Some(ResourceValue::Number(4)),
      mem: Some(ResourceValue::Text("2048kb".to_string())),
    },
    variables: VariableList::default(),
  }
}

/// Writes an executable `kubectl` stand-in running `body` under /bin/sh.
pub fn create_fake_kubectl(dir: &TempDir, body: &str) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;
  let path = dir.path().join("kubectl");
  fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
  fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
  path
}

fn launch_event_json(job: &str, extra_variables: &str) -> String {
  format!(
    r#"{{
      "type": "execjob_launch",
      "hook_name": "pbs_kubernetes",
      "job": {{
        "id": "{job}.pbs-server",
        "Job_Name": "{job}",
        "Resource_List": {{"ncpus": 4, "mem": "2048kb"}},
        "Variable_List": "PBS_O_HOME=/home/alice{extra_variables}"
      }}
    }}"#
  )
}

fn end_event_json(job: &str, extra_variables: &str) -> String {
  launch_event_json(job, extra_variables).replace("execjob_launch", "execjob_end")
}

#[test]
fn malformed_config_aborts_before_handling() {
  let temp_dir = TempDir::new().unwrap();
  let config_path = temp_dir.path().join("pbs_kubernetes.json");
  fs::write(&config_path, "{ not json").unwrap();

  match Hook::new(&config_path) {
    Err(e @ HookError::ConfigError(_)) => assert_eq!(e.kind(), "ConfigError"),
    Err(e) => panic!("unexpected error {:?}", e),
    Ok(_) => panic!("config should not load"),
  }
}

#[test]
fn launch_and_end_through_json_events() {
  let temp_dir = TempDir::new().unwrap();
  let store = temp_dir.path().join("manifests");
  fs::create_dir(&store).unwrap();
  let config_path = temp_dir.path().join("pbs_kubernetes.json");
  fs::write(
    &config_path,
    format!(r#"{{"kubelet_config": "{}"}}"#, store.display()),
  )
  .unwrap();
  let hook = Hook::new(&config_path).unwrap();

  assert_eq!(
    hook.handle_event_json(&launch_event_json("sim", "")),
    HookOutcome::Accept
  );
  let manifest = fs::read_to_string(store.join("sim.yaml")).unwrap();
  assert!(manifest.contains("name: sim.pbs-server"));
  assert!(manifest.contains("cpu: 4m"));
  assert!(manifest.contains("memory: 2048Mi"));

  let listed = hook.list_placeholders().unwrap();
  assert_eq!(listed.len(), 1);
  assert_eq!(listed[0].placeholder.as_ref().unwrap().name, "sim.pbs-server");

  assert_eq!(
    hook.handle_event_json(&end_event_json("sim", "")),
    HookOutcome::Accept
  );
  assert!(!store.join("sim.yaml").exists());
  assert!(hook.list_placeholders().unwrap().is_empty());
}

#[test]
fn external_pod_deleted_through_kubectl() {
  let temp_dir = TempDir::new().unwrap();
  let kubectl = create_fake_kubectl(
    &temp_dir,
    "echo \"$*\" >> \"$(dirname \"$0\")/calls.log\"",
  );
  let mut config = HookConfig::new(temp_dir.path());
  config.kubectl_path = kubectl;
  let hook = Hook::with_config(config);

  assert_eq!(
    hook.handle_event_json(&launch_event_json("web", ",PODNAME=web-0")),
    HookOutcome::Accept
  );
  assert!(!temp_dir.path().join("web.yaml").exists());

  assert_eq!(
    hook.handle_event_json(&end_event_json("web", ",PODNAME=web-0")),
    HookOutcome::Accept
  );
  let calls = fs::read_to_string(temp_dir.path().join("calls.log")).unwrap();
  assert_eq!(calls, "delete pod web-0\n");
}

#[test]
fn failing_kubectl_does_not_reject_job_end() {
  let temp_dir = TempDir::new().unwrap();
  let kubectl = create_fake_kubectl(&temp_dir, "echo 'connection refused' >&2\nexit 1");
  let mut config = HookConfig::new(temp_dir.path());
  config.kubectl_path = kubectl;
  let hook = Hook::with_config(config);

  assert_eq!(
    hook.handle_event_json(&end_event_json("web", ",PODNAME=web-0")),
    HookOutcome::Accept
  );
}

#[test]
fn unreadable_event_is_rejected() {
  let temp_dir = TempDir::new().unwrap();
  let hook = Hook::with_config(HookConfig::new(temp_dir.path()));

  match hook.handle_event_json("{\"type\": \"execjob_launch\"}") {
    HookOutcome::Reject(msg) => assert!(
      msg.starts_with("Unexpected error in pbs_kubernetes handling unknown event: EventError"),
      "{msg}"
    ),
    HookOutcome::Accept => panic!("event without job should be rejected"),
  }
}
