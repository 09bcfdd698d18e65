use std::fs;

use tempfile::TempDir;

use crate::core::hook_config::HookConfig;
use crate::core::placeholders::{
  PlaceholderError, PlaceholderStore, RemoveOutcome, ShadowPlaceholder, yaml_scalar,
};
use crate::core::resources::UnitMapping;
use crate::core::tests::create_test_job;

fn create_test_placeholder(name: &str) -> ShadowPlaceholder {
  ShadowPlaceholder {
    name: name.to_string(),
    container_name: "sleep-forever".to_string(),
    image: "gcr.io/google_containers/pause:0.8.0".to_string(),
    cpu_limit: "4m".to_string(),
    memory_limit: "2048Mi".to_string(),
  }
}

#[test]
fn placeholder_for_job_uses_job_id_and_limits() {
  let config = HookConfig::new("/unused");
  let spec = create_test_job(3)
    .resource_spec(UnitMapping::Legacy)
    .unwrap();

  let placeholder = ShadowPlaceholder::for_job(&spec, &config);
  assert_eq!(placeholder, create_test_placeholder("3.pbs-server"));
}

#[test]
fn manifest_matches_kubelet_layout() {
  let manifest = create_test_placeholder("3.pbs-server").to_manifest();
  assert_eq!(
    manifest,
    "apiVersion: v1
kind: Pod
metadata:
  name: 3.pbs-server
spec:
  containers:
  - name: sleep-forever
    image: gcr.io/google_containers/pause:0.8.0
    resources:
      limits:
        cpu: 4m
        memory: 2048Mi
"
  );
}

#[test]
fn manifest_parses_back() {
  let placeholder = create_test_placeholder("12.head-node");
  let parsed = ShadowPlaceholder::from_manifest(&placeholder.to_manifest()).unwrap();
  assert_eq!(parsed, placeholder);
}

#[test]
fn ambiguous_scalars_are_quoted() {
  assert_eq!(yaml_scalar("4m"), "4m");
  assert_eq!(yaml_scalar("42"), "\"42\"");
  assert_eq!(yaml_scalar("1e3"), "\"1e3\"");
  assert_eq!(yaml_scalar("true"), "\"true\"");
  assert_eq!(yaml_scalar(""), "\"\"");
  assert_eq!(yaml_scalar("has space"), "\"has space\"");

  let mut placeholder = create_test_placeholder("42");
  placeholder.container_name = "on".to_string();
  let parsed = ShadowPlaceholder::from_manifest(&placeholder.to_manifest()).unwrap();
  assert_eq!(parsed, placeholder);
}

#[test]
fn malformed_manifests() {
  assert!(matches!(
    ShadowPlaceholder::from_manifest(""),
    Err(PlaceholderError::ManifestEmpty)
  ));
  assert!(matches!(
    ShadowPlaceholder::from_manifest("apiVersion: v1\nkind: Pod\n"),
    Err(PlaceholderError::MissingKey(_))
  ));
  assert!(matches!(
    ShadowPlaceholder::from_manifest("metadata: [unclosed"),
    Err(PlaceholderError::ManifestParseFailed(_))
  ));
}

#[test]
fn path_for_job_name() {
  let store = PlaceholderStore::new("/etc/kubelet.d", "yaml");
  assert_eq!(
    store.path_for("sim_run").unwrap(),
    std::path::PathBuf::from("/etc/kubelet.d/sim_run.yaml")
  );
  for bad in ["", ".", "..", "../escape", "a/b"] {
    assert!(
      matches!(store.path_for(bad), Err(PlaceholderError::InvalidJobName(_))),
      "{bad}"
    );
  }
}

#[test]
fn write_then_remove() {
  let temp_dir = TempDir::new().unwrap();
  let store = PlaceholderStore::new(temp_dir.path(), "yaml");
  let placeholder = create_test_placeholder("5.pbs-server");

  let path = store.write("job5", &placeholder).unwrap();
  assert_eq!(path, temp_dir.path().join("job5.yaml"));
  assert_eq!(fs::read_to_string(&path).unwrap(), placeholder.to_manifest());
  assert_eq!(ShadowPlaceholder::from_manifest(&fs::read_to_string(&path).unwrap()).unwrap(), placeholder);

  // No temp files left behind
  let names: Vec<_> = fs::read_dir(temp_dir.path())
    .unwrap()
    .map(|e| e.unwrap().file_name())
    .collect();
  assert_eq!(names, vec![std::ffi::OsString::from("job5.yaml")]);

  assert_eq!(store.remove("job5").unwrap(), RemoveOutcome::Removed);
  assert!(!path.exists());
  assert_eq!(store.remove("job5").unwrap(), RemoveOutcome::NotFound);
}

#[cfg(unix)]
#[test]
fn written_manifest_is_world_readable() {
  use std::os::unix::fs::PermissionsExt;
  let temp_dir = TempDir::new().unwrap();
  let store = PlaceholderStore::new(temp_dir.path(), "yaml");
  let path = store.write("job", &create_test_placeholder("1")).unwrap();
  assert_eq!(fs::metadata(path).unwrap().permissions().mode() & 0o777, 0o644);
}

#[test]
fn write_overwrites_existing_manifest() {
  let temp_dir = TempDir::new().unwrap();
  let store = PlaceholderStore::new(temp_dir.path(), "yaml");
  store.write("job", &create_test_placeholder("1.a")).unwrap();
  let path = store.write("job", &create_test_placeholder("2.a")).unwrap();
  let text = fs::read_to_string(path).unwrap();
  assert_eq!(ShadowPlaceholder::from_manifest(&text).unwrap().name, "2.a");
}

#[test]
fn write_into_missing_directory_fails() {
  let temp_dir = TempDir::new().unwrap();
  let store = PlaceholderStore::new(temp_dir.path().join("absent"), "yaml");
  assert!(matches!(
    store.write("job", &create_test_placeholder("1")),
    Err(PlaceholderError::IoError(_))
  ));
}

#[test]
fn list_skips_foreign_and_hidden_files() {
  let temp_dir = TempDir::new().unwrap();
  let store = PlaceholderStore::new(temp_dir.path(), "yaml");
  store.write("b_job", &create_test_placeholder("2.srv")).unwrap();
  store.write("a_job", &create_test_placeholder("1.srv")).unwrap();
  fs::write(temp_dir.path().join("broken.yaml"), "kind: Pod\n").unwrap();
  fs::write(temp_dir.path().join(".hidden.yaml"), "kind: Pod\n").unwrap();
  fs::write(temp_dir.path().join("notes.txt"), "hello").unwrap();

  let stored = store.list().unwrap();
  let names: Vec<_> = stored
    .iter()
    .map(|s| s.path.file_name().unwrap().to_str().unwrap().to_string())
    .collect();
  assert_eq!(names, vec!["a_job.yaml", "b_job.yaml", "broken.yaml"]);
  assert_eq!(stored[0].placeholder.as_ref().unwrap().name, "1.srv");
  assert_eq!(stored[1].placeholder.as_ref().unwrap().name, "2.srv");
  assert!(stored[2].placeholder.is_err());
}
