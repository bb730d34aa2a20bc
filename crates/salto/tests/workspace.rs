//! End-to-end workspace tests
//!
//! Each test initialises a workspace in a temp directory, drives it
//! through the public surface and checks the on-disk results.

use pretty_assertions::assert_eq;
use salto::blueprints::Blueprint;
use salto::bp_update::{ChangeAction, DetailedChange};
use salto::cache::{MemCache, NullCache, ParseCache};
use salto::config::{init_workspace, WorkspaceConfig};
use salto::element::{ElemId, Element};
use salto::files::{Files, OsFiles};
use salto::parser::HclParser;
use salto::value::Value;
use salto::workspace::Workspace;
use std::path::Path;

fn open(config: WorkspaceConfig) -> Workspace {
    Workspace::load(
        config,
        Box::new(HclParser),
        Box::new(OsFiles),
        Box::new(NullCache),
        false,
    )
    .expect("workspace loads")
}

fn write(path: &Path, contents: &str) {
    OsFiles.write_text_file(path, contents).expect("fixture write succeeds");
}

const LEAD_TYPE: &str = r#"type "salesforce.lead" {
  field "string" "status" {
    _default = "New"
  }
  field "string" "owner" {}
}
"#;

const LEAD_INSTANCE: &str = r#"instance "salesforce.lead" "main" {
  owner = "someone"
}
"#;

#[test]
fn load_merges_blueprints_across_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = init_workspace(&OsFiles, dir.path(), Some("e2e")).expect("init succeeds");
    write(&dir.path().join("types.bp"), LEAD_TYPE);
    write(&dir.path().join("instances.bp"), LEAD_INSTANCE);

    let workspace = open(config);
    assert!(!workspace.has_errors(), "unexpected errors: {:?}", workspace.errors());
    let instance = workspace
        .elements()
        .iter()
        .find_map(Element::as_instance)
        .expect("the lead instance is merged");
    assert_eq!(instance.value["owner"], Value::from("someone"));
    // the missing field picked up its default
    assert_eq!(instance.value["status"], Value::from("New"));
}

#[test]
fn load_skips_dot_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = init_workspace(&OsFiles, dir.path(), None).expect("init succeeds");
    OsFiles.mkdirp(&dir.path().join(".git")).unwrap();
    write(&dir.path().join(".git/junk.bp"), "variables { junk = 1 }");
    write(&dir.path().join("real.bp"), "variables { real = 1 }");

    let workspace = open(config);
    assert!(workspace.elements().iter().any(|e| e.elem_id().full_name() == "var.real"));
    assert!(!workspace.elements().iter().any(|e| e.elem_id().full_name() == "var.junk"));
}

#[test]
fn flush_round_trips_through_parse() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = init_workspace(&OsFiles, dir.path(), None).expect("init succeeds");

    let mut workspace = open(config.clone());
    workspace.set_blueprints(vec![
        Blueprint::new("types.bp", LEAD_TYPE),
        Blueprint::new("instances.bp", LEAD_INSTANCE),
    ]);
    let merged_before = workspace.elements().to_vec();
    workspace.flush().expect("flush succeeds");
    assert!(workspace.dirty_blueprints().is_empty());
    assert!(dir.path().join("types.bp").exists());

    // a fresh load over the flushed files derives an equal element set
    let reloaded = open(config);
    assert_eq!(reloaded.elements(), merged_before.as_slice());
}

#[test]
fn flush_deletes_removed_blueprints() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = init_workspace(&OsFiles, dir.path(), None).expect("init succeeds");
    write(&dir.path().join("gone.bp"), "variables { a = 1 }");

    let mut workspace = open(config);
    workspace.remove_blueprints(&["gone.bp".to_string()]);
    workspace.flush().expect("flush succeeds");
    assert!(!dir.path().join("gone.bp").exists());
}

#[test]
fn credential_blueprints_flush_under_local_storage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = init_workspace(&OsFiles, dir.path(), None).expect("init succeeds");

    let mut workspace = open(config.clone());
    workspace.set_blueprints(vec![Blueprint::new(
        "salesforce.bp",
        "instance \"salesforce.salesforce\" \"_config\" {\n  token = \"secret\"\n}\n",
    )]);
    workspace.flush().expect("flush succeeds");

    let credential_path = config.credentials_dir().join("salesforce.bp");
    assert!(credential_path.exists());
    assert!(!dir.path().join("salesforce.bp").exists());

    // and it comes back on the next load
    let reloaded = open(config);
    assert!(reloaded
        .elements()
        .iter()
        .any(|e| e.elem_id().full_name() == "salesforce.salesforce.instance._config"));
}

struct SharedCache(std::sync::Arc<MemCache>);

impl ParseCache for SharedCache {
    fn get(&self, key: &salto::cache::CacheKey) -> Option<salto::parser::ParseResult> {
        self.0.get(key)
    }

    fn put(&self, key: salto::cache::CacheKey, value: salto::parser::ParseResult) {
        self.0.put(key, value)
    }
}

struct CountingParser(std::sync::Arc<std::sync::atomic::AtomicUsize>);

impl salto::parser::Parser for CountingParser {
    fn parse(&self, buffer: &str, filename: &str) -> salto::parser::ParseResult {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        HclParser.parse(buffer, filename)
    }
}

#[test]
fn parse_cache_is_used_on_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = init_workspace(&OsFiles, dir.path(), None).expect("init succeeds");
    write(&dir.path().join("types.bp"), LEAD_TYPE);

    let cache = std::sync::Arc::new(MemCache::default());
    let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let load_with_cache = |config: WorkspaceConfig| {
        Workspace::load(
            config,
            Box::new(CountingParser(calls.clone())),
            Box::new(OsFiles),
            Box::new(SharedCache(cache.clone())),
            true,
        )
        .expect("workspace loads")
    };

    let first = load_with_cache(config.clone());
    let parses_after_first = calls.load(std::sync::atomic::Ordering::SeqCst);
    assert!(parses_after_first > 0);

    let second = load_with_cache(config);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), parses_after_first);
    assert_eq!(first.elements(), second.elements());
}

#[test]
fn updates_splice_files_on_disk_after_flush() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = init_workspace(&OsFiles, dir.path(), None).expect("init succeeds");
    write(&dir.path().join("vars.bp"), "variables {\n  a = 1\n}\n");

    let mut workspace = open(config);
    workspace.update_blueprints(vec![DetailedChange {
        id: ElemId::variable("a"),
        action: ChangeAction::Modify { text: "a = 42".to_string() },
    }]);
    workspace.flush().expect("flush succeeds");

    let on_disk = OsFiles.read_text_file(&dir.path().join("vars.bp")).expect("file exists");
    assert!(on_disk.contains("a = 42"));
    assert!(!on_disk.contains("a = 1"));
}

#[test]
fn workspace_errors_point_at_source_text() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = init_workspace(&OsFiles, dir.path(), None).expect("init succeeds");
    write(
        &dir.path().join("broken.bp"),
        "instance \"salesforce.missing\" \"main\" {\n  status = \"Open\"\n}\n",
    );

    let workspace = open(config);
    let errors = workspace.get_workspace_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].severity, salto::validate::Severity::Error);
    assert!(errors[0].error.contains("unresolved reference"));
    assert_eq!(errors[0].source_fragments.len(), 1);
    assert!(errors[0].source_fragments[0].fragment.starts_with("instance"));
    assert_eq!(errors[0].source_fragments[0].source_range.filename, "broken.bp");
}
