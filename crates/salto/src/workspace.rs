//! The workspace coordinator.
//!
//! A [Workspace] owns the authoritative in-memory state: the parsed
//! blueprints, the unioned source map, the merged element set and the
//! error triad. Every edit replaces parsed blueprints for the touched
//! filenames and re-derives the whole state from scratch — merge, type
//! reference resolution and validation are cheap relative to I/O and a
//! full recompute keeps the invariants trivially true.
//!
//! The coordinator has a single logical owner: callers must serialise
//! `set`/`remove`/`update`/`flush` externally (the `&mut self` receivers
//! make overlapping writes impossible within safe Rust). Given the same
//! parsed-blueprint snapshot, [create_workspace_state] is deterministic;
//! blueprints and their parse errors are iterated by filename in
//! lexicographic order.
use crate::blueprints::{Blueprint, ParsedBlueprint};
use crate::bp_update::{
    get_change_locations, update_blueprint_data, ChangeLocation, DetailedChange,
    WorkspaceSourceMap,
};
use crate::cache::{CacheKey, ParseCache};
use crate::config::WorkspaceConfig;
use crate::element::{builtin, Element, BUILTIN_ADAPTER};
use crate::files::{FileError, Files};
use crate::merge::{merge_elements, MergeError};
use crate::parser::{ParseError, Parser, SourceRange};
use crate::resolve::resolve_type_refs;
use crate::validate::{validate_elements, Severity, ValidationError};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// The error triad of a workspace state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Errors {
    pub parse: Vec<ParseError>,
    pub merge: Vec<MergeError>,
    pub validation: Vec<ValidationError>,
}

impl Errors {
    pub fn has_errors(&self) -> bool {
        !self.parse.is_empty() || !self.merge.is_empty() || !self.validation.is_empty()
    }
}

/// An immutable snapshot derived from the parsed blueprints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceState {
    pub source_map: WorkspaceSourceMap,
    pub elements: Vec<Element>,
    pub errors: Errors,
}

/// Derives a fresh state from a parsed-blueprint snapshot: union the
/// source maps, gather all elements plus the built-ins, then run the
/// merge → resolve → validate pipeline.
pub fn create_workspace_state(
    parsed_blueprints: &BTreeMap<String, ParsedBlueprint>,
) -> WorkspaceState {
    let mut source_map = WorkspaceSourceMap::new();
    let mut elements = Vec::new();
    let mut parse_errors = Vec::new();
    for blueprint in parsed_blueprints.values() {
        for (full_name, ranges) in &blueprint.parsed.source_map {
            source_map.entry(full_name.clone()).or_default().extend(ranges.iter().cloned());
        }
        elements.extend(blueprint.parsed.elements.iter().cloned());
        parse_errors.extend(blueprint.parsed.errors.iter().cloned());
    }
    elements.extend(builtin::all());

    let result = merge_elements(elements);
    let mut merged = result.merged;
    resolve_type_refs(&mut merged);
    let validation = validate_elements(&merged);

    WorkspaceState {
        source_map,
        elements: merged,
        errors: Errors { parse: parse_errors, merge: result.errors, validation },
    }
}

/// A slice of blueprint text that an error points at
#[derive(derive_new::new, Debug, Clone, PartialEq)]
pub struct SourceFragment {
    pub source_range: SourceRange,
    pub fragment: String,
}

/// Any workspace-level error, unified for user feedback
#[derive(derive_new::new, Debug, Clone, PartialEq)]
pub struct WorkspaceError {
    pub source_fragments: Vec<SourceFragment>,
    pub error: String,
    pub severity: Severity,
    pub cause: ErrorCause,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCause {
    Parse(ParseError),
    Merge(MergeError),
    Validation(ValidationError),
}

pub struct Workspace {
    config: WorkspaceConfig,
    parser: Box<dyn Parser>,
    files: Box<dyn Files>,
    cache: Box<dyn ParseCache>,
    parsed_blueprints: BTreeMap<String, ParsedBlueprint>,
    state: WorkspaceState,
    dirty_blueprints: BTreeSet<String>,
}

impl Workspace {
    /// Creates an empty workspace over the given collaborators.
    pub fn new(
        config: WorkspaceConfig,
        parser: Box<dyn Parser>,
        files: Box<dyn Files>,
        cache: Box<dyn ParseCache>,
    ) -> Self {
        let parsed_blueprints = BTreeMap::new();
        let state = create_workspace_state(&parsed_blueprints);
        Self {
            config,
            parser,
            files,
            cache,
            parsed_blueprints,
            state,
            dirty_blueprints: BTreeSet::new(),
        }
    }

    /// Loads a workspace from disk: every `*.bp` under the base directory
    /// (dot-prefixed directories skipped), the credential blueprints under
    /// local storage, and the configured additional paths.
    pub fn load(
        config: WorkspaceConfig,
        parser: Box<dyn Parser>,
        files: Box<dyn Files>,
        cache: Box<dyn ParseCache>,
        use_cache: bool,
    ) -> Result<Self, FileError> {
        let mut sources: Vec<(PathBuf, String)> = Vec::new();
        for file in files.walk(&config.base_dir)? {
            if file.basename.ends_with(".bp") {
                let filename = file
                    .full_path
                    .strip_prefix(&config.base_dir)
                    .unwrap_or(&file.full_path)
                    .to_string_lossy()
                    .to_string();
                sources.push((file.full_path, filename));
            }
        }
        let credentials_dir = config.credentials_dir();
        if files.exists(&credentials_dir) {
            for file in files.walk(&credentials_dir)? {
                if file.basename.ends_with(".bp") {
                    sources.push((file.full_path, file.basename));
                }
            }
        }
        for path in &config.additional_blueprints {
            sources.push((path.clone(), path.to_string_lossy().to_string()));
        }

        let mut workspace = Self::new(config, parser, files, cache);
        for (path, filename) in sources {
            tracing::info!(path = %path.display(), "loading blueprint");
            let buffer = workspace.files.read_text_file(&path)?;
            let blueprint = Blueprint::new(filename, buffer);
            let parsed = workspace.parse_through_cache(blueprint, &path, use_cache);
            workspace.parsed_blueprints.insert(parsed.filename.clone(), parsed);
        }
        workspace.state = create_workspace_state(&workspace.parsed_blueprints);
        Ok(workspace)
    }

    fn parse_through_cache(
        &self,
        blueprint: Blueprint,
        path: &std::path::Path,
        use_cache: bool,
    ) -> ParsedBlueprint {
        let key = self.files.stat(path).ok().map(|stat| CacheKey {
            filename: blueprint.filename.clone(),
            last_modified_ms: stat.modified_ms,
        });
        if use_cache {
            if let Some(hit) = key.as_ref().and_then(|key| self.cache.get(key)) {
                return ParsedBlueprint::from_cache(blueprint, hit);
            }
        }
        let parsed = ParsedBlueprint::parse(self.parser.as_ref(), blueprint);
        if let Some(key) = key {
            self.cache.put(key, parsed.parsed.clone());
        }
        parsed
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn elements(&self) -> &[Element] {
        &self.state.elements
    }

    pub fn errors(&self) -> &Errors {
        &self.state.errors
    }

    pub fn source_map(&self) -> &WorkspaceSourceMap {
        &self.state.source_map
    }

    pub fn has_errors(&self) -> bool {
        self.state.errors.has_errors()
    }

    pub fn parsed_blueprint(&self, filename: &str) -> Option<&ParsedBlueprint> {
        self.parsed_blueprints.get(filename)
    }

    pub fn dirty_blueprints(&self) -> &BTreeSet<String> {
        &self.dirty_blueprints
    }

    /// Parses and stores blueprints, overwriting by filename, then rebuilds
    /// the state.
    pub fn set_blueprints(&mut self, blueprints: Vec<Blueprint>) {
        for blueprint in blueprints {
            self.dirty_blueprints.insert(blueprint.filename.clone());
            let parsed = ParsedBlueprint::parse(self.parser.as_ref(), blueprint);
            self.parsed_blueprints.insert(parsed.filename.clone(), parsed);
        }
        self.state = create_workspace_state(&self.parsed_blueprints);
    }

    /// Drops blueprints by filename and rebuilds the state.
    pub fn remove_blueprints(&mut self, filenames: &[String]) {
        for filename in filenames {
            self.parsed_blueprints.remove(filename);
            self.dirty_blueprints.insert(filename.clone());
        }
        self.state = create_workspace_state(&self.parsed_blueprints);
    }

    /// Applies detailed changes by splicing their blueprint buffers and
    /// re-setting the touched files. Changes that cannot be located or
    /// spliced are logged and skipped.
    pub fn update_blueprints(&mut self, changes: Vec<DetailedChange>) {
        let mut per_file: BTreeMap<String, Vec<ChangeLocation>> = BTreeMap::new();
        for change in changes {
            match get_change_locations(&change, &self.state.source_map) {
                Ok(locations) => {
                    for located in locations {
                        per_file.entry(located.location.filename.clone()).or_default().push(located);
                    }
                }
                Err(error) => {
                    tracing::warn!(id = %change.id, %error, "skipping change with no location");
                }
            }
        }

        let mut updated = Vec::new();
        for (filename, locations) in per_file {
            let buffer = self
                .parsed_blueprints
                .get(&filename)
                .map(|blueprint| blueprint.buffer.clone())
                .unwrap_or_default();
            match update_blueprint_data(&buffer, locations) {
                Ok(buffer) => updated.push(Blueprint::new(filename, buffer)),
                Err(error) => {
                    tracing::warn!(%filename, %error, "skipping blueprint that failed to update");
                }
            }
        }
        self.set_blueprints(updated);
    }

    /// Persists every dirty blueprint: absent ones are deleted from disk,
    /// present ones are written (credential blueprints under local
    /// storage, everything else under the base directory) and their parse
    /// results pushed to the cache. Cleared filenames leave the dirty set
    /// one by one, so a failed write keeps the remainder dirty for a
    /// re-flush.
    pub fn flush(&mut self) -> Result<(), FileError> {
        let dirty: Vec<String> = self.dirty_blueprints.iter().cloned().collect();
        for filename in dirty {
            match self.parsed_blueprints.get(&filename) {
                None => {
                    for candidate in
                        [self.config.base_dir.join(&filename), self.config.credentials_dir().join(&filename)]
                    {
                        if self.files.exists(&candidate) {
                            tracing::info!(path = %candidate.display(), "deleting blueprint");
                            self.files.rm(&candidate)?;
                        }
                    }
                }
                Some(blueprint) => {
                    let path = self.blueprint_path(blueprint);
                    if let Some(parent) = path.parent() {
                        self.files.mkdirp(parent)?;
                    }
                    tracing::info!(path = %path.display(), "writing blueprint");
                    self.files.write_text_file(&path, &blueprint.buffer)?;
                    if let Ok(stat) = self.files.stat(&path) {
                        self.cache.put(
                            CacheKey {
                                filename: filename.clone(),
                                last_modified_ms: stat.modified_ms,
                            },
                            blueprint.parsed.clone(),
                        );
                    }
                }
            }
            self.dirty_blueprints.remove(&filename);
        }
        Ok(())
    }

    /// A blueprint holding exactly one adapter configuration instance is a
    /// credential file and lives under local storage.
    fn blueprint_path(&self, blueprint: &ParsedBlueprint) -> PathBuf {
        if let [Element::Instance(instance)] = blueprint.parsed.elements.as_slice() {
            let elem_id = &instance.elem_id;
            if elem_id.is_config() && elem_id.adapter() != BUILTIN_ADAPTER {
                return self.config.credentials_dir().join(format!("{}.bp", elem_id.adapter()));
            }
        }
        self.config.base_dir.join(&blueprint.filename)
    }

    /// Projects the error triad into user-facing errors with the source
    /// fragments each one points at. Fragments may be empty when an error
    /// has no known location.
    pub fn get_workspace_errors(&self) -> Vec<WorkspaceError> {
        let mut errors = Vec::new();
        for parse_error in &self.state.errors.parse {
            errors.push(WorkspaceError::new(
                self.fragments(std::slice::from_ref(&parse_error.subject)),
                parse_error.to_string(),
                Severity::Error,
                ErrorCause::Parse(parse_error.clone()),
            ));
        }
        for merge_error in &self.state.errors.merge {
            errors.push(WorkspaceError::new(
                self.fragments(&self.ranges_for(merge_error.elem_id().full_name())),
                merge_error.to_string(),
                Severity::Error,
                ErrorCause::Merge(merge_error.clone()),
            ));
        }
        for validation_error in &self.state.errors.validation {
            errors.push(WorkspaceError::new(
                self.fragments(&self.ranges_for(validation_error.elem_id().full_name())),
                validation_error.to_string(),
                validation_error.severity(),
                ErrorCause::Validation(validation_error.clone()),
            ));
        }
        errors
    }

    /// Ranges recorded for an id, falling back to its top-level element so
    /// nested value paths still point somewhere useful.
    fn ranges_for(&self, full_name: String) -> Vec<SourceRange> {
        if let Some(ranges) = self.state.source_map.get(&full_name) {
            return ranges.clone();
        }
        crate::element::ElemId::from_full_name(&full_name)
            .ok()
            .and_then(|elem_id| self.state.source_map.get(&elem_id.top_level().full_name()))
            .cloned()
            .unwrap_or_default()
    }

    fn fragments(&self, ranges: &[SourceRange]) -> Vec<SourceFragment> {
        ranges
            .iter()
            .filter_map(|range| {
                let buffer = &self.parsed_blueprints.get(&range.filename)?.buffer;
                let start = range.start.byte.min(buffer.len());
                let end = range.end.byte.min(buffer.len()).max(start);
                if !buffer.is_char_boundary(start) || !buffer.is_char_boundary(end) {
                    return None;
                }
                Some(SourceFragment::new(range.clone(), buffer[start..end].to_string()))
            })
            .collect()
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("config", &self.config)
            .field("blueprints", &self.parsed_blueprints.keys().collect::<Vec<_>>())
            .field("elements", &self.state.elements.len())
            .field("dirty", &self.dirty_blueprints)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blueprints;
    use crate::cache::NullCache;
    use crate::config::WorkspaceConfig;
    use crate::files::OsFiles;
    use crate::parser::HclParser;
    use pretty_assertions::assert_eq;

    fn test_workspace() -> Workspace {
        let config = WorkspaceConfig {
            uid: "test-uid".to_string(),
            name: "test".to_string(),
            base_dir: PathBuf::from("/nonexistent"),
            additional_blueprints: Vec::new(),
        };
        Workspace::new(config, Box::new(HclParser), Box::new(OsFiles), Box::new(NullCache))
    }

    #[test]
    fn set_blueprints_builds_merged_state() {
        let mut workspace = test_workspace();
        workspace.set_blueprints(blueprints! {
            "types.bp" => r#"
type "salesforce.lead" {
  field "string" "status" {}
}
"#,
            "instances.bp" => r#"
instance "salesforce.lead" "main" {
  status = "Open"
}
"#,
        });

        assert!(!workspace.has_errors());
        assert!(workspace
            .elements()
            .iter()
            .any(|e| e.elem_id().full_name() == "salesforce.lead.instance.main"));
        assert_eq!(
            workspace.dirty_blueprints().iter().collect::<Vec<_>>(),
            vec!["instances.bp", "types.bp"]
        );
        assert!(workspace.source_map().contains_key("salesforce.lead"));
    }

    #[test]
    fn remove_blueprints_drops_their_elements() {
        let mut workspace = test_workspace();
        workspace.set_blueprints(blueprints! {
            "a.bp" => "variables { a = 1 }",
            "b.bp" => "variables { b = 2 }",
        });
        workspace.remove_blueprints(&["a.bp".to_string()]);

        assert!(!workspace.elements().iter().any(|e| e.elem_id().full_name() == "var.a"));
        assert!(workspace.elements().iter().any(|e| e.elem_id().full_name() == "var.b"));
    }

    #[test]
    fn merge_errors_carry_source_fragments() {
        let mut workspace = test_workspace();
        workspace.set_blueprints(blueprints! {
            "one.bp" => "variables { a = 1 }",
            "two.bp" => "variables { a = 2 }",
        });

        let errors = workspace.get_workspace_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, Severity::Error);
        assert_eq!(errors[0].error, "Error merging var.a: duplicate variable name");
        let fragments: Vec<_> =
            errors[0].source_fragments.iter().map(|f| f.fragment.as_str()).collect();
        assert_eq!(fragments, vec!["a = 1", "a = 2"]);
        assert!(matches!(errors[0].cause, ErrorCause::Merge(_)));
    }

    #[test]
    fn parse_errors_become_workspace_errors() {
        let mut workspace = test_workspace();
        workspace.set_blueprints(blueprints!("not hcl {"));
        let errors = workspace.get_workspace_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, Severity::Error);
        assert!(matches!(errors[0].cause, ErrorCause::Parse(_)));
    }

    #[test]
    fn validation_warnings_keep_their_severity() {
        let mut workspace = test_workspace();
        workspace.set_blueprints(blueprints! {
            "main.bp" => r#"
type "salesforce.lead" {
  field "string" "status" {
    _required = true
  }
}
instance "salesforce.lead" "main" {}
"#,
        });
        let errors = workspace.get_workspace_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, Severity::Warning);
        assert_eq!(errors[0].source_fragments.len(), 1);
        assert!(errors[0].source_fragments[0].fragment.starts_with("instance"));
    }

    #[test]
    fn update_blueprints_splices_and_rebuilds() {
        let mut workspace = test_workspace();
        workspace.set_blueprints(blueprints!("variables { a = 1 }"));
        workspace.update_blueprints(vec![DetailedChange {
            id: crate::element::ElemId::variable("a"),
            action: crate::bp_update::ChangeAction::Modify { text: "a = 42".to_string() },
        }]);

        let variable = workspace
            .elements()
            .iter()
            .find(|e| e.elem_id().full_name() == "var.a")
            .expect("variable survives the update");
        assert!(
            matches!(variable, Element::Variable(v) if v.value == crate::value::Value::Integer(42))
        );
    }

    #[test]
    fn unlocatable_changes_are_skipped() {
        let mut workspace = test_workspace();
        workspace.set_blueprints(blueprints!("variables { a = 1 }"));
        let before = workspace.elements().to_vec();
        workspace.update_blueprints(vec![DetailedChange {
            id: crate::element::ElemId::variable("missing"),
            action: crate::bp_update::ChangeAction::Remove,
        }]);
        assert_eq!(workspace.elements(), before.as_slice());
    }
}
