//! Workspace configuration and initialisation.
//!
//! A workspace root is a directory holding `salto.config.bp`, an instance
//! of the built-in `salto.config` type with the workspace `uid` and `name`.
//! Local storage (credentials, state, caches) lives in the dot-prefixed
//! `.salto` directory beneath the root so blueprint walks never pick it up.
use crate::element::{Element, BUILTIN_ADAPTER};
use crate::files::{FileError, Files};
use crate::parser::{HclParser, Parser};
use crate::value::Value;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "salto.config.bp";
pub const LOCAL_STORAGE_DIRNAME: &str = ".salto";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("existing workspace found at {}", .0.display())]
    ExistingWorkspace(PathBuf),
    #[error("not an empty workspace: {} already exists", .0.display())]
    NotAnEmptyWorkspace(PathBuf),
    #[error("invalid workspace config at {}: {reason}", .path.display())]
    InvalidConfig { path: PathBuf, reason: String },
    #[error(transparent)]
    Io(#[from] FileError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    pub uid: String,
    pub name: String,
    pub base_dir: PathBuf,
    pub additional_blueprints: Vec<PathBuf>,
}

impl WorkspaceConfig {
    pub fn config_path(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILENAME)
    }

    pub fn local_storage(&self) -> PathBuf {
        self.base_dir.join(LOCAL_STORAGE_DIRNAME)
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.local_storage().join("credentials")
    }

    pub fn state_file(&self) -> PathBuf {
        self.local_storage().join("state.bp")
    }

    /// Reads the config blueprint of the workspace rooted at `base_dir`.
    pub fn load(files: &dyn Files, base_dir: &Path) -> Result<WorkspaceConfig, ConfigError> {
        let path = base_dir.join(CONFIG_FILENAME);
        let buffer = files.read_text_file(&path)?;
        let parsed = HclParser.parse(&buffer, CONFIG_FILENAME);
        if let Some(error) = parsed.errors.first() {
            return Err(ConfigError::InvalidConfig { path, reason: error.to_string() });
        }

        let instance = parsed
            .elements
            .iter()
            .find_map(Element::as_instance)
            .filter(|instance| instance.type_ref.elem_id().full_name() == "salto.config")
            .ok_or_else(|| ConfigError::InvalidConfig {
                path: path.clone(),
                reason: "missing `salto.config` instance".to_string(),
            })?;

        let text_field = |name: &str| {
            instance.value.get(name).and_then(Value::as_str).map(str::to_string).ok_or_else(|| {
                ConfigError::InvalidConfig {
                    path: path.clone(),
                    reason: format!("missing `{name}`"),
                }
            })
        };
        let additional_blueprints = match instance.value.get("additional_blueprints") {
            Some(Value::List(paths)) => paths
                .iter()
                .filter_map(|path| path.as_str().map(PathBuf::from))
                .collect(),
            _ => Vec::new(),
        };

        Ok(WorkspaceConfig {
            uid: text_field("uid")?,
            name: text_field("name")?,
            base_dir: base_dir.to_path_buf(),
            additional_blueprints,
        })
    }
}

/// Finds the workspace root at or above `dir`.
pub fn locate_workspace_root(files: &dyn Files, dir: &Path) -> Option<PathBuf> {
    dir.ancestors().find(|candidate| files.exists(&candidate.join(CONFIG_FILENAME))).map(Path::to_path_buf)
}

/// Initialises a fresh workspace at `base_dir`.
///
/// Fails when a workspace root is discoverable at or above `base_dir`, or
/// when any of the config path, local storage directory or state file
/// already exists. Otherwise creates local storage and writes a minimal
/// config with a freshly generated uid.
pub fn init_workspace(
    files: &dyn Files,
    base_dir: &Path,
    name: Option<&str>,
) -> Result<WorkspaceConfig, ConfigError> {
    if let Some(root) = locate_workspace_root(files, base_dir) {
        return Err(ConfigError::ExistingWorkspace(root));
    }

    let config = WorkspaceConfig {
        uid: uuid::Uuid::new_v4().to_string(),
        name: name
            .map(str::to_string)
            .or_else(|| base_dir.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| "workspace".to_string()),
        base_dir: base_dir.to_path_buf(),
        additional_blueprints: Vec::new(),
    };
    for path in [config.config_path(), config.local_storage(), config.state_file()] {
        if files.exists(&path) {
            return Err(ConfigError::NotAnEmptyWorkspace(path));
        }
    }

    files.mkdirp(&config.credentials_dir())?;
    files.write_text_file(&config.config_path(), &render_config(&config))?;
    files.write_text_file(&config.state_file(), "")?;
    tracing::info!(name = %config.name, uid = %config.uid, "initialised workspace");
    Ok(config)
}

fn render_config(config: &WorkspaceConfig) -> String {
    format!(
        "instance \"{BUILTIN_ADAPTER}.config\" \"_config\" {{\n  uid = \"{}\"\n  name = \"{}\"\n}}\n",
        config.uid, config.name
    )
}
