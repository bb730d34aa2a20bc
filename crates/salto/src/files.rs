//! The file layer the workspace consumes.
//!
//! Everything on-disk goes through the [Files] trait so tests can observe
//! or substitute it; [OsFiles] is the `std::fs` implementation used by the
//! CLI.
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

#[derive(thiserror::Error, Debug)]
#[error("{}: {source}", .path.display())]
pub struct FileError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl FileError {
    fn wrap(path: &Path) -> impl FnOnce(std::io::Error) -> FileError + '_ {
        move |source| FileError { path: path.to_path_buf(), source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Modification time in milliseconds since the unix epoch
    pub modified_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    pub full_path: PathBuf,
    pub basename: String,
}

pub trait Files {
    fn exists(&self, path: &Path) -> bool;
    fn stat(&self, path: &Path) -> Result<FileStat, FileError>;
    fn read_text_file(&self, path: &Path) -> Result<String, FileError>;
    fn write_text_file(&self, path: &Path, contents: &str) -> Result<(), FileError>;
    fn mkdirp(&self, path: &Path) -> Result<(), FileError>;
    fn rm(&self, path: &Path) -> Result<(), FileError>;
    /// Recursive walk of regular files; directories whose basename starts
    /// with `.` are skipped entirely.
    fn walk(&self, dir: &Path) -> Result<Vec<WalkedFile>, FileError>;
}

#[derive(Debug, Default)]
pub struct OsFiles;

impl Files for OsFiles {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn stat(&self, path: &Path) -> Result<FileStat, FileError> {
        let metadata = std::fs::metadata(path).map_err(FileError::wrap(path))?;
        let modified = metadata.modified().map_err(FileError::wrap(path))?;
        let modified_ms = modified
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        Ok(FileStat { modified_ms })
    }

    fn read_text_file(&self, path: &Path) -> Result<String, FileError> {
        std::fs::read_to_string(path).map_err(FileError::wrap(path))
    }

    fn write_text_file(&self, path: &Path, contents: &str) -> Result<(), FileError> {
        std::fs::write(path, contents).map_err(FileError::wrap(path))
    }

    fn mkdirp(&self, path: &Path) -> Result<(), FileError> {
        std::fs::create_dir_all(path).map_err(FileError::wrap(path))
    }

    fn rm(&self, path: &Path) -> Result<(), FileError> {
        std::fs::remove_file(path).map_err(FileError::wrap(path))
    }

    fn walk(&self, dir: &Path) -> Result<Vec<WalkedFile>, FileError> {
        let mut found = Vec::new();
        walk_into(dir, &mut found)?;
        found.sort_by(|a, b| a.full_path.cmp(&b.full_path));
        Ok(found)
    }
}

fn walk_into(dir: &Path, found: &mut Vec<WalkedFile>) -> Result<(), FileError> {
    let entries = std::fs::read_dir(dir).map_err(FileError::wrap(dir))?;
    for entry in entries {
        let entry = entry.map_err(FileError::wrap(dir))?;
        let basename = entry.file_name().to_string_lossy().to_string();
        let file_type = entry.file_type().map_err(FileError::wrap(dir))?;
        if file_type.is_dir() {
            if !basename.starts_with('.') {
                walk_into(&entry.path(), found)?;
            }
        } else if file_type.is_file() {
            found.push(WalkedFile { full_path: entry.path(), basename });
        }
    }
    Ok(())
}
