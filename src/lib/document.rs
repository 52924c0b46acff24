//! An [`EnvFile`] bound to the path it was loaded from.

use std::{
  ffi::OsString,
  io,
  path::{Path, PathBuf},
};

use indexmap::IndexMap;
#[cfg(feature = "tracing")]
use tracing::debug;

use crate::parse::EnvFile;

const BACKUP_SUFFIX: &str = ".backup";

#[derive(Debug, Clone)]
pub struct EnvDocument {
  path: PathBuf,
  file: EnvFile,
}

impl EnvDocument {
  /// Reads and parses the file at `path`.
  ///
  /// A file that does not exist yields an empty document; it is created on
  /// the first [`write`](Self::write).
  pub fn load(path: impl Into<PathBuf>) -> Result<Self, DocumentError> {
    let path = path.into();

    let content = match std::fs::read(&path) {
      Ok(content) => content,
      Err(err) if err.kind() == io::ErrorKind::NotFound => {
        #[cfg(feature = "tracing")]
        debug!(?path, "Env file does not exist, starting empty");

        Vec::new()
      }
      Err(source) => return Err(DocumentError::Read { path, source }),
    };

    #[cfg(feature = "tracing")]
    debug!(?path, bytes = content.len(), "Loaded env file");

    Ok(Self {
      file: EnvFile::from(content.as_slice()),
      path,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn file(&self) -> &EnvFile {
    &self.file
  }

  pub fn has(&self, key: &str) -> bool {
    self.file.has(key)
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.file.get(key)
  }

  pub fn variables(&self) -> IndexMap<String, String> {
    self.file.variables()
  }

  pub fn set(&mut self, key: &str, value: impl Into<String>) -> Option<String> {
    self.file.set(key, value)
  }

  pub fn remove(&mut self, key: &str) -> Option<String> {
    self.file.remove(key)
  }

  /// Path a backup is written to when none is given: the document path plus `.backup`.
  pub fn default_backup_path(&self) -> PathBuf {
    let mut name = OsString::from(self.path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
  }

  /// Copies the file as it currently exists on disk, ignoring unsaved changes.
  ///
  /// Returns the backup location, or `None` when there is no file to copy yet.
  pub fn backup(&self, to: Option<&Path>) -> Result<Option<PathBuf>, DocumentError> {
    let target = to.map_or_else(|| self.default_backup_path(), Path::to_path_buf);

    if !self.path.exists() {
      #[cfg(feature = "tracing")]
      debug!(path = ?self.path, "Nothing to back up");

      return Ok(None);
    }

    std::fs::copy(&self.path, &target).map_err(|source| DocumentError::Backup {
      path: target.clone(),
      source,
    })?;

    #[cfg(feature = "tracing")]
    debug!(?target, "Backup written");

    Ok(Some(target))
  }

  /// Overwrites the file with the current entries.
  pub fn write(&self) -> Result<(), DocumentError> {
    #[cfg(feature = "tracing")]
    debug!(path = ?self.path, entries = self.file.entries().len(), "Writing env file");

    std::fs::write(&self.path, self.file.to_bytes()).map_err(|source| DocumentError::Write {
      path: self.path.clone(),
      source,
    })
  }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
  /// The env file exists but could not be read
  #[error("Failed to read {}: {source}", path.display())]
  Read { path: PathBuf, source: io::Error },
  /// The env file could not be written
  #[error("Failed to write {}: {source}", path.display())]
  Write { path: PathBuf, source: io::Error },
  /// The backup copy could not be written
  #[error("Failed to back up to {}: {source}", path.display())]
  Backup { path: PathBuf, source: io::Error },
}
