//! Reconciliation between a local env file and a remote secret store.
//!
//! Every operation starts the same way: load the env file, list the remote
//! secrets once, and drop excluded keys from both sides. The snapshot taken
//! there drives both the classification and, unless it is a dry run, the
//! changes that follow.
//!
//! # Operations
//!
//! - [`diff`](Reconciler::diff): classify only.
//! - [`pull`](Reconciler::pull): remote → local. Remote keys are added to or
//!   updated in the file; local-only keys the caller names are removed.
//! - [`push`](Reconciler::push): local → remote. Missing secrets are created,
//!   differing ones updated.
//! - [`sync`](Reconciler::sync): both directions. Local-only keys are pushed
//!   (or removed when the caller asks), remote-only keys are pulled, and keys
//!   whose values differ are settled by a [`ConflictStrategy`].
//!
//! Values are compared byte for byte.
//!
//! # Examples
//!
//! ```rust,no_run
//! use env_reconcile::{ExclusionFilter, MemoryStore, Reconciler, Scope, SyncOptions};
//! use std::path::Path;
//!
//! let store = MemoryStore::with_secrets([("APP_KEY", "v1")]);
//! let filter = ExclusionFilter::new(["INFISICAL_*"]).unwrap();
//! let mut reconciler = Reconciler::new(store, filter);
//!
//! let result = reconciler
//!   .sync(Path::new(".env"), &Scope::default(), &SyncOptions::default(), None)
//!   .unwrap();
//! println!("{} pulled, {} pushed", result.pulled.len(), result.pushed.len());
//! ```

use std::{fmt, path::Path, str::FromStr};

use indexmap::IndexMap;
#[cfg(feature = "tracing")]
use tracing::{debug, info, trace};

use crate::{
  document::{DocumentError, EnvDocument},
  filter::ExclusionFilter,
  outcome::{DiffResult, PullResult, PushResult, SyncResult, ValueChange},
  store::{Scope, SecretStore, StoreError},
};

/// Called with each key right after its change has been applied.
pub type Progress<'a> = Option<&'a mut dyn FnMut(&str)>;

/// How [`Reconciler::sync`] settles a key whose local and remote values differ.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ConflictStrategy {
  /// Overwrite the local value with the remote one
  Remote,
  /// Overwrite the remote value with the local one
  Local,
  /// Leave both sides alone and report the key
  #[default]
  Skip,
}

impl ConflictStrategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      ConflictStrategy::Remote => "remote",
      ConflictStrategy::Local => "local",
      ConflictStrategy::Skip => "skip",
    }
  }
}

impl fmt::Display for ConflictStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ConflictStrategy {
  type Err = ReconcileError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "remote" => Ok(ConflictStrategy::Remote),
      "local" => Ok(ConflictStrategy::Local),
      "skip" => Ok(ConflictStrategy::Skip),
      other => Err(ReconcileError::InvalidConflictStrategy(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct PullOptions {
  /// Classify only; leave the file untouched
  pub dry_run: bool,
  /// Copy the file to `<path>.backup` before writing
  pub backup: bool,
  /// Local-only keys to remove from the file
  pub delete_keys: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
  /// Classify only; make no remote calls
  pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
  pub conflict_strategy: ConflictStrategy,
  /// Classify only; change neither side
  pub dry_run: bool,
  /// Copy the file to `<path>.backup` before changing anything
  pub backup: bool,
  /// Local-only keys to remove from the file instead of pushing
  pub delete_keys: Vec<String>,
}

/// Drives diff, pull, push and sync against one [`SecretStore`].
pub struct Reconciler<S> {
  store: S,
  filter: ExclusionFilter,
}

impl<S: SecretStore> Reconciler<S> {
  pub fn new(store: S, filter: ExclusionFilter) -> Self {
    Self { store, filter }
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn store_mut(&mut self) -> &mut S {
    &mut self.store
  }

  pub fn into_store(self) -> S {
    self.store
  }

  pub fn filter(&self) -> &ExclusionFilter {
    &self.filter
  }

  fn snapshot(
    &mut self,
    env_path: &Path,
    scope: &Scope,
  ) -> Result<(EnvDocument, IndexMap<String, String>, IndexMap<String, String>), ReconcileError> {
    let document = EnvDocument::load(env_path)?;
    let local = self.filter.filter_excluded(document.variables());

    let remote: IndexMap<String, String> = self
      .store
      .list(scope)?
      .into_iter()
      .map(|secret| (secret.key, secret.value))
      .collect();
    let remote = self.filter.filter_excluded(remote);

    #[cfg(feature = "tracing")]
    debug!(
      local = local.len(),
      remote = remote.len(),
      "Loaded local and remote keys"
    );

    Ok((document, local, remote))
  }

  /// Compares both sides without changing either.
  pub fn diff(&mut self, env_path: &Path, scope: &Scope) -> Result<DiffResult, ReconcileError> {
    #[cfg(feature = "tracing")]
    info!(?env_path, "Diffing env file against remote");

    let (_, local, remote) = self.snapshot(env_path, scope)?;
    let mut result = DiffResult::default();

    for (key, local_value) in &local {
      match remote.get(key) {
        None => {
          result.local_only.insert(key.clone(), local_value.clone());
        }
        Some(remote_value) if remote_value != local_value => {
          result.different.insert(
            key.clone(),
            ValueChange {
              local: local_value.clone(),
              remote: remote_value.clone(),
            },
          );
        }
        Some(_) => result.same.push(key.clone()),
      }
    }

    for (key, remote_value) in &remote {
      if !local.contains_key(key) {
        result.remote_only.insert(key.clone(), remote_value.clone());
      }
    }

    #[cfg(feature = "tracing")]
    debug!(
      local_only = result.local_only.len(),
      remote_only = result.remote_only.len(),
      different = result.different.len(),
      same = result.same.len(),
      "Diff complete"
    );

    Ok(result)
  }

  /// Brings remote values into the local file.
  ///
  /// Unless it is a dry run the file is written once at the end, after the
  /// optional backup.
  pub fn pull(
    &mut self,
    env_path: &Path,
    scope: &Scope,
    options: &PullOptions,
  ) -> Result<PullResult, ReconcileError> {
    #[cfg(feature = "tracing")]
    info!(?env_path, dry_run = options.dry_run, "Pulling remote secrets");

    let (mut document, local, remote) = self.snapshot(env_path, scope)?;

    let mut created = Vec::new();
    let mut updated = Vec::new();
    let mut unchanged = Vec::new();

    for (key, remote_value) in &remote {
      match document.get(key) {
        None => created.push(key.clone()),
        Some(local_value) if local_value != remote_value => updated.push(key.clone()),
        Some(_) => unchanged.push(key.clone()),
      }
    }

    let local_only: Vec<String> = local
      .keys()
      .filter(|key| !remote.contains_key(*key))
      .cloned()
      .collect();

    #[cfg(feature = "tracing")]
    debug!(
      created = created.len(),
      updated = updated.len(),
      unchanged = unchanged.len(),
      local_only = local_only.len(),
      "Pull classified"
    );

    let mut deleted = Vec::new();

    if !options.dry_run {
      if options.backup {
        document.backup(None)?;
      }

      for key in created.iter().chain(&updated) {
        #[cfg(feature = "tracing")]
        trace!("Setting {} from remote", key);

        document.set(key, remote[key].as_str());
      }

      for key in &options.delete_keys {
        if local_only.contains(key) && document.remove(key).is_some() {
          #[cfg(feature = "tracing")]
          trace!("Removed local-only {}", key);

          deleted.push(key.clone());
        }
      }

      document.write()?;
    }

    Ok(PullResult {
      created,
      updated,
      unchanged,
      local_only,
      deleted,
      remote_values: remote,
      local_values: local,
    })
  }

  /// Sends local values to the remote store, one call per changed key.
  pub fn push(
    &mut self,
    env_path: &Path,
    scope: &Scope,
    options: &PushOptions,
    mut on_progress: Progress<'_>,
  ) -> Result<PushResult, ReconcileError> {
    #[cfg(feature = "tracing")]
    info!(?env_path, dry_run = options.dry_run, "Pushing local variables");

    let (_, local, remote) = self.snapshot(env_path, scope)?;
    let mut result = PushResult::default();

    for (key, local_value) in &local {
      match remote.get(key) {
        None => {
          result.created.push(key.clone());
          if !options.dry_run {
            #[cfg(feature = "tracing")]
            trace!("Creating {}", key);

            self.store.create(key, local_value, scope)?;
            notify(&mut on_progress, key);
          }
        }
        Some(remote_value) if remote_value != local_value => {
          result.updated.push(key.clone());
          if !options.dry_run {
            #[cfg(feature = "tracing")]
            trace!("Updating {}", key);

            self.store.update(key, local_value, scope)?;
            notify(&mut on_progress, key);
          }
        }
        Some(_) => result.unchanged.push(key.clone()),
      }
    }

    #[cfg(feature = "tracing")]
    debug!(
      created = result.created.len(),
      updated = result.updated.len(),
      unchanged = result.unchanged.len(),
      "Push complete"
    );

    Ok(result)
  }

  /// Reconciles both directions.
  ///
  /// Changes are applied in four passes: pushes, local deletions, pulls, then
  /// conflict resolutions. The file is written once at the end, and only if
  /// one of those passes changed it.
  pub fn sync(
    &mut self,
    env_path: &Path,
    scope: &Scope,
    options: &SyncOptions,
    mut on_progress: Progress<'_>,
  ) -> Result<SyncResult, ReconcileError> {
    #[cfg(feature = "tracing")]
    info!(
      ?env_path,
      dry_run = options.dry_run,
      strategy = %options.conflict_strategy,
      "Syncing env file with remote"
    );

    let (mut document, local, remote) = self.snapshot(env_path, scope)?;
    let strategy = options.conflict_strategy;

    let mut pushed = Vec::new();
    let mut to_delete = Vec::new();
    let mut conflicts_resolved = Vec::new();
    let mut conflicts_skipped = Vec::new();
    let mut unchanged = Vec::new();

    for (key, local_value) in &local {
      match remote.get(key) {
        None if options.delete_keys.contains(key) => to_delete.push(key.clone()),
        None => pushed.push(key.clone()),
        Some(remote_value) if remote_value == local_value => unchanged.push(key.clone()),
        Some(_) if strategy == ConflictStrategy::Skip => conflicts_skipped.push(key.clone()),
        Some(_) => conflicts_resolved.push(key.clone()),
      }
    }

    let pulled: Vec<String> = remote
      .keys()
      .filter(|key| !local.contains_key(*key))
      .cloned()
      .collect();

    #[cfg(feature = "tracing")]
    debug!(
      pushed = pushed.len(),
      to_delete = to_delete.len(),
      pulled = pulled.len(),
      conflicts_resolved = conflicts_resolved.len(),
      conflicts_skipped = conflicts_skipped.len(),
      unchanged = unchanged.len(),
      "Sync classified"
    );

    let mut deleted = Vec::new();

    if !options.dry_run {
      if options.backup {
        document.backup(None)?;
      }

      for key in &pushed {
        #[cfg(feature = "tracing")]
        trace!("Creating {}", key);

        self.store.create(key, &local[key], scope)?;
        notify(&mut on_progress, key);
      }

      for key in &to_delete {
        #[cfg(feature = "tracing")]
        trace!("Removing {}", key);

        document.remove(key);
        deleted.push(key.clone());
        notify(&mut on_progress, key);
      }

      for key in &pulled {
        #[cfg(feature = "tracing")]
        trace!("Setting {} from remote", key);

        document.set(key, remote[key].as_str());
        notify(&mut on_progress, key);
      }

      for key in &conflicts_resolved {
        match strategy {
          ConflictStrategy::Remote => {
            document.set(key, remote[key].as_str());
          }
          ConflictStrategy::Local => self.store.update(key, &local[key], scope)?,
          ConflictStrategy::Skip => {}
        }

        #[cfg(feature = "tracing")]
        trace!("Resolved conflict on {} with {}", key, strategy);

        notify(&mut on_progress, key);
      }

      let touched_document = !pulled.is_empty()
        || !deleted.is_empty()
        || (strategy == ConflictStrategy::Remote && !conflicts_resolved.is_empty());

      if touched_document {
        document.write()?;
      } else {
        #[cfg(feature = "tracing")]
        debug!("Local file unchanged, skipping write");
      }
    }

    Ok(SyncResult {
      pushed,
      pulled,
      conflicts_resolved,
      conflicts_skipped,
      unchanged,
      deleted,
      local_values: local,
      remote_values: remote,
    })
  }
}

fn notify(on_progress: &mut Progress<'_>, key: &str) {
  if let Some(callback) = on_progress {
    callback(key);
  }
}

/// Errors that can occur while reconciling.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
  /// Reading, backing up or writing the env file failed
  #[error(transparent)]
  Document(#[from] DocumentError),
  /// A call to the secret store failed
  #[error(transparent)]
  Store(#[from] StoreError),
  /// The conflict strategy is not one of `remote`, `local` or `skip`
  #[error("Invalid conflict strategy: {0}. Use: remote, local, or skip.")]
  InvalidConflictStrategy(String),
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{MemoryStore, StoreOp};
  use std::path::PathBuf;
  use tempfile::TempDir;

  struct Fixture {
    _dir: TempDir,
    path: PathBuf,
  }

  impl Fixture {
    fn new(content: &str) -> Self {
      let dir = TempDir::new().unwrap();
      let path = dir.path().join(".env");
      std::fs::write(&path, content).unwrap();
      Self { _dir: dir, path }
    }

    fn read(&self) -> String {
      std::fs::read_to_string(&self.path).unwrap()
    }
  }

  fn reconciler<const N: usize>(remote: [(&str, &str); N]) -> Reconciler<MemoryStore> {
    Reconciler::new(MemoryStore::with_secrets(remote), ExclusionFilter::default())
  }

  fn keys(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  fn sync_with(strategy: ConflictStrategy) -> SyncOptions {
    SyncOptions {
      conflict_strategy: strategy,
      ..Default::default()
    }
  }

  #[test]
  fn test_conflict_strategy_from_str() {
    assert_eq!("remote".parse::<ConflictStrategy>().unwrap(), ConflictStrategy::Remote);
    assert_eq!("local".parse::<ConflictStrategy>().unwrap(), ConflictStrategy::Local);
    assert_eq!("skip".parse::<ConflictStrategy>().unwrap(), ConflictStrategy::Skip);

    let err = "newest".parse::<ConflictStrategy>().unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidConflictStrategy(ref s) if s == "newest"));
    assert_eq!(
      err.to_string(),
      "Invalid conflict strategy: newest. Use: remote, local, or skip."
    );
  }

  #[test]
  fn test_diff_classification() {
    let env = Fixture::new("SAME=1\nCHANGED=local\nLOCAL_ONLY=x");
    let mut reconciler = reconciler([("SAME", "1"), ("CHANGED", "remote"), ("REMOTE_ONLY", "y")]);

    let result = reconciler.diff(&env.path, &Scope::default()).unwrap();

    assert_eq!(result.same, keys(&["SAME"]));
    assert_eq!(
      result.different.get("CHANGED"),
      Some(&ValueChange {
        local: "local".into(),
        remote: "remote".into()
      })
    );
    assert_eq!(result.local_only.get("LOCAL_ONLY").map(String::as_str), Some("x"));
    assert_eq!(result.remote_only.get("REMOTE_ONLY").map(String::as_str), Some("y"));
    assert_eq!(result.difference_count(), 3);
    assert!(reconciler.store().history().is_empty());
  }

  #[test]
  fn test_comparison_is_byte_exact() {
    let env = Fixture::new("PADDED=\"value \"\nCASE=Value");
    let mut reconciler = reconciler([("PADDED", "value"), ("CASE", "value")]);

    let result = reconciler.diff(&env.path, &Scope::default()).unwrap();

    assert!(result.same.is_empty());
    assert_eq!(result.different.len(), 2);
  }

  #[test]
  fn test_diff_on_missing_file() {
    let dir = TempDir::new().unwrap();
    let mut reconciler = reconciler([("APP_KEY", "v1")]);

    let result = reconciler
      .diff(&dir.path().join(".env"), &Scope::default())
      .unwrap();

    assert_eq!(result.remote_only.len(), 1);
    assert!(!dir.path().join(".env").exists());
  }

  #[test]
  fn test_excluded_keys_are_never_classified() {
    let env = Fixture::new("INFISICAL_TOKEN=local\nAPP_KEY=v1\nINFISICAL_ONLY_LOCAL=1");
    let store = MemoryStore::with_secrets([("INFISICAL_TOKEN", "remote"), ("APP_KEY", "v1"), ("INFISICAL_URL", "x")]);
    let mut reconciler = Reconciler::new(store, ExclusionFilter::new(["INFISICAL_*"]).unwrap());

    let diff = reconciler.diff(&env.path, &Scope::default()).unwrap();
    assert_eq!(diff.same, keys(&["APP_KEY"]));
    assert!(!diff.has_differences());

    let pull = reconciler
      .pull(&env.path, &Scope::default(), &PullOptions::default())
      .unwrap();
    assert_eq!(pull.unchanged, keys(&["APP_KEY"]));
    assert!(pull.created.is_empty() && pull.updated.is_empty() && pull.local_only.is_empty());
    assert!(env.read().contains("INFISICAL_TOKEN=local"));

    let push = reconciler
      .push(&env.path, &Scope::default(), &PushOptions::default(), None)
      .unwrap();
    assert_eq!(push.unchanged, keys(&["APP_KEY"]));
    assert!(!push.has_changes());

    let sync = reconciler
      .sync(&env.path, &Scope::default(), &sync_with(ConflictStrategy::Remote), None)
      .unwrap();
    assert_eq!(sync.unchanged, keys(&["APP_KEY"]));
    assert!(!sync.has_changes());
    assert!(reconciler.store().history().is_empty());
  }

  #[test]
  fn test_pull_with_deletion() {
    let env = Fixture::new("APP_KEY=old\nSTALE=x");
    let mut reconciler = reconciler([("APP_KEY", "new")]);

    let options = PullOptions {
      delete_keys: keys(&["STALE"]),
      ..Default::default()
    };
    let result = reconciler.pull(&env.path, &Scope::default(), &options).unwrap();

    assert_eq!(result.updated, keys(&["APP_KEY"]));
    assert_eq!(result.deleted, keys(&["STALE"]));
    assert_eq!(result.local_only, keys(&["STALE"]));
    assert_eq!(env.read(), "APP_KEY=new");
  }

  #[test]
  fn test_pull_only_deletes_local_only_keys() {
    let env = Fixture::new("APP_KEY=v1\nSTALE=x");
    let mut reconciler = reconciler([("APP_KEY", "v1")]);

    let options = PullOptions {
      delete_keys: keys(&["APP_KEY", "UNKNOWN", "STALE"]),
      ..Default::default()
    };
    let result = reconciler.pull(&env.path, &Scope::default(), &options).unwrap();

    assert_eq!(result.deleted, keys(&["STALE"]));
    assert_eq!(env.read(), "APP_KEY=v1");
  }

  #[test]
  fn test_pull_appends_created_and_keeps_layout() {
    let env = Fixture::new("# App\nAPP_KEY=old # rotate me\n\nDEBUG=true\n");
    let mut reconciler = reconciler([("APP_KEY", "new"), ("NEW_KEY", "hello world")]);

    let result = reconciler
      .pull(&env.path, &Scope::default(), &PullOptions::default())
      .unwrap();

    assert_eq!(result.created, keys(&["NEW_KEY"]));
    assert_eq!(result.updated, keys(&["APP_KEY"]));
    assert_eq!(result.local_only, keys(&["DEBUG"]));
    assert!(result.deleted.is_empty());
    assert_eq!(
      env.read(),
      "# App\nAPP_KEY=new\n\nDEBUG=true\n\nNEW_KEY=\"hello world\""
    );
  }

  #[test]
  fn test_pull_is_idempotent() {
    let env = Fixture::new("APP_KEY=old\nSTALE=x");
    let mut reconciler = reconciler([("APP_KEY", "new"), ("DB_HOST", "db")]);
    let options = PullOptions {
      delete_keys: keys(&["STALE"]),
      ..Default::default()
    };

    reconciler.pull(&env.path, &Scope::default(), &options).unwrap();
    let after_first = env.read();
    let second = reconciler.pull(&env.path, &Scope::default(), &options).unwrap();

    assert!(second.created.is_empty());
    assert!(second.updated.is_empty());
    assert!(second.deleted.is_empty());
    assert_eq!(second.unchanged, keys(&["APP_KEY", "DB_HOST"]));
    assert_eq!(env.read(), after_first);
  }

  #[test]
  fn test_pull_trailing_backslash_is_idempotent() {
    let env = Fixture::new("");
    let mut reconciler = reconciler([("WIN_PATH", r"C:\dir\"), ("NEXT", "x")]);

    let first = reconciler
      .pull(&env.path, &Scope::default(), &PullOptions::default())
      .unwrap();
    assert_eq!(first.created, keys(&["WIN_PATH", "NEXT"]));
    let after_first = env.read();

    let second = reconciler
      .pull(&env.path, &Scope::default(), &PullOptions::default())
      .unwrap();
    assert!(second.created.is_empty());
    assert!(second.updated.is_empty());
    assert_eq!(second.unchanged, keys(&["WIN_PATH", "NEXT"]));
    assert_eq!(env.read(), after_first);
    assert_eq!(after_first, "WIN_PATH=\"C:\\\\dir\\\\\"\nNEXT=x");
  }

  #[test]
  fn test_non_utf8_file_is_reconciled() {
    let env = Fixture::new("");
    std::fs::write(&env.path, b"# caf\xe9 settings\nAPP_KEY=v1").unwrap();
    let mut reconciler = reconciler([("APP_KEY", "v1"), ("NEW_KEY", "v2")]);

    let diff = reconciler.diff(&env.path, &Scope::default()).unwrap();
    assert_eq!(diff.same, keys(&["APP_KEY"]));
    assert_eq!(diff.remote_only.len(), 1);

    reconciler
      .pull(&env.path, &Scope::default(), &PullOptions::default())
      .unwrap();
    assert_eq!(
      std::fs::read(&env.path).unwrap(),
      b"# caf\xe9 settings\nAPP_KEY=v1\nNEW_KEY=v2"
    );
  }

  #[test]
  fn test_pull_dry_run_leaves_file_untouched() {
    let content = "APP_KEY=old\r\nSTALE=x\r\n";
    let env = Fixture::new(content);
    let mut reconciler = reconciler([("APP_KEY", "new"), ("NEW_KEY", "v")]);

    let options = PullOptions {
      dry_run: true,
      backup: true,
      delete_keys: keys(&["STALE"]),
    };
    let result = reconciler.pull(&env.path, &Scope::default(), &options).unwrap();

    assert_eq!(result.created, keys(&["NEW_KEY"]));
    assert_eq!(result.updated, keys(&["APP_KEY"]));
    assert!(result.deleted.is_empty());
    assert_eq!(env.read(), content);
    assert!(!env.path.with_file_name(".env.backup").exists());
  }

  #[test]
  fn test_pull_backup_holds_previous_content() {
    let env = Fixture::new("APP_KEY=old");
    let mut reconciler = reconciler([("APP_KEY", "new")]);

    let options = PullOptions {
      backup: true,
      ..Default::default()
    };
    reconciler.pull(&env.path, &Scope::default(), &options).unwrap();

    let backup = std::fs::read_to_string(env.path.with_file_name(".env.backup")).unwrap();
    assert_eq!(backup, "APP_KEY=old");
    assert_eq!(env.read(), "APP_KEY=new");
  }

  #[test]
  fn test_push_creates_missing_secret() {
    let env = Fixture::new("APP_KEY=v1\nNEW_KEY=v2");
    let mut reconciler = reconciler([("APP_KEY", "v1")]);

    let result = reconciler
      .push(&env.path, &Scope::default(), &PushOptions::default(), None)
      .unwrap();

    assert_eq!(result.created, keys(&["NEW_KEY"]));
    assert_eq!(result.unchanged, keys(&["APP_KEY"]));
    assert!(result.updated.is_empty());
    assert_eq!(
      reconciler.store().history(),
      &[StoreOp::Create {
        key: "NEW_KEY".into(),
        value: "v2".into()
      }]
    );
  }

  #[test]
  fn test_push_reports_progress_in_order() {
    let env = Fixture::new("A=1\nB=changed\nC=3\nD=4");
    let mut reconciler = reconciler([("B", "2"), ("D", "4")]);

    let mut seen = Vec::new();
    let mut record = |key: &str| seen.push(key.to_string());
    let result = reconciler
      .push(&env.path, &Scope::default(), &PushOptions::default(), Some(&mut record))
      .unwrap();

    assert_eq!(result.created, keys(&["A", "C"]));
    assert_eq!(result.updated, keys(&["B"]));
    assert_eq!(seen, keys(&["A", "B", "C"]));
    assert_eq!(reconciler.store().value("B", &Scope::default()), Some("changed"));
  }

  #[test]
  fn test_push_dry_run_makes_no_calls() {
    let env = Fixture::new("A=1\nB=changed");
    let mut reconciler = reconciler([("B", "2")]);

    let mut calls = 0;
    let mut count = |_: &str| calls += 1;
    let result = reconciler
      .push(
        &env.path,
        &Scope::default(),
        &PushOptions { dry_run: true },
        Some(&mut count),
      )
      .unwrap();

    assert!(result.has_changes());
    assert_eq!(calls, 0);
    assert!(reconciler.store().history().is_empty());
    assert_eq!(reconciler.store().list_calls(), 1);
  }

  #[test]
  fn test_push_failure_aborts_remaining_calls() {
    let env = Fixture::new("A=1\nB=2\nC=3");
    let mut store = MemoryStore::new();
    store.fail_on("B");
    let mut reconciler = Reconciler::new(store, ExclusionFilter::default());

    let err = reconciler
      .push(&env.path, &Scope::default(), &PushOptions::default(), None)
      .unwrap_err();

    assert!(matches!(err, ReconcileError::Store(StoreError::Api { status: 500, .. })));
    assert_eq!(
      reconciler.store().history(),
      &[StoreOp::Create {
        key: "A".into(),
        value: "1".into()
      }]
    );
  }

  #[test]
  fn test_push_uses_scope() {
    let env = Fixture::new("A=1");
    let prod = Scope::new(Some("prod".into()), Some("/api".into()));
    let mut reconciler = reconciler([("A", "1")]);

    let result = reconciler
      .push(&env.path, &prod, &PushOptions::default(), None)
      .unwrap();

    assert_eq!(result.created, keys(&["A"]));
    assert_eq!(reconciler.store().value("A", &prod), Some("1"));
  }

  #[test]
  fn test_sync_conflict_remote() {
    let env = Fixture::new("K=a");
    let mut reconciler = reconciler([("K", "b")]);

    let result = reconciler
      .sync(&env.path, &Scope::default(), &sync_with(ConflictStrategy::Remote), None)
      .unwrap();

    assert_eq!(result.conflicts_resolved, keys(&["K"]));
    assert_eq!(env.read(), "K=b");
    assert!(reconciler.store().history().is_empty());
  }

  #[test]
  fn test_sync_conflict_local() {
    let env = Fixture::new("K=a");
    let mut reconciler = reconciler([("K", "b")]);

    let result = reconciler
      .sync(&env.path, &Scope::default(), &sync_with(ConflictStrategy::Local), None)
      .unwrap();

    assert_eq!(result.conflicts_resolved, keys(&["K"]));
    assert_eq!(env.read(), "K=a");
    assert_eq!(
      reconciler.store().history(),
      &[StoreOp::Update {
        key: "K".into(),
        value: "a".into()
      }]
    );
  }

  #[test]
  fn test_sync_conflict_skip() {
    let env = Fixture::new("K=a");
    let mut reconciler = reconciler([("K", "b")]);

    let result = reconciler
      .sync(&env.path, &Scope::default(), &sync_with(ConflictStrategy::Skip), None)
      .unwrap();

    assert_eq!(result.conflicts_skipped, keys(&["K"]));
    assert!(result.conflicts_resolved.is_empty());
    assert_eq!(env.read(), "K=a");
    assert!(reconciler.store().history().is_empty());
  }

  #[test]
  fn test_sync_full_pass_and_progress_order() {
    let env = Fixture::new("SAME=1\nPUSH_ME=p\nDROP_ME=d\nCONFLICT=local");
    let mut reconciler = reconciler([("SAME", "1"), ("CONFLICT", "remote"), ("PULL_ME", "r")]);

    let options = SyncOptions {
      conflict_strategy: ConflictStrategy::Remote,
      delete_keys: keys(&["DROP_ME"]),
      ..Default::default()
    };
    let mut seen = Vec::new();
    let mut record = |key: &str| seen.push(key.to_string());
    let result = reconciler
      .sync(&env.path, &Scope::default(), &options, Some(&mut record))
      .unwrap();

    assert_eq!(result.pushed, keys(&["PUSH_ME"]));
    assert_eq!(result.deleted, keys(&["DROP_ME"]));
    assert_eq!(result.pulled, keys(&["PULL_ME"]));
    assert_eq!(result.conflicts_resolved, keys(&["CONFLICT"]));
    assert_eq!(result.unchanged, keys(&["SAME"]));
    assert_eq!(seen, keys(&["PUSH_ME", "DROP_ME", "PULL_ME", "CONFLICT"]));

    assert_eq!(env.read(), "SAME=1\nPUSH_ME=p\nCONFLICT=remote\nPULL_ME=r");
    assert_eq!(
      reconciler.store().history(),
      &[StoreOp::Create {
        key: "PUSH_ME".into(),
        value: "p".into()
      }]
    );
  }

  #[test]
  fn test_sync_push_only_does_not_rewrite_file() {
    let content = "A=1\r\nB=2\r\n";
    let env = Fixture::new(content);
    let mut reconciler = reconciler([("A", "1")]);

    let result = reconciler
      .sync(&env.path, &Scope::default(), &SyncOptions::default(), None)
      .unwrap();

    assert_eq!(result.pushed, keys(&["B"]));
    assert_eq!(env.read(), content);
  }

  #[test]
  fn test_sync_local_strategy_does_not_rewrite_file() {
    let content = "K=a\r\n";
    let env = Fixture::new(content);
    let mut reconciler = reconciler([("K", "b")]);

    reconciler
      .sync(&env.path, &Scope::default(), &sync_with(ConflictStrategy::Local), None)
      .unwrap();

    assert_eq!(env.read(), content);
  }

  #[test]
  fn test_sync_dry_run_is_pure() {
    let content = "PUSH_ME=p\nDROP_ME=d\nCONFLICT=local";
    let env = Fixture::new(content);
    let mut reconciler = reconciler([("CONFLICT", "remote"), ("PULL_ME", "r")]);

    let options = SyncOptions {
      conflict_strategy: ConflictStrategy::Local,
      dry_run: true,
      backup: true,
      delete_keys: keys(&["DROP_ME"]),
    };
    let result = reconciler
      .sync(&env.path, &Scope::default(), &options, None)
      .unwrap();

    assert_eq!(result.pushed, keys(&["PUSH_ME"]));
    assert!(result.deleted.is_empty());
    assert_eq!(result.pulled, keys(&["PULL_ME"]));
    assert_eq!(result.conflicts_resolved, keys(&["CONFLICT"]));
    assert_eq!(env.read(), content);
    assert!(reconciler.store().history().is_empty());
    assert!(!env.path.with_file_name(".env.backup").exists());
  }

  #[test]
  fn test_sync_failure_leaves_file_unwritten() {
    let content = "NEW=1\nCONFLICT=local";
    let env = Fixture::new(content);
    let mut store = MemoryStore::with_secrets([("CONFLICT", "remote"), ("PULL_ME", "r")]);
    store.fail_on("NEW");
    let mut reconciler = Reconciler::new(store, ExclusionFilter::default());

    let result = reconciler.sync(
      &env.path,
      &Scope::default(),
      &sync_with(ConflictStrategy::Remote),
      None,
    );

    assert!(matches!(result, Err(ReconcileError::Store(_))));
    assert_eq!(env.read(), content);
  }

  #[test]
  fn test_each_key_lands_in_one_bucket() {
    let env = Fixture::new("A=1\nB=2\nC=3\nD=4");
    let mut reconciler = reconciler([("B", "2"), ("C", "x"), ("E", "5"), ("F", "6")]);
    let scope = Scope::default();

    let mut all: Vec<String> = keys(&["A", "B", "C", "D", "E", "F"]);
    all.sort();

    let diff = reconciler.diff(&env.path, &scope).unwrap();
    let mut seen: Vec<String> = diff
      .local_only
      .keys()
      .chain(diff.remote_only.keys())
      .chain(diff.different.keys())
      .chain(&diff.same)
      .cloned()
      .collect();
    seen.sort();
    assert_eq!(seen, all);

    let options = SyncOptions {
      dry_run: true,
      delete_keys: keys(&["D"]),
      ..Default::default()
    };
    let sync = reconciler.sync(&env.path, &scope, &options, None).unwrap();
    let mut seen: Vec<String> = sync
      .pushed
      .iter()
      .chain(&sync.pulled)
      .chain(&sync.conflicts_skipped)
      .chain(&sync.unchanged)
      .cloned()
      .chain(std::iter::once("D".to_string()))
      .collect();
    seen.sort();
    assert_eq!(seen, all);
  }
}
