//! What each reconciliation operation found and did.
//!
//! Key lists follow the order the engine classified them in. Value maps are
//! the (exclusion-filtered) snapshots the classification was computed from.

use indexmap::IndexMap;

/// Local and remote values of a key present on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChange {
  pub local: String,
  pub remote: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
  pub local_only: IndexMap<String, String>,
  pub remote_only: IndexMap<String, String>,
  pub different: IndexMap<String, ValueChange>,
  pub same: Vec<String>,
}

impl DiffResult {
  pub fn has_differences(&self) -> bool {
    self.difference_count() > 0
  }

  pub fn difference_count(&self) -> usize {
    self.local_only.len() + self.remote_only.len() + self.different.len()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullResult {
  /// Remote keys missing locally
  pub created: Vec<String>,
  /// Remote keys whose local value differs
  pub updated: Vec<String>,
  pub unchanged: Vec<String>,
  /// Local keys the remote does not have
  pub local_only: Vec<String>,
  /// Local-only keys removed from the file at the caller's request
  pub deleted: Vec<String>,
  pub remote_values: IndexMap<String, String>,
  pub local_values: IndexMap<String, String>,
}

impl PullResult {
  pub fn has_changes(&self) -> bool {
    !self.created.is_empty() || !self.updated.is_empty()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushResult {
  pub created: Vec<String>,
  pub updated: Vec<String>,
  pub unchanged: Vec<String>,
}

impl PushResult {
  pub fn has_changes(&self) -> bool {
    !self.created.is_empty() || !self.updated.is_empty()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
  /// Local-only keys created remotely
  pub pushed: Vec<String>,
  /// Remote-only keys written to the file
  pub pulled: Vec<String>,
  pub conflicts_resolved: Vec<String>,
  pub conflicts_skipped: Vec<String>,
  pub unchanged: Vec<String>,
  pub deleted: Vec<String>,
  pub local_values: IndexMap<String, String>,
  pub remote_values: IndexMap<String, String>,
}

impl SyncResult {
  pub fn has_changes(&self) -> bool {
    !self.pushed.is_empty() || !self.pulled.is_empty() || !self.conflicts_resolved.is_empty()
  }
}
