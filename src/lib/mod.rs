//! Reconcile a local env file with a remote secret store.
//!
//! This library keeps a `.env` file and a remote key/value secret store in
//! step. It parses env files without disturbing their layout, compares both
//! sides, and pulls, pushes or syncs the differences.
//!
//! # Features
//!
//! - **Format preservation**: comments, blank lines, quoting and unrecognized
//!   lines survive a load/save cycle byte for byte
//! - **Four operations**: diff, pull, push and bidirectional sync with a
//!   conflict strategy
//! - **Exclusions**: glob patterns keep keys out of every operation
//! - **Infisical backend**: a blocking client for the Infisical API (feature `infisical`)
//! - **Optional tracing**: Detailed logging when the `tracing` feature is enabled
//!
//! # Example
//!
//! ```rust,no_run
//! use env_reconcile::{
//!   ExclusionFilter, PullOptions, Reconciler, Scope,
//!   infisical::{InfisicalClient, InfisicalConfig},
//! };
//! use std::path::Path;
//!
//! let config = InfisicalConfig::new("client-id", "client-secret", "project-id");
//! let filter = ExclusionFilter::new(["INFISICAL_*"]).unwrap();
//! let mut reconciler = Reconciler::new(InfisicalClient::new(config), filter);
//!
//! let result = reconciler
//!   .pull(Path::new(".env"), &Scope::default(), &PullOptions::default())
//!   .unwrap();
//! println!("{} created, {} updated", result.created.len(), result.updated.len());
//! ```

pub mod document;
pub mod engine;
pub mod filter;
#[cfg(feature = "infisical")]
pub mod infisical;
pub mod outcome;
pub mod parse;
pub mod store;

pub use document::{DocumentError, EnvDocument};
pub use engine::{
  ConflictStrategy, Progress, PullOptions, PushOptions, ReconcileError, Reconciler, SyncOptions,
};
pub use filter::{ExclusionFilter, FilterError};
pub use outcome::{DiffResult, PullResult, PushResult, SyncResult, ValueChange};
pub use parse::{EnvEntry, EnvFile, EnvVariable};
pub use store::{MemoryStore, Scope, Secret, SecretStore, StoreError, StoreOp};
