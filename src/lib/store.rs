//! The remote side of reconciliation.
//!
//! [`SecretStore`] is the boundary the engine talks to. [`MemoryStore`] keeps
//! everything in process and records each mutation, which makes it useful for
//! previews and tests; [`InfisicalClient`](crate::infisical::InfisicalClient)
//! talks to a real server.

use std::collections::HashMap;

use indexmap::IndexMap;

/// A single remote key and its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
  pub key: String,
  pub value: String,
}

impl Secret {
  pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      value: value.into(),
    }
  }
}

/// Environment and folder overrides for one call. `None` falls back to the store's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Scope {
  pub environment: Option<String>,
  pub path: Option<String>,
}

impl Scope {
  pub fn new(environment: Option<String>, path: Option<String>) -> Self {
    Self { environment, path }
  }
}

/// Operations the engine needs from a remote secret store.
///
/// Implementations may authenticate lazily on the first call; later calls on
/// the same instance reuse that session.
pub trait SecretStore {
  /// All secrets in scope. Keys are unique within one listing.
  fn list(&mut self, scope: &Scope) -> Result<Vec<Secret>, StoreError>;

  fn get(&mut self, key: &str, scope: &Scope) -> Result<Option<Secret>, StoreError>;

  /// Fails with [`StoreError::AlreadyExists`] if `key` is present.
  fn create(&mut self, key: &str, value: &str, scope: &Scope) -> Result<(), StoreError>;

  /// Fails with [`StoreError::NotFound`] if `key` is absent.
  fn update(&mut self, key: &str, value: &str, scope: &Scope) -> Result<(), StoreError>;

  fn delete(&mut self, key: &str, scope: &Scope) -> Result<(), StoreError>;
}

impl<S: SecretStore + ?Sized> SecretStore for &mut S {
  fn list(&mut self, scope: &Scope) -> Result<Vec<Secret>, StoreError> {
    (**self).list(scope)
  }

  fn get(&mut self, key: &str, scope: &Scope) -> Result<Option<Secret>, StoreError> {
    (**self).get(key, scope)
  }

  fn create(&mut self, key: &str, value: &str, scope: &Scope) -> Result<(), StoreError> {
    (**self).create(key, value, scope)
  }

  fn update(&mut self, key: &str, value: &str, scope: &Scope) -> Result<(), StoreError> {
    (**self).update(key, value, scope)
  }

  fn delete(&mut self, key: &str, scope: &Scope) -> Result<(), StoreError> {
    (**self).delete(key, scope)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("Secret {0} not found")]
  NotFound(String),
  #[error("Secret {0} already exists")]
  AlreadyExists(String),
  #[error("Authentication failed: {0}")]
  Authentication(String),
  #[error("Secret store returned {status}: {message}")]
  Api { status: u16, message: String },
  /// The configured server URL cannot carry a secret path
  #[error("Invalid secret store URL {0}")]
  InvalidUrl(String),
  #[cfg(feature = "infisical")]
  #[error("HTTP transport error: {0}")]
  Http(#[from] reqwest::Error),
}

/// A mutation applied to a [`MemoryStore`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
  Create { key: String, value: String },
  Update { key: String, value: String },
  Delete { key: String },
}

/// In-process [`SecretStore`], partitioned by [`Scope`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  scopes: HashMap<Scope, IndexMap<String, String>>,
  history: Vec<StoreOp>,
  lists: usize,
  fail_on: Option<String>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// A store whose default scope starts with `secrets`, without recording them as mutations.
  pub fn with_secrets<I, K, V>(secrets: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    let mut store = Self::default();
    store.seed(&Scope::default(), secrets);
    store
  }

  pub fn seed<I, K, V>(&mut self, scope: &Scope, secrets: I)
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    let entries = self.scopes.entry(scope.clone()).or_default();
    for (key, value) in secrets {
      entries.insert(key.into(), value.into());
    }
  }

  /// Makes every mutation of `key` fail, to exercise abort paths.
  pub fn fail_on(&mut self, key: impl Into<String>) {
    self.fail_on = Some(key.into());
  }

  /// Mutations applied so far.
  pub fn history(&self) -> &[StoreOp] {
    &self.history
  }

  /// Number of `list` calls served.
  pub fn list_calls(&self) -> usize {
    self.lists
  }

  pub fn value(&self, key: &str, scope: &Scope) -> Option<&str> {
    self
      .scopes
      .get(scope)
      .and_then(|entries| entries.get(key))
      .map(String::as_str)
  }

  fn check_failure(&self, key: &str) -> Result<(), StoreError> {
    match &self.fail_on {
      Some(failing) if failing == key => Err(StoreError::Api {
        status: 500,
        message: format!("injected failure for {key}"),
      }),
      _ => Ok(()),
    }
  }
}

impl SecretStore for MemoryStore {
  fn list(&mut self, scope: &Scope) -> Result<Vec<Secret>, StoreError> {
    self.lists += 1;
    Ok(
      self
        .scopes
        .get(scope)
        .into_iter()
        .flatten()
        .map(|(key, value)| Secret::new(key, value))
        .collect(),
    )
  }

  fn get(&mut self, key: &str, scope: &Scope) -> Result<Option<Secret>, StoreError> {
    Ok(self.value(key, scope).map(|value| Secret::new(key, value)))
  }

  fn create(&mut self, key: &str, value: &str, scope: &Scope) -> Result<(), StoreError> {
    self.check_failure(key)?;
    let entries = self.scopes.entry(scope.clone()).or_default();
    if entries.contains_key(key) {
      return Err(StoreError::AlreadyExists(key.to_string()));
    }
    entries.insert(key.to_string(), value.to_string());
    self.history.push(StoreOp::Create {
      key: key.to_string(),
      value: value.to_string(),
    });
    Ok(())
  }

  fn update(&mut self, key: &str, value: &str, scope: &Scope) -> Result<(), StoreError> {
    self.check_failure(key)?;
    let current = self
      .scopes
      .get_mut(scope)
      .and_then(|entries| entries.get_mut(key))
      .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
    *current = value.to_string();
    self.history.push(StoreOp::Update {
      key: key.to_string(),
      value: value.to_string(),
    });
    Ok(())
  }

  fn delete(&mut self, key: &str, scope: &Scope) -> Result<(), StoreError> {
    self.check_failure(key)?;
    self
      .scopes
      .get_mut(scope)
      .and_then(|entries| entries.shift_remove(key))
      .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
    self.history.push(StoreOp::Delete {
      key: key.to_string(),
    });
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_memory_store_lifecycle() {
    let scope = Scope::default();
    let mut store = MemoryStore::new();

    store.create("APP_KEY", "v1", &scope).unwrap();
    store.update("APP_KEY", "v2", &scope).unwrap();
    assert_eq!(
      store.get("APP_KEY", &scope).unwrap(),
      Some(Secret::new("APP_KEY", "v2"))
    );
    store.delete("APP_KEY", &scope).unwrap();
    assert_eq!(store.get("APP_KEY", &scope).unwrap(), None);

    assert_eq!(
      store.history(),
      &[
        StoreOp::Create {
          key: "APP_KEY".into(),
          value: "v1".into()
        },
        StoreOp::Update {
          key: "APP_KEY".into(),
          value: "v2".into()
        },
        StoreOp::Delete {
          key: "APP_KEY".into()
        },
      ]
    );
  }

  #[test]
  fn test_create_existing_and_update_missing_fail() {
    let scope = Scope::default();
    let mut store = MemoryStore::with_secrets([("APP_KEY", "v1")]);

    assert!(matches!(
      store.create("APP_KEY", "v2", &scope),
      Err(StoreError::AlreadyExists(key)) if key == "APP_KEY"
    ));
    assert!(matches!(
      store.update("MISSING", "v2", &scope),
      Err(StoreError::NotFound(key)) if key == "MISSING"
    ));
    assert!(matches!(
      store.delete("MISSING", &scope),
      Err(StoreError::NotFound(_))
    ));
    assert!(store.history().is_empty());
  }

  #[test]
  fn test_scopes_are_isolated() {
    let prod = Scope::new(Some("prod".into()), None);
    let mut store = MemoryStore::with_secrets([("APP_KEY", "dev-value")]);
    store.seed(&prod, [("APP_KEY", "prod-value")]);

    let listed = store.list(&prod).unwrap();
    assert_eq!(listed, vec![Secret::new("APP_KEY", "prod-value")]);
    assert_eq!(store.value("APP_KEY", &Scope::default()), Some("dev-value"));
    assert!(store.list(&Scope::new(None, Some("/other".into()))).unwrap().is_empty());
    assert_eq!(store.list_calls(), 2);
  }

  #[test]
  fn test_listing_keeps_insertion_order() {
    let mut store = MemoryStore::with_secrets([("B", "2"), ("A", "1"), ("C", "3")]);
    let keys: Vec<_> = store
      .list(&Scope::default())
      .unwrap()
      .into_iter()
      .map(|secret| secret.key)
      .collect();
    assert_eq!(keys, vec!["B", "A", "C"]);
  }
}
