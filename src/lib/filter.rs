//! Glob-based exclusion of keys from reconciliation.

use glob::{MatchOptions, Pattern, PatternError};
use indexmap::IndexMap;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: false,
  require_literal_leading_dot: false,
};

/// Keys matching any of these patterns are invisible to every operation.
///
/// `*` matches any run of characters and `?` exactly one; a pattern must
/// match the whole key.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
  patterns: Vec<Pattern>,
}

impl ExclusionFilter {
  pub fn new<I, S>(patterns: I) -> Result<Self, FilterError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let patterns = patterns
      .into_iter()
      .map(|pattern| compile(pattern.as_ref()))
      .collect::<Result<_, _>>()?;
    Ok(Self { patterns })
  }

  pub fn patterns(&self) -> impl Iterator<Item = &str> {
    self.patterns.iter().map(Pattern::as_str)
  }

  pub fn is_excluded(&self, key: &str) -> bool {
    self
      .patterns
      .iter()
      .any(|pattern| pattern.matches_with(key, MATCH_OPTIONS))
  }

  /// The entries whose key is not excluded, in their original order.
  pub fn filter_excluded(&self, variables: IndexMap<String, String>) -> IndexMap<String, String> {
    if self.patterns.is_empty() {
      return variables;
    }
    variables
      .into_iter()
      .filter(|(key, _)| !self.is_excluded(key))
      .collect()
  }
}

// Runs of `*` mean the same as a single `*` for key names, but `glob`
// rejects `**` unless it is a whole path component.
fn compile(pattern: &str) -> Result<Pattern, FilterError> {
  let mut collapsed = String::with_capacity(pattern.len());
  for c in pattern.chars() {
    if c == '*' && collapsed.ends_with('*') {
      continue;
    }
    collapsed.push(c);
  }

  Pattern::new(&collapsed).map_err(|source| FilterError::InvalidPattern {
    pattern: pattern.to_string(),
    source,
  })
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
  #[error("Invalid exclusion pattern {pattern:?}: {source}")]
  InvalidPattern {
    pattern: String,
    source: PatternError,
  },
}
