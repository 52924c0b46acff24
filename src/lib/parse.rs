//! Format-preserving model of an env file.
//!
//! Every physical line of the source ends up in exactly one [`EnvEntry`]:
//! blank lines and comments keep their text untouched, and variables keep
//! the literal source they were read from so that an unmodified file
//! serializes back to the same bytes. Lines that cannot be read as a
//! variable are kept as comments rather than rejected, and lines that are
//! not UTF-8 are carried as opaque bytes.
//!
//! # Example
//!
//! ```rust
//! use env_reconcile::parse::EnvFile;
//!
//! let mut env = EnvFile::from("# Database\nDB_HOST=localhost\nDB_PASS=\"s3cr#t\"");
//! assert_eq!(env.get("DB_PASS"), Some("s3cr#t"));
//!
//! env.set("DB_HOST", "db.internal");
//! assert_eq!(env.to_string(), "# Database\nDB_HOST=db.internal\nDB_PASS=\"s3cr#t\"");
//! ```

use std::{borrow::Cow, collections::HashMap, fmt};

use indexmap::IndexMap;
#[cfg(feature = "tracing")]
use tracing::{debug, trace};

const COMMENT_PREFIX: &str = "#";
const ASSIGNMENT_OPERATOR: char = '=';
const EXPORT_PREFIX: &str = "export ";
const INLINE_COMMENT: &str = " #";
const DOUBLE_QUOTE: char = '"';
const SINGLE_QUOTE: char = '\'';
const ESCAPE: char = '\\';

/// Ordered entries of an env file plus an index of the first variable per key.
#[derive(Debug, Clone, Default)]
pub struct EnvFile {
  entries: Vec<EnvEntry>,
  index: HashMap<String, usize>,
}

impl PartialEq for EnvFile {
  fn eq(&self, other: &Self) -> bool {
    self.entries == other.entries
  }
}

impl fmt::Display for EnvFile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, entry) in self.entries.iter().enumerate() {
      if i > 0 {
        writeln!(f)?;
      }
      write!(f, "{}", entry)?;
    }
    Ok(())
  }
}

impl From<&str> for EnvFile {
  fn from(s: &str) -> Self {
    if s.is_empty() {
      return Self::default();
    }

    let normalized = s.replace("\r\n", "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();

    #[cfg(feature = "tracing")]
    debug!("Parsing env file with {} lines", lines.len());

    let mut entries = Vec::new();
    parse_lines(&lines, &mut entries);
    Self::with_entries(entries)
  }
}

/// Parses raw file bytes. Lines that are not valid UTF-8 become
/// [`EnvEntry::Binary`] and are written back untouched.
impl From<&[u8]> for EnvFile {
  fn from(bytes: &[u8]) -> Self {
    if bytes.is_empty() {
      return Self::default();
    }

    let mut segments: Vec<&[u8]> = bytes.split(|&b| b == b'\n').collect();
    let last = segments.len() - 1;
    for segment in &mut segments[..last] {
      let line: &[u8] = *segment;
      if let Some(stripped) = line.strip_suffix(b"\r") {
        *segment = stripped;
      }
    }

    #[cfg(feature = "tracing")]
    debug!("Parsing env file with {} lines", segments.len());

    let mut entries = Vec::new();
    let mut text: Vec<&str> = Vec::new();
    for segment in segments {
      match std::str::from_utf8(segment) {
        Ok(line) => text.push(line),
        Err(_) => {
          #[cfg(feature = "tracing")]
          trace!("Keeping a non UTF-8 line verbatim");

          parse_lines(&text, &mut entries);
          text.clear();
          entries.push(EnvEntry::Binary(segment.to_vec()));
        }
      }
    }
    parse_lines(&text, &mut entries);

    Self::with_entries(entries)
  }
}

fn parse_lines(lines: &[&str], entries: &mut Vec<EnvEntry>) {
  let mut i = 0;

  while i < lines.len() {
    let line = lines[i];
    i += 1;

    #[cfg(feature = "tracing")]
    trace!("Parsing line {}", i);

    let trimmed = line.trim();
    if trimmed.is_empty() {
      entries.push(EnvEntry::Blank(line.to_string()));
      continue;
    }
    if trimmed.starts_with(COMMENT_PREFIX) {
      entries.push(EnvEntry::Comment(line.to_string()));
      continue;
    }

    let Some((key_part, value_part)) = line.split_once(ASSIGNMENT_OPERATOR) else {
      #[cfg(feature = "tracing")]
      trace!("Line {} has no assignment, keeping it as a comment", i);

      entries.push(EnvEntry::Comment(line.to_string()));
      continue;
    };

    let key = parse_key(key_part);
    let mut raw_value = value_part.to_string();
    let mut raw = line.to_string();

    let leading = value_part.trim_start();
    if leading.starts_with(DOUBLE_QUOTE) && find_closing_quote(leading, DOUBLE_QUOTE).is_none() {
      while i < lines.len() {
        let continuation = lines[i];
        i += 1;

        raw_value.push('\n');
        raw_value.push_str(continuation);
        raw.push('\n');
        raw.push_str(continuation);

        if continuation.contains(DOUBLE_QUOTE) {
          break;
        }
      }

      #[cfg(feature = "tracing")]
      trace!("Variable {} spans multiple lines", key);
    }

    entries.push(EnvEntry::Variable(EnvVariable {
      value: decode_value(&raw_value),
      key,
      raw,
    }));
  }
}

impl EnvFile {
  fn with_entries(entries: Vec<EnvEntry>) -> Self {
    #[cfg(feature = "tracing")]
    debug!("Parsed {} entries", entries.len());

    let mut file = Self {
      entries,
      index: HashMap::new(),
    };
    file.reindex();
    file
  }

  /// Serialized file content. Unlike [`Display`](fmt::Display), non UTF-8
  /// lines are reproduced byte for byte.
  pub fn to_bytes(&self) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, entry) in self.entries.iter().enumerate() {
      if i > 0 {
        out.push(b'\n');
      }
      out.extend_from_slice(entry.as_bytes());
    }
    out
  }

  pub fn entries(&self) -> &[EnvEntry] {
    &self.entries
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn has(&self, key: &str) -> bool {
    self.index.contains_key(key)
  }

  /// Decoded value of the first variable named `key`.
  pub fn get(&self, key: &str) -> Option<&str> {
    self.variable(key).map(|var| var.value.as_str())
  }

  pub fn variable(&self, key: &str) -> Option<&EnvVariable> {
    let position = *self.index.get(key)?;
    match &self.entries[position] {
      EnvEntry::Variable(var) => Some(var),
      _ => None,
    }
  }

  /// All variables in file order. When a key is repeated the first occurrence wins.
  pub fn variables(&self) -> IndexMap<String, String> {
    let mut vars = IndexMap::new();
    for entry in &self.entries {
      if let EnvEntry::Variable(var) = entry
        && !vars.contains_key(&var.key)
      {
        vars.insert(var.key.clone(), var.value.clone());
      }
    }
    vars
  }

  /// Updates the first variable named `key` in place, or appends a new one.
  ///
  /// Returns the previous value when the key already existed. Only the
  /// touched entry is reformatted; every other line keeps its source text.
  pub fn set(&mut self, key: &str, value: impl Into<String>) -> Option<String> {
    let value = value.into();
    let raw = format!("{}{}{}", key, ASSIGNMENT_OPERATOR, format_value(&value));

    if let Some(&position) = self.index.get(key)
      && let EnvEntry::Variable(var) = &mut self.entries[position]
    {
      #[cfg(feature = "tracing")]
      trace!("Updating {} at entry {}", key, position);

      var.raw = raw;
      return Some(std::mem::replace(&mut var.value, value));
    }

    #[cfg(feature = "tracing")]
    trace!("Appending {}", key);

    self.index.insert(key.to_string(), self.entries.len());
    self.entries.push(EnvEntry::Variable(EnvVariable {
      key: key.to_string(),
      value,
      raw,
    }));
    None
  }

  /// Removes the first variable named `key`, returning its value.
  pub fn remove(&mut self, key: &str) -> Option<String> {
    let position = self.index.get(key).copied()?;
    let removed = self.entries.remove(position);
    self.reindex();

    #[cfg(feature = "tracing")]
    trace!("Removed {} from entry {}", key, position);

    match removed {
      EnvEntry::Variable(var) => Some(var.value),
      _ => None,
    }
  }

  fn reindex(&mut self) {
    self.index.clear();
    for (position, entry) in self.entries.iter().enumerate() {
      if let EnvEntry::Variable(var) = entry {
        self.index.entry(var.key.clone()).or_insert(position);
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvEntry {
  /// A whitespace-only line, kept as written.
  Blank(String),
  /// A `#` line, or any line that is not an assignment.
  Comment(String),
  /// A line that is not valid UTF-8.
  Binary(Vec<u8>),
  Variable(EnvVariable),
}

impl EnvEntry {
  /// Source text of the entry. Variables may span several lines.
  pub fn raw(&self) -> Cow<'_, str> {
    match self {
      EnvEntry::Blank(raw) | EnvEntry::Comment(raw) => Cow::Borrowed(raw),
      EnvEntry::Binary(bytes) => String::from_utf8_lossy(bytes),
      EnvEntry::Variable(var) => Cow::Borrowed(&var.raw),
    }
  }

  pub fn as_bytes(&self) -> &[u8] {
    match self {
      EnvEntry::Blank(raw) | EnvEntry::Comment(raw) => raw.as_bytes(),
      EnvEntry::Binary(bytes) => bytes,
      EnvEntry::Variable(var) => var.raw.as_bytes(),
    }
  }
}

impl fmt::Display for EnvEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVariable {
  pub key: String,
  /// Decoded value: quotes removed, escapes resolved, inline comment dropped.
  pub value: String,
  /// Literal source, including the key and any `export ` prefix.
  pub raw: String,
}

fn parse_key(key_part: &str) -> String {
  let key = key_part.trim();
  match key.strip_prefix(EXPORT_PREFIX) {
    Some(stripped) => stripped.trim().to_string(),
    None => key.to_string(),
  }
}

/// Position of the closing quote, skipping over backslash escapes.
fn find_closing_quote(value: &str, quote: char) -> Option<usize> {
  let bytes = value.as_bytes();
  let mut pos = 1;
  while pos < bytes.len() {
    if bytes[pos] == ESCAPE as u8 {
      pos += 2;
      continue;
    }
    if bytes[pos] == quote as u8 {
      return Some(pos);
    }
    pos += 1;
  }
  None
}

/// Decodes the text to the right of `=` into the variable's value.
pub fn decode_value(raw_value: &str) -> String {
  let value = raw_value.trim();

  if value.is_empty() {
    return String::new();
  }

  if value.starts_with(DOUBLE_QUOTE) {
    return match find_closing_quote(value, DOUBLE_QUOTE) {
      Some(end) => unescape(&value[1..end]),
      None => value[1..].to_string(),
    };
  }

  if value.starts_with(SINGLE_QUOTE) {
    return match value.rfind(SINGLE_QUOTE) {
      Some(end) if end > 0 => value[1..end].to_string(),
      _ => value[1..].to_string(),
    };
  }

  match value.find(INLINE_COMMENT) {
    Some(pos) => value[..pos].trim_end().to_string(),
    None => value.to_string(),
  }
}

fn unescape(inner: &str) -> String {
  let mut out = String::with_capacity(inner.len());
  let mut chars = inner.chars();
  while let Some(c) = chars.next() {
    if c != ESCAPE {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some('r') => out.push('\r'),
      Some('t') => out.push('\t'),
      Some('"') => out.push('"'),
      Some('\\') => out.push('\\'),
      Some(other) => {
        out.push(ESCAPE);
        out.push(other);
      }
      None => out.push(ESCAPE),
    }
  }
  out
}

/// Encodes a value for writing, double-quoting it when it would not read back verbatim.
pub fn format_value(value: &str) -> String {
  let needs_quotes = value.is_empty()
    || value
      .chars()
      .any(|c| matches!(c, ' ' | '#' | '"' | '\n' | '\\'));

  if !needs_quotes {
    return value.to_string();
  }

  let mut out = String::with_capacity(value.len() + 2);
  out.push(DOUBLE_QUOTE);
  for c in value.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '"' => out.push_str("\\\""),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      '\t' => out.push_str("\\t"),
      c => out.push(c),
    }
  }
  out.push(DOUBLE_QUOTE);
  out
}
