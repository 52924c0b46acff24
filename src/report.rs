//! Terminal output for the CLI: masked tables, prompts and progress.

use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};

const MASK: &str = "***";

pub struct Report {
  show_values: bool,
}

impl Report {
  pub fn new(show_values: bool) -> Self {
    Self { show_values }
  }

  pub fn info(message: &str) {
    println!("INFO  {message}");
  }

  pub fn warn(message: &str) {
    println!("WARN  {message}");
  }

  pub fn error(message: &str) {
    eprintln!("ERROR  {message}");
  }

  fn shown(&self, value: &str) -> String {
    if self.show_values {
      value.to_string()
    } else {
      MASK.to_string()
    }
  }

  /// Key/value table for `keys`, looking values up in `values`.
  pub fn keys(&self, title: &str, keys: &[String], values: &IndexMap<String, String>) {
    self.values(
      title,
      keys
        .iter()
        .map(|key| (key, values.get(key).map(String::as_str).unwrap_or_default())),
    );
  }

  pub fn values<K, V>(&self, title: &str, rows: impl IntoIterator<Item = (K, V)>)
  where
    K: AsRef<str>,
    V: AsRef<str>,
  {
    let rows: Vec<Vec<String>> = rows
      .into_iter()
      .map(|(key, value)| vec![key.as_ref().to_string(), self.shown(value.as_ref())])
      .collect();
    section(title, &["Key", "Value"], &rows);
  }

  pub fn changes<'a, K>(&self, title: &str, rows: impl IntoIterator<Item = (K, &'a str, &'a str)>)
  where
    K: AsRef<str>,
  {
    let rows: Vec<Vec<String>> = rows
      .into_iter()
      .map(|(key, local, remote)| {
        vec![
          key.as_ref().to_string(),
          self.shown(local),
          self.shown(remote),
        ]
      })
      .collect();
    section(title, &["Key", "Local", "Remote"], &rows);
  }
}

fn section(title: &str, headers: &[&str], rows: &[Vec<String>]) {
  if rows.is_empty() {
    return;
  }
  println!();
  Report::warn(title);
  print!("{}", table(headers, rows));
}

fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
  let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
  for row in rows {
    for (width, cell) in widths.iter_mut().zip(row) {
      *width = (*width).max(cell.chars().count());
    }
  }

  let border = widths
    .iter()
    .map(|w| "-".repeat(w + 2))
    .collect::<Vec<_>>()
    .join("+");
  let line = |cells: Vec<&str>| {
    let padded: Vec<String> = cells
      .iter()
      .zip(&widths)
      .map(|(cell, width)| format!(" {:<width$} ", cell, width = width))
      .collect();
    format!("|{}|\n", padded.join("|"))
  };

  let mut out = format!("+{border}+\n");
  out.push_str(&line(headers.to_vec()));
  out.push_str(&format!("+{border}+\n"));
  for row in rows {
    out.push_str(&line(row.iter().map(String::as_str).collect()));
  }
  out.push_str(&format!("+{border}+\n"));
  out
}

/// Asks a yes/no question on stdin. An empty answer or closed stdin picks `default`.
pub fn confirm(question: &str, default: bool) -> io::Result<bool> {
  let hint = if default { "[Y/n]" } else { "[y/N]" };
  print!("{question} {hint} ");
  io::stdout().flush()?;

  let mut answer = String::new();
  if io::stdin().lock().read_line(&mut answer)? == 0 {
    return Ok(default);
  }

  Ok(match answer.trim().to_lowercase().as_str() {
    "" => default,
    "y" | "yes" => true,
    _ => false,
  })
}

pub fn progress(total: usize) -> ProgressBar {
  let bar = ProgressBar::new(total as u64);
  if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}") {
    bar.set_style(style);
  }
  bar
}
