use clap::{Args, Parser, Subcommand};
use env_reconcile::{
  ConflictStrategy, EnvDocument, ExclusionFilter, PullOptions, PushOptions, Reconciler, Scope,
  SyncOptions,
  infisical::{DEFAULT_ENVIRONMENT, DEFAULT_SECRET_PATH, DEFAULT_URL, InfisicalClient, InfisicalConfig},
};
use secrecy::SecretString;
use std::{error::Error, path::PathBuf, process::ExitCode};

mod report;

use report::{Report, confirm};

/// Exit status of `diff` when the two sides differ.
const DIFFERENCES_FOUND: u8 = 2;
/// Exit status for invalid invocations and failed operations.
const FAILURE: u8 = 1;

#[derive(Parser)]
#[command(
  name = "env-reconcile",
  about = "Pull, push, diff and sync a local env file with Infisical",
  version,
  author
)]
struct Cli {
  /// Path to the local .env file
  #[arg(short = 'f', long, env = "ENV_RECONCILE_FILE", default_value = ".env")]
  env_file: PathBuf,

  #[command(flatten)]
  connection: Connection,

  /// Key patterns kept out of every operation (`*` and `?` wildcards)
  #[arg(
    long = "exclude",
    env = "ENV_RECONCILE_EXCLUDE",
    value_delimiter = ',',
    default_value = "INFISICAL_*"
  )]
  exclude: Vec<String>,

  /// Verbose output (-v for verbose, -vv for very verbose)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Args)]
struct Connection {
  /// Infisical server URL (cloud or self-hosted)
  #[arg(long, env = "INFISICAL_URL", default_value = DEFAULT_URL)]
  url: String,

  /// Universal Auth client id
  #[arg(long, env = "INFISICAL_CLIENT_ID")]
  client_id: String,

  /// Universal Auth client secret
  #[arg(long, env = "INFISICAL_CLIENT_SECRET", hide_env_values = true)]
  client_secret: String,

  /// Infisical project id
  #[arg(long, env = "INFISICAL_PROJECT_ID")]
  project_id: String,

  /// Default environment slug
  #[arg(long, env = "INFISICAL_ENVIRONMENT", default_value = DEFAULT_ENVIRONMENT)]
  environment: String,

  /// Default secret path
  #[arg(long, env = "INFISICAL_SECRET_PATH", default_value = DEFAULT_SECRET_PATH)]
  secret_path: String,
}

#[derive(Subcommand)]
enum Command {
  /// Compare local .env variables with remote secrets
  Diff(DiffArgs),
  /// Pull remote secrets into the local .env file
  Pull(PullArgs),
  /// Push local .env variables to the remote store
  Push(PushArgs),
  /// Bidirectional sync between the local .env and the remote store
  Sync(SyncArgs),
}

#[derive(Args)]
struct Target {
  /// Environment for this invocation (overrides --environment)
  #[arg(long = "env")]
  environment: Option<String>,

  /// Secret path for this invocation (overrides --secret-path)
  #[arg(long = "path")]
  secret_path: Option<String>,
}

impl From<Target> for Scope {
  fn from(target: Target) -> Self {
    Scope::new(target.environment, target.secret_path)
  }
}

#[derive(Args)]
struct DiffArgs {
  #[command(flatten)]
  target: Target,

  /// Show actual secret values instead of masking
  #[arg(long)]
  show_values: bool,
}

#[derive(Args)]
struct PullArgs {
  #[command(flatten)]
  target: Target,

  /// Skip confirmation prompts
  #[arg(long)]
  force: bool,

  /// Copy the .env file to <file>.backup before writing
  #[arg(long)]
  backup: bool,

  /// Show what would change without writing
  #[arg(long)]
  dry_run: bool,

  /// Show actual secret values instead of masking
  #[arg(long)]
  show_values: bool,

  /// Remove local variables that are not in the remote store
  #[arg(long)]
  delete: bool,
}

#[derive(Args)]
struct PushArgs {
  #[command(flatten)]
  target: Target,

  /// Skip confirmation prompts
  #[arg(long)]
  force: bool,

  /// Show what would be pushed without sending
  #[arg(long)]
  dry_run: bool,

  /// Show actual secret values instead of masking
  #[arg(long)]
  show_values: bool,
}

#[derive(Args)]
struct SyncArgs {
  #[command(flatten)]
  target: Target,

  /// How to settle keys whose values differ on both sides
  #[arg(
    long,
    env = "ENV_RECONCILE_CONFLICT",
    value_enum,
    default_value_t = ConflictStrategy::Skip
  )]
  conflict: ConflictStrategy,

  /// Skip confirmation prompts
  #[arg(long)]
  force: bool,

  /// Copy the .env file to <file>.backup before writing
  #[arg(long)]
  backup: bool,

  /// Show what would change without applying it
  #[arg(long)]
  dry_run: bool,

  /// Show actual secret values instead of masking
  #[arg(long)]
  show_values: bool,

  /// Remove local-only variables from .env instead of pushing them
  #[arg(long)]
  delete: bool,
}

fn setup_tracing(verbose: u8) {
  use tracing_subscriber::fmt;
  use tracing_subscriber::prelude::*;

  let log_level = match verbose {
    1 => "debug",
    2 => "trace",
    _ => "info",
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(tracing_subscriber::EnvFilter::new(
      std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
    ))
    .init();
}

fn main() -> ExitCode {
  let cli = match Cli::try_parse() {
    Ok(cli) => cli,
    Err(err) => {
      let _ = err.print();
      return if err.use_stderr() {
        ExitCode::from(FAILURE)
      } else {
        ExitCode::SUCCESS
      };
    }
  };

  setup_tracing(cli.verbose);

  match run(cli) {
    Ok(code) => code,
    Err(err) => {
      Report::error(&err.to_string());
      ExitCode::from(FAILURE)
    }
  }
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
  let filter = ExclusionFilter::new(&cli.exclude)?;

  let Cli {
    env_file,
    connection,
    command,
    ..
  } = cli;

  let config = InfisicalConfig {
    url: connection.url,
    client_id: connection.client_id,
    client_secret: SecretString::from(connection.client_secret),
    project_id: connection.project_id,
    environment: connection.environment,
    secret_path: connection.secret_path,
  };
  let reconciler = Reconciler::new(InfisicalClient::new(config), filter);

  match command {
    Command::Diff(args) => diff(reconciler, env_file, args),
    Command::Pull(args) => pull(reconciler, env_file, args),
    Command::Push(args) => push(reconciler, env_file, args),
    Command::Sync(args) => sync(reconciler, env_file, args),
  }
}

type Client = Reconciler<InfisicalClient>;

fn diff(mut reconciler: Client, env_file: PathBuf, args: DiffArgs) -> Result<ExitCode, Box<dyn Error>> {
  let report = Report::new(args.show_values);
  let result = reconciler.diff(&env_file, &args.target.into())?;

  if !result.has_differences() {
    Report::info("No differences found. Local .env and the remote store are in sync.");
    return Ok(ExitCode::SUCCESS);
  }

  report.values(
    "Variables only in local .env (would be pushed):",
    result.local_only.iter(),
  );
  report.values(
    "Variables only in the remote store (would be pulled):",
    result.remote_only.iter(),
  );
  report.changes(
    "Variables with different values:",
    result
      .different
      .iter()
      .map(|(key, change)| (key, change.local.as_str(), change.remote.as_str())),
  );

  println!();
  Report::info(&format!("Found {} difference(s).", result.difference_count()));

  Ok(ExitCode::from(DIFFERENCES_FOUND))
}

fn pull(mut reconciler: Client, env_file: PathBuf, args: PullArgs) -> Result<ExitCode, Box<dyn Error>> {
  let report = Report::new(args.show_values);
  let scope: Scope = args.target.into();

  let preview = reconciler.pull(
    &env_file,
    &scope,
    &PullOptions {
      dry_run: true,
      ..Default::default()
    },
  )?;
  let has_local_only = !preview.local_only.is_empty();

  if !preview.has_changes() && !has_local_only {
    Report::info("No changes to apply. Local .env is already up to date.");
    return Ok(ExitCode::SUCCESS);
  }

  report.keys("New variables to add:", &preview.created, &preview.remote_values);
  report.keys("Variables to update:", &preview.updated, &preview.remote_values);

  let mut delete_keys = Vec::new();
  if has_local_only {
    report.keys(
      "Variables in local .env but not in the remote store:",
      &preview.local_only,
      &preview.local_values,
    );

    if !args.dry_run
      && (args.delete || (!args.force && confirm("Remove these variables from local .env?", false)?))
    {
      delete_keys = preview.local_only.clone();
    }
  }

  if args.dry_run {
    println!();
    Report::warn("Dry run complete. No changes were written.");
    return Ok(ExitCode::SUCCESS);
  }

  if !preview.has_changes() && delete_keys.is_empty() {
    return Ok(ExitCode::SUCCESS);
  }

  if !args.force && delete_keys.is_empty() && !confirm("Apply these changes to your .env file?", true)? {
    Report::info("Operation cancelled.");
    return Ok(ExitCode::SUCCESS);
  }

  let result = reconciler.pull(
    &env_file,
    &scope,
    &PullOptions {
      dry_run: false,
      backup: args.backup,
      delete_keys,
    },
  )?;

  if args.backup {
    Report::info(&format!("Backup created at {}.backup", env_file.display()));
  }

  Report::info(&format!(
    "Done! {} created, {} updated, {} deleted, {} unchanged.",
    result.created.len(),
    result.updated.len(),
    result.deleted.len(),
    result.unchanged.len(),
  ));

  Ok(ExitCode::SUCCESS)
}

fn push(mut reconciler: Client, env_file: PathBuf, args: PushArgs) -> Result<ExitCode, Box<dyn Error>> {
  let report = Report::new(args.show_values);
  let scope: Scope = args.target.into();

  let preview = reconciler.push(&env_file, &scope, &PushOptions { dry_run: true }, None)?;

  if !preview.has_changes() {
    Report::info("No changes to push. The remote store is already up to date.");
    return Ok(ExitCode::SUCCESS);
  }

  let local_values = EnvDocument::load(&env_file)?.variables();
  report.keys("New secrets to create:", &preview.created, &local_values);
  report.keys("Secrets to update:", &preview.updated, &local_values);

  if args.dry_run {
    println!();
    Report::warn("Dry run complete. Nothing was pushed.");
    return Ok(ExitCode::SUCCESS);
  }

  if !args.force && !confirm("Push these changes to the remote store?", true)? {
    Report::info("Operation cancelled.");
    return Ok(ExitCode::SUCCESS);
  }

  let bar = report::progress(preview.created.len() + preview.updated.len());
  let mut advance = |_: &str| bar.inc(1);
  let result = reconciler.push(
    &env_file,
    &scope,
    &PushOptions { dry_run: false },
    Some(&mut advance),
  );
  bar.finish_and_clear();
  let result = result?;

  Report::info(&format!(
    "Done! {} created, {} updated, {} unchanged.",
    result.created.len(),
    result.updated.len(),
    result.unchanged.len(),
  ));

  Ok(ExitCode::SUCCESS)
}

fn sync(mut reconciler: Client, env_file: PathBuf, args: SyncArgs) -> Result<ExitCode, Box<dyn Error>> {
  let conflict_strategy = args.conflict;
  let report = Report::new(args.show_values);
  let scope: Scope = args.target.into();

  let preview = reconciler.sync(
    &env_file,
    &scope,
    &SyncOptions {
      conflict_strategy,
      dry_run: true,
      ..Default::default()
    },
    None,
  )?;
  let has_local_only = !preview.pushed.is_empty();

  if !preview.has_changes() && preview.conflicts_skipped.is_empty() {
    Report::info("Everything is in sync. No changes needed.");
    return Ok(ExitCode::SUCCESS);
  }

  let mut delete_keys = Vec::new();
  if has_local_only {
    report.keys(
      "Variables in local .env but not in the remote store:",
      &preview.pushed,
      &preview.local_values,
    );

    if !args.dry_run
      && (args.delete
        || (!args.force
          && confirm(
            "Remove these local-only variables from .env instead of pushing them?",
            false,
          )?))
    {
      delete_keys = preview.pushed.clone();
    }
  }

  report.keys(
    "Remote-only variables (will be pulled to .env):",
    &preview.pulled,
    &preview.remote_values,
  );
  let conflicts = |keys: &[String]| -> Vec<(String, String, String)> {
    keys
      .iter()
      .map(|key| {
        (
          key.clone(),
          preview.local_values.get(key).cloned().unwrap_or_default(),
          preview.remote_values.get(key).cloned().unwrap_or_default(),
        )
      })
      .collect()
  };
  report.changes(
    &format!("Conflicts (will be resolved with strategy {conflict_strategy}):"),
    conflicts(&preview.conflicts_resolved)
      .iter()
      .map(|(key, local, remote)| (key, local.as_str(), remote.as_str())),
  );
  report.changes(
    "Conflicts (skipped: different values on both sides):",
    conflicts(&preview.conflicts_skipped)
      .iter()
      .map(|(key, local, remote)| (key, local.as_str(), remote.as_str())),
  );

  if args.dry_run {
    println!();
    Report::warn("Dry run complete. No changes were applied.");
    return Ok(ExitCode::SUCCESS);
  }

  let total_without_local_only = preview.pulled.len() + preview.conflicts_resolved.len();
  let total_push = if delete_keys.is_empty() {
    preview.pushed.len()
  } else {
    0
  };

  if total_without_local_only + total_push == 0
    && delete_keys.is_empty()
    && preview.conflicts_skipped.is_empty()
  {
    return Ok(ExitCode::SUCCESS);
  }

  if delete_keys.is_empty()
    && total_without_local_only + total_push > 0
    && !args.force
    && !confirm("Apply these changes?", true)?
  {
    Report::info("Operation cancelled.");
    return Ok(ExitCode::SUCCESS);
  }

  let total = total_push + total_without_local_only + delete_keys.len();
  if total == 0 {
    Report::info(&format!(
      "Done! 0 pushed, 0 pulled, 0 deleted, 0 conflicts resolved, {} skipped, {} unchanged.",
      preview.conflicts_skipped.len(),
      preview.unchanged.len(),
    ));
    return Ok(ExitCode::SUCCESS);
  }

  let bar = report::progress(total);
  let mut advance = |_: &str| bar.inc(1);
  let result = reconciler.sync(
    &env_file,
    &scope,
    &SyncOptions {
      conflict_strategy,
      dry_run: false,
      backup: args.backup,
      delete_keys,
    },
    Some(&mut advance),
  );
  bar.finish_and_clear();
  let result = result?;

  if args.backup {
    Report::info(&format!("Backup created at {}.backup", env_file.display()));
  }

  Report::info(&format!(
    "Done! {} pushed, {} pulled, {} deleted, {} conflicts resolved, {} skipped, {} unchanged.",
    result.pushed.len(),
    result.pulled.len(),
    result.deleted.len(),
    result.conflicts_resolved.len(),
    result.conflicts_skipped.len(),
    result.unchanged.len(),
  ));

  Ok(ExitCode::SUCCESS)
}
