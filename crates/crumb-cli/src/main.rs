//! `crumb`: drive the attribution engine from the command line.
//!
//! Reads `crumb.toml` (or the path given with `--config`) layered under
//! `CRUMB_*` environment variables, opens the configured store and runs one
//! command. Results are printed to stdout as JSON; logs go to stderr.
//!
//! # Usage
//!
//! ```
//! crumb build-indexes --until-complete
//! crumb attribute --query-type all --from 2024-01-01T00:00:00Z
//! crumb show --email a@example.com --timestamp 1700000000000
//! ```

mod settings;

use std::{collections::BTreeMap, path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use crumb_core::{
  attribution::{AttributionModel, AttributionResult},
  normalize,
  progress::{BatchProgress, ResumeToken},
  store::KvStore,
};
use crumb_engine::{AttributionRequest, DateRange, Engine, QueryType, indexer};
use crumb_store_rest::{RestConfig, RestStore};
use crumb_store_sqlite::SqliteStore;
use serde::Serialize;
use settings::{Settings, StoreSettings, expand_tilde};
use strum::IntoEnumIterator;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Exit status for a lookup that found nothing.
const NOT_FOUND: u8 = 2;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Multi-touch attribution over a key-value store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "crumb.toml", env = "CRUMB_CONFIG")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Run the index build job.
  BuildIndexes {
    /// Resume token returned by a previous run.
    #[arg(long)]
    resume:         Option<ResumeToken>,
    /// Keep invoking until the job completes.
    #[arg(long)]
    until_complete: bool,
  },
  /// Run bulk attribution over stored conversions.
  Attribute {
    #[command(flatten)]
    query:          QueryArgs,
    /// Conversions to visit in this run, rounded up to a whole scan page.
    #[arg(long)]
    limit:          Option<usize>,
    /// Resume token returned by a previous run.
    #[arg(long)]
    resume:         Option<ResumeToken>,
    /// Keep invoking until the job completes.
    #[arg(long)]
    until_complete: bool,
  },
  /// Reconstruct and attribute one conversion by its store key.
  Journey {
    #[arg(long)]
    key: String,
  },
  /// Print a stored attribution result.
  Show {
    #[arg(long)]
    email:     String,
    /// Conversion time: RFC 3339, epoch seconds or epoch milliseconds.
    #[arg(long, value_parser = parse_time)]
    timestamp: DateTime<Utc>,
  },
  /// Print the stored progress of the index build and an attribution query.
  Status {
    #[command(flatten)]
    query: QueryArgs,
  },
}

#[derive(Args)]
struct QueryArgs {
  #[arg(long, default_value_t = QueryType::Pending)]
  query_type: QueryType,
  /// Earliest conversion time, inclusive.
  #[arg(long, value_parser = parse_time)]
  from:       Option<DateTime<Utc>>,
  /// Latest conversion time, exclusive.
  #[arg(long, value_parser = parse_time)]
  to:         Option<DateTime<Utc>>,
}

impl QueryArgs {
  fn request(&self, limit: Option<usize>, resume: Option<ResumeToken>) -> AttributionRequest {
    AttributionRequest {
      query_type: self.query_type,
      limit,
      resume,
      date_range: DateRange {
        from: self.from,
        to:   self.to,
      },
    }
  }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
  normalize::parse_timestamp(&serde_json::Value::String(s.to_owned()))
    .map_err(|e| e.to_string())
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let mut settings = Settings::load(&cli.config)?;

  match std::mem::take(&mut settings.store) {
    StoreSettings::Sqlite { path } => {
      let path = expand_tilde(&path);
      let store = SqliteStore::open(&path)
        .await
        .with_context(|| format!("failed to open store at {path:?}"))?;
      let purged = store
        .purge_expired()
        .await
        .context("failed to purge expired keys")?;
      tracing::debug!(purged, path = %path.display(), "opened sqlite store");
      run(Arc::new(store), settings, cli.command).await
    }
    StoreSettings::Rest { url, token } => {
      let store =
        RestStore::new(RestConfig { url, token }).context("invalid REST store configuration")?;
      run(Arc::new(store), settings, cli.command).await
    }
  }
}

async fn run<S: KvStore>(
  store: Arc<S>,
  settings: Settings,
  command: Command,
) -> anyhow::Result<ExitCode> {
  let engine = Engine::new(store, settings.keys, settings.engine)
    .context("invalid engine configuration")?;

  match command {
    Command::BuildIndexes {
      resume,
      until_complete,
    } => {
      let mut resume = resume;
      loop {
        let report = engine
          .indexer()
          .run(resume.take(), &engine.deadline())
          .await
          .context("index build failed")?;
        print_json(&report)?;
        if !until_complete || report.is_complete {
          break;
        }
      }
    }

    Command::Attribute {
      query,
      limit,
      resume,
      until_complete,
    } => {
      let mut request = query.request(limit, resume);
      loop {
        let report = engine
          .attributor()
          .run(&request, &engine.deadline())
          .await
          .context("bulk attribution failed")?;
        print_json(&report)?;
        if !until_complete || report.is_complete {
          break;
        }
        request.resume = None;
      }
    }

    Command::Journey { key } => {
      let Some(result) = engine
        .attributor()
        .attribute_key(&key)
        .await
        .with_context(|| format!("failed to attribute {key}"))?
      else {
        eprintln!("no conversion stored at {key}");
        return Ok(ExitCode::from(NOT_FOUND));
      };
      print_json(&Summary::new(&result))?;
    }

    Command::Show { email, timestamp } => {
      let Some(result) = engine
        .attributor()
        .load(&email, timestamp)
        .await
        .context("failed to load attribution result")?
      else {
        eprintln!("no attribution stored for {email} at {}", timestamp.to_rfc3339());
        return Ok(ExitCode::from(NOT_FOUND));
      };
      print_json(&Summary::new(&result))?;
    }

    Command::Status { query } => {
      let request = query.request(None, None);
      let index_key = engine.keys().progress_key(indexer::JOB);
      let attribution_key = engine.keys().progress_key(&request.job_name());
      let progress = engine.progress();
      let status = Status {
        index_build: progress
          .load(&index_key)
          .await
          .context("failed to read index build progress")?,
        attribution: progress
          .load(&attribution_key)
          .await
          .context("failed to read attribution progress")?,
      };
      print_json(&status)?;
    }
  }

  Ok(ExitCode::SUCCESS)
}

// ─── Output ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Summary<'a> {
  #[serde(flatten)]
  result:    &'a AttributionResult,
  /// Credit per source, per model.
  by_source: BTreeMap<String, BTreeMap<String, f64>>,
}

impl<'a> Summary<'a> {
  fn new(result: &'a AttributionResult) -> Self {
    let by_source = AttributionModel::iter()
      .map(|m| (m.to_string(), result.models.get(m).by_source()))
      .collect();
    Self { result, by_source }
  }
}

#[derive(Serialize)]
struct Status {
  index_build: Option<BatchProgress>,
  attribution: Option<BatchProgress>,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  let out = serde_json::to_string_pretty(value).context("failed to serialise output")?;
  println!("{out}");
  Ok(())
}

#[cfg(test)]
mod tests {
  use clap::CommandFactory;

  use super::*;

  #[test]
  fn cli_definition_is_consistent() { Cli::command().debug_assert(); }

  #[test]
  fn times_accept_rfc3339_and_epochs() {
    let rfc = parse_time("2023-11-14T22:13:20Z").unwrap();
    assert_eq!(parse_time("1700000000").unwrap(), rfc);
    assert_eq!(parse_time("1700000000000").unwrap(), rfc);
    assert!(parse_time("yesterday").is_err());
  }

  #[test]
  fn attribute_flags_build_a_request() {
    let cli = Cli::try_parse_from([
      "crumb",
      "attribute",
      "--query-type",
      "all",
      "--limit",
      "10",
      "--resume",
      "cursor:1:40",
      "--from",
      "1700000000",
    ])
    .unwrap();
    let Command::Attribute {
      query,
      limit,
      resume,
      ..
    } = cli.command
    else {
      panic!("expected attribute");
    };
    let request = query.request(limit, resume);
    assert_eq!(request.query_type, QueryType::All);
    assert_eq!(request.limit, Some(10));
    assert_eq!(
      request.resume,
      Some(ResumeToken::Cursor {
        pattern_index: 1,
        cursor:        "40".into(),
      })
    );
    assert!(request.date_range.from.is_some());
    assert!(request.date_range.to.is_none());
  }
}
