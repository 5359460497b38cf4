//! `loom` — diagnostic client for the Loom read service.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! primary store, connects to the Elasticsearch index and runs one request,
//! printing the result as JSON.
//!
//! ```text
//! loom search-objects --criteria '{"object_values": ["1.1.1.1"]}'
//! loom --organization <uuid> traverse --seed <uuid> --query "g.out('resolve')"
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use loom_core::access::AccessScope;
use loom_graph::TraverseParams;
use loom_search::{
  FactSearchManager,
  criteria::{ObjectStatisticsCriteria, SearchCriteria},
  elastic::ElasticBackend,
};
use loom_service::{LoomService, ServiceConfig};
use loom_store_sqlite::SqliteStore;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Loom knowledge graph client")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Identity of the caller; repeat for group memberships.
  #[arg(long = "identity", value_name = "UUID", global = true)]
  identities: Vec<Uuid>,

  /// Organization the caller may read on behalf of; repeatable.
  #[arg(long = "organization", value_name = "UUID", global = true)]
  organizations: Vec<Uuid>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Search Facts. Criteria are JSON; the access scope comes from the flags.
  SearchFacts {
    #[arg(long, default_value = "{}")]
    criteria: String,
  },
  /// Search Objects bound to matching Facts.
  SearchObjects {
    #[arg(long, default_value = "{}")]
    criteria: String,
  },
  /// Per-Fact-type statistics for Objects.
  Stats {
    #[arg(long = "object", value_name = "UUID", required = true)]
    objects: Vec<Uuid>,
    #[arg(long)]
    start:   Option<DateTime<Utc>>,
    #[arg(long)]
    end:     Option<DateTime<Utc>>,
  },
  /// Traverse the graph from seed Objects.
  Traverse {
    #[arg(long = "seed", value_name = "UUID", required = true)]
    seeds:             Vec<Uuid>,
    #[arg(long)]
    query:             String,
    #[arg(long)]
    include_retracted: bool,
    #[arg(long)]
    after:             Option<DateTime<Utc>>,
    #[arg(long)]
    before:            Option<DateTime<Utc>>,
    #[arg(long)]
    limit:             Option<usize>,
  },
  /// Project a stored Fact and (re-)index it.
  Index {
    #[arg(long = "fact", value_name = "UUID", required = true)]
    facts: Vec<Uuid>,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing. Logs go to stderr, results to stdout.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let config = ServiceConfig::load(&cli.config).context("failed to read config")?;

  let store_path = config.resolved_store_path();
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let backend = ElasticBackend::new(&config.search.base_url, config.search.request_timeout())
    .context("failed to build search client")?;
  let search = FactSearchManager::new(
    Arc::new(backend),
    config.search.selector(),
    config.search.settings(),
  );
  if config.search.install_templates {
    search
      .ensure_templates()
      .await
      .context("failed to install index templates")?;
  }
  let service = LoomService::new(Arc::new(store), search, config.traversal.clone())
    .with_max_fact_results(config.search.max_fact_results);

  let scope = AccessScope::new(cli.identities, cli.organizations);
  tracing::debug!(?scope, "running request");

  match cli.command {
    Command::SearchFacts { criteria } => {
      let criteria = parse_criteria(&criteria, scope)?;
      print(&service.search_facts(&criteria).await?.collect().await?)
    }
    Command::SearchObjects { criteria } => {
      let criteria = parse_criteria(&criteria, scope)?;
      print(&service.search_objects(&criteria).await?)
    }
    Command::Stats { objects, start, end } => {
      let criteria = ObjectStatisticsCriteria {
        object_ids: objects.into_iter().collect(),
        start,
        end,
        access: scope,
      };
      print(&service.object_statistics(&criteria).await?)
    }
    Command::Traverse { seeds, query, include_retracted, after, before, limit } => {
      let params = TraverseParams { include_retracted, after, before, limit };
      print(&service.traverse(&scope, &seeds, &query, &params).await?)
    }
    Command::Index { facts } => {
      let mut documents = Vec::with_capacity(facts.len());
      for id in facts {
        documents.push(
          service
            .index_fact(id)
            .await
            .with_context(|| format!("failed to index fact {id}"))?,
        );
      }
      print(&documents)
    }
  }
}

/// Parse JSON search criteria; the access scope always comes from the flags.
fn parse_criteria(json: &str, scope: AccessScope) -> anyhow::Result<SearchCriteria> {
  let mut criteria: SearchCriteria =
    serde_json::from_str(json).context("failed to parse search criteria")?;
  criteria.access = scope;
  Ok(criteria)
}

fn print(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value).context("failed to serialise result")?);
  Ok(())
}
