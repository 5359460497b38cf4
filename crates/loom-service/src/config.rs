//! Runtime configuration, deserialised from `config.toml` and `LOOM_*`
//! environment variables.

use std::{
  num::NonZeroUsize,
  path::{Path, PathBuf},
  time::Duration,
};

use loom_graph::TraversalSettings;
use loom_search::{SearchSettings, index::IndexSelector};
use serde::Deserialize;

use crate::service::DEFAULT_MAX_FACT_RESULTS;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// SQLite database of the primary store. A leading `~/` is expanded.
  pub store_path: PathBuf,
  #[serde(default)]
  pub search:     SearchConfig,
  #[serde(default)]
  pub traversal:  TraversalSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  pub base_url:               String,
  pub index_prefix:           String,
  pub index_horizon_days:     i64,
  pub default_window_days:    i64,
  pub request_timeout_secs:   u64,
  pub scroll_page_size:       NonZeroUsize,
  pub scroll_keep_alive_secs: u64,
  pub immediate_visibility:   bool,
  /// Cap on the Facts one search returns; `0` removes it.
  pub max_fact_results:       usize,
  /// Install index templates and the lifecycle policy on startup.
  pub install_templates:      bool,
}

impl Default for SearchConfig {
  fn default() -> Self {
    let selector = IndexSelector::default();
    let settings = SearchSettings::default();
    Self {
      base_url:               "http://localhost:9200".into(),
      index_prefix:           selector.prefix,
      index_horizon_days:     selector.horizon_days,
      default_window_days:    selector.default_window_days,
      request_timeout_secs:   30,
      scroll_page_size:       settings.scroll_page_size,
      scroll_keep_alive_secs: settings.scroll_keep_alive_secs,
      immediate_visibility:   settings.immediate_visibility,
      max_fact_results:       DEFAULT_MAX_FACT_RESULTS,
      install_templates:      true,
    }
  }
}

impl SearchConfig {
  pub fn selector(&self) -> IndexSelector {
    IndexSelector {
      prefix:              self.index_prefix.clone(),
      horizon_days:        self.index_horizon_days,
      default_window_days: self.default_window_days,
    }
  }

  pub fn settings(&self) -> SearchSettings {
    SearchSettings {
      scroll_page_size:       self.scroll_page_size,
      scroll_keep_alive_secs: self.scroll_keep_alive_secs,
      immediate_visibility:   self.immediate_visibility,
    }
  }

  pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
}

impl ServiceConfig {
  /// Read `path` if it exists, then overlay `LOOM_*` environment variables;
  /// nested keys use `__`, e.g. `LOOM_SEARCH__BASE_URL`.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    let config: Self = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("LOOM").separator("__"))
      .build()?
      .try_deserialize()?;
    config.validate()?;
    Ok(config)
  }

  /// Reject values that deserialise but cannot be used.
  pub fn validate(&self) -> Result<(), config::ConfigError> {
    self
      .search
      .selector()
      .validate()
      .map_err(|reason| config::ConfigError::Message(format!("search: {reason}")))
  }

  /// `store_path` with a leading `~/` expanded to the home directory.
  pub fn resolved_store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
