//! Error type for `loom-graph`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The query could not be compiled or failed while evaluating.
  #[error("invalid traversal query {query:?}: {reason}")]
  BadQuery { query: String, reason: String },

  #[error("traversal {query:?} exceeded the time limit of {limit:?}")]
  Timeout { query: String, limit: Duration },

  #[error("store error: {0}")]
  Store(Box<dyn std::error::Error + Send + Sync>),

  #[error("internal traversal error: {0}")]
  Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
