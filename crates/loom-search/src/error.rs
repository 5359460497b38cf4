//! Error type for `loom-search`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The index backend could not be reached or rejected the request.
  #[error("{context}: {source}")]
  Transport {
    context: String,
    #[source]
    source:  reqwest::Error,
  },

  #[error("index backend error: {0}")]
  Backend(String),

  #[error("malformed index response: {0}")]
  MalformedResponse(String),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
