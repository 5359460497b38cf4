//! Service error type.
//!
//! Every failure is classified as one of three [`ErrorKind`]s, which is all a
//! protocol layer needs to pick a response.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// The request itself is wrong; retrying it unchanged will fail again.
  InvalidInput,
  Timeout,
  System,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("traversal {query:?} exceeded the time limit of {limit:?}")]
  Timeout { query: String, limit: Duration },

  #[error("search error: {0}")]
  Search(#[from] loom_search::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("{0}")]
  System(String),
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::InvalidInput(_) => ErrorKind::InvalidInput,
      Self::Timeout { .. } => ErrorKind::Timeout,
      Self::Search(_) | Self::Store(_) | Self::System(_) => ErrorKind::System,
    }
  }

  pub(crate) fn store(error: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(error))
  }
}

impl From<loom_graph::Error> for Error {
  fn from(error: loom_graph::Error) -> Self {
    match error {
      loom_graph::Error::BadQuery { .. } => Self::InvalidInput(error.to_string()),
      loom_graph::Error::Timeout { query, limit } => Self::Timeout { query, limit },
      loom_graph::Error::Store(source) => Self::Store(source),
      loom_graph::Error::Internal(reason) => Self::System(reason),
    }
  }
}

impl From<loom_core::Error> for Error {
  fn from(error: loom_core::Error) -> Self {
    match error {
      loom_core::Error::Serialization(e) => Self::System(e.to_string()),
      other => Self::InvalidInput(other.to_string()),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
