//! Error types for `loom-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::fact::AccessMode;

#[derive(Debug, Error)]
pub enum Error {
  #[error("object not found: {0}")]
  ObjectNotFound(Uuid),

  #[error("object type not found: {0}")]
  ObjectTypeNotFound(Uuid),

  #[error("fact not found: {0}")]
  FactNotFound(Uuid),

  #[error("fact type not found: {0}")]
  FactTypeNotFound(Uuid),

  /// A derived fact (meta fact, retraction) must be at least as restrictive
  /// as the fact it references.
  #[error(
    "access mode {given:?} is less restrictive than {required:?} of referenced fact {fact_id}"
  )]
  AccessModeTooPermissive {
    fact_id:  Uuid,
    required: AccessMode,
    given:    AccessMode,
  },

  #[error("invalid fact binding: {0}")]
  InvalidBinding(String),

  #[error("cannot grant explicit access to public fact {0}")]
  PublicFact(Uuid),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
