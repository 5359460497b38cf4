//! Objects and the type catalogue for Objects and Facts.
//!
//! An Object is a deduplicated entity identified by `(type_id, value)`. It is
//! created the first time a Fact references it and is never deleted or
//! updated afterwards.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Types ───────────────────────────────────────────────────────────────────

/// Where Facts bound to Objects of a type are indexed.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IndexOption {
  /// One shard per day, chosen by the Fact's `last_seen_timestamp`.
  #[default]
  Daily,
  /// The single permanent shard, for long-lived identity Objects.
  TimeGlobal,
}

/// The type of an Object, e.g. `ip` or `domain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectType {
  pub id:           Uuid,
  pub name:         String,
  pub index_option: IndexOption,
}

/// The type of a Fact, e.g. `resolve`. Used as the edge label in traversals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactType {
  pub id:   Uuid,
  pub name: String,
}

impl FactType {
  /// Well-known id of the system-reserved Retraction fact type.
  pub const RETRACTION_ID: Uuid =
    Uuid::from_u128(0x5f1e_c3a2_0000_4000_8000_7265_7472_6163);

  pub const RETRACTION_NAME: &'static str = "Retraction";

  /// The Retraction fact type as stored by every primary store.
  pub fn retraction() -> Self {
    Self { id: Self::RETRACTION_ID, name: Self::RETRACTION_NAME.to_owned() }
  }

  pub fn is_retraction(&self) -> bool { self.id == Self::RETRACTION_ID }
}

// ─── Object ──────────────────────────────────────────────────────────────────

/// A graph vertex. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Object {
  pub object_id: Uuid,
  pub type_id:   Uuid,
  pub value:     String,
}
