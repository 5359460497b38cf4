//! [`IndexedFactDocument`] — the denormalized Fact projection stored in the
//! index.

use loom_core::{
  fact::{AccessMode, Fact, FactFlag},
  object::{FactType, IndexOption, Object, ObjectType},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bound Object as embedded in its Fact's document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDocument {
  pub id:      Uuid,
  #[serde(rename = "typeID")]
  pub type_id: Uuid,
  pub value:   String,
}

/// Field names match the index mapping; timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedFactDocument {
  pub id:                  Uuid,
  #[serde(rename = "typeID")]
  pub type_id:             Uuid,
  pub type_name:           String,
  pub value:               Option<String>,
  pub in_reference_to:     Option<Uuid>,
  #[serde(rename = "organizationID")]
  pub organization_id:     Uuid,
  #[serde(rename = "sourceID")]
  pub origin_id:           Uuid,
  pub access_mode:         AccessMode,
  pub trust:               f32,
  pub confidence:          f32,
  pub certainty:           f32,
  pub timestamp:           i64,
  pub last_seen_timestamp: i64,
  pub acl:                 Vec<Uuid>,
  pub flags:               Vec<FactFlag>,
  pub object_count:        u8,
  pub objects:             Vec<ObjectDocument>,
}

impl IndexedFactDocument {
  /// Project `fact` with its type and bound Objects. The time-global flag is
  /// set when the Fact already carries it or any bound Object's type is
  /// indexed time-globally.
  pub fn project(
    fact: &Fact,
    fact_type: &FactType,
    objects: &[(Object, ObjectType)],
  ) -> Self {
    let mut flags = fact.flags.clone();
    let time_global = objects
      .iter()
      .any(|(_, t)| t.index_option == IndexOption::TimeGlobal);
    if time_global && !flags.contains(&FactFlag::TimeGlobalIndex) {
      flags.push(FactFlag::TimeGlobalIndex);
    }

    Self {
      id: fact.fact_id,
      type_id: fact.type_id,
      type_name: fact_type.name.clone(),
      value: fact.value.clone(),
      in_reference_to: fact.in_reference_to,
      organization_id: fact.organization_id,
      origin_id: fact.origin_id,
      access_mode: fact.access_mode,
      trust: fact.trust,
      confidence: fact.confidence,
      certainty: fact.certainty(),
      timestamp: fact.timestamp.timestamp_millis(),
      last_seen_timestamp: fact.last_seen_timestamp.timestamp_millis(),
      acl: fact.acl.clone(),
      flags,
      object_count: fact.binding().object_count(),
      objects: objects
        .iter()
        .map(|(o, _)| ObjectDocument {
          id:      o.object_id,
          type_id: o.type_id,
          value:   o.value.clone(),
        })
        .collect(),
    }
  }

  pub fn is_time_global(&self) -> bool {
    self.flags.contains(&FactFlag::TimeGlobalIndex)
  }
}
