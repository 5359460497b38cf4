use loom_core::{fact::Fact, object::Object};
use serde::{Deserialize, Serialize};

/// One result of a traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TraversalValue {
  Object(Object),
  Fact(Fact),
  /// Anything that is neither a vertex nor an edge: property values, ids,
  /// labels, counts.
  Literal(serde_json::Value),
}

impl TraversalValue {
  pub fn as_object(&self) -> Option<&Object> {
    match self {
      Self::Object(object) => Some(object),
      _ => None,
    }
  }

  pub fn as_fact(&self) -> Option<&Fact> {
    match self {
      Self::Fact(fact) => Some(fact),
      _ => None,
    }
  }
}
