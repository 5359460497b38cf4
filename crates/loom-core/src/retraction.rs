//! Per-caller retraction visibility.
//!
//! A Fact is retracted *for a caller* iff the caller can read at least one
//! Retraction referencing it that is not itself retracted for that caller.
//! Retractions of retractions are followed exactly one level deep.

use std::{collections::HashMap, sync::Mutex};

use uuid::Uuid;

use crate::{
  access::AccessScope,
  fact::{Fact, FactFlag},
  store::ObjectFactStore,
};

/// Resolves [`is_retracted`](Self::is_retracted) for one caller.
///
/// Results are memoised per instance. An instance is bound to a single
/// [`AccessScope`] and must not outlive the request it was created for.
pub struct RetractionResolver<'a, S> {
  store: &'a S,
  scope: &'a AccessScope,
  memo:  Mutex<HashMap<Uuid, bool>>,
}

impl<'a, S: ObjectFactStore> RetractionResolver<'a, S> {
  pub fn new(store: &'a S, scope: &'a AccessScope) -> Self {
    Self { store, scope, memo: Mutex::new(HashMap::new()) }
  }

  /// Convenience wrapper reading the hint from the Fact's flags.
  pub async fn is_fact_retracted(&self, fact: &Fact) -> Result<bool, S::Error> {
    self
      .is_retracted(fact.fact_id, Some(fact.has_flag(FactFlag::RetractedHint)))
      .await
  }

  /// `hint == Some(false)` means the store knows no retraction was ever
  /// recorded, which short-circuits the lookup.
  pub async fn is_retracted(
    &self,
    fact_id: Uuid,
    hint: Option<bool>,
  ) -> Result<bool, S::Error> {
    if hint == Some(false) {
      return Ok(false);
    }
    if let Some(known) = self.cached(fact_id) {
      return Ok(known);
    }

    let mut retracted = false;
    for retraction in self.readable_retractions(fact_id).await? {
      let hint = retraction.has_flag(FactFlag::RetractedHint);
      if !hint || self.readable_retractions(retraction.fact_id).await?.is_empty()
      {
        retracted = true;
        break;
      }
    }

    tracing::debug!(%fact_id, retracted, "computed retraction state");
    if let Ok(mut memo) = self.memo.lock() {
      memo.insert(fact_id, retracted);
    }
    Ok(retracted)
  }

  fn cached(&self, fact_id: Uuid) -> Option<bool> {
    self.memo.lock().ok().and_then(|memo| memo.get(&fact_id).copied())
  }

  async fn readable_retractions(
    &self,
    fact_id: Uuid,
  ) -> Result<Vec<Fact>, S::Error> {
    let mut retractions = self.store.find_retractions_of(fact_id).await?;
    retractions.retain(|r| r.is_retraction() && self.scope.can_read_fact(r));
    Ok(retractions)
  }
}
