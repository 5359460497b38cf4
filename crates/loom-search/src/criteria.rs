//! Search criteria accepted by [`crate::FactSearchManager`].
//!
//! Every set-valued field is an OR within the set and an AND across fields.
//! An empty set means "no restriction". Criteria are plain values and are
//! only ever borrowed by the compilers.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use loom_core::{access::AccessScope, fact::FactBinding};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Strategies ──────────────────────────────────────────────────────────────

/// Whether a clause replicated over several fields must match on all of
/// them or on at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
  #[default]
  Any,
  All,
}

/// Implemented by the field strategy enums; maps a strategy to the index
/// fields it stands for.
pub trait FieldStrategy: Copy + Ord {
  fn fields(self) -> &'static [&'static str];
}

/// Fields searched by the keyword clause.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum KeywordFieldStrategy {
  FactValueText,
  FactValueIp,
  FactValueDomain,
  ObjectValueText,
  ObjectValueIp,
  ObjectValueDomain,
  All,
}

impl KeywordFieldStrategy {
  /// The object-value strategies contained in `strategies`, with `All`
  /// expanded. An empty input counts as `All`.
  pub fn object_strategies(
    strategies: &BTreeSet<Self>,
  ) -> BTreeSet<KeywordFieldStrategy> {
    let all = strategies.is_empty() || strategies.contains(&Self::All);
    [Self::ObjectValueText, Self::ObjectValueIp, Self::ObjectValueDomain]
      .into_iter()
      .filter(|s| all || strategies.contains(s))
      .collect()
  }
}

impl FieldStrategy for KeywordFieldStrategy {
  fn fields(self) -> &'static [&'static str] {
    match self {
      Self::FactValueText => &["value.text"],
      Self::FactValueIp => &["value.ip"],
      Self::FactValueDomain => &["value.domain"],
      Self::ObjectValueText => &["objects.value.text"],
      Self::ObjectValueIp => &["objects.value.ip"],
      Self::ObjectValueDomain => &["objects.value.domain"],
      Self::All => &[
        "value.text",
        "value.ip",
        "value.domain",
        "objects.value.text",
        "objects.value.ip",
        "objects.value.domain",
      ],
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TimeFieldStrategy {
  Timestamp,
  LastSeenTimestamp,
  All,
}

impl FieldStrategy for TimeFieldStrategy {
  fn fields(self) -> &'static [&'static str] {
    match self {
      Self::Timestamp => &["timestamp"],
      Self::LastSeenTimestamp => &["lastSeenTimestamp"],
      Self::All => &["timestamp", "lastSeenTimestamp"],
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NumberFieldStrategy {
  Trust,
  Confidence,
  Certainty,
  All,
}

impl FieldStrategy for NumberFieldStrategy {
  fn fields(self) -> &'static [&'static str] {
    match self {
      Self::Trust => &["trust"],
      Self::Confidence => &["confidence"],
      Self::Certainty => &["certainty"],
      Self::All => &["trust", "confidence", "certainty"],
    }
  }
}

/// The de-duplicated set of index fields selected by `strategies`. An empty
/// set of strategies selects every field.
pub fn resolve_fields<S: FieldStrategy>(
  strategies: &BTreeSet<S>,
  all: S,
) -> BTreeSet<&'static str> {
  if strategies.is_empty() {
    return all.fields().iter().copied().collect();
  }
  strategies
    .iter()
    .flat_map(|s| s.fields().iter().copied())
    .collect()
}

// ─── Ranges ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeRange {
  pub start:          Option<DateTime<Utc>>,
  pub end:            Option<DateTime<Utc>>,
  pub fields:         BTreeSet<TimeFieldStrategy>,
  pub match_strategy: MatchStrategy,
}

impl TimeRange {
  pub fn between(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
    Self { start, end, ..Self::default() }
  }

  /// Bounds as epoch milliseconds; non-positive bounds are unbounded.
  pub fn millis(&self) -> (Option<i64>, Option<i64>) {
    (positive_millis(self.start), positive_millis(self.end))
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberRange {
  pub min:            Option<f64>,
  pub max:            Option<f64>,
  pub fields:         BTreeSet<NumberFieldStrategy>,
  pub match_strategy: MatchStrategy,
}

pub(crate) fn positive_millis(dt: Option<DateTime<Utc>>) -> Option<i64> {
  dt.map(|dt| dt.timestamp_millis()).filter(|ms| *ms > 0)
}

// ─── SearchCriteria ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCriteria {
  pub fact_ids:            BTreeSet<Uuid>,
  pub fact_type_ids:       BTreeSet<Uuid>,
  pub fact_values:         BTreeSet<String>,
  pub in_reference_to:     BTreeSet<Uuid>,
  pub organization_ids:    BTreeSet<Uuid>,
  pub origin_ids:          BTreeSet<Uuid>,
  pub object_ids:          BTreeSet<Uuid>,
  pub object_type_ids:     BTreeSet<Uuid>,
  pub object_values:       BTreeSet<String>,
  pub fact_binding:        Option<FactBinding>,

  pub keywords:            Option<String>,
  pub keyword_fields:      BTreeSet<KeywordFieldStrategy>,
  pub keyword_match:       MatchStrategy,

  pub time:                Option<TimeRange>,
  pub number:              Option<NumberRange>,

  /// Object search only: keep Objects bound by at least / at most this
  /// many matching Facts.
  pub min_facts_count:     Option<i64>,
  pub max_facts_count:     Option<i64>,

  pub access:              AccessScope,
  pub include_retracted:   bool,
  /// Maximum number of results; `0` means unbounded.
  pub limit:               usize,
}

impl SearchCriteria {
  pub fn new(access: AccessScope) -> Self {
    Self { access, ..Self::default() }
  }

  /// The non-blank keyword string, if any.
  pub fn keywords(&self) -> Option<&str> {
    self.keywords.as_deref().map(str::trim).filter(|k| !k.is_empty())
  }

  /// The `[start, end]` window used for shard selection.
  pub fn index_window(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    self
      .time
      .as_ref()
      .map_or((None, None), |t| (t.start, t.end))
  }

  pub fn has_facts_count_filter(&self) -> bool {
    self.min_facts_count.is_some() || self.max_facts_count.is_some()
  }
}

/// Input to [`crate::FactSearchManager::calculate_object_statistics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStatisticsCriteria {
  pub object_ids: BTreeSet<Uuid>,
  /// Optional range on `lastSeenTimestamp`; also selects the shards.
  pub start:      Option<DateTime<Utc>>,
  pub end:        Option<DateTime<Utc>>,
  pub access:     AccessScope,
}
