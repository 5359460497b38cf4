//! Shard naming and selection.
//!
//! Facts live in one shard per UTC day (chosen by `lastSeenTimestamp`) unless
//! they bind a time-global Object, in which case they live in the single
//! time-global shard. Every search targets the daily shards of its window
//! plus the time-global shard.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

const DAILY_SUFFIX: &str = "daily-";
const TIME_GLOBAL_SUFFIX: &str = "time-global";

/// Upper bound for `horizon_days` and `default_window_days`.
pub const MAX_WINDOW_DAYS: i64 = 3650;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSelector {
  /// Prepended to every shard name, e.g. `loom-`.
  pub prefix:              String,
  /// Maximum number of days a single search may span.
  pub horizon_days:        i64,
  /// Window used when the caller gives no start bound.
  pub default_window_days: i64,
}

impl Default for IndexSelector {
  fn default() -> Self {
    Self {
      prefix:              "loom-".into(),
      horizon_days:        90,
      default_window_days: 30,
    }
  }
}

impl IndexSelector {
  /// Common prefix of every daily shard name.
  pub fn daily_index_prefix(&self) -> String { format!("{}{DAILY_SUFFIX}", self.prefix) }

  pub fn daily_index(&self, day: NaiveDate) -> String {
    format!("{}{}", self.daily_index_prefix(), day.format("%Y-%m-%d"))
  }

  pub fn time_global_index(&self) -> String {
    format!("{}{TIME_GLOBAL_SUFFIX}", self.prefix)
  }

  /// Shard names for `[start, end]` relative to the current time.
  pub fn select(
    &self,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
  ) -> Vec<String> {
    self.select_at(start, end, Utc::now())
  }

  /// Shard names for `[start, end]` with `now` as the open end.
  ///
  /// Non-positive bounds count as missing. A window wider than the horizon
  /// keeps its latest `horizon_days`. The time-global shard is always last.
  pub fn select_at(
    &self,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
  ) -> Vec<String> {
    let positive = |dt: Option<DateTime<Utc>>| dt.filter(|d| d.timestamp_millis() > 0);

    let end = positive(end).unwrap_or(now);
    let horizon_start = days_before(end, self.horizon_days);
    let start = positive(start)
      .unwrap_or_else(|| days_before(end, self.default_window_days))
      .max(horizon_start);

    let mut indices = Vec::new();
    let mut day = start.date_naive();
    let last = end.date_naive();
    while day <= last {
      indices.push(self.daily_index(day));
      match day.succ_opt() {
        Some(next) => day = next,
        None => break,
      }
    }

    indices.push(self.time_global_index());
    indices
  }

  /// Reject day counts outside `0..=MAX_WINDOW_DAYS`.
  pub fn validate(&self) -> Result<(), String> {
    for (name, days) in [
      ("horizon_days", self.horizon_days),
      ("default_window_days", self.default_window_days),
    ] {
      if !(0..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(format!("{name} must be between 0 and {MAX_WINDOW_DAYS}, got {days}"));
      }
    }
    Ok(())
  }

  /// The shard a document with the given routing belongs to.
  pub fn target_index(&self, last_seen: DateTime<Utc>, time_global: bool) -> String {
    if time_global {
      self.time_global_index()
    } else {
      self.daily_index(last_seen.date_naive())
    }
  }
}

/// `end` minus `days`, with `days` clamped to `0..=MAX_WINDOW_DAYS`.
fn days_before(end: DateTime<Utc>, days: i64) -> DateTime<Utc> {
  TimeDelta::try_days(days.clamp(0, MAX_WINDOW_DAYS))
    .and_then(|delta| end.checked_sub_signed(delta))
    .unwrap_or(end)
}
