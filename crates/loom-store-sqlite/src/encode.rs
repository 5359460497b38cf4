//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. ACLs and flags are stored
//! as compact JSON arrays. UUIDs are stored as hyphenated lowercase strings.

use chrono::{DateTime, Utc};
use loom_core::{
  fact::{AccessMode, Fact, FactFlag},
  object::{FactType, IndexOption, Object, ObjectType},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── AccessMode ───────────────────────────────────────────────────────────────

pub fn encode_access_mode(m: AccessMode) -> &'static str {
  match m {
    AccessMode::Public => "public",
    AccessMode::RoleBased => "role_based",
    AccessMode::Explicit => "explicit",
  }
}

pub fn decode_access_mode(s: &str) -> Result<AccessMode> {
  match s {
    "public" => Ok(AccessMode::Public),
    "role_based" => Ok(AccessMode::RoleBased),
    "explicit" => Ok(AccessMode::Explicit),
    other => Err(Error::UnknownEncoding {
      kind:  "access mode",
      value: other.to_owned(),
    }),
  }
}

// ─── IndexOption ──────────────────────────────────────────────────────────────

pub fn encode_index_option(o: IndexOption) -> &'static str {
  match o {
    IndexOption::Daily => "daily",
    IndexOption::TimeGlobal => "time_global",
  }
}

pub fn decode_index_option(s: &str) -> Result<IndexOption> {
  match s {
    "daily" => Ok(IndexOption::Daily),
    "time_global" => Ok(IndexOption::TimeGlobal),
    other => Err(Error::UnknownEncoding {
      kind:  "index option",
      value: other.to_owned(),
    }),
  }
}

// ─── ACL & flags ──────────────────────────────────────────────────────────────

pub fn encode_acl(acl: &[Uuid]) -> Result<String> {
  Ok(serde_json::to_string(acl)?)
}

pub fn encode_flags(flags: &[FactFlag]) -> Result<String> {
  Ok(serde_json::to_string(flags)?)
}

// ─── Raw row types ────────────────────────────────────────────────────────────

/// Column list shared by every query returning [`RawFact`] rows.
pub const FACT_COLUMNS: &str = "fact_id, type_id, value, in_reference_to, \
  organization_id, origin_id, trust, confidence, access_mode, timestamp, \
  last_seen_timestamp, source_object_id, destination_object_id, \
  bidirectional, acl, flags";

/// Intermediate representation of a `facts` row before decoding.
pub struct RawFact {
  pub fact_id:               String,
  pub type_id:               String,
  pub value:                 Option<String>,
  pub in_reference_to:       Option<String>,
  pub organization_id:       String,
  pub origin_id:             String,
  pub trust:                 f64,
  pub confidence:            f64,
  pub access_mode:           String,
  pub timestamp:             String,
  pub last_seen_timestamp:   String,
  pub source_object_id:      Option<String>,
  pub destination_object_id: Option<String>,
  pub bidirectional:         bool,
  pub acl:                   String,
  pub flags:                 String,
}

impl RawFact {
  /// Read a row selected with [`FACT_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      fact_id:               row.get(0)?,
      type_id:               row.get(1)?,
      value:                 row.get(2)?,
      in_reference_to:       row.get(3)?,
      organization_id:       row.get(4)?,
      origin_id:             row.get(5)?,
      trust:                 row.get(6)?,
      confidence:            row.get(7)?,
      access_mode:           row.get(8)?,
      timestamp:             row.get(9)?,
      last_seen_timestamp:   row.get(10)?,
      source_object_id:      row.get(11)?,
      destination_object_id: row.get(12)?,
      bidirectional:         row.get(13)?,
      acl:                   row.get(14)?,
      flags:                 row.get(15)?,
    })
  }

  pub fn into_fact(self) -> Result<Fact> {
    Ok(Fact {
      fact_id:               decode_uuid(&self.fact_id)?,
      type_id:               decode_uuid(&self.type_id)?,
      value:                 self.value,
      in_reference_to:       decode_opt_uuid(self.in_reference_to)?,
      organization_id:       decode_uuid(&self.organization_id)?,
      origin_id:             decode_uuid(&self.origin_id)?,
      trust:                 self.trust as f32,
      confidence:            self.confidence as f32,
      access_mode:           decode_access_mode(&self.access_mode)?,
      timestamp:             decode_dt(&self.timestamp)?,
      last_seen_timestamp:   decode_dt(&self.last_seen_timestamp)?,
      source_object_id:      decode_opt_uuid(self.source_object_id)?,
      destination_object_id: decode_opt_uuid(self.destination_object_id)?,
      bidirectional:         self.bidirectional,
      acl:                   serde_json::from_str(&self.acl)?,
      flags:                 serde_json::from_str(&self.flags)?,
    })
  }
}

pub struct RawObject {
  pub object_id: String,
  pub type_id:   String,
  pub value:     String,
}

impl RawObject {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      object_id: row.get(0)?,
      type_id:   row.get(1)?,
      value:     row.get(2)?,
    })
  }

  pub fn into_object(self) -> Result<Object> {
    Ok(Object {
      object_id: decode_uuid(&self.object_id)?,
      type_id:   decode_uuid(&self.type_id)?,
      value:     self.value,
    })
  }
}

pub struct RawObjectType {
  pub type_id:      String,
  pub name:         String,
  pub index_option: String,
}

impl RawObjectType {
  pub fn into_object_type(self) -> Result<ObjectType> {
    Ok(ObjectType {
      id:           decode_uuid(&self.type_id)?,
      name:         self.name,
      index_option: decode_index_option(&self.index_option)?,
    })
  }
}

pub fn decode_fact_type(type_id: &str, name: String) -> Result<FactType> {
  Ok(FactType { id: decode_uuid(type_id)?, name })
}
