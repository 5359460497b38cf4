//! [`SqliteStore`] — the SQLite implementation of the primary store traits.

use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use loom_core::{
  fact::{AccessMode, Fact, FactFlag, NewFact, RetractOptions},
  object::{FactType, IndexOption, Object, ObjectType},
  store::{ObjectFactStore, ObjectFactWriter},
};

use crate::{
  encode::{
    decode_fact_type, encode_access_mode, encode_acl, encode_dt, encode_flags,
    encode_index_option, encode_uuid, RawFact, RawObject, RawObjectType,
    FACT_COLUMNS,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Loom primary store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    let retraction = FactType::retraction();
    let id_str     = encode_uuid(retraction.id);
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(SCHEMA)?;
        conn.execute(
          "INSERT OR IGNORE INTO fact_types (type_id, name) VALUES (?1, ?2)",
          rusqlite::params![id_str, retraction.name],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run a `SELECT` over the facts table with a single-parameter `WHERE`.
  async fn select_facts(
    &self,
    where_clause: &'static str,
    param: String,
  ) -> Result<Vec<Fact>> {
    let raws: Vec<RawFact> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {FACT_COLUMNS} FROM facts WHERE {where_clause}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![param], RawFact::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFact::into_fact).collect()
  }

  async fn require_fact(&self, id: Uuid) -> Result<Fact> {
    self
      .get_fact(id)
      .await?
      .ok_or(Error::Core(loom_core::Error::FactNotFound(id)))
  }

  /// Whether any Object bound by `input` is of a time-global type.
  async fn binds_time_global_object(&self, input: &NewFact) -> Result<bool> {
    for object_id in input.source_object_id.into_iter().chain(input.destination_object_id) {
      let object = self
        .get_object(object_id)
        .await?
        .ok_or(Error::Core(loom_core::Error::ObjectNotFound(object_id)))?;
      let object_type = self
        .get_object_type(object.type_id)
        .await?
        .ok_or(Error::Core(loom_core::Error::ObjectTypeNotFound(object.type_id)))?;
      if object_type.index_option == IndexOption::TimeGlobal {
        return Ok(true);
      }
    }
    Ok(false)
  }

  async fn update_flags(&self, fact_id: Uuid, flags: &[FactFlag]) -> Result<()> {
    let id_str    = encode_uuid(fact_id);
    let flags_str = encode_flags(flags)?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE facts SET flags = ?1 WHERE fact_id = ?2",
          rusqlite::params![flags_str, id_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Reads ───────────────────────────────────────────────────────────────────

impl ObjectFactStore for SqliteStore {
  type Error = Error;

  async fn get_object(&self, id: Uuid) -> Result<Option<Object>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawObject> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT object_id, type_id, value FROM objects WHERE object_id = ?1",
            rusqlite::params![id_str],
            RawObject::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawObject::into_object).transpose()
  }

  async fn get_object_by_value(
    &self,
    type_id: Uuid,
    value: &str,
  ) -> Result<Option<Object>> {
    let type_str  = encode_uuid(type_id);
    let value_str = value.to_owned();

    let raw: Option<RawObject> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT object_id, type_id, value FROM objects
             WHERE type_id = ?1 AND value = ?2",
            rusqlite::params![type_str, value_str],
            RawObject::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawObject::into_object).transpose()
  }

  async fn get_object_type(&self, id: Uuid) -> Result<Option<ObjectType>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawObjectType> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT type_id, name, index_option FROM object_types WHERE type_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawObjectType {
                type_id:      row.get(0)?,
                name:         row.get(1)?,
                index_option: row.get(2)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawObjectType::into_object_type).transpose()
  }

  async fn get_fact_type(&self, id: Uuid) -> Result<Option<FactType>> {
    let id_str = encode_uuid(id);

    let raw: Option<(String, String)> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT type_id, name FROM fact_types WHERE type_id = ?1",
            rusqlite::params![id_str],
            |row| Ok((row.get(0)?, row.get(1)?)),
          )
          .optional()?)
      })
      .await?;

    raw.map(|(id, name)| decode_fact_type(&id, name)).transpose()
  }

  async fn get_fact(&self, id: Uuid) -> Result<Option<Fact>> {
    Ok(self.select_facts("fact_id = ?1", encode_uuid(id)).await?.pop())
  }

  async fn find_retractions_of(&self, fact_id: Uuid) -> Result<Vec<Fact>> {
    let mut facts = self
      .select_facts("in_reference_to = ?1", encode_uuid(fact_id))
      .await?;
    facts.retain(Fact::is_retraction);
    Ok(facts)
  }

  async fn get_facts_bound_to(&self, object_id: Uuid) -> Result<Vec<Fact>> {
    self
      .select_facts(
        "source_object_id = ?1 OR destination_object_id = ?1",
        encode_uuid(object_id),
      )
      .await
  }
}

// ─── Writes ──────────────────────────────────────────────────────────────────

impl ObjectFactWriter for SqliteStore {
  async fn add_object_type(&self, object_type: ObjectType) -> Result<ObjectType> {
    let id_str     = encode_uuid(object_type.id);
    let name       = object_type.name.clone();
    let option_str = encode_index_option(object_type.index_option).to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO object_types (type_id, name, index_option) VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, name, option_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(object_type)
  }

  async fn add_fact_type(&self, fact_type: FactType) -> Result<FactType> {
    let id_str = encode_uuid(fact_type.id);
    let name   = fact_type.name.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO fact_types (type_id, name) VALUES (?1, ?2)",
          rusqlite::params![id_str, name],
        )?;
        Ok(())
      })
      .await?;

    Ok(fact_type)
  }

  async fn get_fact_type_by_name(&self, name: &str) -> Result<Option<FactType>> {
    let name = name.to_owned();

    let raw: Option<(String, String)> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT type_id, name FROM fact_types WHERE name = ?1",
            rusqlite::params![name],
            |row| Ok((row.get(0)?, row.get(1)?)),
          )
          .optional()?)
      })
      .await?;

    raw.map(|(id, name)| decode_fact_type(&id, name)).transpose()
  }

  async fn resolve_object(&self, type_id: Uuid, value: String) -> Result<Object> {
    if self.get_object_type(type_id).await?.is_none() {
      return Err(Error::Core(loom_core::Error::ObjectTypeNotFound(type_id)));
    }

    let new_id_str = encode_uuid(Uuid::new_v4());
    let type_str   = encode_uuid(type_id);

    let raw: RawObject = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO objects (object_id, type_id, value) VALUES (?1, ?2, ?3)",
          rusqlite::params![new_id_str, type_str, value],
        )?;
        Ok(conn.query_row(
          "SELECT object_id, type_id, value FROM objects WHERE type_id = ?1 AND value = ?2",
          rusqlite::params![type_str, value],
          RawObject::from_row,
        )?)
      })
      .await?;

    raw.into_object()
  }

  async fn record_fact(&self, input: NewFact) -> Result<Fact> {
    input.validate_binding()?;
    if self.get_fact_type(input.type_id).await?.is_none() {
      return Err(Error::Core(loom_core::Error::FactTypeNotFound(input.type_id)));
    }
    if let Some(referenced_id) = input.in_reference_to {
      let referenced = self.require_fact(referenced_id).await?;
      input.validate_derived_access(&referenced)?;
    }

    let mut flags = Vec::new();
    if self.binds_time_global_object(&input).await? {
      flags.push(FactFlag::TimeGlobalIndex);
    }

    let new_id_str  = encode_uuid(Uuid::new_v4());
    let now         = Utc::now();
    let type_str    = encode_uuid(input.type_id);
    let ref_str     = input.in_reference_to.map(encode_uuid);
    let org_str     = encode_uuid(input.organization_id);
    let origin_str  = encode_uuid(input.origin_id);
    let mode_str    = encode_access_mode(input.access_mode).to_owned();
    let source_str  = input.source_object_id.map(encode_uuid);
    let dest_str    = input.destination_object_id.map(encode_uuid);
    let acl_str     = encode_acl(&input.acl)?;
    let flags_str   = encode_flags(&flags)?;
    let value       = input.value;
    let trust       = f64::from(input.trust);
    let confidence  = f64::from(input.confidence);
    let bidi        = input.bidirectional;

    let fact_id_str: String = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let existing: Option<(String, String)> = tx
          .query_row(
            "SELECT fact_id, last_seen_timestamp FROM facts
             WHERE type_id = ?1
               AND value IS ?2
               AND in_reference_to IS ?3
               AND organization_id = ?4
               AND origin_id = ?5
               AND confidence = ?6
               AND access_mode = ?7
               AND source_object_id IS ?8
               AND destination_object_id IS ?9
               AND bidirectional = ?10
             LIMIT 1",
            rusqlite::params![
              type_str, value, ref_str, org_str, origin_str, confidence,
              mode_str, source_str, dest_str, bidi,
            ],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;

        let fact_id = match existing {
          Some((fact_id, last_seen)) => {
            // Refresh: lastSeen must strictly advance even within one tick.
            let previous = DateTime::parse_from_rfc3339(&last_seen)
              .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?
              .with_timezone(&Utc);
            let refreshed = now.max(previous + TimeDelta::milliseconds(1));
            tx.execute(
              "UPDATE facts SET last_seen_timestamp = ?1 WHERE fact_id = ?2",
              rusqlite::params![encode_dt(refreshed), fact_id],
            )?;
            fact_id
          }
          None => {
            let now_str = encode_dt(now);
            tx.execute(
              &format!(
                "INSERT INTO facts ({FACT_COLUMNS}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
              ),
              rusqlite::params![
                new_id_str, type_str, value, ref_str, org_str, origin_str,
                trust, confidence, mode_str, now_str, now_str, source_str,
                dest_str, bidi, acl_str, flags_str,
              ],
            )?;
            new_id_str
          }
        };

        tx.commit()?;
        Ok(fact_id)
      })
      .await?;

    let fact_id = crate::encode::decode_uuid(&fact_id_str)?;
    self.require_fact(fact_id).await
  }

  async fn retract(&self, fact_id: Uuid, options: RetractOptions) -> Result<Fact> {
    let target     = self.require_fact(fact_id).await?;
    let retraction = self.record_fact(options.into_new_fact(&target)?).await?;

    if !target.has_flag(FactFlag::RetractedHint) {
      let mut flags = target.flags.clone();
      flags.push(FactFlag::RetractedHint);
      self.update_flags(fact_id, &flags).await?;
    }

    tracing::debug!(%fact_id, retraction_id = %retraction.fact_id, "recorded retraction");
    Ok(retraction)
  }

  async fn grant_access(&self, fact_id: Uuid, subject_id: Uuid) -> Result<Fact> {
    let mut fact = self.require_fact(fact_id).await?;
    if fact.access_mode == AccessMode::Public {
      return Err(Error::Core(loom_core::Error::PublicFact(fact_id)));
    }
    if fact.acl.contains(&subject_id) {
      return Ok(fact);
    }

    fact.acl.push(subject_id);
    let id_str  = encode_uuid(fact_id);
    let acl_str = encode_acl(&fact.acl)?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE facts SET acl = ?1 WHERE fact_id = ?2",
          rusqlite::params![acl_str, id_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(fact)
  }

  async fn find_meta_facts(&self, fact_id: Uuid) -> Result<Vec<Fact>> {
    self
      .select_facts("in_reference_to = ?1", encode_uuid(fact_id))
      .await
  }
}
