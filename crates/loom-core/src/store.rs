//! The primary store traits.
//!
//! The primary store owns Object/Fact identity and is the system of record.
//! The search and traversal subsystems only ever read through
//! [`ObjectFactStore`]; [`ObjectFactWriter`] is used by ingestion and tests.

use std::future::Future;

use uuid::Uuid;

use crate::{
  fact::{Fact, NewFact, RetractOptions},
  object::{FactType, Object, ObjectType},
};

// ─── Reads ───────────────────────────────────────────────────────────────────

/// Read-only view of the primary store.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait ObjectFactStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Retrieve an Object by id. Returns `None` if not found.
  fn get_object(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Object>, Self::Error>> + Send + '_;

  /// Retrieve an Object by its identity `(type, value)`.
  fn get_object_by_value<'a>(
    &'a self,
    type_id: Uuid,
    value: &'a str,
  ) -> impl Future<Output = Result<Option<Object>, Self::Error>> + Send + 'a;

  fn get_object_type(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ObjectType>, Self::Error>> + Send + '_;

  fn get_fact_type(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<FactType>, Self::Error>> + Send + '_;

  /// Retrieve a Fact by id. Returns `None` if not found.
  fn get_fact(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Fact>, Self::Error>> + Send + '_;

  /// All Retraction-typed Facts whose `in_reference_to` is `fact_id`,
  /// regardless of who may read them.
  fn find_retractions_of(
    &self,
    fact_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Fact>, Self::Error>> + Send + '_;

  /// All Facts binding `object_id` as source or destination, regardless of
  /// who may read them.
  fn get_facts_bound_to(
    &self,
    object_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Fact>, Self::Error>> + Send + '_;
}

// ─── Writes ──────────────────────────────────────────────────────────────────

/// Write side of the primary store. Writes are append-only except for the
/// refresh of `last_seen_timestamp`, ACL grants and the retracted hint.
pub trait ObjectFactWriter: ObjectFactStore {
  fn add_object_type(
    &self,
    object_type: ObjectType,
  ) -> impl Future<Output = Result<ObjectType, Self::Error>> + Send + '_;

  fn add_fact_type(
    &self,
    fact_type: FactType,
  ) -> impl Future<Output = Result<FactType, Self::Error>> + Send + '_;

  fn get_fact_type_by_name<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<FactType>, Self::Error>> + Send + 'a;

  /// Return the Object identified by `(type_id, value)`, creating it on
  /// first reference.
  fn resolve_object(
    &self,
    type_id: Uuid,
    value: String,
  ) -> impl Future<Output = Result<Object, Self::Error>> + Send + '_;

  /// Record a Fact. If an equivalent Fact exists its `last_seen_timestamp` is
  /// advanced and the existing row is returned; otherwise a new Fact is
  /// created.
  fn record_fact(
    &self,
    input: NewFact,
  ) -> impl Future<Output = Result<Fact, Self::Error>> + Send + '_;

  /// Record a Retraction of `fact_id` and set its retracted hint.
  fn retract(
    &self,
    fact_id: Uuid,
    options: RetractOptions,
  ) -> impl Future<Output = Result<Fact, Self::Error>> + Send + '_;

  /// Add `subject_id` to the ACL of `fact_id`. Idempotent.
  fn grant_access(
    &self,
    fact_id: Uuid,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Fact, Self::Error>> + Send + '_;

  /// All Facts whose `in_reference_to` is `fact_id`.
  fn find_meta_facts(
    &self,
    fact_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Fact>, Self::Error>> + Send + '_;
}
