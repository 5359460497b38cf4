//! Fact types — the typed, access-controlled assertions of the graph.
//!
//! A Fact binds zero, one or two Objects. Identity fields never change after
//! creation; re-submitting an equivalent Fact only advances
//! `last_seen_timestamp` on the existing row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Access mode ─────────────────────────────────────────────────────────────

/// Visibility policy attached to a Fact.
///
/// The derived `Ord` is the restrictiveness order:
/// `Public < RoleBased < Explicit`.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Default,
  Serialize,
  Deserialize,
)]
pub enum AccessMode {
  Public,
  #[default]
  RoleBased,
  Explicit,
}

impl AccessMode {
  /// Name used in index documents and query fragments.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Public => "Public",
      Self::RoleBased => "RoleBased",
      Self::Explicit => "Explicit",
    }
  }
}

// ─── Flags ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactFlag {
  /// Set by the primary store once any retraction of this Fact is recorded.
  /// Absence means the Fact has never been retracted by anybody.
  RetractedHint,
  /// At least one bound Object is indexed in the time-global shard.
  TimeGlobalIndex,
}

// ─── Binding ─────────────────────────────────────────────────────────────────

/// How many Objects a Fact binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactBinding {
  /// No Objects; only legal for Facts referencing another Fact.
  Meta,
  OneLegged,
  TwoLegged,
}

impl FactBinding {
  pub fn object_count(self) -> u8 {
    match self {
      Self::Meta => 0,
      Self::OneLegged => 1,
      Self::TwoLegged => 2,
    }
  }
}

// ─── Fact ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
  pub fact_id:               Uuid,
  pub type_id:               Uuid,
  pub value:                 Option<String>,
  pub in_reference_to:       Option<Uuid>,
  pub organization_id:       Uuid,
  pub origin_id:             Uuid,
  pub trust:                 f32,
  pub confidence:            f32,
  pub access_mode:           AccessMode,
  /// When the Fact was first recorded; never changes.
  pub timestamp:             DateTime<Utc>,
  /// Advanced every time an equivalent Fact is re-submitted.
  pub last_seen_timestamp:   DateTime<Utc>,
  pub source_object_id:      Option<Uuid>,
  pub destination_object_id: Option<Uuid>,
  pub bidirectional:         bool,
  pub acl:                   Vec<Uuid>,
  pub flags:                 Vec<FactFlag>,
}

impl Fact {
  pub fn binding(&self) -> FactBinding {
    match (self.source_object_id, self.destination_object_id) {
      (Some(_), Some(_)) => FactBinding::TwoLegged,
      (None, None) => FactBinding::Meta,
      _ => FactBinding::OneLegged,
    }
  }

  /// Ids of the bound Objects, source first.
  pub fn bound_object_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
    self.source_object_id.into_iter().chain(self.destination_object_id)
  }

  pub fn has_flag(&self, flag: FactFlag) -> bool { self.flags.contains(&flag) }

  /// Combined score used by the `certainty` search dimension.
  pub fn certainty(&self) -> f32 { self.trust * self.confidence }

  pub fn is_retraction(&self) -> bool {
    self.type_id == crate::object::FactType::RETRACTION_ID
  }

  /// Whether `input` describes the same logical Fact, i.e. re-submitting it
  /// must refresh this row instead of creating a new one.
  pub fn is_equivalent(&self, input: &NewFact) -> bool {
    self.type_id == input.type_id
      && self.value == input.value
      && self.in_reference_to == input.in_reference_to
      && self.organization_id == input.organization_id
      && self.origin_id == input.origin_id
      && self.confidence == input.confidence
      && self.access_mode == input.access_mode
      && self.source_object_id == input.source_object_id
      && self.destination_object_id == input.destination_object_id
      && self.bidirectional == input.bidirectional
  }
}

// ─── NewFact ─────────────────────────────────────────────────────────────────

/// Input to [`crate::store::ObjectFactWriter::record_fact`].
/// Timestamps are always set by the store; they are not accepted from callers.
#[derive(Debug, Clone)]
pub struct NewFact {
  pub type_id:               Uuid,
  pub value:                 Option<String>,
  pub in_reference_to:       Option<Uuid>,
  pub organization_id:       Uuid,
  pub origin_id:             Uuid,
  pub trust:                 f32,
  pub confidence:            f32,
  pub access_mode:           AccessMode,
  pub source_object_id:      Option<Uuid>,
  pub destination_object_id: Option<Uuid>,
  pub bidirectional:         bool,
  pub acl:                   Vec<Uuid>,
}

impl NewFact {
  /// Convenience constructor with all optional fields set to their defaults.
  pub fn new(type_id: Uuid, organization_id: Uuid, origin_id: Uuid) -> Self {
    Self {
      type_id,
      value: None,
      in_reference_to: None,
      organization_id,
      origin_id,
      trust: 0.8,
      confidence: 1.0,
      access_mode: AccessMode::default(),
      source_object_id: None,
      destination_object_id: None,
      bidirectional: false,
      acl: Vec::new(),
    }
  }

  /// Check the binding rules: a Fact without Objects must reference another
  /// Fact, and a bidirectional Fact needs both ends.
  pub fn validate_binding(&self) -> Result<()> {
    let bound = self.source_object_id.is_some() as u8
      + self.destination_object_id.is_some() as u8;
    if bound == 0 && self.in_reference_to.is_none() {
      return Err(Error::InvalidBinding(
        "a fact without bound objects must reference another fact".into(),
      ));
    }
    if self.bidirectional && bound != 2 {
      return Err(Error::InvalidBinding(
        "a bidirectional fact must bind exactly two objects".into(),
      ));
    }
    if bound == 2 && self.source_object_id == self.destination_object_id {
      return Err(Error::InvalidBinding(
        "source and destination must be different objects".into(),
      ));
    }
    Ok(())
  }

  /// Enforce that a derived Fact is at least as restrictive as `referenced`.
  pub fn validate_derived_access(&self, referenced: &Fact) -> Result<()> {
    if self.access_mode < referenced.access_mode {
      return Err(Error::AccessModeTooPermissive {
        fact_id:  referenced.fact_id,
        required: referenced.access_mode,
        given:    self.access_mode,
      });
    }
    Ok(())
  }
}

// ─── Retraction input ────────────────────────────────────────────────────────

/// Options for [`crate::store::ObjectFactWriter::retract`].
#[derive(Debug, Clone)]
pub struct RetractOptions {
  pub organization_id: Uuid,
  pub origin_id:       Uuid,
  /// Defaults to the access mode of the retracted Fact.
  pub access_mode:     Option<AccessMode>,
  pub acl:             Vec<Uuid>,
  pub comment:         Option<String>,
}

impl RetractOptions {
  pub fn new(organization_id: Uuid, origin_id: Uuid) -> Self {
    Self {
      organization_id,
      origin_id,
      access_mode: None,
      acl: Vec::new(),
      comment: None,
    }
  }

  /// Build the Retraction meta-Fact input for `target`.
  pub fn into_new_fact(self, target: &Fact) -> Result<NewFact> {
    let mut input = NewFact::new(
      crate::object::FactType::RETRACTION_ID,
      self.organization_id,
      self.origin_id,
    );
    input.value = self.comment;
    input.in_reference_to = Some(target.fact_id);
    input.access_mode = self.access_mode.unwrap_or(target.access_mode);
    input.acl = self.acl;
    input.validate_derived_access(target)?;
    Ok(input)
  }
}
