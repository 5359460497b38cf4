//! The access-control contract shared by search and traversal.
//!
//! [`can_read`] is the in-process form of the predicate. The search crate
//! renders the same three branches as a query fragment; both forms must stay
//! in lock-step because they gate all data exposure.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fact::{AccessMode, Fact};

/// Who is asking: the caller's identities (user plus groups) and the
/// Organizations the caller may read on behalf of.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessScope {
  pub current_user_identities:    BTreeSet<Uuid>,
  pub available_organization_ids: BTreeSet<Uuid>,
}

impl AccessScope {
  pub fn new(
    identities: impl IntoIterator<Item = Uuid>,
    organizations: impl IntoIterator<Item = Uuid>,
  ) -> Self {
    Self {
      current_user_identities:    identities.into_iter().collect(),
      available_organization_ids: organizations.into_iter().collect(),
    }
  }

  pub fn can_read_fact(&self, fact: &Fact) -> bool {
    can_read(fact.access_mode, &fact.acl, fact.organization_id, self)
  }

  fn in_acl(&self, acl: &[Uuid]) -> bool {
    acl.iter().any(|id| self.current_user_identities.contains(id))
  }
}

/// Public is always readable; Explicit requires ACL membership; RoleBased
/// requires ACL membership or access to the owning Organization.
pub fn can_read(
  access_mode: AccessMode,
  acl: &[Uuid],
  organization_id: Uuid,
  scope: &AccessScope,
) -> bool {
  match access_mode {
    AccessMode::Public => true,
    AccessMode::Explicit => scope.in_acl(acl),
    AccessMode::RoleBased => {
      scope.in_acl(acl)
        || scope.available_organization_ids.contains(&organization_id)
    }
  }
}
