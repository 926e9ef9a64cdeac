#![forbid(unsafe_code)]

//! Role sets for the administrative surface.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::{NodeId, Role};
use crate::errors::{Result, RewardError};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Roles {
    members: BTreeMap<Role, BTreeSet<NodeId>>,
}

impl Roles {
    pub fn with_admin(admin: NodeId) -> Self {
        let mut r = Self::default();
        r.grant(Role::Admin, admin);
        r
    }

    #[inline]
    pub fn has(&self, role: Role, who: &NodeId) -> bool {
        self.members.get(&role).map(|s| s.contains(who)).unwrap_or(false)
    }

    pub fn require(&self, role: Role, who: &NodeId) -> Result<()> {
        if self.has(role, who) {
            Ok(())
        } else {
            Err(RewardError::Unauthorized(role))
        }
    }

    /// Returns false if already granted.
    pub fn grant(&mut self, role: Role, who: NodeId) -> bool {
        self.members.entry(role).or_default().insert(who)
    }

    /// Returns false if not held. The last admin cannot be revoked.
    pub fn revoke(&mut self, role: Role, who: &NodeId) -> Result<bool> {
        let Some(set) = self.members.get_mut(&role) else { return Ok(false) };
        if role == Role::Admin && set.len() == 1 && set.contains(who) {
            return Err(RewardError::InvalidInput("cannot revoke the last admin"));
        }
        Ok(set.remove(who))
    }
}
