//! StaticAccessPolicy - 固定のメンバー表による AccessPolicy

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::access::{Actor, ProjectRole};
use crate::domain::ids::{ProjectId, UserId};
use crate::ports::access::AccessPolicy;
use crate::ports::store::StoreError;

/// Membership table held in memory.
///
/// Owners and admins may override WIP limits.
#[derive(Debug, Default)]
pub struct StaticAccessPolicy {
    members: RwLock<HashMap<ProjectId, BTreeSet<UserId>>>,
}

impl StaticAccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, project_id: ProjectId, user_id: UserId) {
        self.members
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(project_id)
            .or_default()
            .insert(user_id);
    }
}

#[async_trait]
impl AccessPolicy for StaticAccessPolicy {
    fn can_override_wip(&self, actor: &Actor) -> bool {
        matches!(actor.role, ProjectRole::Owner | ProjectRole::Admin)
    }

    async fn non_members(
        &self,
        project_id: ProjectId,
        users: &BTreeSet<UserId>,
    ) -> Result<Vec<UserId>, StoreError> {
        let members = self
            .members
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let known = members.get(&project_id);
        Ok(users
            .iter()
            .filter(|u| !known.is_some_and(|m| m.contains(u)))
            .copied()
            .collect())
    }
}
