//! ActivityLog entries (audit trail, written in the mutation's transaction).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ActivityId, ListId, ProjectId, TaskId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Create,
    Update,
    StatusUpdate,
    Move,
    Archive,
    Rebalance,
}

/// One audit record.
///
/// Not a correctness dependency: nothing in the core reads these back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub id: ActivityId,
    pub project_id: ProjectId,
    pub actor_id: UserId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: ActivityAction,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ActivityLogEntry {
    pub fn for_task(
        id: ActivityId,
        project_id: ProjectId,
        actor_id: UserId,
        task_id: TaskId,
        action: ActivityAction,
        metadata: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            project_id,
            actor_id,
            entity_type: EntityType::Task,
            entity_id: task_id.as_ulid().to_string(),
            action,
            metadata,
            created_at,
        }
    }

    pub fn for_list(
        id: ActivityId,
        project_id: ProjectId,
        actor_id: UserId,
        list_id: ListId,
        action: ActivityAction,
        metadata: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            project_id,
            actor_id,
            entity_type: EntityType::List,
            entity_id: list_id.as_ulid().to_string(),
            action,
            metadata,
            created_at,
        }
    }
}
