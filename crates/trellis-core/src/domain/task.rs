//! Task and list records.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BoardId, ListId, ProjectId, TaskId, UserId};
use super::position::Position;
use super::status::TaskStatus;

/// A card on a board.
///
/// Design:
/// - `version` starts at 1 and moves by exactly one per committed mutation.
/// - `position` is unique within `list_id`.
/// - Fields are only changed through `TaskPatch` so the store can apply the
///   same change under its version guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub board_id: BoardId,
    pub list_id: ListId,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<i32>,
    pub position: Position,
    pub status: TaskStatus,
    pub version: u64,
    pub created_by_user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "assigneeIds")]
    pub assignees: BTreeSet<UserId>,
}

/// Everything needed to insert a new task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub board_id: BoardId,
    pub list_id: ListId,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<i32>,
    pub position: Position,
    pub created_by_user_id: UserId,
    pub assignees: BTreeSet<UserId>,
    pub now: DateTime<Utc>,
}

impl Task {
    pub fn new(new: NewTask) -> Self {
        Self {
            id: new.id,
            project_id: new.project_id,
            board_id: new.board_id,
            list_id: new.list_id,
            title: new.title,
            description: new.description,
            due_date: new.due_date,
            priority: new.priority,
            position: new.position,
            status: TaskStatus::Open,
            version: 1,
            created_by_user_id: new.created_by_user_id,
            created_at: new.now,
            updated_at: new.now,
            assignees: new.assignees,
        }
    }
}

/// Field changes applied by a version-guarded update.
///
/// `None` leaves the field alone; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub priority: Option<Option<i32>>,
    pub status: Option<TaskStatus>,
    pub assignees: Option<BTreeSet<UserId>>,
    pub relocation: Option<Relocation>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// New home of a moved task.
#[derive(Debug, Clone, PartialEq)]
pub struct Relocation {
    pub board_id: BoardId,
    pub list_id: ListId,
    pub position: Position,
}

impl TaskPatch {
    /// Names of the client-visible fields this patch touches (activity metadata).
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.due_date.is_some() {
            fields.push("dueDate");
        }
        if self.priority.is_some() {
            fields.push("priority");
        }
        if self.status.is_some() {
            fields.push("status");
        }
        if self.assignees.is_some() {
            fields.push("assigneeIds");
        }
        if self.relocation.is_some() {
            fields.push("position");
        }
        fields
    }

    /// Apply to `task` and bump its version by one.
    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(assignees) = &self.assignees {
            task.assignees = assignees.clone();
        }
        if let Some(relocation) = &self.relocation {
            task.board_id = relocation.board_id;
            task.list_id = relocation.list_id;
            task.position = relocation.position.clone();
        }
        if let Some(updated_at) = self.updated_at {
            task.updated_at = updated_at;
        }
        task.version += 1;
    }
}

/// A column on a board.
///
/// `project_id` is denormalized from the board so moves can be confined to one
/// project without a round trip to the ownership resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    pub id: ListId,
    pub project_id: ProjectId,
    pub board_id: BoardId,
    pub name: String,
    pub archived: bool,
    /// Maximum number of non-archived tasks; `None` means unlimited.
    pub wip_limit: Option<u32>,
}

/// One row of an authoritative order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEntry {
    pub task_id: TaskId,
    pub position: Position,
}

/// The server's final ordering of a list after a move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoritativeOrder {
    pub list_id: ListId,
    pub tasks: Vec<OrderEntry>,
}

impl AuthoritativeOrder {
    /// Build from tasks already sorted by (position, id).
    pub fn from_sorted(list_id: ListId, tasks: &[Task]) -> Self {
        Self {
            list_id,
            tasks: tasks
                .iter()
                .map(|t| OrderEntry {
                    task_id: t.id,
                    position: t.position.clone(),
                })
                .collect(),
        }
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|e| e.task_id).collect()
    }
}

/// Sort key used everywhere a list is read in order.
pub fn sort_by_position(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| a.position.cmp(&b.position).then(a.id.cmp(&b.id)));
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use ulid::Ulid;

    pub fn task_in(list: &TaskList, position: &str) -> Task {
        Task::new(NewTask {
            id: TaskId::from_ulid(Ulid::new()),
            project_id: list.project_id,
            board_id: list.board_id,
            list_id: list.id,
            title: format!("task at {position}"),
            description: None,
            due_date: None,
            priority: None,
            position: Position::parse(position).unwrap(),
            created_by_user_id: UserId::from_ulid(Ulid::new()),
            assignees: BTreeSet::new(),
            now: Utc::now(),
        })
    }

    pub fn list(wip_limit: Option<u32>) -> TaskList {
        TaskList {
            id: ListId::from_ulid(Ulid::new()),
            project_id: ProjectId::from_ulid(Ulid::new()),
            board_id: BoardId::from_ulid(Ulid::new()),
            name: "Doing".to_string(),
            archived: false,
            wip_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{list, task_in};
    use super::*;
    use ulid::Ulid;

    #[test]
    fn new_task_starts_open_at_version_one() {
        let task = task_in(&list(None), "V");
        assert_eq!(task.status, TaskStatus::Open);
        assert_eq!(task.version, 1);
    }

    #[test]
    fn patch_applies_fields_and_bumps_version_once() {
        let mut task = task_in(&list(None), "V");
        let patch = TaskPatch {
            title: Some("renamed".to_string()),
            description: Some(None),
            priority: Some(Some(2)),
            ..TaskPatch::default()
        };

        patch.apply(&mut task);

        assert_eq!(task.title, "renamed");
        assert_eq!(task.description, None);
        assert_eq!(task.priority, Some(2));
        assert_eq!(task.version, 2);
        assert_eq!(patch.changed_fields(), vec!["title", "description", "priority"]);
    }

    #[test]
    fn relocation_moves_list_and_position() {
        let from = list(None);
        let to = list(None);
        let mut task = task_in(&from, "V");

        TaskPatch {
            relocation: Some(Relocation {
                board_id: to.board_id,
                list_id: to.id,
                position: Position::parse("g").unwrap(),
            }),
            ..TaskPatch::default()
        }
        .apply(&mut task);

        assert_eq!(task.list_id, to.id);
        assert_eq!(task.position.as_str(), "g");
    }

    #[test]
    fn sort_breaks_ties_by_id() {
        let l = list(None);
        let mut a = task_in(&l, "m");
        let mut b = task_in(&l, "m");
        a.id = TaskId::from_ulid(Ulid::from_parts(1, 1));
        b.id = TaskId::from_ulid(Ulid::from_parts(1, 2));
        let c = task_in(&l, "a");

        let mut tasks = vec![b.clone(), a.clone(), c.clone()];
        sort_by_position(&mut tasks);

        let ids: Vec<_> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![c.id, a.id, b.id]);
    }

    #[test]
    fn task_serializes_with_camel_case_wire_names() {
        let task = task_in(&list(None), "V");
        let v = serde_json::to_value(&task).unwrap();
        assert_eq!(v["position"], "V");
        assert_eq!(v["status"], "open");
        assert!(v["assigneeIds"].is_array());
        assert!(v.get("listId").is_some());
    }
}
