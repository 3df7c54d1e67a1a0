//! Events - ドメインイベント
//!
//! コミット済みの変更だけがイベントになります。配信はトランザクションの外で
//! best-effort に行われ、失敗しても変更は巻き戻りません。

use serde::{Deserialize, Serialize};

use super::ids::{BoardId, ListId, ProjectId, TaskId};
use super::task::{AuthoritativeOrder, Task};

/// Published per project to realtime subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DomainEvent {
    TaskCreated {
        task: Task,
    },
    TaskUpdated {
        task: Task,
    },
    TaskStatusUpdated {
        task: Task,
    },
    #[serde(rename_all = "camelCase")]
    TaskMoved {
        task_id: TaskId,
        from_list_id: ListId,
        to_list_id: ListId,
        to_board_id: BoardId,
        task: Task,
        authoritative_order: AuthoritativeOrder,
    },
    TaskArchived {
        task: Task,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::TaskCreated { .. } => "TaskCreated",
            DomainEvent::TaskUpdated { .. } => "TaskUpdated",
            DomainEvent::TaskStatusUpdated { .. } => "TaskStatusUpdated",
            DomainEvent::TaskMoved { .. } => "TaskMoved",
            DomainEvent::TaskArchived { .. } => "TaskArchived",
        }
    }

    pub fn task(&self) -> &Task {
        match self {
            DomainEvent::TaskCreated { task }
            | DomainEvent::TaskUpdated { task }
            | DomainEvent::TaskStatusUpdated { task }
            | DomainEvent::TaskMoved { task, .. }
            | DomainEvent::TaskArchived { task } => task,
        }
    }

    pub fn moved(task: Task, from_list_id: ListId, authoritative_order: AuthoritativeOrder) -> Self {
        DomainEvent::TaskMoved {
            task_id: task.id,
            from_list_id,
            to_list_id: task.list_id,
            to_board_id: task.board_id,
            task,
            authoritative_order,
        }
    }
}

/// Event plus the project channel it goes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEvent {
    pub project_id: ProjectId,
    pub event: DomainEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::fixtures::{list, task_in};

    #[test]
    fn moved_event_carries_destination_and_order() {
        let dest = list(None);
        let task = task_in(&dest, "m");
        let order = AuthoritativeOrder::from_sorted(dest.id, std::slice::from_ref(&task));

        let event = DomainEvent::moved(task.clone(), list(None).id, order);
        let v = serde_json::to_value(&event).unwrap();

        assert_eq!(v["type"], "TaskMoved");
        assert_eq!(v["payload"]["toListId"], serde_json::to_value(dest.id).unwrap());
        assert_eq!(
            v["payload"]["authoritativeOrder"]["tasks"][0]["taskId"],
            serde_json::to_value(task.id).unwrap()
        );
        assert_eq!(event.task().id, task.id);
    }
}
