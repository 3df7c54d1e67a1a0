//! TaskService - タスク操作のアプリケーションサービス
//!
//! # 責務
//! - 各 mutation を 1 トランザクションで実行し、失敗時は必ずロールバック
//! - バージョン CAS（競合は再試行せず、最新スナップショット付きで返す）
//! - 位置の競合（一意制約違反）は上限付きで透過的に再試行
//! - コミット後に best-effort でイベントを配信
//!
//! move と並べ替えは `move_task` / `ordering` モジュールにあります。

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::app::config::ServiceConfig;
use crate::app::idempotency::{Idempotent, IdempotentOperation, replay, with_idempotency};
use crate::app::move_task::resolve_gap;
use crate::domain::access::Actor;
use crate::domain::activity::{ActivityAction, ActivityLogEntry};
use crate::domain::errors::BoardError;
use crate::domain::events::{DomainEvent, ProjectEvent};
use crate::domain::idempotency::{IdempotencyKey, IdempotencyScope};
use crate::domain::ids::{ListId, ProjectId, TaskId, UserId};
use crate::domain::status::{TaskStatus, assert_mutable, assert_transition};
use crate::domain::task::{AuthoritativeOrder, NewTask, Task, TaskList, TaskPatch};
use crate::domain::wip::check_wip;
use crate::ports::{
    AccessPolicy, Clock, EventSink, IdGenerator, StoreError, StoreTx, TaskStore, TextSanitizer,
};

/// Distinguishes "field absent" (`None`) from "field set to null" (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub assignee_ids: BTreeSet<UserId>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub wip_override_reason: Option<String>,
}

/// PATCH body. Absent fields are left alone; `null` clears nullable ones.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskInput {
    pub expected_version: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub priority: Option<Option<i32>>,
    #[serde(default)]
    pub assignee_ids: Option<BTreeSet<UserId>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusInput {
    pub expected_version: u64,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveTaskInput {
    pub expected_version: u64,
    pub to_list_id: ListId,
    #[serde(default)]
    pub before_task_id: Option<TaskId>,
    #[serde(default)]
    pub after_task_id: Option<TaskId>,
    #[serde(default)]
    pub wip_override_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveTaskInput {
    pub expected_version: u64,
}

/// Result of `create_task`. `replayed` is set when an idempotency key matched
/// an earlier request; `task` is then the stored original.
///
/// Only `task` is serialized, so a replay answers with the same body as the
/// original request. `replayed` is for logging and status-code choices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Created {
    pub task: Task,
    #[serde(skip)]
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutcome {
    pub task: Task,
    pub authoritative_order: AuthoritativeOrder,
}

/// A version-guarded change prepared from the current task.
pub(crate) struct Mutation {
    pub patch: TaskPatch,
    pub action: ActivityAction,
    pub metadata: serde_json::Value,
}

/// Validated create input.
struct TaskDraft {
    title: String,
    description: Option<String>,
    due_date: Option<NaiveDate>,
    priority: Option<i32>,
    assignees: BTreeSet<UserId>,
    wip_override_reason: Option<String>,
}

pub struct TaskService {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) access: Arc<dyn AccessPolicy>,
    pub(crate) sanitizer: Arc<dyn TextSanitizer>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) config: ServiceConfig,
}

impl TaskService {
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Tasks of a list ordered by (position, id).
    #[instrument(skip_all, fields(list_id = %list_id, user_id = %actor.user_id))]
    pub async fn list_tasks(&self, actor: &Actor, list_id: ListId) -> Result<Vec<Task>, BoardError> {
        let mut tx = self.store.begin().await?;
        let result: Result<Vec<Task>, BoardError> = async {
            load_list(tx.as_mut(), actor, list_id).await?;
            Ok(tx.list_tasks(list_id).await?)
        }
        .await;
        close_read(tx, result).await
    }

    #[instrument(skip_all, fields(task_id = %task_id, user_id = %actor.user_id))]
    pub async fn get_task(&self, actor: &Actor, task_id: TaskId) -> Result<Task, BoardError> {
        let mut tx = self.store.begin().await?;
        let result = load_task(tx.as_mut(), actor, task_id).await;
        close_read(tx, result).await
    }

    /// Append a task at the end of `list_id`.
    ///
    /// With an idempotency key, repeats of the same key by the same user return
    /// the originally created task without creating another one.
    #[instrument(skip_all, fields(list_id = %list_id, user_id = %actor.user_id))]
    pub async fn create_task(
        &self,
        actor: &Actor,
        list_id: ListId,
        input: CreateTaskInput,
    ) -> Result<Created, BoardError> {
        actor.assert_can_write()?;
        actor.assert_board_writable()?;

        let key = input
            .idempotency_key
            .as_deref()
            .map(|raw| {
                IdempotencyKey::new(
                    actor.user_id,
                    IdempotencyScope::create_task(),
                    raw,
                    self.config.idempotency_key_max_len,
                )
            })
            .transpose()?;
        let draft = TaskDraft {
            title: self.clean_title(&input.title)?,
            description: self.clean_description(input.description.as_deref())?,
            due_date: input.due_date,
            priority: input.priority,
            assignees: input.assignee_ids,
            wip_override_reason: input.wip_override_reason,
        };
        self.check_assignees(actor.project_id, &draft.assignees).await?;

        let op = CreateTask {
            service: self,
            actor,
            list_id,
            draft: &draft,
        };
        let attempts = self.config.max_position_retries + 1;
        for attempt in 1..=attempts {
            let mut tx = self.store.begin().await?;
            let result = match &key {
                Some(key) => with_idempotency(tx.as_mut(), key, self.clock.now(), &op).await,
                None => op.execute(tx.as_mut()).await.map(Idempotent::Executed),
            };
            match finish(tx, result).await {
                Ok(Idempotent::Executed(task)) => {
                    info!(task_id = %task.id, attempt, "task created");
                    self.publish(
                        task.project_id,
                        DomainEvent::TaskCreated { task: task.clone() },
                    )
                    .await;
                    return Ok(Created {
                        task,
                        replayed: false,
                    });
                }
                Ok(Idempotent::Replayed(task)) => {
                    debug!(task_id = %task.id, "idempotent replay of create");
                    return Ok(Created {
                        task,
                        replayed: true,
                    });
                }
                // A new row has no version to lose, so a write conflict can
                // only come from rows re-spaced while making room at the tail.
                Err(BoardError::Store(e))
                    if e.is_position_race() || matches!(e, StoreError::WriteConflict { .. }) =>
                {
                    debug!(attempt, error = %e, "position race on list tail, retrying create");
                }
                Err(BoardError::Store(e)) if e.is_idempotency_race() => {
                    if let Some(key) = &key {
                        return self.replay_after_race(key).await;
                    }
                    return Err(e.into());
                }
                Err(e) => return Err(e),
            }
        }
        error!(attempts, "position retry budget exhausted while creating task");
        Err(BoardError::RetryExhausted {
            operation: "createTask",
            attempts,
        })
    }

    /// Field update under version CAS.
    #[instrument(skip_all, fields(task_id = %task_id, user_id = %actor.user_id, expected_version = input.expected_version))]
    pub async fn update_task(
        &self,
        actor: &Actor,
        task_id: TaskId,
        input: UpdateTaskInput,
    ) -> Result<Task, BoardError> {
        actor.assert_can_write()?;
        let patch = self.validate_update(actor, &input).await?;
        let fields = patch.changed_fields();

        let task = self
            .cas_update(actor, task_id, input.expected_version, move |_| {
                Ok(Mutation {
                    patch,
                    action: ActivityAction::Update,
                    metadata: serde_json::json!({ "fields": fields }),
                })
            })
            .await?;

        info!(version = task.version, "task updated");
        self.publish(task.project_id, DomainEvent::TaskUpdated { task: task.clone() })
            .await;
        Ok(task)
    }

    #[instrument(skip_all, fields(task_id = %task_id, user_id = %actor.user_id, to = %input.status))]
    pub async fn update_status(
        &self,
        actor: &Actor,
        task_id: TaskId,
        input: UpdateStatusInput,
    ) -> Result<Task, BoardError> {
        actor.assert_can_write()?;
        let to = input.status;

        let task = self
            .cas_update(actor, task_id, input.expected_version, move |current| {
                assert_transition(current.status, to)?;
                Ok(Mutation {
                    patch: TaskPatch {
                        status: Some(to),
                        ..TaskPatch::default()
                    },
                    action: ActivityAction::StatusUpdate,
                    metadata: serde_json::json!({ "from": current.status, "status": to }),
                })
            })
            .await?;

        info!(version = task.version, "task status updated");
        self.publish(
            task.project_id,
            DomainEvent::TaskStatusUpdated { task: task.clone() },
        )
        .await;
        Ok(task)
    }

    #[instrument(skip_all, fields(task_id = %task_id, user_id = %actor.user_id))]
    pub async fn archive_task(
        &self,
        actor: &Actor,
        task_id: TaskId,
        input: ArchiveTaskInput,
    ) -> Result<Task, BoardError> {
        actor.assert_can_write()?;

        let task = self
            .cas_update(actor, task_id, input.expected_version, |current| {
                assert_transition(current.status, TaskStatus::Archived)?;
                Ok(Mutation {
                    patch: TaskPatch {
                        status: Some(TaskStatus::Archived),
                        ..TaskPatch::default()
                    },
                    action: ActivityAction::Archive,
                    metadata: serde_json::json!({ "from": current.status }),
                })
            })
            .await?;

        info!(version = task.version, "task archived");
        self.publish(task.project_id, DomainEvent::TaskArchived { task: task.clone() })
            .await;
        Ok(task)
    }

    /// Shared shape of every version-guarded field change.
    async fn cas_update<F>(
        &self,
        actor: &Actor,
        task_id: TaskId,
        expected: u64,
        prepare: F,
    ) -> Result<Task, BoardError>
    where
        F: FnOnce(&Task) -> Result<Mutation, BoardError> + Send,
    {
        actor.assert_board_writable()?;

        let mut tx = self.store.begin().await?;
        let result: Result<Task, BoardError> = async {
            let current = load_task(tx.as_mut(), actor, task_id).await?;
            if current.version != expected {
                return Err(BoardError::Conflict {
                    expected,
                    latest: Box::new(current),
                });
            }
            assert_mutable(current.status)?;

            let mut mutation = prepare(&current)?;
            let now = self.clock.now();
            mutation.patch.updated_at = Some(now);

            let Some(updated) = tx
                .update_task_if_version(task_id, expected, &mutation.patch)
                .await?
            else {
                return Err(conflict_in_tx(tx.as_mut(), task_id, expected).await);
            };
            self.record_task_activity(
                tx.as_mut(),
                actor,
                task_id,
                mutation.action,
                mutation.metadata,
            )
            .await?;
            Ok(updated)
        }
        .await;

        match finish(tx, result).await {
            Err(BoardError::Store(StoreError::WriteConflict { task_id: id })) if id == task_id => {
                Err(self.latest_conflict(task_id, expected).await)
            }
            other => other,
        }
    }

    async fn validate_update(
        &self,
        actor: &Actor,
        input: &UpdateTaskInput,
    ) -> Result<TaskPatch, BoardError> {
        let patch = TaskPatch {
            title: input
                .title
                .as_deref()
                .map(|t| self.clean_title(t))
                .transpose()?,
            description: input
                .description
                .as_ref()
                .map(|d| self.clean_description(d.as_deref()))
                .transpose()?,
            due_date: input.due_date,
            priority: input.priority,
            assignees: input.assignee_ids.clone(),
            ..TaskPatch::default()
        };
        if patch.changed_fields().is_empty() {
            return Err(BoardError::validation("body", "at least one field is required"));
        }
        if let Some(assignees) = &patch.assignees {
            self.check_assignees(actor.project_id, assignees).await?;
        }
        Ok(patch)
    }

    fn clean_title(&self, raw: &str) -> Result<String, BoardError> {
        let title = self.sanitizer.plain_text(raw);
        if title.is_empty() {
            return Err(BoardError::validation("title", "Title is required"));
        }
        let max = self.config.title_max_len;
        if title.chars().count() > max {
            return Err(BoardError::validation(
                "title",
                format!("must be at most {max} characters"),
            ));
        }
        Ok(title)
    }

    fn clean_description(&self, raw: Option<&str>) -> Result<Option<String>, BoardError> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let description = self.sanitizer.plain_text(raw);
        if description.is_empty() {
            return Ok(None);
        }
        let max = self.config.description_max_len;
        if description.chars().count() > max {
            return Err(BoardError::validation(
                "description",
                format!("must be at most {max} characters"),
            ));
        }
        Ok(Some(description))
    }

    async fn check_assignees(
        &self,
        project_id: ProjectId,
        assignees: &BTreeSet<UserId>,
    ) -> Result<(), BoardError> {
        if assignees.is_empty() {
            return Ok(());
        }
        let outsiders = self.access.non_members(project_id, assignees).await?;
        if outsiders.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = outsiders.iter().map(ToString::to_string).collect();
        Err(BoardError::validation(
            "assigneeIds",
            format!("not project members: {}", ids.join(", ")),
        ))
    }

    /// Loser of a same-key race: read what the winner stored.
    async fn replay_after_race(&self, key: &IdempotencyKey) -> Result<Created, BoardError> {
        let mut tx = self.store.begin().await?;
        let found = tx.find_idempotency(key).await.map_err(BoardError::from);
        let record = close_read(tx, found).await?;
        match record {
            Some(record) => {
                let task: Task = replay(&record)?;
                debug!(task_id = %task.id, "replaying result of concurrent duplicate create");
                Ok(Created {
                    task,
                    replayed: true,
                })
            }
            None => Err(BoardError::IdempotencyInProgress {
                scope: key.scope.as_str().to_string(),
                key: key.key.clone(),
            }),
        }
    }

    /// Conflict error carrying the committed state, read in a fresh transaction.
    pub(crate) async fn latest_conflict(&self, task_id: TaskId, expected: u64) -> BoardError {
        let tx = self.store.begin().await;
        let mut tx = match tx {
            Ok(tx) => tx,
            Err(e) => return e.into(),
        };
        let found = tx.find_task(task_id).await.map_err(BoardError::from);
        match close_read(tx, found).await {
            Ok(Some(latest)) => BoardError::Conflict {
                expected,
                latest: Box::new(latest),
            },
            Ok(None) => BoardError::not_found("task", task_id),
            Err(e) => e,
        }
    }

    pub(crate) async fn record_task_activity(
        &self,
        tx: &mut dyn StoreTx,
        actor: &Actor,
        task_id: TaskId,
        action: ActivityAction,
        metadata: serde_json::Value,
    ) -> Result<(), BoardError> {
        let entry = ActivityLogEntry::for_task(
            self.ids.generate_activity_id(),
            actor.project_id,
            actor.user_id,
            task_id,
            action,
            metadata,
            self.clock.now(),
        );
        tx.insert_activity(entry).await?;
        Ok(())
    }

    /// Best-effort: a failed publish is logged, never returned.
    pub(crate) async fn publish(&self, project_id: ProjectId, event: DomainEvent) {
        let name = event.name();
        let event = ProjectEvent { project_id, event };
        if let Err(e) = self.events.publish(&event).await {
            warn!(event = name, project_id = %project_id, error = %e, "event publication failed");
        }
    }
}

/// Creation body, run once per attempt (or once per idempotency key).
struct CreateTask<'a> {
    service: &'a TaskService,
    actor: &'a Actor,
    list_id: ListId,
    draft: &'a TaskDraft,
}

#[async_trait]
impl<'a> IdempotentOperation for CreateTask<'a> {
    type Output = Task;

    async fn execute(&self, tx: &mut dyn StoreTx) -> Result<Task, BoardError> {
        let service = self.service;
        let list = load_list(&mut *tx, self.actor, self.list_id).await?;
        if list.archived {
            return Err(BoardError::validation("listId", "list is archived"));
        }

        let active = tx.count_active_tasks(list.id, None).await?;
        let wip = check_wip(
            &list,
            active,
            "listId",
            service.access.can_override_wip(self.actor),
            self.draft.wip_override_reason.as_deref(),
        )?;

        let position = service
            .position_in(&mut *tx, self.actor, list.id, None, |siblings| {
                resolve_gap(siblings, None, None)
            })
            .await?;

        let draft = self.draft;
        let task = Task::new(NewTask {
            id: service.ids.generate_task_id(),
            project_id: list.project_id,
            board_id: list.board_id,
            list_id: list.id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            due_date: draft.due_date,
            priority: draft.priority,
            position,
            created_by_user_id: self.actor.user_id,
            assignees: draft.assignees.clone(),
            now: service.clock.now(),
        });
        tx.insert_task(task.clone()).await?;

        let mut metadata = serde_json::json!({
            "listId": list.id,
            "title": task.title,
            "position": task.position,
        });
        if let Some(wip_override) = wip.override_metadata() {
            info!(list_id = %list.id, wip_override = %wip_override, "WIP limit overridden on create");
            metadata["wipOverride"] = wip_override;
        }
        service
            .record_task_activity(&mut *tx, self.actor, task.id, ActivityAction::Create, metadata)
            .await?;
        Ok(task)
    }
}

/// Commit on success, roll back on error.
pub(crate) async fn finish<T>(
    tx: Box<dyn StoreTx>,
    result: Result<T, BoardError>,
) -> Result<T, BoardError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Close a transaction that only read.
pub(crate) async fn close_read<T>(
    tx: Box<dyn StoreTx>,
    result: Result<T, BoardError>,
) -> Result<T, BoardError> {
    let rolled_back = tx.rollback().await;
    let value = result?;
    rolled_back?;
    Ok(value)
}

/// Task visible to `actor`; tasks of other projects read as missing.
pub(crate) async fn load_task(
    tx: &mut dyn StoreTx,
    actor: &Actor,
    task_id: TaskId,
) -> Result<Task, BoardError> {
    tx.find_task(task_id)
        .await?
        .filter(|t| t.project_id == actor.project_id)
        .ok_or_else(|| BoardError::not_found("task", task_id))
}

pub(crate) async fn load_list(
    tx: &mut dyn StoreTx,
    actor: &Actor,
    list_id: ListId,
) -> Result<TaskList, BoardError> {
    tx.find_list(list_id)
        .await?
        .filter(|l| l.project_id == actor.project_id)
        .ok_or_else(|| BoardError::not_found("list", list_id))
}

/// Zero-rows case of a conditional update: report what is stored now.
pub(crate) async fn conflict_in_tx(
    tx: &mut dyn StoreTx,
    task_id: TaskId,
    expected: u64,
) -> BoardError {
    match tx.find_task(task_id).await {
        Ok(Some(latest)) => BoardError::Conflict {
            expected,
            latest: Box::new(latest),
        },
        Ok(None) => BoardError::not_found("task", task_id),
        Err(e) => e.into(),
    }
}
