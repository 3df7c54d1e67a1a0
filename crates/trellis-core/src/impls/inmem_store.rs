//! InMemoryTaskStore - 開発・テスト用の正本
//!
//! # 実装詳細
//! - `begin()` で live 状態を丸ごと複製し、トランザクションはその複製に書く
//!   （スナップショット分離）
//! - 書き込みは操作ログとしても記録し、`commit()` で live 状態に再適用する
//! - 再適用時に一意制約とバージョンを検査し、違反があればコミット全体を捨てる
//!
//! 同じ行を先にコミットしたトランザクションがあれば後発は `WriteConflict`、
//! 同じ (listId, position) や冪等キーを先に取られていれば `UniqueViolation`
//! になります。
//!
//! # Ordering epoch
//! 並べ直し（`set_positions`）はリストごとの epoch を 1 進めます。位置を書く
//! 操作は読んだ時点の epoch を記録し、コミット時に一致しなければ
//! `OrderingChanged` です。並べ直し自身も、読んだ時点の並び（id と位置）が
//! コミット時にも同じであることを要求します。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::activity::ActivityLogEntry;
use crate::domain::ids::{ListId, TaskId};
use crate::domain::idempotency::{IdempotencyKey, IdempotencyRecord};
use crate::domain::position::Position;
use crate::domain::task::{sort_by_position, Task, TaskList, TaskPatch};
use crate::ports::store::{StoreError, StoreTx, TaskStore, UniqueConstraint};

#[derive(Debug, Clone, Default)]
struct State {
    tasks: HashMap<TaskId, Task>,
    lists: HashMap<ListId, TaskList>,
    idempotency: HashMap<IdempotencyKey, IdempotencyRecord>,
    activity: Vec<ActivityLogEntry>,
    epochs: HashMap<ListId, u64>,
}

/// A logged write, replayed against the live state on commit.
#[derive(Debug, Clone)]
enum Op {
    InsertTask {
        task: Task,
        epoch: u64,
    },
    UpdateTask {
        id: TaskId,
        expected: u64,
        patch: TaskPatch,
        /// Destination epoch when the patch relocates the task.
        epoch: Option<u64>,
    },
    SetPositions {
        list_id: ListId,
        positions: Vec<(TaskId, Position)>,
        layout: Vec<(TaskId, Position)>,
        epoch: u64,
    },
    InsertActivity(ActivityLogEntry),
    InsertIdempotency(IdempotencyRecord),
    CompleteIdempotency {
        key: IdempotencyKey,
        result: serde_json::Value,
        now: DateTime<Utc>,
    },
}

impl State {
    fn tasks_in(&self, list_id: ListId) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.list_id == list_id)
            .cloned()
            .collect();
        sort_by_position(&mut tasks);
        tasks
    }

    fn epoch(&self, list_id: ListId) -> u64 {
        self.epochs.get(&list_id).copied().unwrap_or(0)
    }

    /// Ids and keys of `list_id` in order.
    fn layout(&self, list_id: ListId) -> Vec<(TaskId, Position)> {
        self.tasks_in(list_id)
            .into_iter()
            .map(|t| (t.id, t.position))
            .collect()
    }

    fn assert_epoch(&self, list_id: ListId, seen: u64) -> Result<(), StoreError> {
        if self.epoch(list_id) == seen {
            Ok(())
        } else {
            Err(StoreError::OrderingChanged { list_id })
        }
    }

    fn assert_position_free(
        &self,
        id: TaskId,
        list_id: ListId,
        position: &Position,
    ) -> Result<(), StoreError> {
        let taken = self
            .tasks
            .values()
            .any(|t| t.id != id && t.list_id == list_id && &t.position == position);
        if taken {
            return Err(StoreError::UniqueViolation {
                constraint: UniqueConstraint::TaskListPosition {
                    list_id,
                    position: position.clone(),
                },
            });
        }
        Ok(())
    }

    fn insert_task(&mut self, task: Task) -> Result<(), StoreError> {
        if self.tasks.contains_key(&task.id) {
            return Err(StoreError::UniqueViolation {
                constraint: UniqueConstraint::TaskId(task.id),
            });
        }
        self.assert_position_free(task.id, task.list_id, &task.position)?;
        self.tasks.insert(task.id, task);
        Ok(())
    }

    /// `Ok(None)` when the task is missing or not at `expected`.
    fn update_if_version(
        &mut self,
        id: TaskId,
        expected: u64,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, StoreError> {
        let Some(current) = self.tasks.get(&id) else {
            return Ok(None);
        };
        if current.version != expected {
            return Ok(None);
        }
        let mut next = current.clone();
        patch.apply(&mut next);
        if patch.relocation.is_some() {
            self.assert_position_free(id, next.list_id, &next.position)?;
        }
        self.tasks.insert(id, next.clone());
        Ok(Some(next))
    }

    fn set_positions(
        &mut self,
        list_id: ListId,
        positions: &[(TaskId, Position)],
    ) -> Result<(), StoreError> {
        for (id, _) in positions {
            match self.tasks.get(id) {
                Some(task) if task.list_id == list_id => {}
                _ => return Err(StoreError::WriteConflict { task_id: *id }),
            }
        }
        for (id, position) in positions {
            if let Some(task) = self.tasks.get_mut(id) {
                task.position = position.clone();
            }
        }
        let mut seen = std::collections::HashSet::new();
        for task in self.tasks.values().filter(|t| t.list_id == list_id) {
            if !seen.insert(task.position.clone()) {
                return Err(StoreError::UniqueViolation {
                    constraint: UniqueConstraint::TaskListPosition {
                        list_id,
                        position: task.position.clone(),
                    },
                });
            }
        }
        *self.epochs.entry(list_id).or_insert(0) += 1;
        Ok(())
    }

    fn insert_idempotency(&mut self, record: IdempotencyRecord) -> Result<(), StoreError> {
        if self.idempotency.contains_key(&record.key) {
            return Err(StoreError::UniqueViolation {
                constraint: UniqueConstraint::IdempotencyKey(record.key),
            });
        }
        self.idempotency.insert(record.key.clone(), record);
        Ok(())
    }

    fn complete_idempotency(
        &mut self,
        key: &IdempotencyKey,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let record = self
            .idempotency
            .get_mut(key)
            .ok_or_else(|| StoreError::MissingRow(format!("idempotency {}/{}", key.scope.as_str(), key.key)))?;
        record.complete(result, now);
        Ok(())
    }

    fn replay(&mut self, op: Op) -> Result<(), StoreError> {
        match op {
            Op::InsertTask { task, epoch } => {
                self.assert_epoch(task.list_id, epoch)?;
                self.insert_task(task)
            }
            Op::UpdateTask {
                id,
                expected,
                patch,
                epoch,
            } => {
                if let (Some(relocation), Some(epoch)) = (&patch.relocation, epoch) {
                    self.assert_epoch(relocation.list_id, epoch)?;
                }
                match self.update_if_version(id, expected, &patch)? {
                    Some(_) => Ok(()),
                    None => Err(StoreError::WriteConflict { task_id: id }),
                }
            }
            Op::SetPositions {
                list_id,
                positions,
                layout,
                epoch,
            } => {
                self.assert_epoch(list_id, epoch)?;
                if self.layout(list_id) != layout {
                    return Err(StoreError::OrderingChanged { list_id });
                }
                self.set_positions(list_id, &positions)
            }
            Op::InsertActivity(entry) => {
                self.activity.push(entry);
                Ok(())
            }
            Op::InsertIdempotency(record) => self.insert_idempotency(record),
            Op::CompleteIdempotency { key, result, now } => {
                self.complete_idempotency(&key, result, now)
            }
        }
    }
}

/// InMemoryTaskStore は開発・テスト用のトランザクションストア
///
/// # 使用例
/// ```ignore
/// let store = InMemoryTaskStore::new();
/// store.put_list(list).await;
/// let mut tx = store.begin().await?;
/// tx.insert_task(task).await?;
/// tx.commit().await?;
/// ```
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    live: Arc<Mutex<State>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists are owned by the board layer; this seeds one directly.
    pub async fn put_list(&self, list: TaskList) {
        self.live.lock().await.lists.insert(list.id, list);
    }

    /// Seed a task outside of any transaction.
    pub async fn put_task(&self, task: Task) -> Result<(), StoreError> {
        self.live.lock().await.insert_task(task)
    }

    /// Seed a ledger row, e.g. one left behind by another instance.
    pub async fn put_idempotency(&self, record: IdempotencyRecord) -> Result<(), StoreError> {
        self.live.lock().await.insert_idempotency(record)
    }

    pub async fn tasks_in(&self, list_id: ListId) -> Vec<Task> {
        self.live.lock().await.tasks_in(list_id)
    }

    pub async fn task_count(&self) -> usize {
        self.live.lock().await.tasks.len()
    }

    pub async fn activity(&self) -> Vec<ActivityLogEntry> {
        self.live.lock().await.activity.clone()
    }

    pub async fn idempotency_records(&self) -> Vec<IdempotencyRecord> {
        self.live.lock().await.idempotency.values().cloned().collect()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let work = self.live.lock().await.clone();
        Ok(Box::new(InMemoryTx {
            live: self.live.clone(),
            work,
            ops: Vec::new(),
        }))
    }
}

struct InMemoryTx {
    live: Arc<Mutex<State>>,
    work: State,
    ops: Vec<Op>,
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn find_task(&mut self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.work.tasks.get(&id).cloned())
    }

    async fn find_list(&mut self, id: ListId) -> Result<Option<TaskList>, StoreError> {
        Ok(self.work.lists.get(&id).cloned())
    }

    async fn list_tasks(&mut self, list_id: ListId) -> Result<Vec<Task>, StoreError> {
        Ok(self.work.tasks_in(list_id))
    }

    async fn count_active_tasks(
        &mut self,
        list_id: ListId,
        excluding: Option<TaskId>,
    ) -> Result<usize, StoreError> {
        Ok(self
            .work
            .tasks
            .values()
            .filter(|t| t.list_id == list_id)
            .filter(|t| Some(t.id) != excluding)
            .filter(|t| t.status.counts_toward_wip())
            .count())
    }

    async fn insert_task(&mut self, task: Task) -> Result<(), StoreError> {
        let epoch = self.work.epoch(task.list_id);
        self.work.insert_task(task.clone())?;
        self.ops.push(Op::InsertTask { task, epoch });
        Ok(())
    }

    async fn update_task_if_version(
        &mut self,
        id: TaskId,
        expected: u64,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, StoreError> {
        let epoch = patch.relocation.as_ref().map(|r| self.work.epoch(r.list_id));
        let updated = self.work.update_if_version(id, expected, patch)?;
        if updated.is_some() {
            self.ops.push(Op::UpdateTask {
                id,
                expected,
                patch: patch.clone(),
                epoch,
            });
        }
        Ok(updated)
    }

    async fn set_positions(
        &mut self,
        list_id: ListId,
        positions: Vec<(TaskId, Position)>,
    ) -> Result<(), StoreError> {
        let layout = self.work.layout(list_id);
        let epoch = self.work.epoch(list_id);
        self.work.set_positions(list_id, &positions)?;
        self.ops.push(Op::SetPositions {
            list_id,
            positions,
            layout,
            epoch,
        });
        Ok(())
    }

    async fn insert_activity(&mut self, entry: ActivityLogEntry) -> Result<(), StoreError> {
        self.work.activity.push(entry.clone());
        self.ops.push(Op::InsertActivity(entry));
        Ok(())
    }

    async fn find_idempotency(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.work.idempotency.get(key).cloned())
    }

    async fn insert_idempotency(&mut self, record: IdempotencyRecord) -> Result<(), StoreError> {
        self.work.insert_idempotency(record.clone())?;
        self.ops.push(Op::InsertIdempotency(record));
        Ok(())
    }

    async fn complete_idempotency(
        &mut self,
        key: &IdempotencyKey,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.work.complete_idempotency(key, result.clone(), now)?;
        self.ops.push(Op::CompleteIdempotency {
            key: key.clone(),
            result,
            now,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx { live, ops, .. } = *self;
        let mut live = live.lock().await;
        let mut next = live.clone();
        for op in ops {
            next.replay(op)?;
        }
        *live = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
