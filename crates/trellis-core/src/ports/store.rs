//! TaskStore port - トランザクションを持つ正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - タスクとリスト（位置・バージョン）
//! - 冪等キー台帳
//! - ActivityLog
//!
//! # 設計原則
//! - すべての mutation は 1 つのトランザクションで行う（プロセス内ロックは持たない）
//! - 一意制約: (listId, position) と (userId, scope, key)
//! - バージョン CAS: `update_task_if_version` は期待値と一致したときだけ書く
//! - 一意制約違反は書き込み時またはコミット時のどちらでも報告され得る
//! - 並べ直し（`set_positions`）はリストの ordering epoch を進める。古い epoch で
//!   計算した位置キーはコミット時に `OrderingChanged` になる

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::activity::ActivityLogEntry;
use crate::domain::ids::{ListId, TaskId};
use crate::domain::idempotency::{IdempotencyKey, IdempotencyRecord};
use crate::domain::position::Position;
use crate::domain::task::{Task, TaskList, TaskPatch};

/// Which unique constraint a write tripped over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniqueConstraint {
    TaskListPosition { list_id: ListId, position: Position },
    IdempotencyKey(IdempotencyKey),
    TaskId(TaskId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint:?}")]
    UniqueViolation { constraint: UniqueConstraint },

    /// A row this transaction wrote was changed by a transaction that
    /// committed first.
    #[error("write conflict on task {task_id}")]
    WriteConflict { task_id: TaskId },

    /// The list was re-spaced after this transaction read it, so a key it
    /// computed from that read may no longer sit in the intended gap.
    #[error("ordering of list {list_id} changed concurrently")]
    OrderingChanged { list_id: ListId },

    #[error("row not found: {0}")]
    MissingRow(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Two writers chose the same slot in a list, or one of them re-spaced it.
    pub fn is_position_race(&self) -> bool {
        matches!(
            self,
            StoreError::UniqueViolation {
                constraint: UniqueConstraint::TaskListPosition { .. }
            } | StoreError::OrderingChanged { .. }
        )
    }

    pub fn is_idempotency_race(&self) -> bool {
        matches!(
            self,
            StoreError::UniqueViolation {
                constraint: UniqueConstraint::IdempotencyKey(_)
            }
        )
    }
}

/// Opens transactions.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// One open transaction.
///
/// Dropping a transaction without `commit` discards its writes.
#[async_trait]
pub trait StoreTx: Send {
    async fn find_task(&mut self, id: TaskId) -> Result<Option<Task>, StoreError>;

    async fn find_list(&mut self, id: ListId) -> Result<Option<TaskList>, StoreError>;

    /// Tasks of `list_id` ordered by (position, id), archived ones included.
    async fn list_tasks(&mut self, list_id: ListId) -> Result<Vec<Task>, StoreError>;

    /// Non-terminal tasks in `list_id`, not counting `excluding`.
    async fn count_active_tasks(
        &mut self,
        list_id: ListId,
        excluding: Option<TaskId>,
    ) -> Result<usize, StoreError>;

    async fn insert_task(&mut self, task: Task) -> Result<(), StoreError>;

    /// Apply `patch` only if the stored version equals `expected`.
    ///
    /// Returns `None` when the task is missing or its version moved on (the
    /// zero-affected-rows case of a conditional UPDATE).
    async fn update_task_if_version(
        &mut self,
        id: TaskId,
        expected: u64,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, StoreError>;

    /// Rewrite positions inside `list_id` without touching versions.
    ///
    /// Fails at commit with `OrderingChanged` if the list's rows or positions
    /// moved since this transaction read them. Any other transaction that
    /// wrote a key into the list from a read taken before the rewrite fails
    /// the same way.
    async fn set_positions(
        &mut self,
        list_id: ListId,
        positions: Vec<(TaskId, Position)>,
    ) -> Result<(), StoreError>;

    async fn insert_activity(&mut self, entry: ActivityLogEntry) -> Result<(), StoreError>;

    async fn find_idempotency(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, StoreError>;

    async fn insert_idempotency(&mut self, record: IdempotencyRecord) -> Result<(), StoreError>;

    async fn complete_idempotency(
        &mut self,
        key: &IdempotencyKey,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
