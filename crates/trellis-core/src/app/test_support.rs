//! Test harness: a wired service over the in-memory store, plus a store
//! decorator that makes commit interleavings deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Barrier;
use ulid::Ulid;

use crate::app::builder::ServiceBuilder;
use crate::app::service::TaskService;
use crate::domain::access::{Actor, ProjectRole};
use crate::domain::activity::ActivityLogEntry;
use crate::domain::idempotency::{IdempotencyKey, IdempotencyRecord};
use crate::domain::ids::{BoardId, ListId, ProjectId, TaskId, UserId};
use crate::domain::position::Position;
use crate::domain::task::fixtures::task_in;
use crate::domain::task::{Task, TaskList, TaskPatch};
use crate::impls::{InMemoryEventSink, InMemoryTaskStore, StaticAccessPolicy};
use crate::ports::{FixedClock, StoreError, StoreTx, TaskStore, UniqueConstraint};

enum CommitMode {
    /// The first `n` commits wait for each other before reaching the store.
    Gate { n: usize, barrier: Barrier },
    /// Every commit loses a position race.
    AlwaysRace,
    /// The first commit is discarded with this error.
    FailFirst(StoreError),
}

struct Gate {
    mode: CommitMode,
    commits: AtomicUsize,
}

/// Wraps a store and intercepts `commit`.
///
/// With `Gate`, concurrent transactions that each read a snapshot are held
/// until all of them are ready to commit, so they are guaranteed to overlap.
pub(crate) struct GatedStore {
    inner: Arc<dyn TaskStore>,
    gate: Arc<Gate>,
}

impl GatedStore {
    fn new(inner: Arc<dyn TaskStore>, mode: CommitMode) -> Self {
        Self {
            inner,
            gate: Arc::new(Gate {
                mode,
                commits: AtomicUsize::new(0),
            }),
        }
    }

    fn commits(&self) -> usize {
        self.gate.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStore for GatedStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(GatedTx {
            inner: self.inner.begin().await?,
            gate: self.gate.clone(),
        }))
    }
}

struct GatedTx {
    inner: Box<dyn StoreTx>,
    gate: Arc<Gate>,
}

#[async_trait]
impl StoreTx for GatedTx {
    async fn find_task(&mut self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.inner.find_task(id).await
    }

    async fn find_list(&mut self, id: ListId) -> Result<Option<TaskList>, StoreError> {
        self.inner.find_list(id).await
    }

    async fn list_tasks(&mut self, list_id: ListId) -> Result<Vec<Task>, StoreError> {
        self.inner.list_tasks(list_id).await
    }

    async fn count_active_tasks(
        &mut self,
        list_id: ListId,
        excluding: Option<TaskId>,
    ) -> Result<usize, StoreError> {
        self.inner.count_active_tasks(list_id, excluding).await
    }

    async fn insert_task(&mut self, task: Task) -> Result<(), StoreError> {
        self.inner.insert_task(task).await
    }

    async fn update_task_if_version(
        &mut self,
        id: TaskId,
        expected: u64,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, StoreError> {
        self.inner.update_task_if_version(id, expected, patch).await
    }

    async fn set_positions(
        &mut self,
        list_id: ListId,
        positions: Vec<(TaskId, Position)>,
    ) -> Result<(), StoreError> {
        self.inner.set_positions(list_id, positions).await
    }

    async fn insert_activity(&mut self, entry: ActivityLogEntry) -> Result<(), StoreError> {
        self.inner.insert_activity(entry).await
    }

    async fn find_idempotency(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        self.inner.find_idempotency(key).await
    }

    async fn insert_idempotency(&mut self, record: IdempotencyRecord) -> Result<(), StoreError> {
        self.inner.insert_idempotency(record).await
    }

    async fn complete_idempotency(
        &mut self,
        key: &IdempotencyKey,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.complete_idempotency(key, result, now).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let GatedTx { inner, gate } = *self;
        let seq = gate.commits.fetch_add(1, Ordering::SeqCst);
        match &gate.mode {
            CommitMode::Gate { n, barrier } => {
                if seq < *n {
                    barrier.wait().await;
                }
                inner.commit().await
            }
            CommitMode::AlwaysRace => {
                inner.rollback().await?;
                Err(StoreError::UniqueViolation {
                    constraint: UniqueConstraint::TaskListPosition {
                        list_id: ListId::from_ulid(Ulid::nil()),
                        position: Position::parse("V").unwrap(),
                    },
                })
            }
            CommitMode::FailFirst(err) if seq == 0 => {
                inner.rollback().await?;
                Err(err.clone())
            }
            CommitMode::FailFirst(_) => inner.commit().await,
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

/// A service for one project with one member, over an inspectable store.
pub(crate) struct Harness {
    pub service: TaskService,
    pub store: InMemoryTaskStore,
    pub events: Arc<InMemoryEventSink>,
    pub access: Arc<StaticAccessPolicy>,
    pub clock: Arc<FixedClock>,
    pub project_id: ProjectId,
    pub board_id: BoardId,
    pub user_id: UserId,
    gated: Option<Arc<GatedStore>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// The first `n` commits rendezvous before applying.
    pub fn gated(n: usize) -> Self {
        Self::build(Some(CommitMode::Gate {
            n,
            barrier: Barrier::new(n),
        }))
    }

    /// Every commit fails with a position race.
    pub fn always_racing() -> Self {
        Self::build(Some(CommitMode::AlwaysRace))
    }

    /// The first commit fails with `err` without reaching the store.
    pub fn failing_first_commit(err: StoreError) -> Self {
        Self::build(Some(CommitMode::FailFirst(err)))
    }

    fn build(mode: Option<CommitMode>) -> Self {
        let store = InMemoryTaskStore::new();
        let events = Arc::new(InMemoryEventSink::new());
        let access = Arc::new(StaticAccessPolicy::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        ));
        let project_id = ProjectId::from_ulid(Ulid::new());
        let user_id = UserId::from_ulid(Ulid::new());
        access.add_member(project_id, user_id);

        let gated = mode.map(|mode| Arc::new(GatedStore::new(Arc::new(store.clone()), mode)));
        let backing: Arc<dyn TaskStore> = match &gated {
            Some(g) => g.clone() as Arc<dyn TaskStore>,
            None => Arc::new(store.clone()),
        };

        let service = ServiceBuilder::new()
            .store(backing)
            .events(events.clone())
            .access(access.clone())
            .clock(clock.clone())
            .build()
            .unwrap();

        Self {
            service,
            store,
            events,
            access,
            clock,
            project_id,
            board_id: BoardId::from_ulid(Ulid::new()),
            user_id,
            gated,
        }
    }

    pub fn actor(&self, role: ProjectRole) -> Actor {
        Actor {
            user_id: self.user_id,
            project_id: self.project_id,
            board_id: self.board_id,
            board_archived: false,
            role,
        }
    }

    /// Commits attempted through the gated store.
    pub fn commits(&self) -> usize {
        self.gated.as_ref().map_or(0, |g| g.commits())
    }

    pub async fn list(&self, wip_limit: Option<u32>) -> TaskList {
        let list = TaskList {
            id: ListId::from_ulid(Ulid::new()),
            project_id: self.project_id,
            board_id: self.board_id,
            name: "Doing".to_string(),
            archived: false,
            wip_limit,
        };
        self.store.put_list(list.clone()).await;
        list
    }

    pub async fn archived_list(&self) -> TaskList {
        let mut list = self.list(None).await;
        list.archived = true;
        self.store.put_list(list.clone()).await;
        list
    }

    pub async fn seed_task(&self, list: &TaskList, position: &str) -> Task {
        self.seed_task_with_version(list, position, 1).await
    }

    pub async fn seed_task_with_version(&self, list: &TaskList, position: &str, version: u64) -> Task {
        let mut task = task_in(list, position);
        task.version = version;
        self.store.put_task(task.clone()).await.unwrap();
        task
    }
}
