//! Domain model (ids, tasks, ordering keys, status, WIP, idempotency, events).
//!
//! ここにある型は I/O を持ちません。ストアや配信は ports 経由で扱います。

pub mod access;
pub mod activity;
pub mod errors;
pub mod events;
pub mod ids;
pub mod idempotency;
pub mod position;
pub mod status;
pub mod task;
pub mod wip;

pub use self::access::{Actor, ProjectRole};
pub use self::activity::{ActivityAction, ActivityLogEntry, EntityType};
pub use self::errors::{BoardError, ErrorBody, ErrorKind};
pub use self::events::{DomainEvent, ProjectEvent};
pub use self::ids::{ActivityId, BoardId, ListId, ProjectId, TaskId, UserId};
pub use self::idempotency::{IdempotencyKey, IdempotencyRecord, IdempotencyScope, IdempotencyStatus};
pub use self::position::{Position, PositionError};
pub use self::status::TaskStatus;
pub use self::task::{AuthoritativeOrder, NewTask, OrderEntry, Relocation, Task, TaskList, TaskPatch};
pub use self::wip::WipDecision;
