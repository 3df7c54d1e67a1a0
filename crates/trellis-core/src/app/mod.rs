//! App - アプリケーション層
//!
//! ports を組み合わせてタスク操作のユースケースを実装します。
//!
//! # 主要コンポーネント
//! - **ServiceBuilder**: TaskService の構築とワイヤリング
//! - **TaskService**: create / update / status / archive / move / rebalance
//! - **with_idempotency**: 冪等キー台帳によるリプレイ
//! - **ServiceConfig**: TOML から読む設定値

pub mod builder;
pub mod config;
pub mod idempotency;
pub mod move_task;
pub mod ordering;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use self::builder::{BuildError, ServiceBuilder};
pub use self::config::{ConfigError, ServiceConfig};
pub use self::idempotency::{Idempotent, IdempotentOperation, with_idempotency};
pub use self::service::{
    ArchiveTaskInput, CreateTaskInput, Created, MoveOutcome, MoveTaskInput, TaskService,
    UpdateStatusInput, UpdateTaskInput,
};
