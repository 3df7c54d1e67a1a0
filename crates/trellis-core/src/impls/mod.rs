//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: スナップショット分離のトランザクションストア
//! - **InMemoryEventSink / BroadcastEventSink / NoopEventSink**: イベント配信
//! - **StaticAccessPolicy**: メンバー表と WIP override 権限
//! - **PlainTextSanitizer**: 自由記述のプレーンテキスト化
//!
//! # 本番用実装
//! 本番用の実装（PostgreSQL ストア、WebSocket 配信など）は別クレートに配置します。

pub mod access;
pub mod inmem_events;
pub mod inmem_store;
pub mod sanitize;

pub use self::access::StaticAccessPolicy;
pub use self::inmem_events::{BroadcastEventSink, InMemoryEventSink, NoopEventSink};
pub use self::inmem_store::InMemoryTaskStore;
pub use self::sanitize::PlainTextSanitizer;
