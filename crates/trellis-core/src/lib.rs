//! trellis-core
//!
//! Task ordering and concurrency core of a kanban board.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, position, task, status, wip, idempotency, activity, events, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, EventSink, AccessPolicy, Clock, IdGenerator, TextSanitizer）
//! - **app**: アプリケーションロジック（TaskService, ServiceBuilder, move / rebalance, 冪等性）
//! - **impls**: 実装（InMemoryTaskStore, InMemoryEventSink, StaticAccessPolicy など開発用）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
