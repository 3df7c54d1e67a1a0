//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部の協調者（トランザクションストア、リアルタイム配信、
//! RBAC、サニタイザ）へのインターフェースを提供し、実装の詳細を隠蔽します。

pub mod access;
pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod sanitize;
pub mod store;

pub use self::access::AccessPolicy;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, EventSinkError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::sanitize::TextSanitizer;
pub use self::store::{StoreError, StoreTx, TaskStore, UniqueConstraint};
