//! EventSink port - リアルタイム配信への出口
//!
//! コミット後に best-effort で呼ばれます。失敗はログに残すだけで、
//! コミット済みの変更には影響しません。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::events::ProjectEvent;

#[derive(Debug, Error)]
pub enum EventSinkError {
    #[error("event transport failed: {0}")]
    Transport(String),
}

/// EventSink はプロジェクト単位でドメインイベントを配信
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &ProjectEvent) -> Result<(), EventSinkError>;
}
