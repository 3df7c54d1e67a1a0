//! EventSink 実装（開発用・テスト用）
//!
//! - **NoopEventSink**: 何もしない
//! - **InMemoryEventSink**: 配信内容を記録する（テストで検証用）
//! - **BroadcastEventSink**: tokio broadcast でプロセス内の購読者へ流す

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::events::ProjectEvent;
use crate::ports::event_sink::{EventSink, EventSinkError};

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish(&self, _event: &ProjectEvent) -> Result<(), EventSinkError> {
        Ok(())
    }
}

/// Records every published event. `fail_publishes(true)` makes it reject
/// events instead, to exercise the best-effort path.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<ProjectEvent>>,
    failing: AtomicBool,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publishes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ProjectEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn publish(&self, event: &ProjectEvent) -> Result<(), EventSinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EventSinkError::Transport("sink configured to fail".to_string()));
        }
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Fans events out to in-process subscribers.
///
/// Subscribers filter by `project_id`; nobody listening is not an error.
pub struct BroadcastEventSink {
    sender: broadcast::Sender<ProjectEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: &ProjectEvent) -> Result<(), EventSinkError> {
        if self.sender.receiver_count() == 0 {
            tracing::trace!(event = event.event.name(), "no realtime subscribers");
            return Ok(());
        }
        self.sender
            .send(event.clone())
            .map(|_| ())
            .map_err(|e| EventSinkError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::DomainEvent;
    use crate::domain::task::fixtures::{list, task_in};

    fn event() -> ProjectEvent {
        let l = list(None);
        ProjectEvent {
            project_id: l.project_id,
            event: DomainEvent::TaskCreated {
                task: task_in(&l, "V"),
            },
        }
    }

    #[tokio::test]
    async fn in_memory_sink_records_and_can_fail() {
        let sink = InMemoryEventSink::new();
        sink.publish(&event()).await.unwrap();
        assert_eq!(sink.events().len(), 1);

        sink.fail_publishes(true);
        assert!(sink.publish(&event()).await.is_err());
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastEventSink::new(8);
        sink.publish(&event()).await.unwrap();

        let mut rx = sink.subscribe();
        let sent = event();
        sink.publish(&sent).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), sent);
    }
}
