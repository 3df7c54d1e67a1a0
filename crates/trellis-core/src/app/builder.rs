//! ServiceBuilder - TaskService の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 正本（TaskStore）と RBAC（AccessPolicy）は必須。未設定なら build() で失敗
//! - それ以外はデフォルト実装で補う（NoopEventSink, PlainTextSanitizer, SystemClock, UlidGenerator）
//! - ServiceConfig は build() 時に検証する

use std::sync::Arc;

use crate::app::config::{ConfigError, ServiceConfig};
use crate::app::service::TaskService;
use crate::impls::{NoopEventSink, PlainTextSanitizer};
use crate::ports::{
    AccessPolicy, Clock, EventSink, IdGenerator, SystemClock, TaskStore, TextSanitizer,
    UlidGenerator,
};

/// # 使用例
/// ```ignore
/// let service = ServiceBuilder::new()
///     .store(Arc::new(InMemoryTaskStore::new()))
///     .access(Arc::new(StaticAccessPolicy::new()))
///     .build()?;
/// ```
#[derive(Default)]
pub struct ServiceBuilder {
    store: Option<Arc<dyn TaskStore>>,
    events: Option<Arc<dyn EventSink>>,
    access: Option<Arc<dyn AccessPolicy>>,
    sanitizer: Option<Arc<dyn TextSanitizer>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: ServiceConfig,
}

/// BuildError はサービス構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborator: {0}. It has no default and must be provided.")]
    Missing(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn access(mut self, access: Arc<dyn AccessPolicy>) -> Self {
        self.access = Some(access);
        self
    }

    pub fn sanitizer(mut self, sanitizer: Arc<dyn TextSanitizer>) -> Self {
        self.sanitizer = Some(sanitizer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// # 検証
    /// - store / access が設定されているか
    /// - config の値が範囲内か
    pub fn build(self) -> Result<TaskService, BuildError> {
        let store = self.store.ok_or(BuildError::Missing("TaskStore"))?;
        let access = self.access.ok_or(BuildError::Missing("AccessPolicy"))?;
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));

        Ok(TaskService {
            store,
            events: self.events.unwrap_or_else(|| Arc::new(NoopEventSink)),
            access,
            sanitizer: self.sanitizer.unwrap_or_else(|| Arc::new(PlainTextSanitizer)),
            clock,
            ids,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryTaskStore, StaticAccessPolicy};

    #[test]
    fn build_success_with_defaults() {
        let service = ServiceBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .access(Arc::new(StaticAccessPolicy::new()))
            .build();
        assert!(service.is_ok());
    }

    #[test]
    fn build_missing_store() {
        let service = ServiceBuilder::new()
            .access(Arc::new(StaticAccessPolicy::new()))
            .build();
        assert!(matches!(service, Err(BuildError::Missing("TaskStore"))));
    }

    #[test]
    fn build_missing_access_policy() {
        let service = ServiceBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .build();
        assert!(matches!(service, Err(BuildError::Missing("AccessPolicy"))));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let service = ServiceBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .access(Arc::new(StaticAccessPolicy::new()))
            .config(ServiceConfig {
                max_position_retries: 0,
                ..ServiceConfig::default()
            })
            .build();
        assert!(matches!(service, Err(BuildError::Config(_))));
    }
}
