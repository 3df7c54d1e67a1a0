//! Errors - エラー型と分類
//!
//! `BoardError` はサービス層が呼び出し元へ返すドメインエラーです。
//! どのエラーもトランザクションをロールバックしてから返されるので、
//! 部分的な更新が観測されることはありません。

use serde::Serialize;
use thiserror::Error;

use super::ids::ListId;
use super::position::PositionError;
use super::status::TaskStatus;
use super::task::Task;
use crate::ports::store::StoreError;

/// ErrorKind は呼び出し元から見たエラーの分類
///
/// - Validation: 入力が不正（WIP 超過を含む）。リトライ無意味
/// - NotFound: 対象が存在しない
/// - Conflict: 競合する編集が勝った。最新状態で rebase して再送する
/// - InProgress: 同じ冪等キーのリクエストが実行中。ポーリングで再試行してよい
/// - Internal: サーバ側の問題。詳細は返さない
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InProgress,
    Internal,
}

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("validation failed on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("WIP limit exceeded for {list_id} ({active}/{limit})")]
    WipLimitExceeded {
        field: &'static str,
        list_id: ListId,
        limit: u32,
        active: usize,
    },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("task is {status} and cannot be modified")]
    Immutable { status: TaskStatus },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A competing edit won; `latest` is the authoritative snapshot.
    #[error("version conflict on {}: expected {expected}, latest is {}", .latest.id, .latest.version)]
    Conflict { expected: u64, latest: Box<Task> },

    #[error("request {scope}/{key} is already in progress")]
    IdempotencyInProgress { scope: String, key: String },

    #[error("position retry budget exhausted for {operation} after {attempts} attempts")]
    RetryExhausted {
        operation: &'static str,
        attempts: u32,
    },

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("stored result could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl BoardError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BoardError::Validation { .. }
            | BoardError::WipLimitExceeded { .. }
            | BoardError::InvalidTransition { .. }
            | BoardError::Immutable { .. } => ErrorKind::Validation,
            BoardError::NotFound { .. } => ErrorKind::NotFound,
            BoardError::Conflict { .. } => ErrorKind::Conflict,
            BoardError::IdempotencyInProgress { .. } => ErrorKind::InProgress,
            BoardError::RetryExhausted { .. }
            | BoardError::Position(_)
            | BoardError::Store(_)
            | BoardError::Encoding(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status the outer layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 422,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict | ErrorKind::InProgress => 409,
            ErrorKind::Internal => 500,
        }
    }

    /// Field marker for validation-class errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            BoardError::Validation { field, .. } => Some(field),
            BoardError::WipLimitExceeded { field, .. } => Some(field),
            BoardError::InvalidTransition { .. } => Some("status"),
            _ => None,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            BoardError::Validation { .. } => "VALIDATION_ERROR",
            BoardError::WipLimitExceeded { .. } => "WIP_LIMIT_EXCEEDED",
            BoardError::InvalidTransition { .. } => "INVALID_TRANSITION",
            BoardError::Immutable { .. } => "TASK_ARCHIVED",
            BoardError::NotFound { .. } => "NOT_FOUND",
            BoardError::Conflict { .. } => "VERSION_CONFLICT",
            BoardError::IdempotencyInProgress { .. } => "IDEMPOTENCY_IN_PROGRESS",
            _ => "INTERNAL",
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::InProgress
    }
}

/// Serializable error response.
///
/// Conflict bodies carry the latest task so the client can refresh without a
/// second round trip. Internal errors never expose their cause.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<Task>,
    pub retryable: bool,
}

impl From<&BoardError> for ErrorBody {
    fn from(err: &BoardError) -> Self {
        let message = match err.kind() {
            ErrorKind::Internal => "internal error".to_string(),
            _ => err.to_string(),
        };
        let latest = match err {
            BoardError::Conflict { latest, .. } => Some(latest.as_ref().clone()),
            _ => None,
        };
        ErrorBody {
            code: err.code(),
            message,
            field: err.field().map(str::to_string),
            latest,
            retryable: err.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::fixtures::{list, task_in};
    use rstest::rstest;

    #[rstest]
    #[case::validation(BoardError::validation("title", "Title is required"), 422)]
    #[case::transition(
        BoardError::InvalidTransition { from: TaskStatus::Done, to: TaskStatus::Open },
        422
    )]
    #[case::missing(BoardError::not_found("task", "task-x"), 404)]
    #[case::in_progress(
        BoardError::IdempotencyInProgress { scope: "createTask".into(), key: "k".into() },
        409
    )]
    #[case::exhausted(
        BoardError::RetryExhausted { operation: "moveTask", attempts: 4 },
        500
    )]
    fn status_codes(#[case] err: BoardError, #[case] expected: u16) {
        assert_eq!(err.status_code(), expected);
    }

    #[test]
    fn wip_error_is_validation_with_field_marker() {
        let l = list(Some(2));
        let err = BoardError::WipLimitExceeded {
            field: "toListId",
            list_id: l.id,
            limit: 2,
            active: 2,
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.field(), Some("toListId"));
    }

    #[test]
    fn conflict_body_carries_latest_snapshot() {
        let mut latest = task_in(&list(None), "m");
        latest.version = 4;
        let err = BoardError::Conflict {
            expected: 3,
            latest: Box::new(latest.clone()),
        };

        let body = serde_json::to_value(ErrorBody::from(&err)).unwrap();
        assert_eq!(body["code"], "VERSION_CONFLICT");
        assert_eq!(body["latest"]["version"], 4);
        assert_eq!(body["retryable"], false);
    }

    #[test]
    fn in_progress_is_distinguishable_and_retryable() {
        let err = BoardError::IdempotencyInProgress {
            scope: "createTask".into(),
            key: "abc".into(),
        };
        let body = ErrorBody::from(&err);
        assert_eq!(body.code, "IDEMPOTENCY_IN_PROGRESS");
        assert!(body.retryable);
        assert_ne!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn internal_errors_hide_detail() {
        let err = BoardError::Store(StoreError::Unavailable("db password wrong".into()));
        let body = ErrorBody::from(&err);
        assert_eq!(body.message, "internal error");
        assert_eq!(body.code, "INTERNAL");
    }
}
