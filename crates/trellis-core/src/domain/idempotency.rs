//! Idempotency - 冪等キーとその台帳レコード
//!
//! クライアントは mutation ごとに任意の冪等キーを付けられます。
//! 台帳は (user, scope, key) で一意で、完了したレコードは結果を保持し、
//! 同じキーの再送にはその結果をそのまま返します。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::BoardError;
use super::ids::UserId;

/// Operation namespace a key belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyScope(String);

impl IdempotencyScope {
    pub const CREATE_TASK: &'static str = "createTask";

    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    pub fn create_task() -> Self {
        Self::new(Self::CREATE_TASK)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Ledger key. Keys are scoped per user, so two users may reuse the same
/// string without colliding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyKey {
    pub user_id: UserId,
    pub scope: IdempotencyScope,
    pub key: String,
}

impl IdempotencyKey {
    /// Validates the raw client key: 1..=`max_len` printable ASCII, no whitespace.
    pub fn new(
        user_id: UserId,
        scope: IdempotencyScope,
        key: impl Into<String>,
        max_len: usize,
    ) -> Result<Self, BoardError> {
        let key = key.into();
        if key.is_empty() {
            return Err(BoardError::validation("idempotencyKey", "must not be empty"));
        }
        if key.len() > max_len {
            return Err(BoardError::validation(
                "idempotencyKey",
                format!("must be at most {max_len} characters"),
            ));
        }
        if !key.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(BoardError::validation(
                "idempotencyKey",
                "must be printable ASCII without whitespace",
            ));
        }
        Ok(Self {
            user_id,
            scope,
            key,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    InProgress,
    Completed,
}

/// One ledger row.
///
/// `result` is the serialized success payload and is only present once the
/// owning transaction completed the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub status: IdempotencyStatus,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn in_progress(key: IdempotencyKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            status: IdempotencyStatus::InProgress,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn complete(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = IdempotencyStatus::Completed;
        self.result = Some(result);
        self.updated_at = now;
    }

    /// Stored result when the record is completed.
    pub fn completed_result(&self) -> Option<&serde_json::Value> {
        match self.status {
            IdempotencyStatus::Completed => self.result.as_ref(),
            IdempotencyStatus::InProgress => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ulid::Ulid;

    fn user() -> UserId {
        UserId::from_ulid(Ulid::new())
    }

    #[rstest]
    #[case::plain("req-123")]
    #[case::uuid("0b1e1c1a-0b9c-4c7e-9d7a-2a5f1f0f3e11")]
    #[case::symbols("a:b/c_d.e~f")]
    fn accepts_printable_keys(#[case] raw: &str) {
        assert!(IdempotencyKey::new(user(), IdempotencyScope::create_task(), raw, 255).is_ok());
    }

    #[rstest]
    #[case::empty("")]
    #[case::space("has space")]
    #[case::tab("tab\tkey")]
    #[case::non_ascii("キー")]
    fn rejects_bad_keys(#[case] raw: &str) {
        let err = IdempotencyKey::new(user(), IdempotencyScope::create_task(), raw, 255).unwrap_err();
        assert_eq!(err.field(), Some("idempotencyKey"));
    }

    #[test]
    fn rejects_overlong_keys() {
        let raw = "k".repeat(256);
        assert!(IdempotencyKey::new(user(), IdempotencyScope::create_task(), raw, 255).is_err());
    }

    #[test]
    fn only_completed_records_expose_a_result() {
        let key = IdempotencyKey::new(user(), IdempotencyScope::create_task(), "k", 255).unwrap();
        let now = Utc::now();
        let mut record = IdempotencyRecord::in_progress(key, now);
        assert_eq!(record.completed_result(), None);

        record.complete(serde_json::json!({"id": 1}), now);
        assert_eq!(record.completed_result(), Some(&serde_json::json!({"id": 1})));
    }
}
