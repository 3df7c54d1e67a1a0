//! Domain identifiers (strongly-typed IDs).
//!
//! すべての ID は ULID ベースの `Id<T>` で、`T` はマーカー型です。
//! `TaskId` と `ListId` は実行時には同じ 16 bytes ですが、コンパイル時に混同できません。
//!
//! - Display は `task-01H...` のようにプレフィックス付き
//! - JSON では素の ULID 文字列（`"01H..."`）
//! - `FromStr` はどちらの形式も受け付ける

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "task-", "list-"）
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when a path segment or header is not a valid id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {prefix}id: {input}")]
pub struct ParseIdError {
    prefix: &'static str,
    input: String,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| ParseIdError {
                prefix: T::prefix(),
                input: s.to_string(),
            })
    }
}

// ========================================
// マーカー型の定義
// ========================================

macro_rules! id_marker {
    ($(#[$meta:meta])* $marker:ident, $alias:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $marker {}

        impl IdMarker for $marker {
            fn prefix() -> &'static str {
                $prefix
            }
        }

        pub type $alias = Id<$marker>;
    };
}

id_marker!(
    /// Project のマーカー型（所有チェーンの最上位）
    Project,
    ProjectId,
    "project-"
);
id_marker!(Board, BoardId, "board-");
id_marker!(List, ListId, "list-");
id_marker!(
    /// Task のマーカー型
    Task,
    TaskId,
    "task-"
);
id_marker!(User, UserId, "user-");
id_marker!(
    /// ActivityLog エントリのマーカー型
    Activity,
    ActivityId,
    "activity-"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid = Ulid::new();
        let task = TaskId::from_ulid(ulid);
        let list = ListId::from_ulid(ulid);

        assert_eq!(task.as_ulid(), list.as_ulid());
        assert!(task.to_string().starts_with("task-"));
        assert!(list.to_string().starts_with("list-"));
        // let _: ListId = task; // <- does not compile
    }

    #[test]
    fn ids_serialize_as_bare_ulid() {
        let ulid = Ulid::new();
        let task_id = TaskId::from_ulid(ulid);

        let serialized = serde_json::to_string(&task_id).unwrap();
        assert_eq!(serialized, format!("\"{ulid}\""));

        let back: TaskId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back, task_id);
    }

    #[test]
    fn parse_accepts_prefixed_and_bare_forms() {
        let task_id = TaskId::from_ulid(Ulid::new());

        assert_eq!(task_id.to_string().parse::<TaskId>().unwrap(), task_id);
        assert_eq!(
            task_id.as_ulid().to_string().parse::<TaskId>().unwrap(),
            task_id
        );
    }

    #[test]
    fn parse_rejects_garbage_and_foreign_prefix() {
        assert!("task-nope".parse::<TaskId>().is_err());

        let list_id = ListId::from_ulid(Ulid::new());
        assert!(list_id.to_string().parse::<TaskId>().is_err());
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<Ulid>());
        assert_eq!(size_of::<UserId>(), 16);
    }
}
