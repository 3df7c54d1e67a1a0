//! Idempotency ledger - 冪等キーで副作用を 1 回に抑える
//!
//! # 流れ
//! 1. 呼び出し元のトランザクションで台帳を引く
//! 2. 完了済み → 保存済みの結果を返す（`execute` は呼ばない）
//! 3. 実行中 → `IdempotencyInProgress`（待たずに即失敗）
//! 4. なし → プレースホルダを挿入し、`execute` して結果を同じ行に保存
//!
//! 同じキーで同時に来た 2 つ目の呼び出しは、コミット時の一意制約違反で
//! 負けます。その後の扱いは `TaskService` 側（台帳を読み直して再生）です。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::errors::BoardError;
use crate::domain::idempotency::{IdempotencyKey, IdempotencyRecord};
use crate::ports::store::StoreTx;

/// The side effect guarded by a key.
#[async_trait]
pub trait IdempotentOperation: Send + Sync {
    type Output: Serialize + DeserializeOwned + Send;

    async fn execute(&self, tx: &mut dyn StoreTx) -> Result<Self::Output, BoardError>;
}

/// Whether the result came from running the operation or from the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum Idempotent<T> {
    Executed(T),
    Replayed(T),
}

pub async fn with_idempotency<O>(
    tx: &mut dyn StoreTx,
    key: &IdempotencyKey,
    now: DateTime<Utc>,
    op: &O,
) -> Result<Idempotent<O::Output>, BoardError>
where
    O: IdempotentOperation + ?Sized,
{
    if let Some(record) = tx.find_idempotency(key).await? {
        return replay(&record).map(Idempotent::Replayed);
    }

    tx.insert_idempotency(IdempotencyRecord::in_progress(key.clone(), now))
        .await?;
    let output = op.execute(&mut *tx).await?;
    tx.complete_idempotency(key, serde_json::to_value(&output)?, now)
        .await?;
    Ok(Idempotent::Executed(output))
}

/// Stored result of `record`, or `IdempotencyInProgress` while it is pending.
pub fn replay<T: DeserializeOwned>(record: &IdempotencyRecord) -> Result<T, BoardError> {
    match record.completed_result() {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Err(BoardError::IdempotencyInProgress {
            scope: record.key.scope.as_str().to_string(),
            key: record.key.key.clone(),
        }),
    }
}
