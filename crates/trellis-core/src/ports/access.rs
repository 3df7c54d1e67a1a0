//! AccessPolicy port - RBAC と所属チェック
//!
//! ロールの解決そのものは外部で行われ、`Actor` として渡されます。
//! ここでは mutation の途中で必要になる判断だけを問い合わせます。

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::access::Actor;
use crate::domain::ids::{ProjectId, UserId};
use crate::ports::store::StoreError;

#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// Whether `actor` may exceed a list's WIP limit with a reason.
    fn can_override_wip(&self, actor: &Actor) -> bool;

    /// Users in `users` that are not members of `project_id`.
    async fn non_members(
        &self,
        project_id: ProjectId,
        users: &BTreeSet<UserId>,
    ) -> Result<Vec<UserId>, StoreError>;
}
