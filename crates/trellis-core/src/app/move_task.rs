//! Move orchestrator - 位置・WIP・バージョン CAS をまとめた再試行つき移動
//!
//! # 1 回の試行
//! 1. タスクを読む。バージョン不一致なら即 Conflict（再試行しない）
//! 2. リストが変わるなら移動先の WIP を確認
//! 3. 移動先で近傍を解決し、その間の位置キーを生成
//! 4. バージョン条件付きで更新（0 行なら Conflict）
//! 5. 移動先の最終順序（authoritative order）を読んで返す
//!
//! # 再試行
//! 位置の一意制約違反だけが再試行対象です。新しいトランザクションで近傍を
//! 読み直すので、同じ隙間を狙った相手のキーが見え、別の位置に収まります。

use tracing::{debug, error, info, instrument};

use crate::app::ordering::Gap;
use crate::app::service::{
    MoveOutcome, MoveTaskInput, TaskService, conflict_in_tx, finish, load_task,
};
use crate::domain::access::Actor;
use crate::domain::activity::ActivityAction;
use crate::domain::errors::BoardError;
use crate::domain::ids::{ListId, TaskId};
use crate::domain::status::assert_mutable;
use crate::domain::events::DomainEvent;
use crate::domain::task::{AuthoritativeOrder, Relocation, Task, TaskPatch};
use crate::domain::wip::check_wip;
use crate::ports::{StoreError, StoreTx};

/// Neighbor keys for an insertion, given the destination list in order
/// without the moving task.
///
/// Neighbors that are not in `siblings` (other list, deleted) are ignored.
/// `after` wins over `before`: the gap is always between two adjacent rows,
/// so a stale pair of neighbors can never produce an inverted range.
pub(crate) fn resolve_gap(siblings: &[Task], before: Option<TaskId>, after: Option<TaskId>) -> Gap {
    let index_of = |id: Option<TaskId>| id.and_then(|id| siblings.iter().position(|t| t.id == id));

    match (index_of(after), index_of(before)) {
        (Some(i), _) => (
            Some(siblings[i].position.clone()),
            siblings.get(i + 1).map(|t| t.position.clone()),
        ),
        (None, Some(j)) => (
            j.checked_sub(1).map(|p| siblings[p].position.clone()),
            Some(siblings[j].position.clone()),
        ),
        (None, None) => (siblings.last().map(|t| t.position.clone()), None),
    }
}

/// A committed write conflict on some other row means a concurrent
/// reordering touched the destination; only our own row is a real conflict.
fn is_position_race(err: &StoreError, task_id: TaskId) -> bool {
    match err {
        StoreError::WriteConflict { task_id: other } => *other != task_id,
        other => other.is_position_race(),
    }
}

impl TaskService {
    /// Relocate a task to `input.to_list_id` between the given neighbors.
    #[instrument(skip_all, fields(task_id = %task_id, to_list_id = %input.to_list_id, user_id = %actor.user_id, expected_version = input.expected_version))]
    pub async fn move_task(
        &self,
        actor: &Actor,
        task_id: TaskId,
        input: MoveTaskInput,
    ) -> Result<MoveOutcome, BoardError> {
        actor.assert_can_write()?;
        actor.assert_board_writable()?;
        if input.before_task_id == Some(task_id) {
            return Err(BoardError::validation("beforeTaskId", "a task cannot be its own neighbor"));
        }
        if input.after_task_id == Some(task_id) {
            return Err(BoardError::validation("afterTaskId", "a task cannot be its own neighbor"));
        }

        let attempts = self.config.max_position_retries + 1;
        for attempt in 1..=attempts {
            let mut tx = self.store.begin().await?;
            let result = self.move_attempt(tx.as_mut(), actor, task_id, &input).await;

            match finish(tx, result).await {
                Ok((outcome, from_list_id)) => {
                    info!(
                        attempt,
                        version = outcome.task.version,
                        position = %outcome.task.position,
                        "task moved"
                    );
                    self.publish(
                        outcome.task.project_id,
                        DomainEvent::moved(
                            outcome.task.clone(),
                            from_list_id,
                            outcome.authoritative_order.clone(),
                        ),
                    )
                    .await;
                    return Ok(outcome);
                }
                Err(BoardError::Store(e)) if is_position_race(&e, task_id) => {
                    debug!(attempt, error = %e, "position race, retrying move");
                }
                Err(BoardError::Store(StoreError::WriteConflict { .. })) => {
                    return Err(self.latest_conflict(task_id, input.expected_version).await);
                }
                Err(e) => return Err(e),
            }
        }

        error!(attempts, "position retry budget exhausted");
        Err(BoardError::RetryExhausted {
            operation: "moveTask",
            attempts,
        })
    }

    /// One transactional attempt. Returns the outcome and the source list.
    async fn move_attempt(
        &self,
        tx: &mut dyn StoreTx,
        actor: &Actor,
        task_id: TaskId,
        input: &MoveTaskInput,
    ) -> Result<(MoveOutcome, ListId), BoardError> {
        let task = load_task(&mut *tx, actor, task_id).await?;
        if task.version != input.expected_version {
            return Err(BoardError::Conflict {
                expected: input.expected_version,
                latest: Box::new(task),
            });
        }
        assert_mutable(task.status)?;

        let to_list = tx
            .find_list(input.to_list_id)
            .await?
            .ok_or_else(|| BoardError::not_found("list", input.to_list_id))?;
        if to_list.project_id != task.project_id {
            return Err(BoardError::validation(
                "toListId",
                "target list must be in the same project",
            ));
        }
        if to_list.archived {
            return Err(BoardError::validation("toListId", "list is archived"));
        }

        let mut wip_override = None;
        if to_list.id != task.list_id {
            let active = tx.count_active_tasks(to_list.id, Some(task.id)).await?;
            let decision = check_wip(
                &to_list,
                active,
                "toListId",
                self.access.can_override_wip(actor),
                input.wip_override_reason.as_deref(),
            )?;
            wip_override = decision.override_metadata();
            if let Some(meta) = &wip_override {
                info!(list_id = %to_list.id, wip_override = %meta, "WIP limit overridden on move");
            }
        }

        let (before, after) = (input.before_task_id, input.after_task_id);
        let position = self
            .position_in(&mut *tx, actor, to_list.id, Some(task.id), move |siblings| {
                resolve_gap(siblings, before, after)
            })
            .await?;

        let patch = TaskPatch {
            relocation: Some(Relocation {
                board_id: to_list.board_id,
                list_id: to_list.id,
                position: position.clone(),
            }),
            updated_at: Some(self.clock.now()),
            ..TaskPatch::default()
        };
        let Some(moved) = tx
            .update_task_if_version(task.id, input.expected_version, &patch)
            .await?
        else {
            return Err(conflict_in_tx(&mut *tx, task.id, input.expected_version).await);
        };

        let ordered = tx.list_tasks(to_list.id).await?;
        let order = AuthoritativeOrder::from_sorted(to_list.id, &ordered);

        let metadata = serde_json::json!({
            "fromListId": task.list_id,
            "toListId": to_list.id,
            "position": position,
            "wipOverride": wip_override,
        });
        self.record_task_activity(&mut *tx, actor, task.id, ActivityAction::Move, metadata)
            .await?;

        Ok((
            MoveOutcome {
                task: moved,
                authoritative_order: order,
            },
            task.list_id,
        ))
    }
}
