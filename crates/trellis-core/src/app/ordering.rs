//! Position allocation inside a transaction, and list rebalancing.

use tracing::{debug, error, info, instrument, warn};

use crate::app::service::{TaskService, finish, load_list};
use crate::domain::access::Actor;
use crate::domain::activity::{ActivityAction, ActivityLogEntry};
use crate::domain::errors::BoardError;
use crate::domain::ids::{ListId, TaskId};
use crate::domain::position::{Position, PositionError, evenly_spaced, generate_between};
use crate::domain::task::{AuthoritativeOrder, Task};
use crate::ports::{StoreError, StoreTx};

/// Lower and upper neighbor keys of an insertion point.
pub(crate) type Gap = (Option<Position>, Option<Position>);

impl TaskService {
    /// New key for a task entering `list_id` at the gap chosen by `pick`.
    ///
    /// `pick` sees the list in order without `exclude`. If the gap is too deep
    /// for another key, the list is rebalanced in this transaction and `pick`
    /// runs again on the re-spaced list.
    pub(crate) async fn position_in<F>(
        &self,
        tx: &mut dyn StoreTx,
        actor: &Actor,
        list_id: ListId,
        exclude: Option<TaskId>,
        pick: F,
    ) -> Result<Position, BoardError>
    where
        F: Fn(&[Task]) -> Gap + Send + Sync,
    {
        let siblings = load_siblings(tx, list_id, exclude).await?;
        let (low, high) = pick(&siblings);
        match generate_between(low.as_ref(), high.as_ref()) {
            Ok(position) => Ok(position),
            Err(PositionError::Exhausted { .. }) => {
                self.rebalance_in_tx(tx, actor, list_id).await?;
                let siblings = load_siblings(tx, list_id, exclude).await?;
                let (low, high) = pick(&siblings);
                Ok(generate_between(low.as_ref(), high.as_ref())?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-space every task of `list_id` evenly. Versions are not bumped:
    /// positions are server-managed and clients address neighbors by id.
    pub(crate) async fn rebalance_in_tx(
        &self,
        tx: &mut dyn StoreTx,
        actor: &Actor,
        list_id: ListId,
    ) -> Result<Vec<Task>, BoardError> {
        let tasks = tx.list_tasks(list_id).await?;
        warn!(list_id = %list_id, tasks = tasks.len(), "rebalancing ordering keys");

        let positions: Vec<(TaskId, Position)> = tasks
            .iter()
            .map(|t| t.id)
            .zip(evenly_spaced(tasks.len()))
            .collect();
        tx.set_positions(list_id, positions).await?;

        let entry = ActivityLogEntry::for_list(
            self.ids.generate_activity_id(),
            actor.project_id,
            actor.user_id,
            list_id,
            ActivityAction::Rebalance,
            serde_json::json!({ "taskCount": tasks.len() }),
            self.clock.now(),
        );
        tx.insert_activity(entry).await?;

        Ok(tx.list_tasks(list_id).await?)
    }

    /// Maintenance: evenly re-space a list and return its new order.
    #[instrument(skip_all, fields(list_id = %list_id, user_id = %actor.user_id))]
    pub async fn rebalance_list(
        &self,
        actor: &Actor,
        list_id: ListId,
    ) -> Result<AuthoritativeOrder, BoardError> {
        actor.assert_can_write()?;
        actor.assert_board_writable()?;

        let attempts = self.config.max_position_retries + 1;
        for attempt in 1..=attempts {
            let mut tx = self.store.begin().await?;
            let result: Result<AuthoritativeOrder, BoardError> = async {
                let list = load_list(tx.as_mut(), actor, list_id).await?;
                if list.archived {
                    return Err(BoardError::validation("listId", "list is archived"));
                }
                let tasks = self.rebalance_in_tx(tx.as_mut(), actor, list.id).await?;
                Ok(AuthoritativeOrder::from_sorted(list.id, &tasks))
            }
            .await;

            match finish(tx, result).await {
                Ok(order) => {
                    info!(tasks = order.tasks.len(), attempt, "list rebalanced");
                    return Ok(order);
                }
                Err(BoardError::Store(e))
                    if e.is_position_race() || matches!(e, StoreError::WriteConflict { .. }) =>
                {
                    debug!(attempt, error = %e, "list changed during rebalance, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        error!(attempts, "retry budget exhausted while rebalancing list");
        Err(BoardError::RetryExhausted {
            operation: "rebalanceList",
            attempts,
        })
    }
}

async fn load_siblings(
    tx: &mut dyn StoreTx,
    list_id: ListId,
    exclude: Option<TaskId>,
) -> Result<Vec<Task>, StoreError> {
    let mut tasks = tx.list_tasks(list_id).await?;
    if let Some(exclude) = exclude {
        tasks.retain(|t| t.id != exclude);
    }
    Ok(tasks)
}
