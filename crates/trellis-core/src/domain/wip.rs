//! WIP limit decision.
//!
//! Pure: the caller counts active tasks inside its transaction and asks
//! whether one more may be added.

use serde::Serialize;

use super::errors::BoardError;
use super::task::TaskList;

/// How an addition to a limited list was allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum WipDecision {
    WithinLimit,
    /// At or over the limit, allowed by a privileged actor with a reason.
    Overridden {
        reason: String,
        limit: u32,
        active: usize,
    },
}

impl WipDecision {
    /// Activity metadata fragment for an override, if any.
    pub fn override_metadata(&self) -> Option<serde_json::Value> {
        match self {
            WipDecision::WithinLimit => None,
            WipDecision::Overridden {
                reason,
                limit,
                active,
            } => Some(serde_json::json!({
                "reason": reason,
                "limit": limit,
                "activeCount": active,
            })),
        }
    }
}

/// Decide whether `list` may take one more active task.
///
/// `active` must exclude the task being moved when it already lives in `list`.
/// An override needs both `can_override` and a non-blank `reason`.
pub fn check_wip(
    list: &TaskList,
    active: usize,
    field: &'static str,
    can_override: bool,
    reason: Option<&str>,
) -> Result<WipDecision, BoardError> {
    let Some(limit) = list.wip_limit else {
        return Ok(WipDecision::WithinLimit);
    };
    if active < limit as usize {
        return Ok(WipDecision::WithinLimit);
    }
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) if can_override => Ok(WipDecision::Overridden {
            reason: reason.to_string(),
            limit,
            active,
        }),
        _ => Err(BoardError::WipLimitExceeded {
            field,
            list_id: list.id,
            limit,
            active,
        }),
    }
}
