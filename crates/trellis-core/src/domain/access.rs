//! Resolved access context of the caller.
//!
//! Resolution (session -> project membership -> role) happens outside this
//! crate; the service only receives the result.

use serde::{Deserialize, Serialize};

use super::errors::BoardError;
use super::ids::{BoardId, ProjectId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    Viewer,
    Member,
    Admin,
    Owner,
}

impl ProjectRole {
    pub fn can_write(self) -> bool {
        self >= ProjectRole::Member
    }
}

/// Who is acting, in which project, with which role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub board_id: BoardId,
    #[serde(default)]
    pub board_archived: bool,
    pub role: ProjectRole,
}

impl Actor {
    pub(crate) fn assert_can_write(&self) -> Result<(), BoardError> {
        if self.role.can_write() {
            Ok(())
        } else {
            Err(BoardError::validation("role", "write access required"))
        }
    }

    pub(crate) fn assert_board_writable(&self) -> Result<(), BoardError> {
        if self.board_archived {
            Err(BoardError::validation("boardId", "board is archived"))
        } else {
            Ok(())
        }
    }
}
