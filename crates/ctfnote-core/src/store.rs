//! Data-layer contracts consumed by the sync hooks and the archive workflow.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    Ctf, CtfId, CtfPatch, Invitation, NewTask, Profile, ProfileId, Task, TaskId, TaskPatch,
};

/// Result type for data-layer operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ctf {0} not found")]
    CtfNotFound(CtfId),
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    #[error("profile {0} not found")]
    ProfileNotFound(ProfileId),
    #[error("invitation for profile {profile_id} on ctf {ctf_id} not found")]
    InvitationNotFound { ctf_id: CtfId, profile_id: ProfileId },
    #[error("task title '{title}' already exists in ctf {ctf_id}")]
    DuplicateTaskTitle { ctf_id: CtfId, title: String },
    #[error("ctf title '{0}' already exists")]
    DuplicateCtfTitle(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CtfNotFound(_)
                | Self::TaskNotFound(_)
                | Self::ProfileNotFound(_)
                | Self::InvitationNotFound { .. }
        )
    }
}

/// Async access to CTFs, tasks, profiles and invitations.
///
/// By-id lookups surface a missing row as a `*NotFound` error; callers inside
/// hooks treat that as a failed side effect, never as a failed mutation.
#[async_trait]
pub trait CtfStore: Send + Sync {
    async fn ctf(&self, id: CtfId) -> StoreResult<Ctf>;
    async fn ctf_by_title(&self, title: &str) -> StoreResult<Option<Ctf>>;
    async fn ctfs(&self) -> StoreResult<Vec<Ctf>>;
    async fn create_ctf(&self, title: &str) -> StoreResult<Ctf>;
    async fn update_ctf(&self, id: CtfId, patch: &CtfPatch) -> StoreResult<Ctf>;

    async fn task(&self, id: TaskId) -> StoreResult<Task>;
    async fn tasks_for_ctf(&self, ctf_id: CtfId) -> StoreResult<Vec<Task>>;
    async fn create_task(&self, task: NewTask) -> StoreResult<Task>;
    async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> StoreResult<Task>;
    async fn delete_task(&self, id: TaskId) -> StoreResult<Task>;

    async fn profile(&self, id: ProfileId) -> StoreResult<Profile>;
    async fn create_profile(&self, username: &str, discord_id: Option<&str>)
        -> StoreResult<Profile>;

    async fn create_invitation(&self, invitation: Invitation) -> StoreResult<Invitation>;
    async fn delete_invitation(&self, invitation: Invitation) -> StoreResult<Invitation>;
    async fn invitations_for_ctf(&self, ctf_id: CtfId) -> StoreResult<Vec<Invitation>>;

    async fn start_working_on(&self, task_id: TaskId, profile_id: ProfileId) -> StoreResult<()>;
    async fn stop_working_on(&self, task_id: TaskId, profile_id: ProfileId) -> StoreResult<()>;
    async fn working_on(&self, task_id: TaskId) -> StoreResult<Vec<ProfileId>>;
}

/// Kind of workspace object a database row is linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    CtfCategory,
    CtfRole,
    TaskChannel,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CtfCategory => "ctf_category",
            Self::CtfRole => "ctf_role",
            Self::TaskChannel => "task_channel",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ctf_category" => Some(Self::CtfCategory),
            "ctf_role" => Some(Self::CtfRole),
            "task_channel" => Some(Self::TaskChannel),
            _ => None,
        }
    }
}

/// Id mapping between database rows and workspace objects.
///
/// Links are hints: a stale link (object deleted or re-typed out of band) is
/// ignored by the locator, which then falls back to the name join.
#[async_trait]
pub trait WorkspaceLinks: Send + Sync {
    async fn link(&self, kind: LinkKind, entity_id: i64) -> StoreResult<Option<String>>;
    async fn set_link(&self, kind: LinkKind, entity_id: i64, object_id: &str) -> StoreResult<()>;
    async fn clear_link(&self, kind: LinkKind, entity_id: i64) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_kind_round_trips_through_db_label() {
        for kind in [LinkKind::CtfCategory, LinkKind::CtfRole, LinkKind::TaskChannel] {
            assert_eq!(LinkKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(LinkKind::parse("member"), None);
    }

    #[test]
    fn not_found_classification_excludes_conflicts() {
        assert!(StoreError::TaskNotFound(3).is_not_found());
        assert!(!StoreError::DuplicateCtfTitle("x".to_string()).is_not_found());
    }
}
