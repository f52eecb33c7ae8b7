use std::sync::Arc;

use ctfnote_core::{CtfStore, Invitation};
use ctfnote_discord::LinkedLocator;

use crate::pipeline::HookError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChange {
    Grant,
    Revoke,
}

/// Keeps a member's CTF role in line with their invitation.
#[derive(Clone)]
pub struct RoleReconciler {
    store: Arc<dyn CtfStore>,
    locator: LinkedLocator,
}

impl RoleReconciler {
    pub fn new(store: Arc<dyn CtfStore>, locator: LinkedLocator) -> Self {
        Self { store, locator }
    }

    /// A profile without a linked Discord account, or a CTF without a role,
    /// leaves nothing to do.
    pub async fn apply(&self, invitation: Invitation, change: RoleChange) -> Result<(), HookError> {
        let ctf = self.store.ctf(invitation.ctf_id).await?;
        let profile = self.store.profile(invitation.profile_id).await?;
        let Some(member_id) = profile.discord_id.as_deref().filter(|id| !id.is_empty()) else {
            tracing::debug!(profile_id = profile.id, "profile has no discord account");
            return Ok(());
        };
        let Some(role) = self.locator.event_role(&ctf).await? else {
            tracing::debug!(ctf = %ctf.title, "no discord role for ctf");
            return Ok(());
        };

        let workspace = self.locator.workspace();
        match change {
            RoleChange::Grant => workspace.add_member_role(member_id, &role.id).await?,
            RoleChange::Revoke => workspace.remove_member_role(member_id, &role.id).await?,
        }
        tracing::info!(
            ctf = %ctf.title,
            profile_id = profile.id,
            role_id = %role.id,
            ?change,
            "reconciled ctf role"
        );
        Ok(())
    }
}
