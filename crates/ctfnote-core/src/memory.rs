//! In-memory data layer for tests and local experimentation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{
    Ctf, CtfId, CtfPatch, Invitation, NewTask, Profile, ProfileId, Task, TaskId, TaskPatch,
};
use crate::store::{CtfStore, LinkKind, StoreError, StoreResult, WorkspaceLinks};

#[derive(Debug, Default)]
pub struct InMemoryCtfStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: i64,
    ctfs: BTreeMap<CtfId, Ctf>,
    tasks: BTreeMap<TaskId, Task>,
    profiles: BTreeMap<ProfileId, Profile>,
    invitations: BTreeSet<(CtfId, ProfileId)>,
    working_on: BTreeSet<(TaskId, ProfileId)>,
    links: HashMap<(LinkKind, i64), String>,
}

impl StoreInner {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_unique_task_title(
        &self,
        ctf_id: CtfId,
        title: &str,
        except: Option<TaskId>,
    ) -> StoreResult<()> {
        let taken = self
            .tasks
            .values()
            .any(|task| task.ctf_id == ctf_id && task.title == title && Some(task.id) != except);
        if taken {
            return Err(StoreError::DuplicateTaskTitle {
                ctf_id,
                title: title.to_string(),
            });
        }
        Ok(())
    }
}

impl InMemoryCtfStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn require_title(title: &str) -> StoreResult<()> {
    if title.trim().is_empty() {
        return Err(StoreError::InvalidInput("title cannot be empty".to_string()));
    }
    Ok(())
}

#[async_trait]
impl CtfStore for InMemoryCtfStore {
    async fn ctf(&self, id: CtfId) -> StoreResult<Ctf> {
        let inner = self.inner.read().await;
        inner.ctfs.get(&id).cloned().ok_or(StoreError::CtfNotFound(id))
    }

    async fn ctf_by_title(&self, title: &str) -> StoreResult<Option<Ctf>> {
        let inner = self.inner.read().await;
        Ok(inner.ctfs.values().find(|ctf| ctf.title == title).cloned())
    }

    async fn ctfs(&self) -> StoreResult<Vec<Ctf>> {
        let inner = self.inner.read().await;
        Ok(inner.ctfs.values().cloned().collect())
    }

    async fn create_ctf(&self, title: &str) -> StoreResult<Ctf> {
        require_title(title)?;
        let mut inner = self.inner.write().await;
        if inner.ctfs.values().any(|ctf| ctf.title == title) {
            return Err(StoreError::DuplicateCtfTitle(title.to_string()));
        }
        let ctf = Ctf {
            id: inner.allocate_id(),
            title: title.to_string(),
        };
        inner.ctfs.insert(ctf.id, ctf.clone());
        Ok(ctf)
    }

    async fn update_ctf(&self, id: CtfId, patch: &CtfPatch) -> StoreResult<Ctf> {
        let mut inner = self.inner.write().await;
        if let Some(title) = &patch.title {
            require_title(title)?;
            if inner
                .ctfs
                .values()
                .any(|ctf| ctf.id != id && &ctf.title == title)
            {
                return Err(StoreError::DuplicateCtfTitle(title.clone()));
            }
        }
        let ctf = inner.ctfs.get_mut(&id).ok_or(StoreError::CtfNotFound(id))?;
        if let Some(title) = &patch.title {
            ctf.title = title.clone();
        }
        Ok(ctf.clone())
    }

    async fn task(&self, id: TaskId) -> StoreResult<Task> {
        let inner = self.inner.read().await;
        inner.tasks.get(&id).cloned().ok_or(StoreError::TaskNotFound(id))
    }

    async fn tasks_for_ctf(&self, ctf_id: CtfId) -> StoreResult<Vec<Task>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tasks
            .values()
            .filter(|task| task.ctf_id == ctf_id)
            .cloned()
            .collect())
    }

    async fn create_task(&self, task: NewTask) -> StoreResult<Task> {
        require_title(&task.title)?;
        let mut inner = self.inner.write().await;
        if !inner.ctfs.contains_key(&task.ctf_id) {
            return Err(StoreError::CtfNotFound(task.ctf_id));
        }
        inner.ensure_unique_task_title(task.ctf_id, &task.title, None)?;
        let created = Task {
            id: inner.allocate_id(),
            ctf_id: task.ctf_id,
            title: task.title,
            description: task.description,
            flag: task.flag,
            pad_url: task.pad_url,
        };
        inner.tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> StoreResult<Task> {
        let mut inner = self.inner.write().await;
        let mut task = inner
            .tasks
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(id))?;
        if let Some(title) = &patch.title {
            require_title(title)?;
            inner.ensure_unique_task_title(task.ctf_id, title, Some(id))?;
        }
        patch.apply(&mut task);
        inner.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn delete_task(&self, id: TaskId) -> StoreResult<Task> {
        let mut inner = self.inner.write().await;
        let task = inner.tasks.remove(&id).ok_or(StoreError::TaskNotFound(id))?;
        inner.working_on.retain(|(task_id, _)| *task_id != id);
        Ok(task)
    }

    async fn profile(&self, id: ProfileId) -> StoreResult<Profile> {
        let inner = self.inner.read().await;
        inner
            .profiles
            .get(&id)
            .cloned()
            .ok_or(StoreError::ProfileNotFound(id))
    }

    async fn create_profile(
        &self,
        username: &str,
        discord_id: Option<&str>,
    ) -> StoreResult<Profile> {
        if username.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "username cannot be empty".to_string(),
            ));
        }
        let mut inner = self.inner.write().await;
        let profile = Profile {
            id: inner.allocate_id(),
            username: username.to_string(),
            discord_id: discord_id.map(str::to_string),
        };
        inner.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn create_invitation(&self, invitation: Invitation) -> StoreResult<Invitation> {
        let mut inner = self.inner.write().await;
        if !inner.ctfs.contains_key(&invitation.ctf_id) {
            return Err(StoreError::CtfNotFound(invitation.ctf_id));
        }
        if !inner.profiles.contains_key(&invitation.profile_id) {
            return Err(StoreError::ProfileNotFound(invitation.profile_id));
        }
        inner
            .invitations
            .insert((invitation.ctf_id, invitation.profile_id));
        Ok(invitation)
    }

    async fn delete_invitation(&self, invitation: Invitation) -> StoreResult<Invitation> {
        let mut inner = self.inner.write().await;
        if !inner
            .invitations
            .remove(&(invitation.ctf_id, invitation.profile_id))
        {
            return Err(StoreError::InvitationNotFound {
                ctf_id: invitation.ctf_id,
                profile_id: invitation.profile_id,
            });
        }
        Ok(invitation)
    }

    async fn invitations_for_ctf(&self, ctf_id: CtfId) -> StoreResult<Vec<Invitation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .invitations
            .iter()
            .filter(|(invited_ctf, _)| *invited_ctf == ctf_id)
            .map(|(ctf_id, profile_id)| Invitation {
                ctf_id: *ctf_id,
                profile_id: *profile_id,
            })
            .collect())
    }

    async fn start_working_on(&self, task_id: TaskId, profile_id: ProfileId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(&task_id) {
            return Err(StoreError::TaskNotFound(task_id));
        }
        inner.working_on.insert((task_id, profile_id));
        Ok(())
    }

    async fn stop_working_on(&self, task_id: TaskId, profile_id: ProfileId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(&task_id) {
            return Err(StoreError::TaskNotFound(task_id));
        }
        inner.working_on.remove(&(task_id, profile_id));
        Ok(())
    }

    async fn working_on(&self, task_id: TaskId) -> StoreResult<Vec<ProfileId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .working_on
            .iter()
            .filter(|(working_task, _)| *working_task == task_id)
            .map(|(_, profile_id)| *profile_id)
            .collect())
    }
}

#[async_trait]
impl WorkspaceLinks for InMemoryCtfStore {
    async fn link(&self, kind: LinkKind, entity_id: i64) -> StoreResult<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner.links.get(&(kind, entity_id)).cloned())
    }

    async fn set_link(&self, kind: LinkKind, entity_id: i64, object_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .links
            .insert((kind, entity_id), object_id.to_string());
        Ok(())
    }

    async fn clear_link(&self, kind: LinkKind, entity_id: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.links.remove(&(kind, entity_id));
        Ok(())
    }
}
