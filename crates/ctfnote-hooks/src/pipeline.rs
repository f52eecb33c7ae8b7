//! Mutation pipeline host: PreCommit hooks, the store commit, then PostCommit
//! hooks handed to the effect executor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ctfnote_core::{
    Ctf, CtfId, CtfPatch, CtfStore, Invitation, NewTask, ProfileId, StoreError, StoreResult, Task,
    TaskId, TaskPatch,
};
use ctfnote_discord::WorkspaceError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::executor::EffectExecutor;

/// Priority used by the Discord sync hooks.
pub const DISCORD_HOOK_PRIORITY: i32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationName {
    CreateTask,
    UpdateTask,
    DeleteTask,
    StartWorkingOn,
    StopWorkingOn,
    UpdateCtf,
    CreateInvitation,
    DeleteInvitation,
}

impl MutationName {
    pub const ALL: [MutationName; 8] = [
        Self::CreateTask,
        Self::UpdateTask,
        Self::DeleteTask,
        Self::StartWorkingOn,
        Self::StopWorkingOn,
        Self::UpdateCtf,
        Self::CreateInvitation,
        Self::DeleteInvitation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateTask => "createTask",
            Self::UpdateTask => "updateTask",
            Self::DeleteTask => "deleteTask",
            Self::StartWorkingOn => "startWorkingOn",
            Self::StopWorkingOn => "stopWorkingOn",
            Self::UpdateCtf => "updateCtf",
            Self::CreateInvitation => "createInvitation",
            Self::DeleteInvitation => "deleteInvitation",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RowPatchInput<P> {
    id: i64,
    patch: P,
}

#[derive(Debug, Deserialize)]
struct RowIdInput {
    id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkOnTaskInput {
    task_id: TaskId,
}

#[derive(Debug, Deserialize)]
struct CreateInvitationInput {
    invitation: Invitation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateTask(NewTask),
    UpdateTask { id: TaskId, patch: TaskPatch },
    DeleteTask { id: TaskId },
    StartWorkingOn { task_id: TaskId },
    StopWorkingOn { task_id: TaskId },
    UpdateCtf { id: CtfId, patch: CtfPatch },
    CreateInvitation(Invitation),
    DeleteInvitation(Invitation),
}

impl Mutation {
    /// Decodes a mutation's GraphQL-style `input` object.
    pub fn from_input(name: MutationName, input: Value) -> Result<Self, serde_json::Error> {
        Ok(match name {
            MutationName::CreateTask => Self::CreateTask(serde_json::from_value(input)?),
            MutationName::UpdateTask => {
                let input: RowPatchInput<TaskPatch> = serde_json::from_value(input)?;
                Self::UpdateTask {
                    id: input.id,
                    patch: input.patch,
                }
            }
            MutationName::DeleteTask => {
                let input: RowIdInput = serde_json::from_value(input)?;
                Self::DeleteTask { id: input.id }
            }
            MutationName::StartWorkingOn => {
                let input: WorkOnTaskInput = serde_json::from_value(input)?;
                Self::StartWorkingOn {
                    task_id: input.task_id,
                }
            }
            MutationName::StopWorkingOn => {
                let input: WorkOnTaskInput = serde_json::from_value(input)?;
                Self::StopWorkingOn {
                    task_id: input.task_id,
                }
            }
            MutationName::UpdateCtf => {
                let input: RowPatchInput<CtfPatch> = serde_json::from_value(input)?;
                Self::UpdateCtf {
                    id: input.id,
                    patch: input.patch,
                }
            }
            MutationName::CreateInvitation => {
                let input: CreateInvitationInput = serde_json::from_value(input)?;
                Self::CreateInvitation(input.invitation)
            }
            MutationName::DeleteInvitation => {
                Self::DeleteInvitation(serde_json::from_value(input)?)
            }
        })
    }

    pub fn name(&self) -> MutationName {
        match self {
            Self::CreateTask(_) => MutationName::CreateTask,
            Self::UpdateTask { .. } => MutationName::UpdateTask,
            Self::DeleteTask { .. } => MutationName::DeleteTask,
            Self::StartWorkingOn { .. } => MutationName::StartWorkingOn,
            Self::StopWorkingOn { .. } => MutationName::StopWorkingOn,
            Self::UpdateCtf { .. } => MutationName::UpdateCtf,
            Self::CreateInvitation(_) => MutationName::CreateInvitation,
            Self::DeleteInvitation(_) => MutationName::DeleteInvitation,
        }
    }
}

/// Claims of the authenticated caller, as extracted upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    #[serde(default)]
    pub user_id: Option<ProfileId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationContext {
    pub claims: JwtClaims,
}

impl MutationContext {
    pub fn for_user(user_id: ProfileId) -> Self {
        Self {
            claims: JwtClaims {
                user_id: Some(user_id),
            },
        }
    }
}

/// Rows as they were before the commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorState {
    pub task: Option<Task>,
    pub ctf: Option<Ctf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MutationOutcome {
    Task(Task),
    Ctf(Ctf),
    Invitation(Invitation),
    #[serde(rename_all = "camelCase")]
    WorkingOn {
        task_id: TaskId,
        profile_id: ProfileId,
        working: bool,
    },
}

/// Everything a hook sees about one mutation.
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub mutation: Mutation,
    pub context: MutationContext,
    pub prior: PriorState,
    /// `None` while PreCommit hooks run.
    pub outcome: Option<MutationOutcome>,
}

impl HookEvent {
    pub fn name(&self) -> MutationName {
        self.mutation.name()
    }

    pub fn committed_task(&self) -> Option<&Task> {
        match &self.outcome {
            Some(MutationOutcome::Task(task)) => Some(task),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error("{} side effect(s) failed: {}", .0.len(), .0.join(", "))]
    Effects(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    PreCommit,
    PostCommit,
}

#[async_trait]
pub trait MutationHook: Send + Sync {
    fn label(&self) -> &str;
    async fn run(&self, event: &HookEvent) -> Result<(), HookError>;
}

#[derive(Clone)]
pub struct HookRegistration {
    pub stage: HookStage,
    pub priority: i32,
    pub hook: Arc<dyn MutationHook>,
}

/// Source of hooks. Called once per mutation name while the registry is
/// built; an empty vector opts out of that mutation.
pub trait HookProvider {
    fn register(&self, mutation: MutationName) -> Vec<HookRegistration>;
}

#[derive(Clone, Default)]
pub struct HookRegistry {
    by_mutation: HashMap<MutationName, Vec<HookRegistration>>,
}

impl HookRegistry {
    pub fn build(providers: &[&dyn HookProvider]) -> Self {
        let mut by_mutation = HashMap::new();
        for name in MutationName::ALL {
            let mut registrations: Vec<HookRegistration> = providers
                .iter()
                .flat_map(|provider| provider.register(name))
                .collect();
            if registrations.is_empty() {
                continue;
            }
            // stable: equal priorities keep registration order
            registrations.sort_by_key(|registration| registration.priority);
            by_mutation.insert(name, registrations);
        }
        Self { by_mutation }
    }

    pub fn is_empty(&self) -> bool {
        self.by_mutation.is_empty()
    }

    pub fn hooks(&self, name: MutationName, stage: HookStage) -> Vec<Arc<dyn MutationHook>> {
        self.by_mutation
            .get(&name)
            .map(|registrations| {
                registrations
                    .iter()
                    .filter(|registration| registration.stage == stage)
                    .map(|registration| registration.hook.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub struct MutationPipeline {
    store: Arc<dyn CtfStore>,
    registry: HookRegistry,
    executor: Arc<EffectExecutor>,
}

impl MutationPipeline {
    pub fn new(
        store: Arc<dyn CtfStore>,
        registry: HookRegistry,
        executor: Arc<EffectExecutor>,
    ) -> Self {
        Self {
            store,
            registry,
            executor,
        }
    }

    pub fn executor(&self) -> &Arc<EffectExecutor> {
        &self.executor
    }

    /// Runs one mutation. Only store errors fail it; hook failures are
    /// logged and counted by the executor.
    pub async fn execute(
        &self,
        mutation: Mutation,
        context: MutationContext,
    ) -> StoreResult<MutationOutcome> {
        let name = mutation.name();
        let prior = self.capture_prior(&mutation).await?;
        let mut event = HookEvent {
            mutation,
            context,
            prior,
            outcome: None,
        };

        for hook in self.registry.hooks(name, HookStage::PreCommit) {
            self.executor.run_inline(hook.as_ref(), &event).await;
        }

        let outcome = self.commit(&event.mutation, &event.context).await?;
        tracing::debug!(mutation = name.as_str(), "mutation committed");

        let post_commit = self.registry.hooks(name, HookStage::PostCommit);
        if !post_commit.is_empty() {
            event.outcome = Some(outcome.clone());
            self.executor.submit(Arc::new(event), post_commit).await;
        }
        Ok(outcome)
    }

    async fn capture_prior(&self, mutation: &Mutation) -> StoreResult<PriorState> {
        let mut prior = PriorState::default();
        match mutation {
            Mutation::UpdateTask { id, .. } | Mutation::DeleteTask { id } => {
                prior.task = Some(self.store.task(*id).await?);
            }
            Mutation::UpdateCtf { id, .. } => {
                prior.ctf = Some(self.store.ctf(*id).await?);
            }
            _ => {}
        }
        Ok(prior)
    }

    async fn commit(
        &self,
        mutation: &Mutation,
        context: &MutationContext,
    ) -> StoreResult<MutationOutcome> {
        let outcome = match mutation {
            Mutation::CreateTask(task) => {
                MutationOutcome::Task(self.store.create_task(task.clone()).await?)
            }
            Mutation::UpdateTask { id, patch } => {
                MutationOutcome::Task(self.store.update_task(*id, patch).await?)
            }
            Mutation::DeleteTask { id } => {
                MutationOutcome::Task(self.store.delete_task(*id).await?)
            }
            Mutation::StartWorkingOn { task_id } => {
                let profile_id = acting_profile(context, mutation.name())?;
                self.store.start_working_on(*task_id, profile_id).await?;
                MutationOutcome::WorkingOn {
                    task_id: *task_id,
                    profile_id,
                    working: true,
                }
            }
            Mutation::StopWorkingOn { task_id } => {
                let profile_id = acting_profile(context, mutation.name())?;
                self.store.stop_working_on(*task_id, profile_id).await?;
                MutationOutcome::WorkingOn {
                    task_id: *task_id,
                    profile_id,
                    working: false,
                }
            }
            Mutation::UpdateCtf { id, patch } => {
                MutationOutcome::Ctf(self.store.update_ctf(*id, patch).await?)
            }
            Mutation::CreateInvitation(invitation) => {
                MutationOutcome::Invitation(self.store.create_invitation(*invitation).await?)
            }
            Mutation::DeleteInvitation(invitation) => {
                MutationOutcome::Invitation(self.store.delete_invitation(*invitation).await?)
            }
        };
        Ok(outcome)
    }
}

fn acting_profile(context: &MutationContext, name: MutationName) -> StoreResult<ProfileId> {
    context.claims.user_id.ok_or_else(|| {
        StoreError::InvalidInput(format!("{} requires an authenticated user", name.as_str()))
    })
}
