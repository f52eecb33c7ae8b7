//! Hooks mirroring task, CTF and invitation mutations onto the Discord guild.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use ctfnote_core::{Ctf, CtfStore, Invitation, LinkKind, NewTask, Task, TaskId};
use ctfnote_discord::{
    ChannelEdit, LinkedLocator, NewChannel, WorkspaceChannel, WorkspaceError,
    DEFAULT_TALK_CHANNEL_NAME,
};

use crate::pipeline::{
    HookError, HookEvent, HookProvider, HookRegistration, HookStage, Mutation, MutationHook,
    MutationName, DISCORD_HOOK_PRIORITY,
};
use crate::role_reconciler::{RoleChange, RoleReconciler};

/// Discord refuses more than 50 channels in one category.
pub const MAX_CHANNELS_PER_CATEGORY: usize = 50;

#[derive(Debug, Clone)]
pub struct DiscordSyncConfig {
    pub talk_channel_name: String,
    pub max_channels_per_category: usize,
}

impl Default for DiscordSyncConfig {
    fn default() -> Self {
        Self {
            talk_channel_name: DEFAULT_TALK_CHANNEL_NAME.to_string(),
            max_channels_per_category: MAX_CHANNELS_PER_CATEGORY,
        }
    }
}

pub fn solved_channel_name(title: &str) -> String {
    format!("solved-{title}")
}

pub fn deleted_channel_name(title: &str) -> String {
    format!("{title}-deleted")
}

fn channel_name_for(task: &Task) -> String {
    if task.is_solved() {
        solved_channel_name(&task.title)
    } else {
        task.title.clone()
    }
}

/// Collects the labels of side effects that failed within one hook run.
#[derive(Default)]
struct EffectLog {
    failed: Vec<String>,
}

impl EffectLog {
    async fn attempt<F>(&mut self, label: &str, effect: F)
    where
        F: Future<Output = Result<(), WorkspaceError>>,
    {
        if let Err(error) = effect.await {
            tracing::warn!(effect = label, %error, "discord side effect failed");
            self.failed.push(label.to_string());
        }
    }

    fn finish(self) -> Result<(), HookError> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(HookError::Effects(self.failed))
        }
    }
}

pub struct DiscordSync {
    store: Arc<dyn CtfStore>,
    locator: LinkedLocator,
    reconciler: RoleReconciler,
    config: DiscordSyncConfig,
}

impl DiscordSync {
    pub fn new(
        store: Arc<dyn CtfStore>,
        locator: LinkedLocator,
        config: DiscordSyncConfig,
    ) -> Self {
        let reconciler = RoleReconciler::new(store.clone(), locator.clone());
        Self {
            store,
            locator,
            reconciler,
            config,
        }
    }

    async fn task_channel(
        &self,
        task: &Task,
    ) -> Result<Option<(Ctf, WorkspaceChannel)>, HookError> {
        let ctf = self.store.ctf(task.ctf_id).await?;
        let categories = self.locator.event_categories(&ctf).await?;
        let channel = self.locator.task_channel(task, &categories).await?;
        if channel.is_none() {
            tracing::debug!(task_id = task.id, title = %task.title, "no discord channel for task");
        }
        Ok(channel.map(|channel| (ctf, channel)))
    }

    async fn on_create_task(&self, input: &NewTask, task: &Task) -> Result<(), HookError> {
        let ctf = self.store.ctf(input.ctf_id).await?;
        let categories = self.locator.event_categories(&ctf).await?;
        if categories.is_empty() {
            tracing::debug!(ctf = %ctf.title, "no discord category for ctf");
            return Ok(());
        }

        let mut log = EffectLog::default();
        let workspace = self.locator.workspace();
        let channels = workspace.channels().await?;
        let limit = self.config.max_channels_per_category;
        let with_room = categories.iter().find(|category| {
            channels
                .iter()
                .filter(|channel| channel.parent_id.as_deref() == Some(category.id.as_str()))
                .count()
                < limit
        });
        let parent = match with_room {
            Some(category) => Some(category.clone()),
            None => match workspace.create_channel(NewChannel::category(&ctf.title)).await {
                Ok(category) => {
                    tracing::info!(
                        ctf = %ctf.title,
                        category_id = %category.id,
                        "opened overflow category"
                    );
                    Some(category)
                }
                Err(error) => {
                    tracing::warn!(
                        effect = "create category",
                        %error,
                        "discord side effect failed"
                    );
                    log.failed.push("create category".to_string());
                    None
                }
            },
        };

        if let Some(parent) = parent {
            match workspace
                .create_channel(NewChannel::text(&task.title, &task.title, &parent.id))
                .await
            {
                Ok(channel) => {
                    self.locator
                        .remember(LinkKind::TaskChannel, task.id, &channel.id)
                        .await;
                }
                Err(error) => {
                    tracing::warn!(effect = "create channel", %error, "discord side effect failed");
                    log.failed.push("create channel".to_string());
                }
            }
        }

        if let Some(talk) = self
            .locator
            .talk_channel(&categories, &self.config.talk_channel_name)
            .await?
        {
            let notice = format!("New task created: {}", task.title);
            log.attempt("new task notice", workspace.send_message(&talk.id, &notice))
                .await;
        }
        log.finish()
    }

    async fn on_delete_task(&self, deleted: &Task) -> Result<(), HookError> {
        let Some((_, channel)) = self.task_channel(deleted).await? else {
            return Ok(());
        };
        let mut log = EffectLog::default();
        let name = deleted_channel_name(&deleted.title);
        log.attempt("mark channel deleted", async {
            self.locator
                .workspace()
                .edit_channel(&channel.id, ChannelEdit::rename(&name))
                .await
                .map(|_| ())
        })
        .await;
        self.locator.forget(LinkKind::TaskChannel, deleted.id).await;
        log.finish()
    }

    async fn on_update_task(&self, before: &Task, after: &Task) -> Result<(), HookError> {
        let solved = !before.is_solved() && after.is_solved();
        let unsolved = before.is_solved() && !after.is_solved();
        let retitled = before.title != after.title;
        let described = before.description != after.description;
        if !(solved || unsolved || retitled || described) {
            return Ok(());
        }

        // the channel still carries the pre-commit title as its topic
        let Some((_, channel)) = self.task_channel(before).await? else {
            return Ok(());
        };
        let workspace = self.locator.workspace();
        let mut log = EffectLog::default();

        if solved {
            let notice = format!("{} is solved!", after.title);
            log.attempt("solved notice", workspace.send_message(&channel.id, &notice))
                .await;
        }
        if solved || unsolved || retitled {
            let edit = ChannelEdit {
                name: Some(channel_name_for(after)),
                topic: retitled.then(|| after.title.clone()),
            };
            log.attempt("rename channel", async {
                workspace.edit_channel(&channel.id, edit).await.map(|_| ())
            })
            .await;
        }
        if described {
            let notice = format!("Description changed:\n{}", after.description);
            log.attempt(
                "description notice",
                workspace.send_message(&channel.id, &notice),
            )
            .await;
        }
        log.finish()
    }

    async fn on_working_on(
        &self,
        event: &HookEvent,
        task_id: TaskId,
        started: bool,
    ) -> Result<(), HookError> {
        let Some(user_id) = event.context.claims.user_id else {
            tracing::debug!(task_id, "working-on change without an acting user");
            return Ok(());
        };
        let profile = self.store.profile(user_id).await?;
        let task = self.store.task(task_id).await?;
        let Some((_, channel)) = self.task_channel(&task).await? else {
            return Ok(());
        };
        let notice = if started {
            format!("{} is working on this task!", profile.username)
        } else {
            format!("{} stopped working on this task!", profile.username)
        };
        let mut log = EffectLog::default();
        log.attempt(
            "working-on notice",
            self.locator.workspace().send_message(&channel.id, &notice),
        )
        .await;
        log.finish()
    }

    /// Renames the CTF's categories and role before the commit so that
    /// lookups later in the same cycle already see the new title.
    async fn on_update_ctf(&self, before: &Ctf, new_title: &str) -> Result<(), HookError> {
        if before.title == new_title {
            return Ok(());
        }
        let workspace = self.locator.workspace();
        let mut log = EffectLog::default();
        for category in self.locator.event_categories(before).await? {
            log.attempt("rename category", async {
                workspace
                    .edit_channel(&category.id, ChannelEdit::rename(new_title))
                    .await
                    .map(|_| ())
            })
            .await;
        }
        if let Some(role) = self.locator.event_role(before).await? {
            log.attempt("rename role", workspace.rename_role(&role.id, new_title))
                .await;
        }
        log.finish()
    }

    async fn on_invitation(
        &self,
        invitation: Invitation,
        change: RoleChange,
    ) -> Result<(), HookError> {
        self.reconciler.apply(invitation, change).await
    }

    async fn before_commit(&self, event: &HookEvent) -> Result<(), HookError> {
        match (&event.mutation, &event.prior.ctf) {
            (Mutation::UpdateCtf { patch, .. }, Some(before)) => match &patch.title {
                Some(title) => self.on_update_ctf(before, title).await,
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    async fn after_commit(&self, event: &HookEvent) -> Result<(), HookError> {
        match &event.mutation {
            Mutation::CreateTask(input) => match event.committed_task() {
                Some(task) => self.on_create_task(input, task).await,
                None => Ok(()),
            },
            Mutation::DeleteTask { .. } => match &event.prior.task {
                Some(deleted) => self.on_delete_task(deleted).await,
                None => Ok(()),
            },
            Mutation::UpdateTask { .. } => match (&event.prior.task, event.committed_task()) {
                (Some(before), Some(after)) => self.on_update_task(before, after).await,
                _ => Ok(()),
            },
            Mutation::StartWorkingOn { task_id } => self.on_working_on(event, *task_id, true).await,
            Mutation::StopWorkingOn { task_id } => self.on_working_on(event, *task_id, false).await,
            Mutation::CreateInvitation(invitation) => {
                self.on_invitation(*invitation, RoleChange::Grant).await
            }
            Mutation::DeleteInvitation(invitation) => {
                self.on_invitation(*invitation, RoleChange::Revoke).await
            }
            Mutation::UpdateCtf { .. } => Ok(()),
        }
    }
}

struct BeforeCommit(Arc<DiscordSync>);
struct AfterCommit(Arc<DiscordSync>);

#[async_trait]
impl MutationHook for BeforeCommit {
    fn label(&self) -> &str {
        "discord-sync-before"
    }

    async fn run(&self, event: &HookEvent) -> Result<(), HookError> {
        self.0.before_commit(event).await
    }
}

#[async_trait]
impl MutationHook for AfterCommit {
    fn label(&self) -> &str {
        "discord-sync-after"
    }

    async fn run(&self, event: &HookEvent) -> Result<(), HookError> {
        self.0.after_commit(event).await
    }
}

/// Registers the Discord sync hooks. Only build this when Discord is
/// configured; without it the pipeline runs with no Discord hooks at all.
#[derive(Clone)]
pub struct DiscordSyncHooks {
    sync: Arc<DiscordSync>,
}

impl DiscordSyncHooks {
    pub fn new(sync: DiscordSync) -> Self {
        Self {
            sync: Arc::new(sync),
        }
    }
}

impl HookProvider for DiscordSyncHooks {
    fn register(&self, mutation: MutationName) -> Vec<HookRegistration> {
        let (stage, hook): (HookStage, Arc<dyn MutationHook>) = match mutation {
            MutationName::UpdateCtf => (
                HookStage::PreCommit,
                Arc::new(BeforeCommit(self.sync.clone())),
            ),
            _ => (HookStage::PostCommit, Arc::new(AfterCommit(self.sync.clone()))),
        };
        vec![HookRegistration {
            stage,
            priority: DISCORD_HOOK_PRIORITY,
            hook,
        }]
    }
}
