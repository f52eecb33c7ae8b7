//! Finds the workspace objects that mirror CTFs and tasks.
//!
//! The free functions implement the plain name/topic join. [`LinkedLocator`]
//! layers the stored id links on top of it.

use std::sync::Arc;

use ctfnote_core::{Ctf, LinkKind, Task, WorkspaceLinks};

use crate::workspace::{Workspace, WorkspaceChannel, WorkspaceResult, WorkspaceRole};

pub const DEFAULT_TALK_CHANNEL_NAME: &str = "challenges-talk";

/// Every category named after the event, in workspace order.
pub async fn find_categories_for_event(
    workspace: &dyn Workspace,
    event_title: &str,
) -> WorkspaceResult<Vec<WorkspaceChannel>> {
    Ok(workspace
        .channels()
        .await?
        .into_iter()
        .filter(|channel| channel.is_category() && channel.name == event_title)
        .collect())
}

/// The first text channel whose topic is the task title, restricted to
/// `parents` when given.
pub async fn find_channel_for_task(
    workspace: &dyn Workspace,
    task_title: &str,
    parents: Option<&[WorkspaceChannel]>,
) -> WorkspaceResult<Option<WorkspaceChannel>> {
    workspace
        .find_channel(&|channel: &WorkspaceChannel| {
            topic_matches(channel, task_title) && under_any(channel, parents)
        })
        .await
}

pub async fn find_role_for_event(
    workspace: &dyn Workspace,
    event_title: &str,
) -> WorkspaceResult<Option<WorkspaceRole>> {
    Ok(workspace
        .roles()
        .await?
        .into_iter()
        .find(|role| role.name == event_title))
}

/// The event's talk channel: a text channel with the given name under one of
/// the event's categories.
pub async fn find_talk_channel(
    workspace: &dyn Workspace,
    categories: &[WorkspaceChannel],
    talk_channel_name: &str,
) -> WorkspaceResult<Option<WorkspaceChannel>> {
    workspace
        .find_channel(&|channel: &WorkspaceChannel| {
            channel.name == talk_channel_name && under_any(channel, Some(categories))
        })
        .await
}

fn topic_matches(channel: &WorkspaceChannel, task_title: &str) -> bool {
    channel.topic.as_deref() == Some(task_title)
}

fn under_any(channel: &WorkspaceChannel, parents: Option<&[WorkspaceChannel]>) -> bool {
    match parents {
        None => true,
        Some(parents) => parents
            .iter()
            .any(|parent| channel.parent_id.as_deref() == Some(parent.id.as_str())),
    }
}

/// Locator that consults `WorkspaceLinks` before the name join and backfills
/// links on name-join hits. Link storage failures degrade to the name join.
#[derive(Clone)]
pub struct LinkedLocator {
    workspace: Arc<dyn Workspace>,
    links: Arc<dyn WorkspaceLinks>,
}

impl LinkedLocator {
    pub fn new(workspace: Arc<dyn Workspace>, links: Arc<dyn WorkspaceLinks>) -> Self {
        Self { workspace, links }
    }

    pub fn workspace(&self) -> &Arc<dyn Workspace> {
        &self.workspace
    }

    async fn linked_id(&self, kind: LinkKind, entity_id: i64) -> Option<String> {
        match self.links.link(kind, entity_id).await {
            Ok(linked) => linked,
            Err(error) => {
                tracing::warn!(
                    kind = kind.as_str(),
                    entity_id,
                    %error,
                    "workspace link lookup failed"
                );
                None
            }
        }
    }

    /// Stores a link; failures are logged and otherwise ignored.
    pub async fn remember(&self, kind: LinkKind, entity_id: i64, object_id: &str) {
        if let Err(error) = self.links.set_link(kind, entity_id, object_id).await {
            tracing::warn!(
                kind = kind.as_str(),
                entity_id,
                object_id,
                %error,
                "failed to store workspace link"
            );
        }
    }

    pub async fn forget(&self, kind: LinkKind, entity_id: i64) {
        if let Err(error) = self.links.clear_link(kind, entity_id).await {
            tracing::warn!(
                kind = kind.as_str(),
                entity_id,
                %error,
                "failed to clear workspace link"
            );
        }
    }

    /// Categories of the event. A linked category that no longer carries the
    /// event title (renamed out of band) is still returned, first.
    pub async fn event_categories(&self, ctf: &Ctf) -> WorkspaceResult<Vec<WorkspaceChannel>> {
        let channels = self.workspace.channels().await?;
        let mut categories: Vec<WorkspaceChannel> = channels
            .iter()
            .filter(|channel| channel.is_category() && channel.name == ctf.title)
            .cloned()
            .collect();

        let linked = self.linked_id(LinkKind::CtfCategory, ctf.id).await;
        let linked_category = linked.as_deref().and_then(|id| {
            channels
                .iter()
                .find(|channel| channel.id == id && channel.is_category())
        });
        match linked_category {
            Some(category) => {
                if !categories.iter().any(|existing| existing.id == category.id) {
                    categories.insert(0, category.clone());
                }
            }
            None => {
                if let Some(first) = categories.first() {
                    self.remember(LinkKind::CtfCategory, ctf.id, &first.id).await;
                }
            }
        }
        Ok(categories)
    }

    /// The task's channel. Without event categories to disambiguate, a topic
    /// match is only trusted when exactly one channel carries the topic.
    pub async fn task_channel(
        &self,
        task: &Task,
        categories: &[WorkspaceChannel],
    ) -> WorkspaceResult<Option<WorkspaceChannel>> {
        let channels = self.workspace.channels().await?;
        if let Some(linked) = self.linked_id(LinkKind::TaskChannel, task.id).await {
            if let Some(channel) = channels
                .iter()
                .find(|channel| channel.id == linked && channel.is_text())
            {
                return Ok(Some(channel.clone()));
            }
            tracing::debug!(
                task_id = task.id,
                channel_id = %linked,
                "ignoring stale task channel link"
            );
        }

        let found = if categories.is_empty() {
            let mut matches = channels
                .iter()
                .filter(|channel| channel.is_text() && topic_matches(channel, &task.title));
            match (matches.next(), matches.next()) {
                (Some(only), None) => Some(only.clone()),
                (Some(_), Some(_)) => {
                    tracing::debug!(
                        task_id = task.id,
                        title = %task.title,
                        "ambiguous topic match without event categories"
                    );
                    None
                }
                _ => None,
            }
        } else {
            channels
                .iter()
                .find(|channel| {
                    channel.is_text()
                        && topic_matches(channel, &task.title)
                        && under_any(channel, Some(categories))
                })
                .cloned()
        };

        if let Some(channel) = &found {
            self.remember(LinkKind::TaskChannel, task.id, &channel.id).await;
        }
        Ok(found)
    }

    pub async fn event_role(&self, ctf: &Ctf) -> WorkspaceResult<Option<WorkspaceRole>> {
        let roles = self.workspace.roles().await?;
        if let Some(linked) = self.linked_id(LinkKind::CtfRole, ctf.id).await {
            if let Some(role) = roles.iter().find(|role| role.id == linked) {
                return Ok(Some(role.clone()));
            }
        }
        let found = roles.into_iter().find(|role| role.name == ctf.title);
        if let Some(role) = &found {
            self.remember(LinkKind::CtfRole, ctf.id, &role.id).await;
        }
        Ok(found)
    }

    pub async fn talk_channel(
        &self,
        categories: &[WorkspaceChannel],
        talk_channel_name: &str,
    ) -> WorkspaceResult<Option<WorkspaceChannel>> {
        find_talk_channel(self.workspace.as_ref(), categories, talk_channel_name).await
    }
}
