//! Operator-driven archive of a CTF's Discord channels.
//!
//! `start` answers the slash command with one button per archivable CTF;
//! `select` handles the button press and walks the archive to completion,
//! editing the same operator message at every step.

use std::sync::Arc;

use ctfnote_core::{Ctf, CtfStore, NewTask, StoreError, Task};
use ctfnote_discord::{
    InteractionButton, InteractionSurface, InteractionView, LinkedLocator, WorkspaceError,
    MAX_CUSTOM_ID_CHARS,
};
use thiserror::Error;

use crate::exporter::{export_messages, DEFAULT_PAGE_SIZE};
use crate::publisher::{ArchivePublisher, PublishError};

pub const ARCHIVE_BUTTON_PREFIX: &str = "archive-ctf-button-";
const MAX_CANDIDATE_BUTTONS: usize = 25;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("ctf '{0}' not found")]
    CtfNotFound(String),
    #[error("ctf '{0}' has no categories in the workspace")]
    NoCategories(String),
    #[error("'{0}' is not an archive button")]
    UnknownButton(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    NoCandidates,
    Archived { ctf_title: String, task: Task },
    Failed { ctf_title: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveState {
    Idle,
    ListingCandidates,
    AwaitingSelection { candidates: Vec<String> },
    Archiving { ctf_title: String },
    Done(ArchiveOutcome),
}

impl ArchiveState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

pub fn archive_button_id(ctf_title: &str) -> String {
    format!("{ARCHIVE_BUTTON_PREFIX}{ctf_title}")
}

pub fn parse_archive_button(custom_id: &str) -> Option<&str> {
    custom_id
        .strip_prefix(ARCHIVE_BUTTON_PREFIX)
        .filter(|title| !title.is_empty())
}

pub fn archive_task_title(ctf_title: &str) -> String {
    format!("{ctf_title} Discord archive")
}

#[derive(Clone)]
pub struct ArchiveWorkflow {
    store: Arc<dyn CtfStore>,
    locator: LinkedLocator,
    publisher: ArchivePublisher,
}

impl ArchiveWorkflow {
    pub fn new(
        store: Arc<dyn CtfStore>,
        locator: LinkedLocator,
        publisher: ArchivePublisher,
    ) -> Self {
        Self {
            store,
            locator,
            publisher,
        }
    }

    /// CTFs that still have at least one category in the workspace.
    pub async fn list_candidates(&self) -> Result<Vec<Ctf>, ArchiveError> {
        let mut candidates = Vec::new();
        for ctf in self.store.ctfs().await? {
            if !self.locator.event_categories(&ctf).await?.is_empty() {
                candidates.push(ctf);
            }
        }
        Ok(candidates)
    }

    pub async fn start(
        &self,
        surface: &dyn InteractionSurface,
    ) -> Result<ArchiveState, ArchiveError> {
        tracing::debug!(state = ?ArchiveState::ListingCandidates, "archive command received");
        let candidates = match self.list_candidates().await {
            Ok(candidates) => candidates,
            Err(error) => {
                tracing::warn!(%error, "failed to list archive candidates");
                show(surface, InteractionView::text("Failed to list the CTFs to archive")).await;
                return Ok(ArchiveState::Done(ArchiveOutcome::Failed {
                    ctf_title: String::new(),
                    reason: error.to_string(),
                }));
            }
        };
        if candidates.is_empty() {
            show(surface, InteractionView::text("No CTFs found!")).await;
            return Ok(ArchiveState::Done(ArchiveOutcome::NoCandidates));
        }

        let mut buttons = Vec::new();
        for ctf in candidates {
            let custom_id = archive_button_id(&ctf.title);
            if custom_id.chars().count() > MAX_CUSTOM_ID_CHARS {
                tracing::warn!(ctf = %ctf.title, "ctf title too long for an archive button");
                continue;
            }
            if buttons.len() == MAX_CANDIDATE_BUTTONS {
                tracing::warn!(ctf = %ctf.title, "too many archive candidates, button dropped");
                continue;
            }
            buttons.push(InteractionButton {
                custom_id,
                label: ctf.title,
            });
        }
        if buttons.is_empty() {
            show(surface, InteractionView::text("No CTFs found!")).await;
            return Ok(ArchiveState::Done(ArchiveOutcome::NoCandidates));
        }

        let shown: Vec<String> = buttons.iter().map(|button| button.label.clone()).collect();
        show(
            surface,
            InteractionView::with_buttons("Which CTF do you want to archive?", buttons),
        )
        .await;
        Ok(ArchiveState::AwaitingSelection { candidates: shown })
    }

    /// Handles an archive button press through to a terminal state.
    pub async fn select(
        &self,
        surface: &dyn InteractionSurface,
        custom_id: &str,
    ) -> Result<ArchiveState, ArchiveError> {
        let ctf_title = parse_archive_button(custom_id)
            .ok_or_else(|| ArchiveError::UnknownButton(custom_id.to_string()))?
            .to_string();

        let state = ArchiveState::Archiving {
            ctf_title: ctf_title.clone(),
        };
        tracing::info!(?state, "archiving ctf");
        show(
            surface,
            InteractionView::text(&format!(
                "Archiving the CTF channels and roles for {ctf_title}"
            )),
        )
        .await;

        let outcome = match self.archive(&ctf_title).await {
            Ok(task) => {
                show(
                    surface,
                    InteractionView::text(&format!(
                        "Archived the CTF channels and roles for {ctf_title}"
                    )),
                )
                .await;
                ArchiveOutcome::Archived { ctf_title, task }
            }
            Err(error) => {
                tracing::warn!(ctf = %ctf_title, %error, "archive failed");
                show(
                    surface,
                    InteractionView::text(&format!(
                        "Failed to archive the CTF channels and roles for {ctf_title}"
                    )),
                )
                .await;
                ArchiveOutcome::Failed {
                    ctf_title,
                    reason: error.to_string(),
                }
            }
        };
        Ok(ArchiveState::Done(outcome))
    }

    /// Locates, exports, publishes and records the archive of one CTF.
    pub async fn archive(&self, ctf_title: &str) -> Result<Task, ArchiveError> {
        let ctf = self
            .store
            .ctf_by_title(ctf_title)
            .await?
            .ok_or_else(|| ArchiveError::CtfNotFound(ctf_title.to_string()))?;
        let categories = self.locator.event_categories(&ctf).await?;
        if categories.is_empty() {
            return Err(ArchiveError::NoCategories(ctf.title));
        }

        let messages =
            export_messages(self.locator.workspace().as_ref(), &categories, DEFAULT_PAGE_SIZE)
                .await?;
        let pad_url = self.publisher.publish(&messages, &ctf.title).await?;

        let title = self.unused_archive_title(&ctf).await?;
        let task = self
            .store
            .create_task(NewTask {
                ctf_id: ctf.id,
                title,
                description: format!("Discord archive of {}", ctf.title),
                flag: String::new(),
                pad_url,
            })
            .await?;
        tracing::info!(
            ctf = %ctf.title,
            task_id = task.id,
            messages = messages.len(),
            "recorded discord archive"
        );
        Ok(task)
    }

    async fn unused_archive_title(&self, ctf: &Ctf) -> Result<String, ArchiveError> {
        let existing: Vec<String> = self
            .store
            .tasks_for_ctf(ctf.id)
            .await?
            .into_iter()
            .map(|task| task.title)
            .collect();
        let base = archive_task_title(&ctf.title);
        let mut candidate = base.clone();
        let mut suffix = 2_u32;
        while existing.contains(&candidate) {
            candidate = format!("{base} ({suffix})");
            suffix += 1;
        }
        Ok(candidate)
    }
}

async fn show(surface: &dyn InteractionSurface, view: InteractionView) {
    if let Err(error) = surface.update(&view).await {
        tracing::warn!(%error, content = %view.content, "failed to update archive message");
    }
}
