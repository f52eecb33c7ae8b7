//! Chat-platform workspace contract.
//!
//! The sync engine never talks to Discord directly: it reads a cached view of
//! the guild through [`Workspace`] and issues side effects through the same
//! trait, so the engine can be driven against [`crate::InMemoryWorkspace`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("discord api {operation} failed with status {status}: {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("discord api {operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decode discord {operation} response: {message}")]
    Decode { operation: String, message: String },
    #[error("failed to build discord client: {0}")]
    Client(String),
    #[error("unknown workspace object '{0}'")]
    UnknownObject(String),
    #[error("workspace unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Category,
    Other,
}

impl ChannelKind {
    /// Maps a Discord channel type number onto the kinds the sync engine cares about.
    pub fn from_discord_type(raw: u8) -> Self {
        match raw {
            0 => Self::Text,
            4 => Self::Category,
            _ => Self::Other,
        }
    }

    pub fn discord_type(self) -> Option<u8> {
        match self {
            Self::Text => Some(0),
            Self::Category => Some(4),
            Self::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceChannel {
    pub id: String,
    pub kind: ChannelKind,
    pub name: String,
    pub topic: Option<String>,
    pub parent_id: Option<String>,
}

impl WorkspaceChannel {
    pub fn is_category(&self) -> bool {
        self.kind == ChannelKind::Category
    }

    pub fn is_text(&self) -> bool {
        self.kind == ChannelKind::Text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRole {
    pub id: String,
    pub name: String,
}

/// One historical message, normalized away from the Discord payload shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMessage {
    pub id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub name: String,
    pub kind: ChannelKind,
    pub topic: Option<String>,
    pub parent_id: Option<String>,
}

impl NewChannel {
    pub fn text(name: &str, topic: &str, parent_id: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ChannelKind::Text,
            topic: Some(topic.to_string()),
            parent_id: Some(parent_id.to_string()),
        }
    }

    pub fn category(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ChannelKind::Category,
            topic: None,
            parent_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelEdit {
    pub name: Option<String>,
    pub topic: Option<String>,
}

impl ChannelEdit {
    pub fn rename(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            topic: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.topic.is_none()
    }

    pub fn apply(&self, channel: &mut WorkspaceChannel) {
        if let Some(name) = &self.name {
            channel.name = name.clone();
        }
        if let Some(topic) = &self.topic {
            channel.topic = Some(topic.clone());
        }
    }
}

/// Channel filter passed to [`Workspace::find_category`] and
/// [`Workspace::find_channel`].
pub type ChannelPredicate<'p> = dyn for<'c> Fn(&'c WorkspaceChannel) -> bool + Send + Sync + 'p;

/// Read-through view of a guild plus the side effects the sync engine issues.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// All channels and categories, in workspace enumeration order.
    async fn channels(&self) -> WorkspaceResult<Vec<WorkspaceChannel>>;
    async fn roles(&self) -> WorkspaceResult<Vec<WorkspaceRole>>;

    async fn find_category(
        &self,
        predicate: &ChannelPredicate<'_>,
    ) -> WorkspaceResult<Option<WorkspaceChannel>> {
        Ok(self
            .channels()
            .await?
            .into_iter()
            .find(|channel| channel.is_category() && predicate(channel)))
    }

    async fn find_channel(
        &self,
        predicate: &ChannelPredicate<'_>,
    ) -> WorkspaceResult<Option<WorkspaceChannel>> {
        Ok(self
            .channels()
            .await?
            .into_iter()
            .find(|channel| channel.is_text() && predicate(channel)))
    }

    async fn create_channel(&self, channel: NewChannel) -> WorkspaceResult<WorkspaceChannel>;
    async fn edit_channel(
        &self,
        channel_id: &str,
        edit: ChannelEdit,
    ) -> WorkspaceResult<WorkspaceChannel>;
    async fn send_message(&self, channel_id: &str, content: &str) -> WorkspaceResult<()>;
    async fn rename_role(&self, role_id: &str, name: &str) -> WorkspaceResult<()>;
    async fn add_member_role(&self, member_id: &str, role_id: &str) -> WorkspaceResult<()>;
    async fn remove_member_role(&self, member_id: &str, role_id: &str) -> WorkspaceResult<()>;

    /// Up to `limit` messages newer than `after`, oldest first.
    async fn messages_after(
        &self,
        channel_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> WorkspaceResult<Vec<WorkspaceMessage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discord_channel_types_map_to_kinds() {
        assert_eq!(ChannelKind::from_discord_type(0), ChannelKind::Text);
        assert_eq!(ChannelKind::from_discord_type(4), ChannelKind::Category);
        assert_eq!(ChannelKind::from_discord_type(2), ChannelKind::Other);
        assert_eq!(ChannelKind::Category.discord_type(), Some(4));
    }

    #[test]
    fn channel_edit_only_overwrites_present_fields() {
        let mut channel = WorkspaceChannel {
            id: "1".to_string(),
            kind: ChannelKind::Text,
            name: "web".to_string(),
            topic: Some("web".to_string()),
            parent_id: None,
        };
        ChannelEdit::rename("solved-web").apply(&mut channel);
        assert_eq!(channel.name, "solved-web");
        assert_eq!(channel.topic.as_deref(), Some("web"));
    }

    #[tokio::test]
    async fn regression_find_helpers_accept_borrowed_predicates() {
        let workspace = crate::memory_workspace::InMemoryWorkspace::new();
        let category = workspace.add_category("HTB");
        let channel = workspace.add_text_channel("HTB", Some("HTB"), Some(&category.id));
        let wanted = String::from("HTB");

        let found = workspace
            .find_category(&|candidate: &WorkspaceChannel| candidate.name == wanted)
            .await
            .expect("find category");
        assert_eq!(found.map(|found| found.id), Some(category.id));

        let found = workspace
            .find_channel(&|candidate: &WorkspaceChannel| candidate.name == wanted)
            .await
            .expect("find channel");
        assert_eq!(found.map(|found| found.id), Some(channel.id));
    }
}
