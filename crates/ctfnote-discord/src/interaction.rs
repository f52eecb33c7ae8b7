//! Operator-facing interaction messages and slash-command registration.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::api_client::DiscordApiClient;
use crate::workspace::WorkspaceResult;

pub const PERMISSION_ADMINISTRATOR: u64 = 1 << 3;
pub const MAX_BUTTONS_PER_ROW: usize = 5;
pub const MAX_BUTTON_ROWS: usize = 5;
pub const MAX_BUTTON_LABEL_CHARS: usize = 80;
pub const MAX_CUSTOM_ID_CHARS: usize = 100;

const COMPONENT_ACTION_ROW: u8 = 1;
const COMPONENT_BUTTON: u8 = 2;
const BUTTON_STYLE_SUCCESS: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionButton {
    pub custom_id: String,
    pub label: String,
}

/// Content of the operator's interactive message. An empty button list
/// removes any buttons previously shown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InteractionView {
    pub content: String,
    pub buttons: Vec<InteractionButton>,
}

impl InteractionView {
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(content: &str, buttons: Vec<InteractionButton>) -> Self {
        Self {
            content: content.to_string(),
            buttons,
        }
    }

    pub fn to_message_payload(&self) -> Value {
        let rows: Vec<Value> = self
            .buttons
            .chunks(MAX_BUTTONS_PER_ROW)
            .take(MAX_BUTTON_ROWS)
            .map(|row| {
                let components: Vec<Value> = row
                    .iter()
                    .map(|button| {
                        json!({
                            "type": COMPONENT_BUTTON,
                            "style": BUTTON_STYLE_SUCCESS,
                            "custom_id": button.custom_id,
                            "label": button
                                .label
                                .chars()
                                .take(MAX_BUTTON_LABEL_CHARS)
                                .collect::<String>(),
                        })
                    })
                    .collect();
                json!({ "type": COMPONENT_ACTION_ROW, "components": components })
            })
            .collect();
        json!({
            "content": self.content,
            "components": rows,
            "allowed_mentions": { "parse": [] },
        })
    }
}

/// Edits the one message an operator interacts with.
#[async_trait]
pub trait InteractionSurface: Send + Sync {
    async fn update(&self, view: &InteractionView) -> WorkspaceResult<()>;
}

/// Edits the original (deferred) response of a Discord interaction.
pub struct DiscordInteractionSurface {
    client: DiscordApiClient,
    application_id: String,
    interaction_token: String,
}

impl DiscordInteractionSurface {
    pub fn new(client: DiscordApiClient, application_id: &str, interaction_token: &str) -> Self {
        Self {
            client,
            application_id: application_id.to_string(),
            interaction_token: interaction_token.to_string(),
        }
    }
}

#[async_trait]
impl InteractionSurface for DiscordInteractionSurface {
    async fn update(&self, view: &InteractionView) -> WorkspaceResult<()> {
        self.client
            .edit_original_interaction_response(
                &self.application_id,
                &self.interaction_token,
                &view.to_message_payload(),
            )
            .await
    }
}

/// Keeps every view it is given; the last one is what the operator sees.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    views: Arc<Mutex<Vec<InteractionView>>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn views(&self) -> Vec<InteractionView> {
        self.views
            .lock()
            .map(|views| views.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<InteractionView> {
        self.views().pop()
    }
}

#[async_trait]
impl InteractionSurface for RecordingSurface {
    async fn update(&self, view: &InteractionView) -> WorkspaceResult<()> {
        if let Ok(mut views) = self.views.lock() {
            views.push(view.clone());
        }
        Ok(())
    }
}

/// Guild slash command definition as sent to the bulk overwrite endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlashCommand {
    pub name: String,
    pub description: String,
    pub default_member_permissions: Option<String>,
    #[serde(rename = "type")]
    pub kind: u8,
}

impl SlashCommand {
    pub fn archive() -> Self {
        Self {
            name: "archive".to_string(),
            description: "Archive the CTF messages!".to_string(),
            default_member_permissions: Some(PERMISSION_ADMINISTRATOR.to_string()),
            kind: 1,
        }
    }
}

/// Checks a Discord permission bit set, sent as a decimal string.
pub fn has_permission(raw_permissions: &str, bit: u64) -> bool {
    raw_permissions
        .trim()
        .parse::<u64>()
        .map(|permissions| permissions & bit == bit)
        .unwrap_or(false)
}
