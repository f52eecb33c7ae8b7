//! Discord interaction webhook: signature check, PING, the `archive` command
//! and archive buttons.

use std::sync::Arc;

use ctfnote_archive::{parse_archive_button, ArchiveWorkflow};
use ctfnote_discord::{
    has_permission, DiscordApiClient, DiscordInteractionSurface, InteractionSurface,
    PERMISSION_ADMINISTRATOR,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::signature::InteractionVerifier;

const INTERACTION_PING: u8 = 1;
const INTERACTION_COMMAND: u8 = 2;
const INTERACTION_COMPONENT: u8 = 3;

const RESPONSE_PONG: u8 = 1;
const RESPONSE_MESSAGE: u8 = 4;
const RESPONSE_DEFERRED_MESSAGE: u8 = 5;
const RESPONSE_DEFERRED_UPDATE: u8 = 6;
const FLAG_EPHEMERAL: u64 = 1 << 6;

pub const ARCHIVE_COMMAND_NAME: &str = "archive";

/// Builds the surface used to answer one interaction token.
pub trait SurfaceFactory: Send + Sync {
    fn surface(&self, interaction_token: &str) -> Arc<dyn InteractionSurface>;
}

pub struct DiscordSurfaceFactory {
    client: DiscordApiClient,
    application_id: String,
}

impl DiscordSurfaceFactory {
    pub fn new(client: DiscordApiClient, application_id: &str) -> Self {
        Self {
            client,
            application_id: application_id.to_string(),
        }
    }
}

impl SurfaceFactory for DiscordSurfaceFactory {
    fn surface(&self, interaction_token: &str) -> Arc<dyn InteractionSurface> {
        Arc::new(DiscordInteractionSurface::new(
            self.client.clone(),
            &self.application_id,
            interaction_token,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct InteractionPayload {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    token: String,
    #[serde(default)]
    data: Option<InteractionData>,
    #[serde(default)]
    member: Option<InteractionMember>,
}

#[derive(Debug, Default, Deserialize)]
struct InteractionData {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    custom_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InteractionMember {
    #[serde(default)]
    permissions: Option<String>,
}

impl InteractionPayload {
    fn is_administrator(&self) -> bool {
        self.member
            .as_ref()
            .and_then(|member| member.permissions.as_deref())
            .is_some_and(|permissions| has_permission(permissions, PERMISSION_ADMINISTRATOR))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionRejection {
    Unauthorized(String),
    BadRequest(String),
}

pub struct InteractionHandler {
    verifier: InteractionVerifier,
    workflow: ArchiveWorkflow,
    surfaces: Arc<dyn SurfaceFactory>,
}

impl InteractionHandler {
    pub fn new(
        verifier: InteractionVerifier,
        workflow: ArchiveWorkflow,
        surfaces: Arc<dyn SurfaceFactory>,
    ) -> Self {
        Self {
            verifier,
            workflow,
            surfaces,
        }
    }

    /// Verifies and answers one interaction. Archive work continues in a
    /// spawned task after the immediate reply.
    pub fn handle(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Value, InteractionRejection> {
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(InteractionRejection::Unauthorized(
                "missing signature headers".to_string(),
            ));
        };
        self.verifier
            .verify(timestamp, body, signature)
            .map_err(|error| InteractionRejection::Unauthorized(error.to_string()))?;

        let payload: InteractionPayload = serde_json::from_slice(body)
            .map_err(|error| InteractionRejection::BadRequest(error.to_string()))?;
        match payload.kind {
            INTERACTION_PING => Ok(json!({ "type": RESPONSE_PONG })),
            INTERACTION_COMMAND => self.handle_command(&payload),
            INTERACTION_COMPONENT => self.handle_component(&payload),
            other => Err(InteractionRejection::BadRequest(format!(
                "unsupported interaction type {other}"
            ))),
        }
    }

    fn handle_command(&self, payload: &InteractionPayload) -> Result<Value, InteractionRejection> {
        let name = payload
            .data
            .as_ref()
            .and_then(|data| data.name.as_deref())
            .unwrap_or_default();
        if name != ARCHIVE_COMMAND_NAME {
            return Err(InteractionRejection::BadRequest(format!(
                "unknown command '{name}'"
            )));
        }
        if !payload.is_administrator() {
            return Ok(denied());
        }

        let workflow = self.workflow.clone();
        let surface = self.surfaces.surface(&payload.token);
        tokio::spawn(async move {
            if let Err(error) = workflow.start(surface.as_ref()).await {
                tracing::warn!(%error, "archive command failed");
            }
        });
        Ok(json!({ "type": RESPONSE_DEFERRED_MESSAGE, "data": { "flags": FLAG_EPHEMERAL } }))
    }

    fn handle_component(
        &self,
        payload: &InteractionPayload,
    ) -> Result<Value, InteractionRejection> {
        let custom_id = payload
            .data
            .as_ref()
            .and_then(|data| data.custom_id.clone())
            .unwrap_or_default();
        if parse_archive_button(&custom_id).is_none() {
            return Err(InteractionRejection::BadRequest(format!(
                "unknown component '{custom_id}'"
            )));
        }
        if !payload.is_administrator() {
            return Ok(denied());
        }

        let workflow = self.workflow.clone();
        let surface = self.surfaces.surface(&payload.token);
        tokio::spawn(async move {
            if let Err(error) = workflow.select(surface.as_ref(), &custom_id).await {
                tracing::warn!(%error, custom_id, "archive selection failed");
            }
        });
        Ok(json!({ "type": RESPONSE_DEFERRED_UPDATE }))
    }
}

fn denied() -> Value {
    json!({
        "type": RESPONSE_MESSAGE,
        "data": {
            "content": "You need the Administrator permission to archive a CTF.",
            "flags": FLAG_EPHEMERAL,
        }
    })
}
