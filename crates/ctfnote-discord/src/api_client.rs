//! Discord REST client used for guild reads, channel/role side effects and
//! interaction follow-ups.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::transport_helpers::{
    compare_snowflakes, is_retryable_discord_status, is_retryable_transport_error,
    parse_retry_after, retry_delay, truncate_for_error,
};
use crate::workspace::{
    ChannelEdit, ChannelKind, NewChannel, WorkspaceChannel, WorkspaceError, WorkspaceMessage,
    WorkspaceResult, WorkspaceRole,
};

pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const RETRY_ATTEMPT_HEADER: &str = "x-ctfnote-retry-attempt";

#[derive(Debug, Clone)]
pub struct DiscordClientConfig {
    pub api_base: String,
    pub bot_token: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl DiscordClientConfig {
    pub fn new(bot_token: &str) -> Self {
        Self {
            api_base: DEFAULT_DISCORD_API_BASE.to_string(),
            bot_token: bot_token.to_string(),
            request_timeout_ms: 10_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordChannelPayload {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    position: i64,
}

impl DiscordChannelPayload {
    fn into_channel(self) -> WorkspaceChannel {
        WorkspaceChannel {
            id: self.id,
            kind: ChannelKind::from_discord_type(self.kind),
            name: self.name.unwrap_or_default(),
            topic: self.topic.filter(|topic| !topic.is_empty()),
            parent_id: self.parent_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordRolePayload {
    id: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordUserPayload {
    username: String,
    #[serde(default)]
    global_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordAttachmentPayload {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordMessagePayload {
    id: String,
    #[serde(default)]
    content: String,
    timestamp: DateTime<Utc>,
    author: DiscordUserPayload,
    #[serde(default)]
    attachments: Vec<DiscordAttachmentPayload>,
}

impl DiscordMessagePayload {
    fn into_message(self) -> WorkspaceMessage {
        let author = self
            .author
            .global_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(self.author.username);
        WorkspaceMessage {
            id: self.id,
            author,
            timestamp: self.timestamp,
            content: self.content,
            attachments: self
                .attachments
                .into_iter()
                .map(|attachment| attachment.url)
                .collect(),
        }
    }
}

#[derive(Clone)]
pub struct DiscordApiClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl DiscordApiClient {
    pub fn new(config: &DiscordClientConfig) -> WorkspaceResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("DiscordBot (ctfnote-sync, 0.1)"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| WorkspaceError::Client(error.to_string()))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            bot_token: config.bot_token.trim().to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    pub async fn guild_channels(&self, guild_id: &str) -> WorkspaceResult<Vec<WorkspaceChannel>> {
        let mut payloads: Vec<DiscordChannelPayload> = self
            .request_json("list guild channels", || {
                self.http
                    .get(self.url(&format!("/guilds/{guild_id}/channels")))
                    .header(reqwest::header::AUTHORIZATION, self.authorization())
            })
            .await?;
        payloads.sort_by(|left, right| {
            left.position
                .cmp(&right.position)
                .then_with(|| compare_snowflakes(&left.id, &right.id))
        });
        Ok(payloads
            .into_iter()
            .map(DiscordChannelPayload::into_channel)
            .collect())
    }

    pub async fn guild_roles(&self, guild_id: &str) -> WorkspaceResult<Vec<WorkspaceRole>> {
        let payloads: Vec<DiscordRolePayload> = self
            .request_json("list guild roles", || {
                self.http
                    .get(self.url(&format!("/guilds/{guild_id}/roles")))
                    .header(reqwest::header::AUTHORIZATION, self.authorization())
            })
            .await?;
        Ok(payloads
            .into_iter()
            .map(|role| WorkspaceRole {
                id: role.id,
                name: role.name,
            })
            .collect())
    }

    pub async fn create_guild_channel(
        &self,
        guild_id: &str,
        channel: &NewChannel,
    ) -> WorkspaceResult<WorkspaceChannel> {
        let Some(kind) = channel.kind.discord_type() else {
            return Err(WorkspaceError::UnknownObject(format!(
                "cannot create channel of kind {:?}",
                channel.kind
            )));
        };
        let mut payload = json!({
            "name": channel.name,
            "type": kind,
        });
        if let Some(topic) = &channel.topic {
            payload["topic"] = Value::String(topic.clone());
        }
        if let Some(parent_id) = &channel.parent_id {
            payload["parent_id"] = Value::String(parent_id.clone());
        }
        let created: DiscordChannelPayload = self
            .request_json("create guild channel", || {
                self.http
                    .post(self.url(&format!("/guilds/{guild_id}/channels")))
                    .header(reqwest::header::AUTHORIZATION, self.authorization())
                    .json(&payload)
            })
            .await?;
        Ok(created.into_channel())
    }

    pub async fn modify_channel(
        &self,
        channel_id: &str,
        edit: &ChannelEdit,
    ) -> WorkspaceResult<WorkspaceChannel> {
        let mut payload = json!({});
        if let Some(name) = &edit.name {
            payload["name"] = Value::String(name.clone());
        }
        if let Some(topic) = &edit.topic {
            payload["topic"] = Value::String(topic.clone());
        }
        let updated: DiscordChannelPayload = self
            .request_json("modify channel", || {
                self.http
                    .patch(self.url(&format!("/channels/{channel_id}")))
                    .header(reqwest::header::AUTHORIZATION, self.authorization())
                    .json(&payload)
            })
            .await?;
        Ok(updated.into_channel())
    }

    pub async fn create_message(&self, channel_id: &str, content: &str) -> WorkspaceResult<()> {
        let payload = json!({
            "content": content,
            "allowed_mentions": { "parse": [] },
        });
        self.request_empty("create message", || {
            self.http
                .post(self.url(&format!("/channels/{channel_id}/messages")))
                .header(reqwest::header::AUTHORIZATION, self.authorization())
                .json(&payload)
        })
        .await
    }

    pub async fn modify_role(
        &self,
        guild_id: &str,
        role_id: &str,
        name: &str,
    ) -> WorkspaceResult<()> {
        let payload = json!({ "name": name });
        self.request_empty("modify guild role", || {
            self.http
                .patch(self.url(&format!("/guilds/{guild_id}/roles/{role_id}")))
                .header(reqwest::header::AUTHORIZATION, self.authorization())
                .json(&payload)
        })
        .await
    }

    pub async fn add_member_role(
        &self,
        guild_id: &str,
        member_id: &str,
        role_id: &str,
    ) -> WorkspaceResult<()> {
        self.request_empty("add guild member role", || {
            self.http
                .put(self.url(&format!(
                    "/guilds/{guild_id}/members/{member_id}/roles/{role_id}"
                )))
                .header(reqwest::header::AUTHORIZATION, self.authorization())
                .header(reqwest::header::CONTENT_LENGTH, "0")
        })
        .await
    }

    pub async fn remove_member_role(
        &self,
        guild_id: &str,
        member_id: &str,
        role_id: &str,
    ) -> WorkspaceResult<()> {
        self.request_empty("remove guild member role", || {
            self.http
                .delete(self.url(&format!(
                    "/guilds/{guild_id}/members/{member_id}/roles/{role_id}"
                )))
                .header(reqwest::header::AUTHORIZATION, self.authorization())
        })
        .await
    }

    /// Fetches one page of history newer than `after`, sorted oldest first.
    pub async fn channel_messages_after(
        &self,
        channel_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> WorkspaceResult<Vec<WorkspaceMessage>> {
        let limit = limit.clamp(1, 100).to_string();
        let after = after.unwrap_or("0").to_string();
        let mut payloads: Vec<DiscordMessagePayload> = self
            .request_json("list channel messages", || {
                self.http
                    .get(self.url(&format!("/channels/{channel_id}/messages")))
                    .header(reqwest::header::AUTHORIZATION, self.authorization())
                    .query(&[("limit", limit.as_str()), ("after", after.as_str())])
            })
            .await?;
        payloads.sort_by(|left, right| compare_snowflakes(&left.id, &right.id));
        Ok(payloads
            .into_iter()
            .map(DiscordMessagePayload::into_message)
            .collect())
    }

    /// Replaces the original response of an interaction (the deferred reply).
    pub async fn edit_original_interaction_response(
        &self,
        application_id: &str,
        interaction_token: &str,
        payload: &Value,
    ) -> WorkspaceResult<()> {
        self.request_empty("edit original interaction response", || {
            self.http
                .patch(self.url(&format!(
                    "/webhooks/{application_id}/{interaction_token}/messages/@original"
                )))
                .json(payload)
        })
        .await
    }

    pub async fn bulk_overwrite_guild_commands(
        &self,
        application_id: &str,
        guild_id: &str,
        commands: &Value,
    ) -> WorkspaceResult<()> {
        self.request_empty("bulk overwrite guild commands", || {
            self.http
                .put(self.url(&format!(
                    "/applications/{application_id}/guilds/{guild_id}/commands"
                )))
                .header(reqwest::header::AUTHORIZATION, self.authorization())
                .json(commands)
        })
        .await
    }

    async fn request_json<T, F>(&self, operation: &str, builder: F) -> WorkspaceResult<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self.send_with_retry(operation, builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|error| WorkspaceError::Decode {
                operation: operation.to_string(),
                message: error.to_string(),
            })
    }

    async fn request_empty<F>(&self, operation: &str, builder: F) -> WorkspaceResult<()>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        self.send_with_retry(operation, builder).await?;
        Ok(())
    }

    async fn send_with_retry<F>(
        &self,
        operation: &str,
        mut builder: F,
    ) -> WorkspaceResult<reqwest::Response>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header(RETRY_ATTEMPT_HEADER, attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_discord_status(status.as_u16())
                    {
                        tracing::debug!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            "retrying discord request"
                        );
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    return Err(WorkspaceError::Api {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(WorkspaceError::Transport {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }
    }
}
