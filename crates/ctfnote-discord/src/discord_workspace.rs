use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::api_client::DiscordApiClient;
use crate::transport_helpers::{split_for_discord, DISCORD_SAFE_MAX_CHARS};
use crate::workspace::{
    ChannelEdit, NewChannel, Workspace, WorkspaceChannel, WorkspaceMessage, WorkspaceResult,
    WorkspaceRole,
};

pub const DEFAULT_CACHE_TTL_MS: u64 = 30_000;

#[derive(Debug)]
struct Cached<T> {
    fetched_at: Instant,
    items: Vec<T>,
}

impl<T: Clone> Cached<T> {
    fn fresh(&self, ttl: Duration) -> Option<Vec<T>> {
        (self.fetched_at.elapsed() < ttl).then(|| self.items.clone())
    }
}

#[derive(Debug, Default)]
struct CacheState {
    channels: Option<Cached<WorkspaceChannel>>,
    roles: Option<Cached<WorkspaceRole>>,
}

/// Guild view backed by the Discord REST API.
///
/// Channel and role listings are cached for `cache_ttl`; the workspace's own
/// mutations patch the cached listing so reads issued later in the same sync
/// cycle observe them without a refetch.
pub struct DiscordWorkspace {
    client: DiscordApiClient,
    guild_id: String,
    cache_ttl: Duration,
    cache: RwLock<CacheState>,
}

impl DiscordWorkspace {
    pub fn new(client: DiscordApiClient, guild_id: &str, cache_ttl: Duration) -> Self {
        Self {
            client,
            guild_id: guild_id.trim().to_string(),
            cache_ttl,
            cache: RwLock::new(CacheState::default()),
        }
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn client(&self) -> &DiscordApiClient {
        &self.client
    }

    /// Drops both cached listings; the next read refetches.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        cache.channels = None;
        cache.roles = None;
    }

    async fn upsert_cached_channel(&self, channel: &WorkspaceChannel) {
        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.channels.as_mut() {
            match cached.items.iter_mut().find(|item| item.id == channel.id) {
                Some(existing) => *existing = channel.clone(),
                None => cached.items.push(channel.clone()),
            }
        }
    }
}

#[async_trait]
impl Workspace for DiscordWorkspace {
    async fn channels(&self) -> WorkspaceResult<Vec<WorkspaceChannel>> {
        if let Some(items) = self
            .cache
            .read()
            .await
            .channels
            .as_ref()
            .and_then(|cached| cached.fresh(self.cache_ttl))
        {
            return Ok(items);
        }

        let items = self.client.guild_channels(&self.guild_id).await?;
        tracing::debug!(guild_id = %self.guild_id, count = items.len(), "refreshed channel cache");
        self.cache.write().await.channels = Some(Cached {
            fetched_at: Instant::now(),
            items: items.clone(),
        });
        Ok(items)
    }

    async fn roles(&self) -> WorkspaceResult<Vec<WorkspaceRole>> {
        if let Some(items) = self
            .cache
            .read()
            .await
            .roles
            .as_ref()
            .and_then(|cached| cached.fresh(self.cache_ttl))
        {
            return Ok(items);
        }

        let items = self.client.guild_roles(&self.guild_id).await?;
        self.cache.write().await.roles = Some(Cached {
            fetched_at: Instant::now(),
            items: items.clone(),
        });
        Ok(items)
    }

    async fn create_channel(&self, channel: NewChannel) -> WorkspaceResult<WorkspaceChannel> {
        let created = self
            .client
            .create_guild_channel(&self.guild_id, &channel)
            .await?;
        self.upsert_cached_channel(&created).await;
        Ok(created)
    }

    async fn edit_channel(
        &self,
        channel_id: &str,
        edit: ChannelEdit,
    ) -> WorkspaceResult<WorkspaceChannel> {
        let updated = self.client.modify_channel(channel_id, &edit).await?;
        self.upsert_cached_channel(&updated).await;
        Ok(updated)
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> WorkspaceResult<()> {
        for chunk in split_for_discord(content, DISCORD_SAFE_MAX_CHARS) {
            self.client.create_message(channel_id, &chunk).await?;
        }
        Ok(())
    }

    async fn rename_role(&self, role_id: &str, name: &str) -> WorkspaceResult<()> {
        self.client
            .modify_role(&self.guild_id, role_id, name)
            .await?;
        let mut cache = self.cache.write().await;
        if let Some(role) = cache
            .roles
            .as_mut()
            .and_then(|cached| cached.items.iter_mut().find(|role| role.id == role_id))
        {
            role.name = name.to_string();
        }
        Ok(())
    }

    async fn add_member_role(&self, member_id: &str, role_id: &str) -> WorkspaceResult<()> {
        self.client
            .add_member_role(&self.guild_id, member_id, role_id)
            .await
    }

    async fn remove_member_role(&self, member_id: &str, role_id: &str) -> WorkspaceResult<()> {
        self.client
            .remove_member_role(&self.guild_id, member_id, role_id)
            .await
    }

    async fn messages_after(
        &self,
        channel_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> WorkspaceResult<Vec<WorkspaceMessage>> {
        self.client
            .channel_messages_after(channel_id, after, limit)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::DiscordWorkspace;
    use crate::api_client::{DiscordApiClient, DiscordClientConfig};
    use crate::workspace::{ChannelEdit, Workspace};

    fn workspace(base_url: &str, ttl: Duration) -> DiscordWorkspace {
        let client = DiscordApiClient::new(&DiscordClientConfig {
            api_base: base_url.to_string(),
            bot_token: "bot-token".to_string(),
            request_timeout_ms: 2_000,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
        })
        .expect("client");
        DiscordWorkspace::new(client, "g1", ttl)
    }

    #[tokio::test]
    async fn functional_channel_listing_is_cached_and_patched_by_edits() {
        let server = MockServer::start();
        let list = server.mock(|when, then| {
            when.method(GET).path("/guilds/g1/channels");
            then.status(200).json_body(json!([
                {"id": "10", "type": 4, "name": "HTB", "position": 0},
                {
                    "id": "11", "type": 0, "name": "web", "topic": "web",
                    "parent_id": "10", "position": 1
                }
            ]));
        });
        let edit = server.mock(|when, then| {
            when.method(PATCH).path("/channels/11");
            then.status(200).json_body(json!({
                "id": "11", "type": 0, "name": "solved-web", "topic": "web", "parent_id": "10"
            }));
        });

        let workspace = workspace(&server.base_url(), Duration::from_secs(60));
        assert_eq!(workspace.channels().await.expect("first").len(), 2);
        workspace
            .edit_channel("11", ChannelEdit::rename("solved-web"))
            .await
            .expect("edit");
        let channels = workspace.channels().await.expect("cached");

        assert_eq!(list.calls(), 1);
        edit.assert();
        assert_eq!(channels[1].name, "solved-web");
    }

    #[tokio::test]
    async fn functional_expired_cache_refetches() {
        let server = MockServer::start();
        let list = server.mock(|when, then| {
            when.method(GET).path("/guilds/g1/roles");
            then.status(200)
                .json_body(json!([{"id": "r1", "name": "HTB"}]));
        });

        let workspace = workspace(&server.base_url(), Duration::ZERO);
        workspace.roles().await.expect("first");
        workspace.roles().await.expect("second");
        assert_eq!(list.calls(), 2);
    }

    #[tokio::test]
    async fn integration_long_messages_are_sent_in_chunks() {
        let server = MockServer::start();
        let post = server.mock(|when, then| {
            when.method(POST).path("/channels/11/messages");
            then.status(200).json_body(json!({"id": "m1"}));
        });

        let workspace = workspace(&server.base_url(), Duration::from_secs(60));
        let description = format!("Description changed:\n{}", "x".repeat(2500));
        workspace
            .send_message("11", &description)
            .await
            .expect("send");
        assert_eq!(post.calls(), 2);
    }
}
