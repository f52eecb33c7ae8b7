use std::path::PathBuf;
use std::time::Duration;

use ctfnote_archive::{HedgedocConfig, DEFAULT_MAX_DOCUMENT_CHARS};
use ctfnote_discord::DiscordClientConfig;
use ctfnote_hooks::DiscordSyncConfig;

#[derive(Debug, Clone)]
pub struct DiscordSettings {
    pub bot_token: String,
    pub guild_id: String,
    pub application_id: String,
    pub public_key_hex: String,
    pub api_base: String,
    pub cache_ttl_ms: u64,
    pub talk_channel_name: String,
}

impl DiscordSettings {
    pub fn client_config(&self, http: &HttpSettings) -> DiscordClientConfig {
        DiscordClientConfig {
            api_base: self.api_base.clone(),
            bot_token: self.bot_token.clone(),
            request_timeout_ms: http.request_timeout_ms,
            retry_max_attempts: http.retry_max_attempts,
            retry_base_delay_ms: http.retry_base_delay_ms,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn sync_config(&self) -> DiscordSyncConfig {
        DiscordSyncConfig {
            talk_channel_name: self.talk_channel_name.clone(),
            ..DiscordSyncConfig::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

/// Resolved settings for `ctfnote-sync serve`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: String,
    pub database_path: PathBuf,
    /// `None` disables every Discord hook and the interactions endpoint.
    pub discord: Option<DiscordSettings>,
    pub hedgedoc_url: String,
    pub max_document_chars: usize,
    pub mutation_token: Option<String>,
    pub http: HttpSettings,
}

impl GatewayConfig {
    pub fn new(database_path: PathBuf) -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            database_path,
            discord: None,
            hedgedoc_url: "http://127.0.0.1:3000".to_string(),
            max_document_chars: DEFAULT_MAX_DOCUMENT_CHARS,
            mutation_token: None,
            http: HttpSettings::default(),
        }
    }

    pub fn hedgedoc_config(&self) -> HedgedocConfig {
        HedgedocConfig {
            base_url: self.hedgedoc_url.clone(),
            request_timeout_ms: self.http.request_timeout_ms,
            max_document_chars: self.max_document_chars,
        }
    }
}
