use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use ctfnote_archive::DEFAULT_MAX_DOCUMENT_CHARS;
use ctfnote_discord::{DEFAULT_CACHE_TTL_MS, DEFAULT_DISCORD_API_BASE, DEFAULT_TALK_CHANNEL_NAME};
use ctfnote_gateway::{DiscordSettings, GatewayConfig, HttpSettings};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "ctfnote-sync",
    about = "Mirrors CTFNote tasks, CTFs and invitations onto a Discord guild",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long = "database",
        env = "CTFNOTE_DATABASE",
        default_value = ".ctfnote/ctfnote.sqlite",
        help = "SQLite database holding CTFs, tasks, profiles and workspace links"
    )]
    pub(crate) database: PathBuf,

    #[arg(
        long = "discord-bot-token",
        env = "CTFNOTE_DISCORD_BOT_TOKEN",
        hide_env_values = true,
        help = "Discord bot token; when unset the Discord hooks are not registered"
    )]
    pub(crate) discord_bot_token: Option<String>,

    #[arg(
        long = "discord-guild-id",
        env = "CTFNOTE_DISCORD_GUILD_ID",
        help = "Guild (server) id mirrored by the sync hooks"
    )]
    pub(crate) discord_guild_id: Option<String>,

    #[arg(
        long = "discord-application-id",
        env = "CTFNOTE_DISCORD_APPLICATION_ID",
        help = "Application id used for slash commands and interaction follow-ups"
    )]
    pub(crate) discord_application_id: Option<String>,

    #[arg(
        long = "discord-public-key",
        env = "CTFNOTE_DISCORD_PUBLIC_KEY",
        help = "Hex ed25519 application public key used to verify interactions"
    )]
    pub(crate) discord_public_key: Option<String>,

    #[arg(
        long = "discord-api-base",
        env = "CTFNOTE_DISCORD_API_BASE",
        default_value = DEFAULT_DISCORD_API_BASE,
        help = "Discord REST API base URL"
    )]
    pub(crate) discord_api_base: String,

    #[arg(
        long = "discord-cache-ttl-ms",
        env = "CTFNOTE_DISCORD_CACHE_TTL_MS",
        default_value_t = DEFAULT_CACHE_TTL_MS,
        help = "How long guild channel and role listings are cached"
    )]
    pub(crate) discord_cache_ttl_ms: u64,

    #[arg(
        long = "talk-channel",
        env = "CTFNOTE_TALK_CHANNEL",
        default_value = DEFAULT_TALK_CHANNEL_NAME,
        help = "Channel under a CTF category that receives new-task notices"
    )]
    pub(crate) talk_channel: String,

    #[arg(
        long = "hedgedoc-url",
        env = "CTFNOTE_HEDGEDOC_URL",
        default_value = "http://127.0.0.1:3000",
        help = "HedgeDoc base URL used to publish archives"
    )]
    pub(crate) hedgedoc_url: String,

    #[arg(
        long = "max-document-chars",
        env = "CTFNOTE_MAX_DOCUMENT_CHARS",
        default_value_t = DEFAULT_MAX_DOCUMENT_CHARS,
        value_parser = parse_positive_usize,
        help = "Largest pad HedgeDoc accepts; bigger archives are split"
    )]
    pub(crate) max_document_chars: usize,

    #[arg(
        long = "request-timeout-ms",
        env = "CTFNOTE_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for Discord and HedgeDoc requests"
    )]
    pub(crate) request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "CTFNOTE_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Attempts per Discord request on rate limits and server errors"
    )]
    pub(crate) retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "CTFNOTE_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base backoff between Discord retries when no Retry-After is given"
    )]
    pub(crate) retry_base_delay_ms: u64,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Serve the interactions, mutations and health endpoints.
    Serve {
        #[arg(
            long = "bind",
            env = "CTFNOTE_BIND",
            default_value = "127.0.0.1:8787",
            help = "Address the gateway listens on"
        )]
        bind: String,

        #[arg(
            long = "mutation-token",
            env = "CTFNOTE_MUTATION_TOKEN",
            hide_env_values = true,
            help = "Bearer token required on /mutations when set"
        )]
        mutation_token: Option<String>,
    },
    /// Register the `archive` slash command in the guild.
    RegisterCommands,
}

impl Cli {
    fn discord_settings(&self) -> Result<Option<DiscordSettings>> {
        let Some(bot_token) = self
            .discord_bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
        else {
            return Ok(None);
        };
        let require = |value: &Option<String>, flag: &str| -> Result<String> {
            match value.as_deref().map(str::trim) {
                Some(value) if !value.is_empty() => Ok(value.to_string()),
                _ => bail!("{flag} is required when --discord-bot-token is set"),
            }
        };
        Ok(Some(DiscordSettings {
            bot_token: bot_token.to_string(),
            guild_id: require(&self.discord_guild_id, "--discord-guild-id")?,
            application_id: require(&self.discord_application_id, "--discord-application-id")?,
            public_key_hex: require(&self.discord_public_key, "--discord-public-key")?,
            api_base: self.discord_api_base.clone(),
            cache_ttl_ms: self.discord_cache_ttl_ms,
            talk_channel_name: self.talk_channel.clone(),
        }))
    }

    pub(crate) fn gateway_config(&self) -> Result<GatewayConfig> {
        let mut config = GatewayConfig::new(self.database.clone());
        config.discord = self.discord_settings()?;
        config.hedgedoc_url = self.hedgedoc_url.clone();
        config.max_document_chars = self.max_document_chars;
        config.http = HttpSettings {
            request_timeout_ms: self.request_timeout_ms,
            retry_max_attempts: self.retry_max_attempts,
            retry_base_delay_ms: self.retry_base_delay_ms,
        };
        if let Command::Serve {
            bind,
            mutation_token,
        } = &self.command
        {
            config.bind = bind.clone();
            config.mutation_token = mutation_token.clone().filter(|token| !token.trim().is_empty());
        }
        Ok(config)
    }
}
