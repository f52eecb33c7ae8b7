use std::sync::Arc;

use anyhow::{Context, Result};
use ctfnote_archive::{ArchivePublisher, ArchiveWorkflow, HedgedocClient};
use ctfnote_core::CtfStore;
use ctfnote_discord::{DiscordApiClient, DiscordWorkspace, LinkedLocator, SlashCommand};
use ctfnote_hooks::{
    DiscordSync, DiscordSyncHooks, EffectExecutor, HookProvider, HookRegistry, MutationPipeline,
};
use ctfnote_store::SqliteCtfStore;
use tokio::net::TcpListener;

use crate::config::{DiscordSettings, GatewayConfig};
use crate::interactions::{DiscordSurfaceFactory, InteractionHandler};
use crate::server::{build_gateway_router, GatewayState};
use crate::signature::InteractionVerifier;

/// Wires the store, the Discord side and the pipeline from config.
pub fn build_gateway_state(config: &GatewayConfig) -> Result<Arc<GatewayState>> {
    let store = Arc::new(
        SqliteCtfStore::new(&config.database_path).with_context(|| {
            format!("failed to open database {}", config.database_path.display())
        })?,
    );
    let executor = Arc::new(EffectExecutor::new());

    let Some(discord) = config.discord.as_ref() else {
        tracing::info!("discord not configured, running without sync hooks");
        let pipeline = MutationPipeline::new(store, HookRegistry::default(), executor);
        return Ok(Arc::new(GatewayState {
            pipeline: Arc::new(pipeline),
            interactions: None,
            mutation_token: config.mutation_token.clone(),
        }));
    };

    let client = DiscordApiClient::new(&discord.client_config(&config.http))
        .context("failed to build discord client")?;
    let workspace = Arc::new(DiscordWorkspace::new(
        client.clone(),
        &discord.guild_id,
        discord.cache_ttl(),
    ));
    let locator = LinkedLocator::new(workspace, store.clone());

    let hooks = DiscordSyncHooks::new(DiscordSync::new(
        store.clone(),
        locator.clone(),
        discord.sync_config(),
    ));
    let providers: [&dyn HookProvider; 1] = [&hooks];
    let pipeline = MutationPipeline::new(store.clone(), HookRegistry::build(&providers), executor);

    let hedgedoc = HedgedocClient::new(&config.hedgedoc_config())
        .with_context(|| format!("invalid hedgedoc url {}", config.hedgedoc_url))?;
    let store_handle: Arc<dyn CtfStore> = store;
    let workflow = ArchiveWorkflow::new(
        store_handle,
        locator,
        ArchivePublisher::new(Arc::new(hedgedoc)),
    );
    let verifier = InteractionVerifier::from_hex(&discord.public_key_hex)
        .context("invalid discord application public key")?;
    let surfaces = Arc::new(DiscordSurfaceFactory::new(client, &discord.application_id));

    tracing::info!(guild_id = %discord.guild_id, "discord sync hooks registered");
    Ok(Arc::new(GatewayState {
        pipeline: Arc::new(pipeline),
        interactions: Some(InteractionHandler::new(verifier, workflow, surfaces)),
        mutation_token: config.mutation_token.clone(),
    }))
}

pub async fn run_gateway(config: GatewayConfig) -> Result<()> {
    let state = build_gateway_state(&config)?;
    let listener = TcpListener::bind(config.bind.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve gateway bound address")?;
    tracing::info!(
        addr = %local_addr,
        discord = config.discord.is_some(),
        "ctfnote gateway listening"
    );

    let app = build_gateway_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("ctfnote gateway exited unexpectedly")?;

    tracing::info!("draining pending discord side effects");
    state.pipeline.executor().settle().await;
    let stats = state.pipeline.executor().stats();
    tracing::info!(
        submitted = stats.submitted,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "gateway stopped"
    );
    Ok(())
}

/// Overwrites the guild's slash commands with the `archive` command.
pub async fn register_commands(settings: &DiscordSettings, config: &GatewayConfig) -> Result<()> {
    let client = DiscordApiClient::new(&settings.client_config(&config.http))
        .context("failed to build discord client")?;
    let commands = serde_json::to_value([SlashCommand::archive()])
        .context("failed to encode slash commands")?;
    client
        .bulk_overwrite_guild_commands(&settings.application_id, &settings.guild_id, &commands)
        .await
        .context("failed to register slash commands")?;
    tracing::info!(guild_id = %settings.guild_id, "registered archive command");
    Ok(())
}
