//! Discord side of the CTFNote sync: the workspace contract, its REST-backed
//! and in-memory implementations, lookups and operator interactions.

pub mod api_client;
pub mod discord_workspace;
pub mod interaction;
pub mod locator;
pub mod memory_workspace;
mod transport_helpers;
pub mod workspace;

pub use api_client::{DiscordApiClient, DiscordClientConfig, DEFAULT_DISCORD_API_BASE};
pub use discord_workspace::{DiscordWorkspace, DEFAULT_CACHE_TTL_MS};
pub use interaction::{
    has_permission, DiscordInteractionSurface, InteractionButton, InteractionSurface,
    InteractionView, RecordingSurface, SlashCommand, MAX_CUSTOM_ID_CHARS,
    PERMISSION_ADMINISTRATOR,
};
pub use locator::{
    find_categories_for_event, find_channel_for_task, find_role_for_event, find_talk_channel,
    LinkedLocator, DEFAULT_TALK_CHANNEL_NAME,
};
pub use memory_workspace::InMemoryWorkspace;
pub use workspace::{
    ChannelEdit, ChannelKind, ChannelPredicate, NewChannel, Workspace, WorkspaceChannel,
    WorkspaceError, WorkspaceMessage, WorkspaceResult, WorkspaceRole,
};
