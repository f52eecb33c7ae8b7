//! Mutation pipeline host and the hooks that mirror CTFNote mutations onto
//! Discord.

pub mod discord_sync;
pub mod executor;
pub mod pipeline;
pub mod role_reconciler;

pub use discord_sync::{
    deleted_channel_name, solved_channel_name, DiscordSync, DiscordSyncConfig, DiscordSyncHooks,
    MAX_CHANNELS_PER_CATEGORY,
};
pub use executor::{EffectExecutor, EffectStats};
pub use pipeline::{
    HookError, HookEvent, HookProvider, HookRegistration, HookRegistry, HookStage, JwtClaims,
    Mutation, MutationContext, MutationHook, MutationName, MutationOutcome, MutationPipeline,
    PriorState, DISCORD_HOOK_PRIORITY,
};
pub use role_reconciler::{RoleChange, RoleReconciler};
