//! HTTP entry points of the sync service: Discord interactions, mutation
//! requests and health.

pub mod config;
pub mod interactions;
pub mod runtime;
pub mod server;
pub mod signature;

pub use config::{DiscordSettings, GatewayConfig, HttpSettings};
pub use interactions::{
    DiscordSurfaceFactory, InteractionHandler, InteractionRejection, SurfaceFactory,
    ARCHIVE_COMMAND_NAME,
};
pub use runtime::{build_gateway_state, register_commands, run_gateway};
pub use server::{build_gateway_router, GatewayState};
pub use signature::{encode_hex, InteractionVerifier};
