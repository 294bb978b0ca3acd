// PartGrid - Multi-tenant parts-catalog platform core
//
// Two runtime subsystems share one service backbone: a real-time chat fabric
// over persistent WebSocket connections with Redis-backed cross-node
// fan-out, and a scheduled external-data synchronization engine that
// extracts from foreign systems, transforms through typed processor
// pipelines, and idempotently upserts into the primary store.

pub mod api;
pub mod cache;
pub mod catalog;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod permissions;
pub mod security;
pub mod services;
pub mod sync;
pub mod utils;
pub mod validation;

pub use config::Settings;
pub use error::{AppError, Result};
pub use services::ServiceContainer;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
