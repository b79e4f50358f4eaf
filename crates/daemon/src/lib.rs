//! # Log Listener Proxy Daemon Library
//!
//! This crate provides the server side of the log listener proxy: a relay
//! that lets a batch job stream its console output while any number of
//! viewers watch it live.
//!
//! ## Overview
//!
//! A caller creates a session under an id of its choosing. The job then opens
//! one writer WebSocket per stream (stdout, stderr) and every viewer opens
//! reader WebSockets for the streams it wants. The daemon provides:
//!
//! - **Session Registry**: Create, look up and delete sessions; each session
//!   expires after a fixed time-to-live
//! - **Channels**: One writer, many readers, one private bounded queue per
//!   reader, end-of-stream marker plus a short linger window
//! - **Admission Adapter**: Maps WebSocket connections onto channel operations
//! - **Port Allocation**: Fixed port or a lease from a port manager service
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Proxy Orchestrator                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │     axum Router (admin routes, /health, stream routes)     │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! │                               │                                 │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Session Registry                        │ │
//! │  │   Session ─┬─ Channel(stdout) ── reader queues             │ │
//! │  │            └─ Channel(stderr) ── reader queues             │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! │                                                                 │
//! │  ┌───────────────────┐                                          │
//! │  │   Port Allocator  │                                          │
//! │  └───────────────────┘                                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, ProxyOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let mut orchestrator = ProxyOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     // Serve until a shutdown signal arrives...
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Session registry, channels and reader queues
//! - [`network`]: WebSocket admission adapter and port allocation
//! - [`router`]: HTTP routes
//! - [`orchestrator`]: Main proxy coordinator

pub mod config;
pub mod network;
pub mod orchestrator;
pub mod router;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export session types for convenience
pub use session::{
    Channel, ChannelSettings, Delivery, ReaderEvent, RegistrySettings, RelayError, Session,
    SessionId, SessionRegistry,
};

// Re-export network types for convenience
pub use network::{FixedPort, HttpPortManager, PortAllocator, PortManagerError, PortSource};

// Re-export router types for convenience
pub use router::{build_router, AppState};

// Re-export orchestrator types for convenience
pub use orchestrator::{OrchestratorEvent, OrchestratorState, ProxyOrchestrator};
