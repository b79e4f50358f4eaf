//! Network module.
//!
//! This module provides:
//! - The WebSocket admission adapter for writer and reader connections
//! - Listen-port allocation (fixed or leased from a port manager)

pub mod port_manager;
pub mod websocket;

// Re-export key types
pub use port_manager::{FixedPort, HttpPortManager, PortAllocator, PortManagerError, PortSource};
pub use websocket::{read_stream, write_stream};
