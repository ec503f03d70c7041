//! `rubble_server`
//!
//! The authoritative arena server: fixed-tick simulation over rapier2d,
//! chunked interest management, and delta-encoded binary replication.

pub mod collision;
pub mod grid;
pub mod physics;
pub mod player;
pub mod replication;
pub mod rock;
pub mod server;
pub mod session;
pub mod world;
