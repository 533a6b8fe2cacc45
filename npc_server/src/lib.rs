//! `npc_server`
//!
//! Host-facing side of the NPC engine:
//! - [`NpcPlatform`]: create, update and remove NPCs, feed viewer events and
//!   inbound bytes, drive the fixed tick.
//! - [`memory`]: in-memory world and logging transport for demos and tests.

pub mod memory;
pub mod platform;

pub use platform::{NpcHandle, NpcPlatform};
