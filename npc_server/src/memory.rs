//! In-memory host collaborators.
//!
//! Used by the demo binary and the integration tests in place of a real
//! player registry and packet layer.

use async_trait::async_trait;
use bytes::Bytes;
use npc_core::{
    error::TransportError,
    host::{Transport, WorldView},
    math::Location,
    protocol::{wire::frame_packet_id, ProtocolVersion},
    viewer::{ConnectionHandle, PlayerId},
};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct PlayerEntry {
    location: Location,
    version: ProtocolVersion,
}

/// Player registry backed by a map.
#[derive(Default)]
pub struct MemoryWorld {
    players: RwLock<HashMap<PlayerId, PlayerEntry>>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a player online at `location`.
    pub fn join(&self, player: PlayerId, version: ProtocolVersion, location: Location) {
        self.players
            .write()
            .insert(player, PlayerEntry { location, version });
    }

    /// Returns `false` if the player is not online.
    pub fn teleport(&self, player: PlayerId, location: Location) -> bool {
        match self.players.write().get_mut(&player) {
            Some(entry) => {
                entry.location = location;
                true
            }
            None => false,
        }
    }

    pub fn quit(&self, player: PlayerId) {
        self.players.write().remove(&player);
    }
}

impl WorldView for MemoryWorld {
    fn current_position(&self, player: PlayerId) -> Option<Location> {
        self.players.read().get(&player).map(|e| e.location)
    }

    fn is_online(&self, player: PlayerId) -> bool {
        self.players.read().contains_key(&player)
    }

    fn protocol_version(&self, player: PlayerId) -> Option<ProtocolVersion> {
        self.players.read().get(&player).map(|e| e.version)
    }
}

/// Transport that only logs what it would send.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, connection: ConnectionHandle, frame: Bytes) -> Result<(), TransportError> {
        debug!(
            connection = connection.0,
            packet_id = frame_packet_id(&frame).unwrap_or(-1),
            len = frame.len(),
            "frame"
        );
        Ok(())
    }
}
