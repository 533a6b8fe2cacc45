//! Seams to the hosting application.
//!
//! The engine never owns sockets or players. It sends frames through a
//! [`Transport`], asks a [`WorldView`] where players are, and hands failures
//! it absorbs to an [`ErrorSink`].

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use crate::entity::NpcId;
use crate::error::{CodecError, InvalidSkinError, TransportError};
use crate::math::Location;
use crate::protocol::ProtocolVersion;
use crate::viewer::{ConnectionHandle, PlayerId};

/// Outbound half of the host's packet layer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one frame. Length prefixing and compression are the host's job.
    async fn send(&self, connection: ConnectionHandle, frame: Bytes) -> Result<(), TransportError>;
}

/// Read-only view of the host's player registry.
pub trait WorldView: Send + Sync {
    fn current_position(&self, player: PlayerId) -> Option<Location>;
    fn is_online(&self, player: PlayerId) -> bool;
    fn protocol_version(&self, player: PlayerId) -> Option<ProtocolVersion>;
}

/// A failure handled inside the engine.
#[derive(Debug)]
pub enum Failure {
    /// An interaction callback returned an error or panicked.
    Callback {
        npc: NpcId,
        player: PlayerId,
        message: String,
    },
    /// Encode or decode failed for a viewer.
    Codec { player: PlayerId, error: CodecError },
    Transport {
        player: PlayerId,
        error: TransportError,
    },
    /// The NPC's skin was replaced by the default.
    InvalidSkin {
        npc: NpcId,
        error: InvalidSkinError,
    },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Callback {
                npc,
                player,
                message,
            } => write!(f, "callback for npc {npc} (player {player}) failed: {message}"),
            Failure::Codec { player, error } => write!(f, "codec error for {player}: {error}"),
            Failure::Transport { player, error } => {
                write!(f, "transport error for {player}: {error}")
            }
            Failure::InvalidSkin { npc, error } => write!(f, "npc {npc}: {error}"),
        }
    }
}

pub trait ErrorSink: Send + Sync {
    fn report(&self, failure: Failure);
}

/// Logs failures and otherwise drops them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, failure: Failure) {
        tracing::warn!(%failure, "engine failure");
    }
}
