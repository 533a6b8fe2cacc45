//! Error taxonomy.
//!
//! Only registry misuse is surfaced to the hosting application. Codec and
//! transport errors are absorbed by the tracker and the dispatch workers.

use thiserror::Error;

use crate::entity::NpcId;
use crate::protocol::ProtocolVersion;

/// Misuse of the entity registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The id is already owned by a live NPC.
    #[error("npc id {0} is already in use")]
    DuplicateId(NpcId),

    /// No NPC with this id was ever created (or it is long gone).
    #[error("unknown npc {0}")]
    UnknownNpc(NpcId),

    /// The NPC was removed; its id can no longer be mutated.
    #[error("npc {0} has been removed")]
    Removed(NpcId),
}

/// Failures of the protocol codec layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No codec covers this protocol version. Not retried; the viewer becomes
    /// non-trackable.
    #[error("unsupported protocol version {0}")]
    UnsupportedProtocol(ProtocolVersion),

    /// Inbound bytes could not be decoded. The bytes are discarded.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
}

impl CodecError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        CodecError::MalformedPacket(reason.into())
    }
}

/// A skin texture that cannot be sent to clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid skin texture: {reason}")]
pub struct InvalidSkinError {
    pub reason: &'static str,
}

/// Transport failures reported by the host's send primitive.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The connection is gone. Treated as a normal disconnect.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejected configuration values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be > 0, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("action_radius ({action}) cannot exceed tracking_radius ({tracking})")]
    ActionExceedsTracking { action: f64, tracking: f64 },

    #[error("default skin: {0}")]
    DefaultSkin(#[from] InvalidSkinError),
}
