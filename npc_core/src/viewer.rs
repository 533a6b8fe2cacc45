//! Viewer sessions.
//!
//! A session exists per (player, protocol version, connection). It caches the
//! codec chosen for the viewer's version so encoding never re-resolves it.

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use crate::protocol::{Codec, ProtocolVersion};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Identity of a player as known by the host. Never owned by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u128);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Opaque handle of a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionHandle(pub u64);

impl ConnectionHandle {
    pub fn new_unique() -> Self {
        ConnectionHandle(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// One connected viewer.
pub struct ViewerSession {
    pub player: PlayerId,
    pub connection: ConnectionHandle,
    pub version: ProtocolVersion,
    /// `None` when no codec covers `version`; such a viewer is never tracked.
    codec: Option<Arc<dyn Codec>>,
    closed: AtomicBool,
}

impl ViewerSession {
    pub fn new(
        player: PlayerId,
        connection: ConnectionHandle,
        version: ProtocolVersion,
        codec: Option<Arc<dyn Codec>>,
    ) -> Self {
        Self {
            player,
            connection,
            version,
            codec,
            closed: AtomicBool::new(false),
        }
    }

    pub fn codec(&self) -> Option<&Arc<dyn Codec>> {
        self.codec.as_ref()
    }

    pub fn is_trackable(&self) -> bool {
        self.codec.is_some()
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Marks the connection gone. Returns `true` for the first caller only.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for ViewerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerSession")
            .field("player", &self.player)
            .field("connection", &self.connection)
            .field("version", &self.version)
            .field("codec", &self.codec.as_ref().map(|c| c.name()))
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CodecTable;

    #[test]
    fn close_is_reported_once() {
        let s = ViewerSession::new(
            PlayerId(1),
            ConnectionHandle::new_unique(),
            ProtocolVersion::V1_8,
            CodecTable::standard().select(ProtocolVersion::V1_8).ok(),
        );
        assert!(s.is_trackable());
        assert!(s.is_connected());
        assert!(s.mark_closed());
        assert!(!s.mark_closed());
        assert!(!s.is_connected());
    }

    #[test]
    fn connection_handles_are_unique() {
        assert_ne!(ConnectionHandle::new_unique(), ConnectionHandle::new_unique());
    }
}
