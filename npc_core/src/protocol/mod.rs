//! Protocol codecs.
//!
//! - [`intent`]: version-independent intents and inbound events.
//! - [`wire`]: frame reader and writer.
//! - [`v1_8`], [`v1_12`], [`v1_16`]: one codec per supported protocol family.
//!
//! A [`CodecTable`] maps protocol version ranges to codecs. The tracker
//! selects a codec once per viewer session and reuses it for every packet.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

pub mod intent;
pub mod v1_12;
pub mod v1_16;
pub mod v1_8;
pub mod wire;

pub use intent::{
    team_name, Animation, Hand, InboundEvent, InteractAction, MetaField, MetaScope, MetaValue,
    PacketIntent,
};

/// Numeric protocol version reported by the client handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion(pub i32);

impl ProtocolVersion {
    pub const V1_8: ProtocolVersion = ProtocolVersion(47);
    pub const V1_12_2: ProtocolVersion = ProtocolVersion(340);
    pub const V1_16_5: ProtocolVersion = ProtocolVersion(754);
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Translates intents for one protocol family.
///
/// A feature the version cannot express encodes to zero frames rather than an
/// error.
pub trait Codec: Send + Sync {
    /// Human-readable family name, for logs.
    fn name(&self) -> &'static str;

    fn encode(&self, intent: &PacketIntent) -> Result<Vec<Bytes>, CodecError>;

    /// Decodes one serverbound frame. Frames that are not entity
    /// interactions yield `Ok(None)`.
    fn decode(&self, frame: &[u8]) -> Result<Option<InboundEvent>, CodecError>;
}

struct CodecEntry {
    versions: RangeInclusive<i32>,
    codec: Arc<dyn Codec>,
}

/// Version range to codec mapping.
#[derive(Default)]
pub struct CodecTable {
    entries: Vec<CodecEntry>,
}

impl CodecTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in codecs: 1.8.x, 1.12.x and 1.16.2 to 1.16.5.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(v1_8::VERSIONS, Arc::new(v1_8::Codec18));
        table.register(v1_12::VERSIONS, Arc::new(v1_12::Codec112));
        table.register(v1_16::VERSIONS, Arc::new(v1_16::Codec116));
        table
    }

    /// Adds a codec. Later registrations win where ranges overlap.
    pub fn register(&mut self, versions: RangeInclusive<i32>, codec: Arc<dyn Codec>) {
        tracing::debug!(codec = codec.name(), ?versions, "registered codec");
        self.entries.push(CodecEntry { versions, codec });
    }

    pub fn select(&self, version: ProtocolVersion) -> Result<Arc<dyn Codec>, CodecError> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.versions.contains(&version.0))
            .map(|e| e.codec.clone())
            .ok_or(CodecError::UnsupportedProtocol(version))
    }

    pub fn supports(&self, version: ProtocolVersion) -> bool {
        self.select(version).is_ok()
    }

    /// One-shot encode for callers that do not cache the codec.
    pub fn encode(
        &self,
        intent: &PacketIntent,
        version: ProtocolVersion,
    ) -> Result<Vec<Bytes>, CodecError> {
        self.select(version)?.encode(intent)
    }

    pub fn decode(
        &self,
        frame: &[u8],
        version: ProtocolVersion,
    ) -> Result<Option<InboundEvent>, CodecError> {
        self.select(version)?.decode(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_covers_known_versions() {
        let table = CodecTable::standard();
        assert_eq!(table.select(ProtocolVersion(47)).unwrap().name(), "1.8");
        assert_eq!(table.select(ProtocolVersion(338)).unwrap().name(), "1.12");
        assert_eq!(table.select(ProtocolVersion(340)).unwrap().name(), "1.12");
        assert_eq!(table.select(ProtocolVersion(751)).unwrap().name(), "1.16");
        assert_eq!(table.select(ProtocolVersion(754)).unwrap().name(), "1.16");
    }

    #[test]
    fn unknown_version_is_unsupported() {
        let table = CodecTable::standard();
        assert_eq!(
            table.select(ProtocolVersion(578)).err(),
            Some(CodecError::UnsupportedProtocol(ProtocolVersion(578)))
        );
    }

    #[test]
    fn later_registration_wins() {
        let mut table = CodecTable::standard();
        table.register(754..=754, Arc::new(v1_8::Codec18));
        assert_eq!(table.select(ProtocolVersion(754)).unwrap().name(), "1.8");
        assert_eq!(table.select(ProtocolVersion(753)).unwrap().name(), "1.16");
    }
}
