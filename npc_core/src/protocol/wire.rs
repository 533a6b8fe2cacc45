//! Wire primitives shared by every codec.
//!
//! Frames are `VarInt packet id ++ body`. Length prefixing, compression and
//! encryption belong to the host transport.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::entity::{NpcId, Profile, ProfileId};
use crate::error::CodecError;
use crate::math::{angle_byte, Location};

/// Longest string accepted from a client.
pub const MAX_INBOUND_STRING: usize = 32767;

/// Builds one outbound frame.
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new(packet_id: i32) -> Self {
        let mut w = PacketWriter {
            buf: BytesMut::with_capacity(64),
        };
        w.var_int(packet_id);
        w
    }

    pub fn var_int(&mut self, value: i32) -> &mut Self {
        let mut v = value as u32;
        loop {
            if v & !0x7F == 0 {
                self.buf.put_u8(v as u8);
                return self;
            }
            self.buf.put_u8(((v & 0x7F) | 0x80) as u8);
            v >>= 7;
        }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn i8(&mut self, value: i8) -> &mut Self {
        self.buf.put_i8(value);
        self
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.buf.put_u8(value as u8);
        self
    }

    pub fn i16(&mut self, value: i16) -> &mut Self {
        self.buf.put_i16(value);
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.buf.put_f32(value);
        self
    }

    pub fn f64(&mut self, value: f64) -> &mut Self {
        self.buf.put_f64(value);
        self
    }

    /// Angle in degrees, written as 1/256 of a turn.
    pub fn angle(&mut self, degrees: f32) -> &mut Self {
        self.buf.put_u8(angle_byte(degrees));
        self
    }

    pub fn uuid(&mut self, value: u128) -> &mut Self {
        self.buf.put_u128(value);
        self
    }

    /// VarInt length-prefixed UTF-8.
    pub fn string(&mut self, value: &str) -> &mut Self {
        self.var_int(value.len() as i32);
        self.buf.put_slice(value.as_bytes());
        self
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over one inbound frame. Every read is bounds-checked so truncated
/// input surfaces as [`CodecError::MalformedPacket`] instead of a panic.
pub struct PacketReader<'a> {
    buf: &'a [u8],
}

impl<'a> PacketReader<'a> {
    pub fn new(frame: &'a [u8]) -> Self {
        PacketReader { buf: frame }
    }

    fn need(&self, n: usize, what: &str) -> Result<(), CodecError> {
        if self.buf.remaining() < n {
            return Err(CodecError::malformed(format!(
                "truncated {what}: need {n} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn var_int(&mut self) -> Result<i32, CodecError> {
        let mut value: u32 = 0;
        for i in 0..5 {
            self.need(1, "varint")?;
            let byte = self.buf.get_u8();
            value |= ((byte & 0x7F) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value as i32);
            }
        }
        Err(CodecError::malformed("varint longer than 5 bytes"))
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        self.need(1, "byte")?;
        Ok(self.buf.get_u8())
    }

    pub fn bool(&mut self) -> Result<bool, CodecError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::malformed(format!("invalid boolean {other}"))),
        }
    }

    pub fn f32(&mut self) -> Result<f32, CodecError> {
        self.need(4, "float")?;
        Ok(self.buf.get_f32())
    }

    pub fn string(&mut self, max_len: usize) -> Result<String, CodecError> {
        let len = self.var_int()?;
        if len < 0 || len as usize > max_len * 4 {
            return Err(CodecError::malformed(format!("string length {len}")));
        }
        let len = len as usize;
        self.need(len, "string")?;
        let raw = self.buf[..len].to_vec();
        self.buf.advance(len);
        String::from_utf8(raw).map_err(|_| CodecError::malformed("string is not utf-8"))
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Fails when bytes are left over after a complete decode.
    pub fn expect_end(&self) -> Result<(), CodecError> {
        if self.buf.has_remaining() {
            return Err(CodecError::malformed(format!(
                "{} trailing bytes",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}

/// 1.8 style fixed-point coordinate (1/32 block).
pub fn fixed_point(coord: f64) -> i32 {
    (coord * 32.0).floor() as i32
}

/// Velocity in 1/8000 block per tick, clamped to what clients accept.
pub fn velocity_units(blocks_per_tick: f64) -> i16 {
    (blocks_per_tick.clamp(-3.9, 3.9) * 8000.0) as i16
}

/// JSON text component for a plain string.
pub fn chat_json(text: &str) -> String {
    serde_json::json!({ "text": text }).to_string()
}

/// Reads the packet id of an outbound frame. Used by tests and diagnostics.
pub fn frame_packet_id(frame: &[u8]) -> Result<i32, CodecError> {
    PacketReader::new(frame).var_int()
}

/// How a position change is expressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    /// Nothing a client could see changed.
    None,
    /// Rotation only.
    Look,
    /// Relative move in protocol units, optionally with rotation.
    Relative { dx: i16, dy: i16, dz: i16, look: bool },
    /// Absolute position. Used when the delta does not fit or the world changed.
    Teleport,
}

/// Classifies a move given the protocol's delta scale (units per block) and
/// the largest delta a relative move can carry.
pub fn classify_move(from: &Location, to: &Location, scale: f64, limit: i16) -> Movement {
    let look = angle_byte(from.yaw) != angle_byte(to.yaw)
        || angle_byte(from.pitch) != angle_byte(to.pitch);
    if from.world != to.world {
        return Movement::Teleport;
    }
    let delta = |a: f64, b: f64| (b * scale).floor() as i64 - (a * scale).floor() as i64;
    let (dx, dy, dz) = (
        delta(from.pos.x, to.pos.x),
        delta(from.pos.y, to.pos.y),
        delta(from.pos.z, to.pos.z),
    );
    let limit = limit as i64;
    if [dx, dy, dz].iter().any(|d| d.abs() > limit) {
        return Movement::Teleport;
    }
    if dx == 0 && dy == 0 && dz == 0 {
        return if look { Movement::Look } else { Movement::None };
    }
    Movement::Relative {
        dx: dx as i16,
        dy: dy as i16,
        dz: dz as i16,
        look,
    }
}

/// Player names longer than this are rejected by clients.
pub const MAX_PLAYER_NAME: usize = 16;

/// Cuts a name to the player-list limit on a char boundary.
pub fn player_name(name: &str) -> &str {
    match name.char_indices().nth(MAX_PLAYER_NAME) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

/// Player-list ADD entry. The layout is the same from 1.8 through 1.16.
pub fn player_info_add(packet_id: i32, unique_id: ProfileId, profile: &Profile) -> Bytes {
    let mut w = PacketWriter::new(packet_id);
    w.var_int(0).var_int(1).uuid(unique_id.0);
    w.string(player_name(&profile.name));
    match &profile.skin {
        Some(skin) => {
            w.var_int(1).string("textures").string(&skin.value);
            match &skin.signature {
                Some(sig) => w.bool(true).string(sig),
                None => w.bool(false),
            };
        }
        None => {
            w.var_int(0);
        }
    }
    // survival, zero ping, no display name
    w.var_int(0).var_int(0).bool(false);
    w.finish()
}

/// Player-list REMOVE entry.
pub fn player_info_remove(packet_id: i32, unique_id: ProfileId) -> Bytes {
    let mut w = PacketWriter::new(packet_id);
    w.var_int(4).var_int(1).uuid(unique_id.0);
    w.finish()
}

/// Destroy-entities frame for a single id.
pub fn destroy_entity(packet_id: i32, entity_id: NpcId) -> Bytes {
    let mut w = PacketWriter::new(packet_id);
    w.var_int(1).var_int(entity_id.0);
    w.finish()
}
