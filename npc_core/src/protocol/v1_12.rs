//! Protocol 338 to 340 (1.12.1 and 1.12.2).
//!
//! Double-precision positions, 1/4096 block relative moves, typed metadata
//! entries with an explicit index byte.

use std::ops::RangeInclusive;

use bytes::Bytes;

use super::intent::{InboundEvent, InteractAction, MetaScope, MetaValue, PacketIntent};
use super::v1_8::write_legacy_item;
use super::wire::{self, classify_move, velocity_units, Movement, PacketReader, PacketWriter};
use super::{team_name, Hand};
use crate::entity::{
    EntityFlags, EntityKind, EquipmentSlot, GlowColor, NpcId, Profile, ProfileId,
};
use crate::error::CodecError;
use crate::math::{angle_byte, Location, Vec3};

pub const VERSIONS: RangeInclusive<i32> = 338..=340;

mod ids {
    pub const SPAWN_OBJECT: i32 = 0x00;
    pub const SPAWN_MOB: i32 = 0x03;
    pub const SPAWN_PLAYER: i32 = 0x05;
    pub const ANIMATION: i32 = 0x06;
    pub const REL_MOVE: i32 = 0x26;
    pub const LOOK_MOVE: i32 = 0x27;
    pub const LOOK: i32 = 0x28;
    pub const PLAYER_INFO: i32 = 0x2E;
    pub const DESTROY: i32 = 0x32;
    pub const HEAD_LOOK: i32 = 0x36;
    pub const METADATA: i32 = 0x3C;
    pub const VELOCITY: i32 = 0x3E;
    pub const EQUIPMENT: i32 = 0x3F;
    pub const TEAMS: i32 = 0x44;
    pub const TELEPORT: i32 = 0x4C;

    pub const USE_ENTITY: i32 = 0x0A;
}

mod meta_type {
    pub const BYTE: i32 = 0;
    pub const FLOAT: i32 = 2;
    pub const STRING: i32 = 3;
    pub const BOOL: i32 = 6;
}

const META_END: u8 = 0xFF;
// 0x10 meant "eating" before 1.13; swimming did not exist yet
const FLAG_MASK: u8 = !EntityFlags::SWIMMING.bits();

/// Codec for 1.12.x clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct Codec112;

impl Codec112 {
    fn spawn(
        &self,
        entity_id: NpcId,
        kind: &EntityKind,
        location: &Location,
        velocity: Vec3,
        unique_id: ProfileId,
        profile: &Profile,
    ) -> Vec<Bytes> {
        let pos = location.pos;
        match kind {
            EntityKind::Humanoid => {
                let info = wire::player_info_add(ids::PLAYER_INFO, unique_id, profile);
                let mut w = PacketWriter::new(ids::SPAWN_PLAYER);
                w.var_int(entity_id.0)
                    .uuid(unique_id.0)
                    .f64(pos.x)
                    .f64(pos.y)
                    .f64(pos.z)
                    .angle(location.yaw)
                    .angle(location.pitch)
                    .u8(META_END);
                vec![info, w.finish()]
            }
            EntityKind::Mob(types) => {
                let mut w = PacketWriter::new(ids::SPAWN_MOB);
                w.var_int(entity_id.0)
                    .uuid(unique_id.0)
                    .var_int(types.legacy as i32)
                    .f64(pos.x)
                    .f64(pos.y)
                    .f64(pos.z)
                    .angle(location.yaw)
                    .angle(location.pitch)
                    .angle(location.yaw)
                    .i16(velocity_units(velocity.x))
                    .i16(velocity_units(velocity.y))
                    .i16(velocity_units(velocity.z))
                    .u8(META_END);
                vec![w.finish()]
            }
            EntityKind::Object(types) => {
                let mut w = PacketWriter::new(ids::SPAWN_OBJECT);
                w.var_int(entity_id.0)
                    .uuid(unique_id.0)
                    .u8(types.legacy)
                    .f64(pos.x)
                    .f64(pos.y)
                    .f64(pos.z)
                    .angle(location.pitch)
                    .angle(location.yaw)
                    .i32(0)
                    .i16(velocity_units(velocity.x))
                    .i16(velocity_units(velocity.y))
                    .i16(velocity_units(velocity.z));
                vec![w.finish()]
            }
        }
    }

    fn movement(&self, entity_id: NpcId, from: &Location, to: &Location, on_ground: bool) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(2);
        match classify_move(from, to, 4096.0, i16::MAX) {
            Movement::None => return frames,
            Movement::Look => {
                let mut w = PacketWriter::new(ids::LOOK);
                w.var_int(entity_id.0).angle(to.yaw).angle(to.pitch).bool(on_ground);
                frames.push(w.finish());
            }
            Movement::Relative { dx, dy, dz, look } => {
                let mut w = PacketWriter::new(if look { ids::LOOK_MOVE } else { ids::REL_MOVE });
                w.var_int(entity_id.0).i16(dx).i16(dy).i16(dz);
                if look {
                    w.angle(to.yaw).angle(to.pitch);
                }
                w.bool(on_ground);
                frames.push(w.finish());
            }
            Movement::Teleport => {
                let mut w = PacketWriter::new(ids::TELEPORT);
                w.var_int(entity_id.0)
                    .f64(to.pos.x)
                    .f64(to.pos.y)
                    .f64(to.pos.z)
                    .angle(to.yaw)
                    .angle(to.pitch)
                    .bool(on_ground);
                frames.push(w.finish());
            }
        }
        if angle_byte(from.yaw) != angle_byte(to.yaw) {
            frames.push(head_look(entity_id, to.yaw));
        }
        frames
    }

    fn metadata(
        &self,
        entity_id: NpcId,
        kind: &EntityKind,
        fields: &[MetaValue],
        scope: &MetaScope,
    ) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(2);
        let mut w = PacketWriter::new(ids::METADATA);
        w.var_int(entity_id.0);
        let written = fields
            .iter()
            .filter(|value| write_entry(&mut w, kind, value))
            .count();
        w.u8(META_END);
        if written > 0 {
            frames.push(w.finish());
        }

        let glow = fields.iter().find_map(|v| match v {
            MetaValue::Glow(c) => Some(*c),
            _ => None,
        });
        match scope {
            MetaScope::Full { team_member } => {
                frames.push(team(entity_id, 0, glow.flatten(), Some(team_member)));
            }
            MetaScope::Delta => {
                if let Some(color) = glow {
                    frames.push(team(entity_id, 2, color, None));
                }
            }
        }
        frames
    }
}

fn head_look(entity_id: NpcId, yaw: f32) -> Bytes {
    let mut w = PacketWriter::new(ids::HEAD_LOOK);
    w.var_int(entity_id.0).angle(yaw);
    w.finish()
}

fn write_entry(w: &mut PacketWriter, kind: &EntityKind, value: &MetaValue) -> bool {
    match value {
        MetaValue::Flags(flags) => {
            w.u8(0).var_int(meta_type::BYTE).u8(flags.bits() & FLAG_MASK);
        }
        MetaValue::CustomName(name) => {
            w.u8(2).var_int(meta_type::STRING).string(name.as_deref().unwrap_or(""));
        }
        MetaValue::CustomNameVisible(visible) => {
            w.u8(3).var_int(meta_type::BOOL).bool(*visible);
        }
        MetaValue::Health(health) if kind.is_living() => {
            w.u8(7).var_int(meta_type::FLOAT).f32(*health);
        }
        MetaValue::SkinLayers(layers) if kind.is_humanoid() => {
            w.u8(13).var_int(meta_type::BYTE).u8(layers.bits());
        }
        _ => return false,
    }
    true
}

fn team(entity_id: NpcId, mode: u8, color: Option<GlowColor>, member: Option<&String>) -> Bytes {
    let mut w = PacketWriter::new(ids::TEAMS);
    w.string(&team_name(entity_id)).u8(mode);
    if mode == 0 || mode == 2 {
        w.string("")
            .string("")
            .string("")
            .u8(0)
            .string("always")
            .string("never")
            .u8(color.unwrap_or(GlowColor::White).code());
    }
    if let Some(member) = member {
        w.var_int(1).string(member);
    }
    w.finish()
}

fn slot_id(slot: EquipmentSlot) -> i32 {
    match slot {
        EquipmentSlot::MainHand => 0,
        EquipmentSlot::OffHand => 1,
        EquipmentSlot::Feet => 2,
        EquipmentSlot::Legs => 3,
        EquipmentSlot::Chest => 4,
        EquipmentSlot::Head => 5,
    }
}

impl super::Codec for Codec112 {
    fn name(&self) -> &'static str {
        "1.12"
    }

    fn encode(&self, intent: &PacketIntent) -> Result<Vec<Bytes>, CodecError> {
        let frames = match intent {
            PacketIntent::Spawn {
                entity_id,
                unique_id,
                kind,
                profile,
                location,
                velocity,
            } => self.spawn(*entity_id, kind, location, *velocity, *unique_id, profile),
            PacketIntent::Move {
                entity_id,
                from,
                to,
                on_ground,
            } => self.movement(*entity_id, from, to, *on_ground),
            PacketIntent::Rotate {
                entity_id,
                yaw,
                pitch,
            } => {
                let mut w = PacketWriter::new(ids::LOOK);
                w.var_int(entity_id.0).angle(*yaw).angle(*pitch).bool(true);
                vec![w.finish(), head_look(*entity_id, *yaw)]
            }
            PacketIntent::Velocity {
                entity_id,
                velocity,
            } => {
                let mut w = PacketWriter::new(ids::VELOCITY);
                w.var_int(entity_id.0)
                    .i16(velocity_units(velocity.x))
                    .i16(velocity_units(velocity.y))
                    .i16(velocity_units(velocity.z));
                vec![w.finish()]
            }
            PacketIntent::UpdateMetadata {
                entity_id,
                kind,
                fields,
                scope,
            } => self.metadata(*entity_id, kind, fields, scope),
            PacketIntent::UpdateEquipment {
                entity_id,
                slot,
                item,
            } => {
                let mut w = PacketWriter::new(ids::EQUIPMENT);
                w.var_int(entity_id.0).var_int(slot_id(*slot));
                write_legacy_item(&mut w, *item);
                vec![w.finish()]
            }
            PacketIntent::Animate {
                entity_id,
                animation,
            } => {
                let mut w = PacketWriter::new(ids::ANIMATION);
                w.var_int(entity_id.0).u8(animation.id());
                vec![w.finish()]
            }
            PacketIntent::Despawn {
                entity_id,
                unique_id,
                kind,
            } => {
                let mut frames = vec![wire::destroy_entity(ids::DESTROY, *entity_id)];
                if kind.is_humanoid() {
                    frames.push(wire::player_info_remove(ids::PLAYER_INFO, *unique_id));
                }
                frames.push(team(*entity_id, 1, None, None));
                frames
            }
            PacketIntent::HideFromPlayerList { unique_id, .. } => {
                vec![wire::player_info_remove(ids::PLAYER_INFO, *unique_id)]
            }
        };
        Ok(frames)
    }

    fn decode(&self, frame: &[u8]) -> Result<Option<InboundEvent>, CodecError> {
        let mut r = PacketReader::new(frame);
        if r.var_int()? != ids::USE_ENTITY {
            return Ok(None);
        }
        let target = NpcId(r.var_int()?);
        let kind = r.var_int()?;
        let action = match kind {
            0 => InteractAction::Interact,
            1 => InteractAction::Attack,
            2 => InteractAction::InteractAt {
                x: r.f32()?,
                y: r.f32()?,
                z: r.f32()?,
            },
            other => return Err(CodecError::malformed(format!("use-entity type {other}"))),
        };
        let hand = if kind == 1 {
            Hand::Main
        } else {
            read_hand(&mut r)?
        };
        r.expect_end()?;
        Ok(Some(InboundEvent {
            target,
            action,
            hand,
            sneaking: false,
        }))
    }
}

pub(crate) fn read_hand(r: &mut PacketReader<'_>) -> Result<Hand, CodecError> {
    match r.var_int()? {
        0 => Ok(Hand::Main),
        1 => Ok(Hand::Off),
        other => Err(CodecError::malformed(format!("hand {other}"))),
    }
}
