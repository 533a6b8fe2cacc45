//! Protocol 751 to 754 (1.16.2 through 1.16.5).
//!
//! Adds poses, chat-component names, flattened item ids, equipment arrays
//! and the sneaking bit on interactions.

use std::ops::RangeInclusive;

use bytes::Bytes;

use super::intent::{InboundEvent, InteractAction, MetaScope, MetaValue, PacketIntent};
use super::v1_12::read_hand;
use super::wire::{self, chat_json, classify_move, velocity_units, Movement, PacketReader, PacketWriter};
use super::{team_name, Hand};
use crate::entity::{EntityKind, EquipmentSlot, GlowColor, ItemStack, NpcId, Pose, Profile, ProfileId};
use crate::error::CodecError;
use crate::math::{angle_byte, Location, Vec3};

pub const VERSIONS: RangeInclusive<i32> = 751..=754;

mod ids {
    pub const SPAWN_OBJECT: i32 = 0x00;
    pub const SPAWN_LIVING: i32 = 0x02;
    pub const SPAWN_PLAYER: i32 = 0x04;
    pub const ANIMATION: i32 = 0x05;
    pub const REL_MOVE: i32 = 0x27;
    pub const LOOK_MOVE: i32 = 0x28;
    pub const LOOK: i32 = 0x29;
    pub const PLAYER_INFO: i32 = 0x32;
    pub const DESTROY: i32 = 0x36;
    pub const HEAD_LOOK: i32 = 0x3A;
    pub const METADATA: i32 = 0x44;
    pub const VELOCITY: i32 = 0x46;
    pub const EQUIPMENT: i32 = 0x47;
    pub const TEAMS: i32 = 0x4C;
    pub const TELEPORT: i32 = 0x56;

    pub const USE_ENTITY: i32 = 0x0E;
}

mod meta_type {
    pub const BYTE: i32 = 0;
    pub const FLOAT: i32 = 2;
    pub const OPT_CHAT: i32 = 5;
    pub const BOOL: i32 = 7;
    pub const POSE: i32 = 18;
}

const META_END: u8 = 0xFF;
/// Team color that clears formatting.
const COLOR_RESET: i32 = 21;

fn pose_id(pose: Pose) -> i32 {
    match pose {
        Pose::Standing => 0,
        Pose::FallFlying => 1,
        Pose::Sleeping => 2,
        Pose::Swimming => 3,
        Pose::SpinAttack => 4,
        Pose::Crouching => 5,
        Pose::Dying => 6,
    }
}

/// Codec for 1.16.2+ clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct Codec116;

impl Codec116 {
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
                    .angle(location.pitch);
                vec![info, w.finish()]
            }
            EntityKind::Mob(types) => {
                let mut w = PacketWriter::new(ids::SPAWN_LIVING);
                w.var_int(entity_id.0)
                    .uuid(unique_id.0)
                    .var_int(types.registry)
                    .f64(pos.x)
                    .f64(pos.y)
                    .f64(pos.z)
                    .angle(location.yaw)
                    .angle(location.pitch)
                    .angle(location.yaw)
                    .i16(velocity_units(velocity.x))
                    .i16(velocity_units(velocity.y))
                    .i16(velocity_units(velocity.z));
                vec![w.finish()]
            }
            EntityKind::Object(types) => {
                let mut w = PacketWriter::new(ids::SPAWN_OBJECT);
                w.var_int(entity_id.0)
                    .uuid(unique_id.0)
                    .var_int(types.registry)
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
            w.u8(0).var_int(meta_type::BYTE).u8(flags.bits());
        }
        MetaValue::CustomName(name) => {
            w.u8(2).var_int(meta_type::OPT_CHAT);
            match name {
                Some(name) => w.bool(true).string(&chat_json(name)),
                None => w.bool(false),
            };
        }
        MetaValue::CustomNameVisible(visible) => {
            w.u8(3).var_int(meta_type::BOOL).bool(*visible);
        }
        MetaValue::Pose(pose) => {
            w.u8(6).var_int(meta_type::POSE).var_int(pose_id(*pose));
        }
        MetaValue::Health(health) if kind.is_living() => {
            w.u8(8).var_int(meta_type::FLOAT).f32(*health);
        }
        MetaValue::SkinLayers(layers) if kind.is_humanoid() => {
            w.u8(16).var_int(meta_type::BYTE).u8(layers.bits());
        }
        _ => return false,
    }
    true
}

fn team(entity_id: NpcId, mode: u8, color: Option<GlowColor>, member: Option<&String>) -> Bytes {
    let mut w = PacketWriter::new(ids::TEAMS);
    w.string(&team_name(entity_id)).u8(mode);
    if mode == 0 || mode == 2 {
        w.string(&chat_json(""))
            .u8(0)
            .string("always")
            .string("never")
            .var_int(color.map(|c| c.code() as i32).unwrap_or(COLOR_RESET))
            .string(&chat_json(""))
            .string(&chat_json(""));
    }
    if let Some(member) = member {
        w.var_int(1).string(member);
    }
    w.finish()
}

fn slot_id(slot: EquipmentSlot) -> u8 {
    match slot {
        EquipmentSlot::MainHand => 0,
        EquipmentSlot::OffHand => 1,
        EquipmentSlot::Feet => 2,
        EquipmentSlot::Legs => 3,
        EquipmentSlot::Chest => 4,
        EquipmentSlot::Head => 5,
    }
}

fn write_item(w: &mut PacketWriter, item: Option<ItemStack>) {
    match item {
        Some(item) if item.flattened_id > 0 => {
            w.bool(true).var_int(item.flattened_id).u8(item.count).u8(0);
        }
        _ => {
            w.bool(false);
        }
    }
}

impl super::Codec for Codec116 {
    fn name(&self) -> &'static str {
        "1.16"
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
                // single-entry array, so the continuation bit stays clear
                let mut w = PacketWriter::new(ids::EQUIPMENT);
                w.var_int(entity_id.0).u8(slot_id(*slot));
                write_item(&mut w, *item);
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
        let sneaking = r.bool()?;
        r.expect_end()?;
        Ok(Some(InboundEvent {
            target,
            action,
            hand,
            sneaking,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityFlags;
    use crate::math::WorldId;
    use crate::protocol::wire::frame_packet_id;
    use crate::protocol::Codec;

    fn ids_of(frames: &[Bytes]) -> Vec<i32> {
        frames.iter().map(|f| frame_packet_id(f).unwrap()).collect()
    }

    #[test]
    fn pose_and_chat_name_are_encoded() {
        let frames = Codec116
            .encode(&PacketIntent::UpdateMetadata {
                entity_id: NpcId(1),
                kind: EntityKind::Humanoid,
                fields: vec![
                    MetaValue::Pose(Pose::Crouching),
                    MetaValue::CustomName(Some("Bob".into())),
                ],
                scope: MetaScope::Delta,
            })
            .unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(&frame[..6], &[ids::METADATA as u8, 1, 6, 18, 5, 2]);
        let json = br#"{"text":"Bob"}"#;
        assert_eq!(&frame[6..9], &[5, 1, json.len() as u8]);
        assert_eq!(&frame[9..9 + json.len()], &json[..]);
        assert_eq!(*frame.last().unwrap(), META_END);
    }

    #[test]
    fn glow_off_resets_team_color() {
        let frames = Codec116
            .encode(&PacketIntent::UpdateMetadata {
                entity_id: NpcId(1),
                kind: EntityKind::Humanoid,
                fields: vec![MetaValue::Flags(EntityFlags::empty()), MetaValue::Glow(None)],
                scope: MetaScope::Delta,
            })
            .unwrap();
        assert_eq!(ids_of(&frames), vec![ids::METADATA, ids::TEAMS]);
    }

    #[test]
    fn spawn_living_uses_registry_id() {
        let frames = Codec116
            .encode(&PacketIntent::Spawn {
                entity_id: NpcId(2),
                unique_id: ProfileId(0xAB),
                kind: EntityKind::Mob(crate::entity::TypeIds { legacy: 120, registry: 93 }),
                profile: Profile::new("Villager"),
                location: Location::new(WorldId(0), Vec3::ZERO, 0.0, 0.0),
                velocity: Vec3::ZERO,
            })
            .unwrap();
        let frame = &frames[0];
        assert_eq!(frame[0], ids::SPAWN_LIVING as u8);
        // id, uuid (16 bytes), then the registry type
        assert_eq!(frame[18], 93);
    }

    #[test]
    fn empty_slot_is_absent_item() {
        let frames = Codec116
            .encode(&PacketIntent::UpdateEquipment {
                entity_id: NpcId(2),
                slot: EquipmentSlot::Head,
                item: None,
            })
            .unwrap();
        assert_eq!(&frames[0][..], &[ids::EQUIPMENT as u8, 2, 5, 0]);
    }

    #[test]
    fn decodes_sneaking_interact_at() {
        let mut frame = vec![0x0E, 0x09, 0x02];
        for v in [0.5f32, 1.0, -0.25] {
            frame.extend_from_slice(&v.to_be_bytes());
        }
        frame.extend_from_slice(&[0x00, 0x01]);
        let event = Codec116.decode(&frame).unwrap().unwrap();
        assert_eq!(event.target, NpcId(9));
        assert_eq!(
            event.action,
            InteractAction::InteractAt { x: 0.5, y: 1.0, z: -0.25 }
        );
        assert_eq!(event.hand, Hand::Main);
        assert!(event.sneaking);
    }

    #[test]
    fn missing_sneaking_bit_is_malformed() {
        assert!(matches!(
            Codec116.decode(&[0x0E, 0x09, 0x01]),
            Err(CodecError::MalformedPacket(_))
        ));
    }
}
