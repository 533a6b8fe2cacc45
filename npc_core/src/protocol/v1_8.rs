//! Protocol 47 (1.8.x).
//!
//! - Positions are 1/32 block fixed-point integers.
//! - Metadata headers pack the type into the top three bits of the index.
//! - No off-hand, no glowing outline, no poses.

use std::ops::RangeInclusive;

use bytes::Bytes;

use super::intent::{InboundEvent, InteractAction, MetaScope, MetaValue, PacketIntent, DEFAULT_HEALTH};
use super::wire::{self, classify_move, fixed_point, velocity_units, Movement, PacketReader, PacketWriter};
use super::{team_name, Animation, Hand};
use crate::entity::{
    EntityFlags, EntityKind, EquipmentSlot, GlowColor, ItemStack, NpcId, Profile, ProfileId,
};
use crate::error::CodecError;
use crate::math::{angle_byte, Location, Vec3};

pub const VERSIONS: RangeInclusive<i32> = 47..=47;

mod ids {
    pub const EQUIPMENT: i32 = 0x04;
    pub const ANIMATION: i32 = 0x0B;
    pub const SPAWN_PLAYER: i32 = 0x0C;
    pub const SPAWN_OBJECT: i32 = 0x0E;
    pub const SPAWN_MOB: i32 = 0x0F;
    pub const VELOCITY: i32 = 0x12;
    pub const DESTROY: i32 = 0x13;
    pub const REL_MOVE: i32 = 0x15;
    pub const LOOK: i32 = 0x16;
    pub const LOOK_MOVE: i32 = 0x17;
    pub const TELEPORT: i32 = 0x18;
    pub const HEAD_LOOK: i32 = 0x19;
    pub const METADATA: i32 = 0x1C;
    pub const PLAYER_INFO: i32 = 0x38;
    pub const TEAMS: i32 = 0x3E;

    pub const USE_ENTITY: i32 = 0x02;
}

const META_END: u8 = 0x7F;
const FLAG_MASK: u8 = EntityFlags::ON_FIRE.bits()
    | EntityFlags::CROUCHED.bits()
    | EntityFlags::SPRINTING.bits()
    | EntityFlags::INVISIBLE.bits();

fn header(kind: u8, index: u8) -> u8 {
    (kind << 5) | (index & 0x1F)
}

/// Codec for 1.8.x clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct Codec18;

impl Codec18 {
    fn spawn(
        &self,
        entity_id: NpcId,
        kind: &EntityKind,
        location: &Location,
        velocity: Vec3,
        unique_id: ProfileId,
        profile: &Profile,
    ) -> Vec<Bytes> {
        let (x, y, z) = (
            fixed_point(location.pos.x),
            fixed_point(location.pos.y),
            fixed_point(location.pos.z),
        );
        match kind {
            EntityKind::Humanoid => {
                let info = wire::player_info_add(ids::PLAYER_INFO, unique_id, profile);
                let mut w = PacketWriter::new(ids::SPAWN_PLAYER);
                w.var_int(entity_id.0)
                    .uuid(unique_id.0)
                    .i32(x)
                    .i32(y)
                    .i32(z)
                    .angle(location.yaw)
                    .angle(location.pitch)
                    .i16(0);
                // 1.8 clients reject a player spawn with empty metadata
                w.u8(header(3, 6)).f32(DEFAULT_HEALTH).u8(META_END);
                vec![info, w.finish()]
            }
            EntityKind::Mob(types) => {
                let mut w = PacketWriter::new(ids::SPAWN_MOB);
                w.var_int(entity_id.0)
                    .u8(types.legacy)
                    .i32(x)
                    .i32(y)
                    .i32(z)
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
                    .u8(types.legacy)
                    .i32(x)
                    .i32(y)
                    .i32(z)
                    .angle(location.pitch)
                    .angle(location.yaw)
                    .i32(0);
                vec![w.finish()]
            }
        }
    }

    fn movement(
        &self,
        entity_id: NpcId,
        from: &Location,
        to: &Location,
        on_ground: bool,
    ) -> Vec<Bytes> {
        let movement = classify_move(from, to, 32.0, i8::MAX as i16);
        let mut frames = Vec::with_capacity(2);
        match movement {
            Movement::None => return frames,
            Movement::Look => {
                let mut w = PacketWriter::new(ids::LOOK);
                w.var_int(entity_id.0).angle(to.yaw).angle(to.pitch).bool(on_ground);
                frames.push(w.finish());
            }
            Movement::Relative { dx, dy, dz, look } => {
                let mut w = PacketWriter::new(if look { ids::LOOK_MOVE } else { ids::REL_MOVE });
                w.var_int(entity_id.0).i8(dx as i8).i8(dy as i8).i8(dz as i8);
                if look {
                    w.angle(to.yaw).angle(to.pitch);
                }
                w.bool(on_ground);
                frames.push(w.finish());
            }
            Movement::Teleport => {
                let mut w = PacketWriter::new(ids::TELEPORT);
                w.var_int(entity_id.0)
                    .i32(fixed_point(to.pos.x))
                    .i32(fixed_point(to.pos.y))
                    .i32(fixed_point(to.pos.z))
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
        let mut written = 0;
        for value in fields {
            if write_entry(&mut w, kind, value) {
                written += 1;
            }
        }
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
            w.u8(header(0, 0)).u8(flags.bits() & FLAG_MASK);
        }
        MetaValue::CustomName(name) => {
            w.u8(header(4, 2)).string(name.as_deref().unwrap_or(""));
        }
        MetaValue::CustomNameVisible(visible) => {
            w.u8(header(0, 3)).u8(*visible as u8);
        }
        MetaValue::Health(health) if kind.is_living() => {
            w.u8(header(3, 6)).f32(*health);
        }
        MetaValue::SkinLayers(layers) if kind.is_humanoid() => {
            w.u8(header(0, 10)).u8(layers.bits());
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
            .u8(color.unwrap_or(GlowColor::White).code());
    }
    if let Some(member) = member {
        w.var_int(1).string(member);
    }
    w.finish()
}

fn slot_id(slot: EquipmentSlot) -> Option<i16> {
    match slot {
        EquipmentSlot::MainHand => Some(0),
        EquipmentSlot::OffHand => None,
        EquipmentSlot::Feet => Some(1),
        EquipmentSlot::Legs => Some(2),
        EquipmentSlot::Chest => Some(3),
        EquipmentSlot::Head => Some(4),
    }
}

pub(crate) fn write_legacy_item(w: &mut PacketWriter, item: Option<ItemStack>) {
    match item {
        Some(item) if item.legacy_id > 0 => {
            w.i16(item.legacy_id).u8(item.count).i16(item.legacy_damage).u8(0);
        }
        _ => {
            w.i16(-1);
        }
    }
}

impl super::Codec for Codec18 {
    fn name(&self) -> &'static str {
        "1.8"
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
            } => match slot_id(*slot) {
                Some(id) => {
                    let mut w = PacketWriter::new(ids::EQUIPMENT);
                    w.var_int(entity_id.0).i16(id);
                    write_legacy_item(&mut w, *item);
                    vec![w.finish()]
                }
                None => Vec::new(),
            },
            PacketIntent::Animate {
                entity_id,
                animation,
            } => {
                if *animation == Animation::SwingOffHand {
                    Vec::new()
                } else {
                    let mut w = PacketWriter::new(ids::ANIMATION);
                    w.var_int(entity_id.0).u8(animation.id());
                    vec![w.finish()]
                }
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
        let action = match r.var_int()? {
            0 => InteractAction::Interact,
            1 => InteractAction::Attack,
            2 => InteractAction::InteractAt {
                x: r.f32()?,
                y: r.f32()?,
                z: r.f32()?,
            },
            other => return Err(CodecError::malformed(format!("use-entity type {other}"))),
        };
        r.expect_end()?;
        Ok(Some(InboundEvent {
            target,
            action,
            hand: Hand::Main,
            sneaking: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{SkinTexture, TypeIds};
    use crate::math::WorldId;
    use crate::protocol::wire::frame_packet_id;
    use crate::protocol::Codec;

    fn ids_of(frames: &[Bytes]) -> Vec<i32> {
        frames.iter().map(|f| frame_packet_id(f).unwrap()).collect()
    }

    fn loc(x: f64) -> Location {
        Location::new(WorldId(0), Vec3::new(x, 64.0, 0.0), 0.0, 0.0)
    }

    #[test]
    fn humanoid_spawn_adds_player_info_first() {
        let frames = Codec18
            .encode(&PacketIntent::Spawn {
                entity_id: NpcId(7),
                unique_id: ProfileId::random(),
                kind: EntityKind::Humanoid,
                profile: Profile::new("Guide").with_skin(SkinTexture::new("dGV4dHVyZQ==", "c2ln")),
                location: loc(0.0),
                velocity: Vec3::ZERO,
            })
            .unwrap();
        assert_eq!(ids_of(&frames), vec![ids::PLAYER_INFO, ids::SPAWN_PLAYER]);
    }

    #[test]
    fn mob_spawn_uses_legacy_type() {
        let frames = Codec18
            .encode(&PacketIntent::Spawn {
                entity_id: NpcId(3),
                unique_id: ProfileId::random(),
                kind: EntityKind::Mob(TypeIds { legacy: 120, registry: 84 }),
                profile: Profile::new("Villager"),
                location: loc(0.0),
                velocity: Vec3::ZERO,
            })
            .unwrap();
        assert_eq!(&frames[0][..3], &[ids::SPAWN_MOB as u8, 3, 120]);
    }

    #[test]
    fn short_move_is_relative_long_move_teleports() {
        let short = Codec18
            .encode(&PacketIntent::Move {
                entity_id: NpcId(1),
                from: loc(0.0),
                to: loc(1.0),
                on_ground: true,
            })
            .unwrap();
        assert_eq!(ids_of(&short), vec![ids::REL_MOVE]);
        assert_eq!(&short[0][..], &[ids::REL_MOVE as u8, 1, 32, 0, 0, 1]);

        let long = Codec18
            .encode(&PacketIntent::Move {
                entity_id: NpcId(1),
                from: loc(0.0),
                to: loc(10.0),
                on_ground: true,
            })
            .unwrap();
        assert_eq!(ids_of(&long), vec![ids::TELEPORT]);
    }

    #[test]
    fn off_hand_features_encode_to_nothing() {
        let equip = Codec18
            .encode(&PacketIntent::UpdateEquipment {
                entity_id: NpcId(1),
                slot: EquipmentSlot::OffHand,
                item: Some(ItemStack::new(276, 0, 0, 1)),
            })
            .unwrap();
        assert!(equip.is_empty());

        let swing = Codec18
            .encode(&PacketIntent::Animate {
                entity_id: NpcId(1),
                animation: Animation::SwingOffHand,
            })
            .unwrap();
        assert!(swing.is_empty());
    }

    #[test]
    fn metadata_masks_unsupported_flags_and_skips_pose() {
        let frames = Codec18
            .encode(&PacketIntent::UpdateMetadata {
                entity_id: NpcId(2),
                kind: EntityKind::Humanoid,
                fields: vec![
                    MetaValue::Flags(EntityFlags::CROUCHED | EntityFlags::GLOWING),
                    MetaValue::Pose(crate::entity::Pose::Sleeping),
                ],
                scope: MetaScope::Delta,
            })
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[ids::METADATA as u8, 2, 0x00, 0x02, META_END]);
    }

    #[test]
    fn pose_only_delta_produces_no_frames() {
        let frames = Codec18
            .encode(&PacketIntent::UpdateMetadata {
                entity_id: NpcId(2),
                kind: EntityKind::Humanoid,
                fields: vec![MetaValue::Pose(crate::entity::Pose::Swimming)],
                scope: MetaScope::Delta,
            })
            .unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn humanoid_despawn_removes_player_info() {
        let frames = Codec18
            .encode(&PacketIntent::Despawn {
                entity_id: NpcId(9),
                unique_id: ProfileId(1),
                kind: EntityKind::Humanoid,
            })
            .unwrap();
        assert_eq!(ids_of(&frames), vec![ids::DESTROY, ids::PLAYER_INFO, ids::TEAMS]);
    }

    #[test]
    fn player_list_removal_is_a_single_remove_action() {
        let frames = Codec18
            .encode(&PacketIntent::HideFromPlayerList {
                entity_id: NpcId(9),
                unique_id: ProfileId(1),
            })
            .unwrap();
        assert_eq!(ids_of(&frames), vec![ids::PLAYER_INFO]);
        // action 4 = remove player
        assert_eq!(frames[0][1], 4);
    }

    #[test]
    fn decodes_use_entity() {
        let event = Codec18.decode(&[0x02, 0x05, 0x01]).unwrap().unwrap();
        assert_eq!(event.target, NpcId(5));
        assert!(event.action.is_attack());
        assert_eq!(event.hand, Hand::Main);
    }

    #[test]
    fn decode_rejects_truncated_and_ignores_other_packets() {
        assert!(Codec18.decode(&[0x02, 0x05]).is_err());
        assert!(Codec18.decode(&[0x02, 0x05, 0x01, 0x00]).is_err());
        assert_eq!(Codec18.decode(&[0x01, 0x00]).unwrap(), None);
    }
}
