//! Version-independent packet intents.
//!
//! The tracker and the scheduler only ever deal in intents. A codec turns an
//! intent into zero or more frames for one protocol version.

use crate::entity::{
    EntityFlags, EntityKind, EquipmentSlot, GlowColor, ItemStack, NpcId, Pose, Profile, ProfileId,
    SkinLayers,
};
use crate::math::{Location, Vec3};

/// Health shown when an NPC's health is cleared.
pub const DEFAULT_HEALTH: f32 = 20.0;

/// Metadata fields in canonical emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetaField {
    Flags,
    Pose,
    CustomName,
    CustomNameVisible,
    Health,
    SkinLayers,
    Glow,
}

/// A single semantic metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Flags(EntityFlags),
    Pose(Pose),
    CustomName(Option<String>),
    CustomNameVisible(bool),
    Health(f32),
    SkinLayers(SkinLayers),
    Glow(Option<GlowColor>),
}

impl MetaValue {
    pub fn field(&self) -> MetaField {
        match self {
            MetaValue::Flags(_) => MetaField::Flags,
            MetaValue::Pose(_) => MetaField::Pose,
            MetaValue::CustomName(_) => MetaField::CustomName,
            MetaValue::CustomNameVisible(_) => MetaField::CustomNameVisible,
            MetaValue::Health(_) => MetaField::Health,
            MetaValue::SkinLayers(_) => MetaField::SkinLayers,
            MetaValue::Glow(_) => MetaField::Glow,
        }
    }
}

/// Whether a metadata intent carries the whole state or a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaScope {
    /// Sent right after spawn. Also registers the NPC's scoreboard team with
    /// `team_member` as its only entry.
    Full { team_member: String },
    Delta,
}

/// Entity animations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Animation {
    SwingMainArm,
    TakeDamage,
    LeaveBed,
    SwingOffHand,
    CriticalEffect,
    MagicCriticalEffect,
}

impl Animation {
    pub fn id(self) -> u8 {
        match self {
            Animation::SwingMainArm => 0,
            Animation::TakeDamage => 1,
            Animation::LeaveBed => 2,
            Animation::SwingOffHand => 3,
            Animation::CriticalEffect => 4,
            Animation::MagicCriticalEffect => 5,
        }
    }
}

/// One logical change to show a viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketIntent {
    /// Makes the entity exist on the client. For humanoids this includes the
    /// player-list entry carrying the skin.
    Spawn {
        entity_id: NpcId,
        unique_id: ProfileId,
        kind: EntityKind,
        profile: Profile,
        location: Location,
        velocity: Vec3,
    },
    Move {
        entity_id: NpcId,
        from: Location,
        to: Location,
        on_ground: bool,
    },
    /// Body and head rotation.
    Rotate {
        entity_id: NpcId,
        yaw: f32,
        pitch: f32,
    },
    Velocity {
        entity_id: NpcId,
        velocity: Vec3,
    },
    UpdateMetadata {
        entity_id: NpcId,
        kind: EntityKind,
        fields: Vec<MetaValue>,
        scope: MetaScope,
    },
    UpdateEquipment {
        entity_id: NpcId,
        slot: EquipmentSlot,
        item: Option<ItemStack>,
    },
    Animate {
        entity_id: NpcId,
        animation: Animation,
    },
    Despawn {
        entity_id: NpcId,
        unique_id: ProfileId,
        kind: EntityKind,
    },
    /// Drops a spawned humanoid's player-list entry. The entity stays; the
    /// client keeps the skin it already loaded.
    HideFromPlayerList {
        entity_id: NpcId,
        unique_id: ProfileId,
    },
}

impl PacketIntent {
    pub fn entity_id(&self) -> NpcId {
        match self {
            PacketIntent::Spawn { entity_id, .. }
            | PacketIntent::Move { entity_id, .. }
            | PacketIntent::Rotate { entity_id, .. }
            | PacketIntent::Velocity { entity_id, .. }
            | PacketIntent::UpdateMetadata { entity_id, .. }
            | PacketIntent::UpdateEquipment { entity_id, .. }
            | PacketIntent::Animate { entity_id, .. }
            | PacketIntent::Despawn { entity_id, .. }
            | PacketIntent::HideFromPlayerList { entity_id, .. } => *entity_id,
        }
    }

    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            PacketIntent::Spawn { .. } => "spawn",
            PacketIntent::Move { .. } => "move",
            PacketIntent::Rotate { .. } => "rotate",
            PacketIntent::Velocity { .. } => "velocity",
            PacketIntent::UpdateMetadata { .. } => "metadata",
            PacketIntent::UpdateEquipment { .. } => "equipment",
            PacketIntent::Animate { .. } => "animate",
            PacketIntent::Despawn { .. } => "despawn",
            PacketIntent::HideFromPlayerList { .. } => "player_list_remove",
        }
    }
}

/// Scoreboard team name used for an NPC.
pub fn team_name(entity_id: NpcId) -> String {
    format!("npc{}", entity_id.0)
}

/// Which hand a client interaction used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hand {
    Main,
    Off,
}

/// What the client did to the entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InteractAction {
    Interact,
    /// Interaction at a point relative to the entity's position.
    InteractAt { x: f32, y: f32, z: f32 },
    Attack,
}

impl InteractAction {
    pub fn is_attack(&self) -> bool {
        matches!(self, InteractAction::Attack)
    }
}

/// A decoded interaction packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InboundEvent {
    pub target: NpcId,
    pub action: InteractAction,
    pub hand: Hand,
    /// Only 1.16 clients report this; older ones always read `false`.
    pub sneaking: bool,
}
