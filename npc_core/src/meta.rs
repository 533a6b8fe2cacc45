//! Metadata diff engine.
//!
//! Pure functions over snapshots. Output is always in [`MetaField`] order so
//! the same pair of snapshots encodes to the same bytes.
//!
//! [`MetaField`]: crate::protocol::MetaField

use crate::entity::{EntityKind, EquipmentSlot, ItemStack, Metadata, NpcDefinition};
use crate::math::Vec3;
use crate::protocol::intent::DEFAULT_HEALTH;
use crate::protocol::MetaValue;

/// Every metadata field of `meta`, for the first sight of an entity.
pub fn full_metadata(kind: &EntityKind, meta: &Metadata) -> Vec<MetaValue> {
    let mut out = Vec::with_capacity(7);
    out.push(MetaValue::Flags(meta.effective_flags()));
    out.push(MetaValue::Pose(meta.pose));
    out.push(MetaValue::CustomName(meta.custom_name.clone()));
    out.push(MetaValue::CustomNameVisible(meta.custom_name_visible));
    if let (Some(health), true) = (meta.health, kind.is_living()) {
        out.push(MetaValue::Health(health));
    }
    if kind.is_humanoid() {
        out.push(MetaValue::SkinLayers(meta.skin_layers));
    }
    out.push(MetaValue::Glow(meta.glow));
    out
}

/// Fields whose value differs between `prev` and `cur`.
///
/// Empty when nothing changed. `diff(a, a)` is always empty, NaN health
/// included.
pub fn diff(kind: &EntityKind, prev: &Metadata, cur: &Metadata) -> Vec<MetaValue> {
    let mut out = Vec::new();
    if prev.effective_flags() != cur.effective_flags() {
        out.push(MetaValue::Flags(cur.effective_flags()));
    }
    if prev.pose != cur.pose {
        out.push(MetaValue::Pose(cur.pose));
    }
    if prev.custom_name != cur.custom_name {
        out.push(MetaValue::CustomName(cur.custom_name.clone()));
    }
    if prev.custom_name_visible != cur.custom_name_visible {
        out.push(MetaValue::CustomNameVisible(cur.custom_name_visible));
    }
    if kind.is_living() && prev.health.map(f32::to_bits) != cur.health.map(f32::to_bits) {
        out.push(MetaValue::Health(cur.health.unwrap_or(DEFAULT_HEALTH)));
    }
    if kind.is_humanoid() && prev.skin_layers != cur.skin_layers {
        out.push(MetaValue::SkinLayers(cur.skin_layers));
    }
    if prev.glow != cur.glow {
        out.push(MetaValue::Glow(cur.glow));
    }
    out
}

/// Slots whose item changed, in slot order. `None` clears the slot.
pub fn equipment_changes(
    prev: &NpcDefinition,
    cur: &NpcDefinition,
) -> Vec<(EquipmentSlot, Option<ItemStack>)> {
    EquipmentSlot::ALL
        .into_iter()
        .filter(|slot| prev.equipment.get(*slot) != cur.equipment.get(*slot))
        .map(|slot| (slot, cur.equipment.get(slot)))
        .collect()
}

/// Position and velocity changes between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpatialChange {
    /// Position or rotation differs.
    pub moved: bool,
    /// New velocity, if it differs.
    pub velocity: Option<Vec3>,
}

impl SpatialChange {
    pub fn is_empty(&self) -> bool {
        !self.moved && self.velocity.is_none()
    }
}

pub fn spatial_change(prev: &NpcDefinition, cur: &NpcDefinition) -> SpatialChange {
    SpatialChange {
        moved: prev.location != cur.location,
        velocity: (prev.velocity != cur.velocity).then_some(cur.velocity),
    }
}

/// Whether the entity must be respawned rather than updated: clients cannot
/// change an existing entity's type or a player's profile in place.
pub fn needs_respawn(prev: &NpcDefinition, cur: &NpcDefinition) -> bool {
    prev.kind != cur.kind || prev.profile != cur.profile || prev.unique_id != cur.unique_id
}
