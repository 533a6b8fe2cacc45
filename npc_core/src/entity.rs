//! NPC entity model.
//!
//! An NPC is described by a [`NpcDefinition`]: identity, kind, display profile,
//! spatial state, equipment and metadata. Definitions are plain values; the
//! registry owns the live copy and hands out immutable snapshots.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InvalidSkinError;
use crate::math::{Location, Vec3};
use crate::viewer::PlayerId;

/// Stable integer id. Doubles as the network entity id sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NpcId(pub i32);

impl fmt::Display for NpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique id (a UUID) used by the protocol for profiles and entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId(pub u128);

impl ProfileId {
    /// Random version-2 UUID. Clients treat v2 ids as non-Mojang profiles,
    /// so NPCs never collide with real accounts in the tab list.
    pub fn random() -> Self {
        let raw: u128 = rand::random();
        let raw = (raw & !(0xFu128 << 76)) | (0x2u128 << 76);
        let raw = (raw & !(0x3u128 << 62)) | (0x2u128 << 62);
        ProfileId(raw)
    }

    pub fn version(&self) -> u8 {
        ((self.0 >> 76) & 0xF) as u8
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

/// Numeric entity type ids for the two id eras.
///
/// `legacy` is the byte id used up to 1.12, `registry` the registry index used
/// by later versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeIds {
    pub legacy: u8,
    pub registry: i32,
}

/// What kind of entity the client is told to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Player model with a game profile and skin.
    Humanoid,
    /// Living entity (animals, monsters, villagers).
    Mob(TypeIds),
    /// Non-living entity (armor-less objects, boats, minecarts).
    Object(TypeIds),
}

impl EntityKind {
    pub fn is_humanoid(&self) -> bool {
        matches!(self, EntityKind::Humanoid)
    }

    pub fn is_living(&self) -> bool {
        !matches!(self, EntityKind::Object(_))
    }
}

/// Signed texture property of a game profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkinTexture {
    /// Base64 encoded textures JSON.
    pub value: String,
    /// Base64 Yggdrasil signature. Clients refuse unsigned textures.
    pub signature: Option<String>,
}

impl SkinTexture {
    pub fn new(value: impl Into<String>, signature: impl Into<String>) -> Self {
        SkinTexture {
            value: value.into(),
            signature: Some(signature.into()),
        }
    }

    /// Checks the texture is something a client will accept.
    pub fn validate(&self) -> Result<(), InvalidSkinError> {
        if self.value.is_empty() {
            return Err(InvalidSkinError {
                reason: "empty texture value",
            });
        }
        if !is_base64(&self.value) {
            return Err(InvalidSkinError {
                reason: "texture value is not base64",
            });
        }
        match &self.signature {
            None => Err(InvalidSkinError {
                reason: "missing signature",
            }),
            Some(sig) if sig.is_empty() || !is_base64(sig) => Err(InvalidSkinError {
                reason: "signature is not base64",
            }),
            Some(_) => Ok(()),
        }
    }
}

fn is_base64(s: &str) -> bool {
    let trimmed = s.trim_end_matches('=');
    s.len() - trimmed.len() <= 2
        && trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

/// Display profile: tab-list name and skin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// At most 16 characters on the wire.
    pub name: String,
    pub skin: Option<SkinTexture>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Profile {
            name: name.into(),
            skin: None,
        }
    }

    pub fn with_skin(mut self, skin: SkinTexture) -> Self {
        self.skin = Some(skin);
        self
    }
}

/// Equipment slots in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EquipmentSlot {
    MainHand,
    OffHand,
    Feet,
    Legs,
    Chest,
    Head,
}

impl EquipmentSlot {
    pub const ALL: [EquipmentSlot; 6] = [
        EquipmentSlot::MainHand,
        EquipmentSlot::OffHand,
        EquipmentSlot::Feet,
        EquipmentSlot::Legs,
        EquipmentSlot::Chest,
        EquipmentSlot::Head,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// An item as shown on an NPC.
///
/// Item ids changed with the 1.13 flattening, so both numbering schemes are
/// carried and each codec picks the one its clients understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemStack {
    pub legacy_id: i16,
    pub legacy_damage: i16,
    pub flattened_id: i32,
    pub count: u8,
}

impl ItemStack {
    pub const fn new(legacy_id: i16, legacy_damage: i16, flattened_id: i32, count: u8) -> Self {
        ItemStack {
            legacy_id,
            legacy_damage,
            flattened_id,
            count,
        }
    }
}

/// Per-slot equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Equipment {
    slots: [Option<ItemStack>; 6],
}

impl Equipment {
    pub fn get(&self, slot: EquipmentSlot) -> Option<ItemStack> {
        self.slots[slot.index()]
    }

    pub fn set(&mut self, slot: EquipmentSlot, item: Option<ItemStack>) {
        self.slots[slot.index()] = item;
    }

    /// Non-empty slots in canonical order.
    pub fn iter_filled(&self) -> impl Iterator<Item = (EquipmentSlot, ItemStack)> + '_ {
        EquipmentSlot::ALL
            .into_iter()
            .filter_map(|slot| self.get(slot).map(|item| (slot, item)))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

bitflags::bitflags! {
    /// Shared entity status flags (metadata index 0).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntityFlags: u8 {
        const ON_FIRE = 0x01;
        const CROUCHED = 0x02;
        const SPRINTING = 0x08;
        const SWIMMING = 0x10;
        const INVISIBLE = 0x20;
        const GLOWING = 0x40;
        const FALL_FLYING = 0x80;
    }
}

impl Default for EntityFlags {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags::bitflags! {
    /// Displayed skin parts of a player model.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SkinLayers: u8 {
        const CAPE = 0x01;
        const JACKET = 0x02;
        const LEFT_SLEEVE = 0x04;
        const RIGHT_SLEEVE = 0x08;
        const LEFT_PANTS = 0x10;
        const RIGHT_PANTS = 0x20;
        const HAT = 0x40;
    }
}

impl Default for SkinLayers {
    fn default() -> Self {
        Self::all()
    }
}

/// Entity pose. Only clients from 1.14 on render it; older clients see the
/// crouch flag instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Pose {
    #[default]
    Standing,
    FallFlying,
    Sleeping,
    Swimming,
    SpinAttack,
    Crouching,
    Dying,
}

/// Team colors a glowing outline can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GlowColor {
    Black = 0,
    DarkBlue = 1,
    DarkGreen = 2,
    DarkAqua = 3,
    DarkRed = 4,
    DarkPurple = 5,
    Gold = 6,
    Gray = 7,
    DarkGray = 8,
    Blue = 9,
    Green = 10,
    Aqua = 11,
    Red = 12,
    LightPurple = 13,
    Yellow = 14,
    White = 15,
}

impl GlowColor {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Semantic metadata of an NPC.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub flags: EntityFlags,
    pub pose: Pose,
    pub custom_name: Option<String>,
    pub custom_name_visible: bool,
    /// Health bar value for living entities. `None` leaves the client default.
    pub health: Option<f32>,
    pub skin_layers: SkinLayers,
    pub glow: Option<GlowColor>,
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            flags: EntityFlags::empty(),
            pose: Pose::Standing,
            custom_name: None,
            custom_name_visible: false,
            health: None,
            skin_layers: SkinLayers::all(),
            glow: None,
        }
    }
}

impl Metadata {
    /// Keeps the glowing bit consistent with the glow color.
    pub fn sync_glow_flag(&mut self) {
        self.flags.set(EntityFlags::GLOWING, self.glow.is_some());
    }

    /// Flags as sent to clients. A crouching pose also raises the crouch bit
    /// so clients without pose support still render it.
    pub fn effective_flags(&self) -> EntityFlags {
        let mut flags = self.flags;
        if self.pose == Pose::Crouching {
            flags |= EntityFlags::CROUCHED;
        }
        flags
    }
}

/// Who may see an NPC, on top of range and world checks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Audience {
    #[default]
    Everyone,
    Only(HashSet<PlayerId>),
}

impl Audience {
    pub fn includes(&self, player: PlayerId) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::Only(players) => players.contains(&player),
        }
    }
}

/// Full description of one NPC.
#[derive(Debug, Clone, PartialEq)]
pub struct NpcDefinition {
    pub id: NpcId,
    pub unique_id: ProfileId,
    pub kind: EntityKind,
    pub profile: Profile,
    pub location: Location,
    pub velocity: Vec3,
    pub on_ground: bool,
    pub equipment: Equipment,
    pub metadata: Metadata,
    /// Overrides the configured tracking radius.
    pub tracking_radius: Option<f64>,
    pub audience: Audience,
    /// Turn the head toward each nearby viewer.
    pub look_at_viewer: bool,
    /// Mirror a nearby viewer's arm swings back to them.
    pub imitate_viewer: bool,
}

impl NpcDefinition {
    pub fn new(id: NpcId, kind: EntityKind, profile: Profile, location: Location) -> Self {
        NpcDefinition {
            id,
            unique_id: ProfileId::random(),
            kind,
            profile,
            location,
            velocity: Vec3::ZERO,
            on_ground: true,
            equipment: Equipment::default(),
            metadata: Metadata::default(),
            tracking_radius: None,
            audience: Audience::Everyone,
            look_at_viewer: false,
            imitate_viewer: false,
        }
    }

    /// Player-model NPC.
    pub fn humanoid(id: NpcId, name: impl Into<String>, location: Location) -> Self {
        Self::new(id, EntityKind::Humanoid, Profile::new(name), location)
    }

    pub fn with_skin(mut self, skin: SkinTexture) -> Self {
        self.profile.skin = Some(skin);
        self
    }

    pub fn with_unique_id(mut self, unique_id: ProfileId) -> Self {
        self.unique_id = unique_id;
        self
    }

    pub fn with_item(mut self, slot: EquipmentSlot, item: ItemStack) -> Self {
        self.equipment.set(slot, Some(item));
        self
    }

    pub fn with_custom_name(mut self, name: impl Into<String>, visible: bool) -> Self {
        self.metadata.custom_name = Some(name.into());
        self.metadata.custom_name_visible = visible;
        self
    }

    pub fn with_glow(mut self, color: GlowColor) -> Self {
        self.metadata.glow = Some(color);
        self.metadata.sync_glow_flag();
        self
    }

    pub fn with_tracking_radius(mut self, radius: f64) -> Self {
        self.tracking_radius = Some(radius);
        self
    }

    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }

    pub fn looking_at_viewers(mut self) -> Self {
        self.look_at_viewer = true;
        self
    }

    pub fn imitating_viewers(mut self) -> Self {
        self.imitate_viewer = true;
        self
    }

    /// Radius to use for range checks.
    pub fn radius_or(&self, default_radius: f64) -> f64 {
        self.tracking_radius.unwrap_or(default_radius)
    }
}

/// Partial update applied by the registry. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NpcPatch {
    pub location: Option<Location>,
    pub velocity: Option<Vec3>,
    pub on_ground: Option<bool>,
    pub profile: Option<Profile>,
    pub equipment: Vec<(EquipmentSlot, Option<ItemStack>)>,
    pub flags: Option<EntityFlags>,
    pub pose: Option<Pose>,
    pub custom_name: Option<Option<String>>,
    pub custom_name_visible: Option<bool>,
    pub health: Option<Option<f32>>,
    pub skin_layers: Option<SkinLayers>,
    pub glow: Option<Option<GlowColor>>,
}

impl NpcPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn profile(mut self, profile: Profile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn equip(mut self, slot: EquipmentSlot, item: Option<ItemStack>) -> Self {
        self.equipment.push((slot, item));
        self
    }

    pub fn flags(mut self, flags: EntityFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn pose(mut self, pose: Pose) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn custom_name(mut self, name: Option<String>) -> Self {
        self.custom_name = Some(name);
        self
    }

    pub fn custom_name_visible(mut self, visible: bool) -> Self {
        self.custom_name_visible = Some(visible);
        self
    }

    pub fn health(mut self, health: Option<f32>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn skin_layers(mut self, layers: SkinLayers) -> Self {
        self.skin_layers = Some(layers);
        self
    }

    pub fn glow(mut self, color: Option<GlowColor>) -> Self {
        self.glow = Some(color);
        self
    }

    /// Applies the patch to a definition in place.
    pub fn apply(&self, def: &mut NpcDefinition) {
        if let Some(location) = self.location {
            def.location = location;
        }
        if let Some(velocity) = self.velocity {
            def.velocity = velocity;
        }
        if let Some(on_ground) = self.on_ground {
            def.on_ground = on_ground;
        }
        if let Some(profile) = &self.profile {
            def.profile = profile.clone();
        }
        for (slot, item) in &self.equipment {
            def.equipment.set(*slot, *item);
        }
        let meta = &mut def.metadata;
        if let Some(flags) = self.flags {
            meta.flags = flags;
        }
        if let Some(pose) = self.pose {
            meta.pose = pose;
        }
        if let Some(name) = &self.custom_name {
            meta.custom_name = name.clone();
        }
        if let Some(visible) = self.custom_name_visible {
            meta.custom_name_visible = visible;
        }
        if let Some(health) = self.health {
            meta.health = health;
        }
        if let Some(layers) = self.skin_layers {
            meta.skin_layers = layers;
        }
        if let Some(glow) = self.glow {
            meta.glow = glow;
        }
        meta.sync_glow_flag();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WorldId;

    fn origin() -> Location {
        Location::new(WorldId(0), Vec3::ZERO, 0.0, 0.0)
    }

    #[test]
    fn random_profile_id_is_version_two() {
        for _ in 0..16 {
            let id = ProfileId::random();
            assert_eq!(id.version(), 2);
            assert_eq!(id.to_string().len(), 36);
        }
    }

    #[test]
    fn skin_validation() {
        assert!(SkinTexture::new("ZXdvZw==", "c2ln").validate().is_ok());
        assert!(SkinTexture::new("", "c2ln").validate().is_err());
        assert!(SkinTexture::new("not base64!", "c2ln").validate().is_err());
        let unsigned = SkinTexture {
            value: "ZXdvZw==".into(),
            signature: None,
        };
        assert_eq!(
            unsigned.validate(),
            Err(InvalidSkinError {
                reason: "missing signature"
            })
        );
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let mut def = NpcDefinition::humanoid(NpcId(1), "Guide", origin())
            .with_custom_name("Guide", true);
        let before = def.clone();

        NpcPatch::new().pose(Pose::Sleeping).apply(&mut def);

        assert_eq!(def.metadata.pose, Pose::Sleeping);
        assert_eq!(def.metadata.custom_name, before.metadata.custom_name);
        assert_eq!(def.location, before.location);
    }

    #[test]
    fn glow_keeps_flag_in_sync() {
        let mut def = NpcDefinition::humanoid(NpcId(1), "Guide", origin());
        NpcPatch::new().glow(Some(GlowColor::Red)).apply(&mut def);
        assert!(def.metadata.flags.contains(EntityFlags::GLOWING));

        NpcPatch::new().glow(None).apply(&mut def);
        assert!(!def.metadata.flags.contains(EntityFlags::GLOWING));
    }

    #[test]
    fn equipment_iterates_in_slot_order() {
        let sword = ItemStack::new(276, 0, 1013, 1);
        let helmet = ItemStack::new(310, 0, 1021, 1);
        let def = NpcDefinition::humanoid(NpcId(1), "Guard", origin())
            .with_item(EquipmentSlot::Head, helmet)
            .with_item(EquipmentSlot::MainHand, sword);
        let slots: Vec<_> = def.equipment.iter_filled().map(|(s, _)| s).collect();
        assert_eq!(slots, vec![EquipmentSlot::MainHand, EquipmentSlot::Head]);
    }
}
