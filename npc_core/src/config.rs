//! Configuration system.
//!
//! Loads engine configuration from JSON strings (file IO left to the host).

use serde::{Deserialize, Serialize};

use crate::entity::SkinTexture;
use crate::error::ConfigError;

/// Engine-wide tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NpcConfig {
    /// Default visibility radius, in blocks. NPCs may override it.
    pub tracking_radius: f64,
    /// Radius for look-at and imitation behaviours. Must not exceed
    /// `tracking_radius`.
    pub action_radius: f64,
    /// Ticks between periodic visibility sweeps.
    pub update_interval_ticks: u32,
    /// Simulation tick rate.
    pub tick_hz: u32,
    /// Skin used when an NPC has none or its own is invalid.
    pub default_skin: Option<SkinTexture>,
    /// Rotate a freshly spawned NPC to face the viewer it spawned for.
    pub spawn_look_at_viewer: bool,
    /// Ticks a spawned humanoid keeps its player-list entry before it is
    /// removed again. `0` keeps the entry while the NPC is visible.
    pub tab_removal_ticks: u32,
}

impl Default for NpcConfig {
    fn default() -> Self {
        Self {
            tracking_radius: 50.0,
            action_radius: 20.0,
            update_interval_ticks: 2,
            tick_hz: 20,
            default_skin: None,
            spawn_look_at_viewer: false,
            tab_removal_ticks: 30,
        }
    }
}

impl NpcConfig {
    /// Parses config from JSON. Missing keys take their defaults.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("tracking_radius", self.tracking_radius),
            ("action_radius", self.action_radius),
            ("update_interval_ticks", self.update_interval_ticks as f64),
            ("tick_hz", self.tick_hz as f64),
        ];
        for (name, value) in positive {
            // written as a negation so NaN is rejected too
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        if self.action_radius > self.tracking_radius {
            return Err(ConfigError::ActionExceedsTracking {
                action: self.action_radius,
                tracking: self.tracking_radius,
            });
        }
        if let Some(skin) = &self.default_skin {
            skin.validate()?;
        }
        Ok(())
    }

    /// Wall-clock length of one tick.
    pub fn tick_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.tick_hz.max(1) as f64)
    }
}
