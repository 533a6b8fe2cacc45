//! NPC demo binary.
//!
//! Usage:
//!   cargo run -p npc_server -- [--config npc.json] [--tick-hz 20] [--radius 50] [--ticks 200]
//!
//! Runs the platform against an in-memory world with two viewers on
//! different protocol versions. One viewer walks away from the NPCs and back;
//! every frame the engine would send is logged at debug level
//! (`RUST_LOG=npc_server=debug`).

use std::env;
use std::sync::Arc;

use anyhow::Context;
use npc_core::prelude::*;
use npc_server::memory::{LogTransport, MemoryWorld};
use npc_server::NpcPlatform;
use tracing::info;

struct Args {
    config: Option<String>,
    tick_hz: Option<u32>,
    radius: Option<f64>,
    ticks: u32,
}

fn parse_args() -> Args {
    let mut out = Args {
        config: None,
        tick_hz: None,
        radius: None,
        ticks: 200,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                out.config = Some(args[i + 1].clone());
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                out.tick_hz = args[i + 1].parse().ok();
                i += 2;
            }
            "--radius" if i + 1 < args.len() => {
                out.radius = args[i + 1].parse().ok();
                i += 2;
            }
            "--ticks" if i + 1 < args.len() => {
                out.ticks = args[i + 1].parse().unwrap_or(200);
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

fn load_config(args: &Args) -> anyhow::Result<NpcConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            NpcConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?
        }
        None => NpcConfig::default(),
    };
    if let Some(hz) = args.tick_hz {
        cfg.tick_hz = hz;
    }
    if let Some(radius) = args.radius {
        cfg.tracking_radius = radius;
        cfg.action_radius = cfg.action_radius.min(radius);
    }
    Ok(cfg)
}

const OVERWORLD: WorldId = WorldId(0);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let cfg = load_config(&args)?;
    info!(tick_hz = cfg.tick_hz, radius = cfg.tracking_radius, ticks = args.ticks, "Starting demo");

    let world = Arc::new(MemoryWorld::new());
    let platform = NpcPlatform::new(
        cfg,
        CodecTable::standard(),
        Arc::new(LogTransport),
        world.clone(),
        Arc::new(LogErrorSink),
    )
    .context("create platform")?;

    let guide = platform.create_npc_with(|id| {
        NpcDefinition::humanoid(id, "Guide", Location::new(OVERWORLD, Vec3::new(0.5, 64.0, 0.5), 0.0, 0.0))
            .with_custom_name("Guide", true)
            .with_glow(GlowColor::Aqua)
            .with_item(EquipmentSlot::MainHand, ItemStack::new(276, 0, 603, 1))
            .looking_at_viewers()
            .imitating_viewers()
    })?;
    let sheep_kind = EntityKind::Mob(TypeIds {
        legacy: 91,
        registry: 73,
    });
    let sheep = platform.create_npc_with(|id| {
        NpcDefinition::new(
            id,
            sheep_kind,
            Profile::new("Sheep"),
            Location::new(OVERWORLD, Vec3::new(4.0, 64.0, 4.0), 90.0, 0.0),
        )
    })?;
    platform.on_interact(guide, |ctx| {
        info!(npc = %ctx.npc, player = %ctx.player, action = ?ctx.action, "Guide was clicked");
        Ok(())
    })?;

    let alice = PlayerId(0xA11CE);
    let bob = PlayerId(0xB0B);
    let alice_conn = ConnectionHandle::new_unique();
    let bob_conn = ConnectionHandle::new_unique();
    world.join(alice, ProtocolVersion::V1_8, Location::new(OVERWORLD, Vec3::new(5.0, 64.0, 0.0), 0.0, 0.0));
    world.join(bob, ProtocolVersion::V1_16_5, Location::new(OVERWORLD, Vec3::new(-3.0, 64.0, 2.0), 0.0, 0.0));
    platform.viewer_joined(alice, alice_conn);
    platform.viewer_joined(bob, bob_conn);

    let dt = platform.tick_duration();
    let mut next = tokio::time::Instant::now();
    for tick in 0..args.ticks {
        next += dt;

        // alice walks out along +x and comes back
        let phase = (tick % 160) as f64;
        let x = if phase < 80.0 { 5.0 + phase } else { 165.0 - phase };
        world.teleport(alice, Location::new(OVERWORLD, Vec3::new(x, 64.0, 0.0), 0.0, 0.0));
        if tick % 10 == 0 {
            platform.viewer_moved(alice);
        }

        if tick % 40 == 20 {
            let sneaking = (tick / 40) % 2 == 0;
            let flags = if sneaking { EntityFlags::CROUCHED } else { EntityFlags::empty() };
            platform.update_npc(sheep, NpcPatch::new().flags(flags))?;
        }
        if tick % 50 == 25 {
            platform.viewer_swung(bob);
        }
        if tick == 30 {
            let viewers = platform.animate(guide, Animation::SwingMainArm)?;
            info!(viewers, "guide waved");
        }

        platform.step().await?;
        for event in platform.drain_events() {
            info!(?event, "tracking");
        }
        tokio::time::sleep_until(next).await;
    }

    let despawned = platform.remove_npc(sheep)?;
    info!(despawned, "sheep removed");
    platform.flush().await;
    info!(tick = platform.tick(), "Demo finished");
    Ok(())
}
