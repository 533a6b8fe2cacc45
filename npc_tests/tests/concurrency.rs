use anyhow::Context;
use npc_core::prelude::*;
use npc_server::NpcHandle;
use npc_tests::{at, stream::spawned_entities, Harness};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

const VIEWERS: u128 = 4;

/// Mutations, viewer moves and removals race the tick loop; afterwards every
/// connection must have received a coherent entity lifecycle.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_changes_keep_every_stream_well_formed() -> anyhow::Result<()> {
    let h = Arc::new(Harness::new(NpcConfig {
        tab_removal_ticks: 7,
        ..NpcConfig::default()
    })?);
    let mut initial = Vec::new();
    for i in 0..12 {
        initial.push(h.humanoid(&format!("Npc{i}"), at((i % 8) as f64))?);
    }
    let npcs: Arc<Mutex<Vec<NpcHandle>>> = Arc::new(Mutex::new(initial));
    let removed: Arc<Mutex<HashSet<i32>>> = Arc::new(Mutex::new(HashSet::new()));
    let connections: Vec<(PlayerId, ConnectionHandle)> = (1..=VIEWERS)
        .map(|p| {
            let player = PlayerId(p);
            (player, h.join(player, ProtocolVersion::V1_8, at(5.0)))
        })
        .collect();
    let stop = Arc::new(AtomicBool::new(false));

    let ticker = {
        let h = h.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            while !stop.load(Ordering::Acquire) {
                h.tick().await?;
            }
            anyhow::Ok(())
        })
    };

    let mutator = {
        let h = h.clone();
        let npcs = npcs.clone();
        tokio::spawn(async move {
            for round in 0..300usize {
                let targets = npcs.lock().clone();
                for (i, npc) in targets.into_iter().enumerate() {
                    let flags = if (round + i) % 2 == 0 {
                        EntityFlags::CROUCHED
                    } else {
                        EntityFlags::empty()
                    };
                    let patch = NpcPatch::new()
                        .move_to(at(((round + i) % 8) as f64))
                        .flags(flags);
                    // the remover may have taken it already
                    let _ = h.platform.update_npc(npc, patch);
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let mover = {
        let h = h.clone();
        tokio::spawn(async move {
            for round in 0..200u128 {
                for p in 1..=VIEWERS {
                    let player = PlayerId(p);
                    let x = if (round + p) % 3 == 0 { 200.0 } else { 5.0 };
                    h.world.teleport(player, at(x));
                    h.platform.viewer_moved(player);
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let remover = {
        let h = h.clone();
        let npcs = npcs.clone();
        let removed = removed.clone();
        tokio::spawn(async move {
            for round in 0..40usize {
                let victim = {
                    let mut npcs = npcs.lock();
                    let len = npcs.len();
                    (len > 0).then(|| npcs.remove(round % len))
                };
                if let Some(victim) = victim {
                    removed.lock().insert(victim.id().0);
                    h.platform.remove_npc(victim)?;
                }
                let fresh = h.humanoid(&format!("Fresh{round}"), at((round % 6) as f64))?;
                npcs.lock().push(fresh);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            anyhow::Ok(())
        })
    };

    mutator.await?;
    mover.await?;
    remover.await??;
    stop.store(true, Ordering::Release);
    ticker.await??;

    for (player, _) in &connections {
        h.world.teleport(*player, at(5.0));
        h.platform.viewer_moved(*player);
    }
    h.ticks(2).await?;
    h.platform.flush().await;

    let removed = removed.lock().clone();
    let alive: HashSet<i32> = h.platform.registry().ids().into_iter().map(|id| id.0).collect();
    assert_eq!(alive.len(), 12);
    for (player, connection) in &connections {
        let frames = h.transport.frames(*connection);
        let spawned = spawned_entities(&frames, &removed)
            .with_context(|| format!("frames sent to {player}"))?;
        assert_eq!(spawned, alive, "entities spawned for {player}");
        for npc in &alive {
            assert_eq!(
                h.platform.tracker().edge_state(NpcId(*npc), *player),
                EdgeState::Visible
            );
        }
    }
    assert!(h.errors.is_empty(), "{:?}", h.errors.messages());
    Ok(())
}
