//! Replays the 1.8 frames one connection received and checks that they
//! describe a coherent entity lifecycle:
//! - a player spawn run is complete, or cut short only for an NPC that was
//!   removed, in which case its next frame is a destroy;
//! - no frame names an entity that is not spawned, except the teardown that
//!   follows its destroy;
//! - nothing is spawned twice without a destroy in between.
//!
//! Player-list frames carry no entity id and are skipped.

use crate::ids::v1_8::*;
use anyhow::{bail, Context};
use bytes::Bytes;
use npc_core::protocol::wire::PacketReader;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Spawned,
    /// Spawn run cut short by a removal; only a destroy may follow.
    Truncated,
}

/// Position inside a player spawn run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run {
    Equipment,
    Team,
    Look,
    HeadLook,
}

enum Frame {
    Skip,
    Spawn(i32),
    Destroy(Vec<i32>),
    Team { entity: i32, mode: u8 },
    Entity { packet: i32, entity: i32 },
}

fn parse(frame: &Bytes) -> anyhow::Result<Frame> {
    let mut r = PacketReader::new(&frame[..]);
    let packet = r.var_int()?;
    Ok(match packet {
        PLAYER_INFO => Frame::Skip,
        SPAWN_PLAYER => Frame::Spawn(r.var_int()?),
        DESTROY => {
            let count = r.var_int()?;
            let ids: Vec<i32> = (0..count).map(|_| r.var_int()).collect::<Result<_, _>>()?;
            Frame::Destroy(ids)
        }
        TEAMS => {
            let name = r.string(16)?;
            let entity = name
                .strip_prefix("npc")
                .and_then(|id| id.parse().ok())
                .with_context(|| format!("team {name:?} is not an NPC team"))?;
            Frame::Team {
                entity,
                mode: r.u8()?,
            }
        }
        EQUIPMENT | ANIMATION | METADATA | REL_MOVE | LOOK | LOOK_MOVE | TELEPORT | HEAD_LOOK
        | VELOCITY => Frame::Entity {
            packet,
            entity: r.var_int()?,
        },
        other => bail!("unexpected packet 0x{other:02X}"),
    })
}

/// Checks `frames` and returns the entities still spawned at the end.
/// `removed` lists the NPCs removed while the frames were produced.
pub fn spawned_entities(frames: &[Bytes], removed: &HashSet<i32>) -> anyhow::Result<HashSet<i32>> {
    let mut state: HashMap<i32, Lifecycle> = HashMap::new();
    let mut teardown: HashSet<i32> = HashSet::new();
    let mut run: Option<(i32, Run)> = None;

    for (index, frame) in frames.iter().enumerate() {
        let parsed = parse(frame).with_context(|| format!("frame {index}"))?;

        if let Some((entity, at)) = run {
            let next = match (&parsed, at) {
                (Frame::Entity { packet: EQUIPMENT, entity: e }, Run::Equipment) if *e == entity => {
                    Some(Run::Equipment)
                }
                (Frame::Entity { packet: METADATA, entity: e }, Run::Equipment) if *e == entity => {
                    Some(Run::Team)
                }
                (Frame::Team { entity: e, mode: 0 }, Run::Equipment | Run::Team) if *e == entity => {
                    Some(Run::Look)
                }
                (Frame::Entity { packet: LOOK, entity: e }, Run::Look) if *e == entity => {
                    Some(Run::HeadLook)
                }
                (Frame::Entity { packet: HEAD_LOOK, entity: e }, Run::HeadLook) if *e == entity => {
                    state.insert(entity, Lifecycle::Spawned);
                    run = None;
                    continue;
                }
                _ => None,
            };
            match next {
                Some(next) => {
                    run = Some((entity, next));
                    continue;
                }
                None => {
                    if !removed.contains(&entity) {
                        bail!("frame {index}: spawn run of {entity} cut short at {at:?}");
                    }
                    state.insert(entity, Lifecycle::Truncated);
                    run = None;
                }
            }
        }

        match parsed {
            Frame::Skip => {}
            Frame::Spawn(entity) => {
                if let Some(current) = state.get(&entity) {
                    bail!("frame {index}: {entity} spawned while {current:?}");
                }
                teardown.remove(&entity);
                run = Some((entity, Run::Equipment));
            }
            Frame::Destroy(ids) => {
                for entity in ids {
                    if state.remove(&entity).is_none() && !removed.contains(&entity) {
                        bail!("frame {index}: destroy of {entity} which was never spawned");
                    }
                    teardown.insert(entity);
                }
            }
            Frame::Team { entity, mode: 1 } => {
                if !teardown.remove(&entity) {
                    bail!("frame {index}: team of {entity} removed outside a despawn");
                }
            }
            Frame::Team { entity, mode } => {
                if state.get(&entity) != Some(&Lifecycle::Spawned) {
                    bail!("frame {index}: team mode {mode} for {entity} which is not spawned");
                }
            }
            Frame::Entity { packet, entity } => {
                if state.get(&entity) != Some(&Lifecycle::Spawned) {
                    bail!("frame {index}: packet 0x{packet:02X} for {entity} which is not spawned");
                }
            }
        }
    }

    if let Some((entity, at)) = run {
        bail!("stream ends inside the spawn run of {entity} at {at:?}");
    }
    if let Some((entity, _)) = state.iter().find(|(_, s)| **s == Lifecycle::Truncated) {
        bail!("cut-short spawn of {entity} was never destroyed");
    }
    Ok(state.into_keys().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use npc_core::protocol::wire::PacketWriter;

    fn entity(packet: i32, id: i32) -> Bytes {
        let mut w = PacketWriter::new(packet);
        w.var_int(id);
        w.finish()
    }

    fn team(id: i32, mode: u8) -> Bytes {
        let mut w = PacketWriter::new(TEAMS);
        w.string(&format!("npc{id}")).u8(mode);
        w.finish()
    }

    fn destroy(id: i32) -> Bytes {
        let mut w = PacketWriter::new(DESTROY);
        w.var_int(1).var_int(id);
        w.finish()
    }

    fn info() -> Bytes {
        let mut w = PacketWriter::new(PLAYER_INFO);
        w.var_int(0);
        w.finish()
    }

    fn spawn_run(id: i32) -> Vec<Bytes> {
        vec![
            info(),
            entity(SPAWN_PLAYER, id),
            entity(METADATA, id),
            team(id, 0),
            entity(LOOK, id),
            entity(HEAD_LOOK, id),
        ]
    }

    fn despawn(id: i32) -> Vec<Bytes> {
        vec![destroy(id), info(), team(id, 1)]
    }

    #[test]
    fn complete_lifecycle_is_accepted() {
        let mut frames = spawn_run(1);
        frames.extend(spawn_run(2));
        frames.push(entity(REL_MOVE, 1));
        frames.extend(despawn(1));
        let spawned = spawned_entities(&frames, &HashSet::new()).unwrap();
        assert_eq!(spawned, HashSet::from([2]));
    }

    #[test]
    fn frame_after_destroy_is_rejected() {
        let mut frames = spawn_run(1);
        frames.extend(despawn(1));
        frames.push(entity(METADATA, 1));
        assert!(spawned_entities(&frames, &HashSet::new()).is_err());
    }

    #[test]
    fn cut_short_run_needs_a_removal_and_a_destroy() {
        let mut frames = spawn_run(1);
        frames.truncate(3);
        frames.extend(spawn_run(2));
        assert!(spawned_entities(&frames, &HashSet::new()).is_err());
        assert!(spawned_entities(&frames, &HashSet::from([1])).is_err());

        frames.push(destroy(1));
        let spawned = spawned_entities(&frames, &HashSet::from([1])).unwrap();
        assert_eq!(spawned, HashSet::from([2]));
    }

    #[test]
    fn double_spawn_is_rejected() {
        let mut frames = spawn_run(1);
        frames.extend(spawn_run(1));
        assert!(spawned_entities(&frames, &HashSet::new()).is_err());
    }
}
