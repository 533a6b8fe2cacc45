//! Visibility tracker.
//!
//! Keeps one tracking edge per (NPC, viewer) and drives it through
//! `NotTracked -> Spawning -> Visible -> Despawning -> NotTracked`.
//!
//! - Edges of one NPC live behind a single lock. A transition, its intents
//!   and the edge insert or delete all happen while that lock is held, so no
//!   viewer reaches `Visible` without a spawn and no packet is queued for a
//!   deleted edge.
//! - Every evaluation reads the NPC's latest snapshot under the edge lock and
//!   diffs it against what the edge last sent, so evaluations are idempotent
//!   and can run from sweeps, refreshes and viewer moves alike.
//! - Intents leave through an [`IntentSink`]; nothing here waits on the
//!   network.

use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, info, warn};

use crate::config::NpcConfig;
use crate::dispatch::IntentSink;
use crate::entity::{NpcDefinition, NpcId, Profile};
use crate::event::{EventQueue, HideReason, TrackingEvent};
use crate::host::{ErrorSink, Failure, WorldView};
use crate::math::{angle_byte, Location, Vec3};
use crate::meta::{diff, equipment_changes, full_metadata, needs_respawn, spatial_change};
use crate::protocol::{wire::player_name, CodecTable, MetaScope, PacketIntent, ProtocolVersion};
use crate::registry::Registry;
use crate::viewer::{ConnectionHandle, PlayerId, ViewerSession};

/// Eye height of a standing player model.
const EYE_HEIGHT: f64 = 1.62;

/// Visibility state of one (NPC, viewer) edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeState {
    NotTracked,
    Spawning,
    Visible,
    Despawning,
}

struct Edge {
    state: EdgeState,
    /// Snapshot the viewer's client currently reflects.
    sent: Arc<NpcDefinition>,
    /// Last per-viewer look-at rotation, as angle bytes. Cleared whenever
    /// the viewer is sent another rotation.
    facing: Option<(u8, u8)>,
    /// Tick at which a humanoid's player-list entry is removed.
    list_removal_due: Option<u64>,
}

#[derive(Default)]
struct NpcEdges {
    edges: HashMap<PlayerId, Edge>,
    dead: bool,
    skin_reported: bool,
}

type Viewer = (Arc<ViewerSession>, Option<Location>);

pub struct Tracker {
    cfg: NpcConfig,
    codecs: CodecTable,
    registry: Arc<Registry>,
    world: Arc<dyn WorldView>,
    sink: Arc<dyn IntentSink>,
    errors: Arc<dyn ErrorSink>,
    events: Arc<EventQueue>,
    sessions: RwLock<HashMap<PlayerId, Arc<ViewerSession>>>,
    tables: RwLock<HashMap<NpcId, Arc<Mutex<NpcEdges>>>>,
    clock: AtomicU64,
}

impl Tracker {
    pub fn new(
        cfg: NpcConfig,
        codecs: CodecTable,
        registry: Arc<Registry>,
        world: Arc<dyn WorldView>,
        sink: Arc<dyn IntentSink>,
        errors: Arc<dyn ErrorSink>,
        events: Arc<EventQueue>,
    ) -> Self {
        Self {
            cfg,
            codecs,
            registry,
            world,
            sink,
            errors,
            events,
            sessions: RwLock::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
        }
    }

    // ─── Sessions ───

    /// Creates the viewer's session and selects its codec once. A version no
    /// codec covers yields an untrackable session, reported here and never
    /// again.
    pub fn open_session(
        &self,
        player: PlayerId,
        connection: ConnectionHandle,
        version: ProtocolVersion,
    ) -> Arc<ViewerSession> {
        let codec = match self.codecs.select(version) {
            Ok(codec) => {
                info!(%player, %version, codec = codec.name(), "viewer session opened");
                Some(codec)
            }
            Err(error) => {
                warn!(%player, %version, "unsupported protocol, viewer will not see NPCs");
                self.errors.report(Failure::Codec {
                    player,
                    error: error.clone(),
                });
                None
            }
        };
        let session = Arc::new(ViewerSession::new(player, connection, version, codec));
        let previous = self.sessions.write().insert(player, session.clone());
        if let Some(previous) = previous {
            previous.mark_closed();
            self.drop_edges_of(player, HideReason::Disconnected);
        }
        session
    }

    /// Forgets the viewer. Its edges are deleted without despawn packets.
    pub fn close_session(&self, player: PlayerId) -> bool {
        let Some(session) = self.sessions.write().remove(&player) else {
            return false;
        };
        session.mark_closed();
        let dropped = self.drop_edges_of(player, HideReason::Disconnected);
        info!(%player, edges = dropped, "viewer session closed");
        true
    }

    pub fn session(&self, player: PlayerId) -> Option<Arc<ViewerSession>> {
        self.sessions.read().get(&player).cloned()
    }

    pub fn session_by_connection(&self, connection: ConnectionHandle) -> Option<Arc<ViewerSession>> {
        self.sessions
            .read()
            .values()
            .find(|s| s.connection == connection)
            .cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn drop_edges_of(&self, player: PlayerId, reason: HideReason) -> usize {
        let tables: Vec<(NpcId, Arc<Mutex<NpcEdges>>)> = self
            .tables
            .read()
            .iter()
            .map(|(id, t)| (*id, t.clone()))
            .collect();
        let mut dropped = 0;
        for (npc, table) in tables {
            if table.lock().edges.remove(&player).is_some() {
                self.registry.detach_viewer(npc, player);
                self.events.push(TrackingEvent::Hidden {
                    npc,
                    player,
                    reason,
                });
                dropped += 1;
            }
        }
        dropped
    }

    // ─── Evaluation entry points ───

    /// Full pass: every NPC against every viewer, then look-at rotations.
    /// Viewers the host reports offline are closed first.
    pub fn sweep(&self) {
        let viewers = self.viewers();
        for npc in self.registry.ids() {
            self.evaluate(npc, &viewers);
        }
        for def in self.registry.snapshots() {
            if def.look_at_viewer {
                self.look_at_viewers(def.id);
            }
        }
    }

    /// Re-evaluates one viewer against every NPC, e.g. after it moved.
    pub fn check_viewer(&self, player: PlayerId) {
        let Some(session) = self.session(player) else {
            return;
        };
        if !self.world.is_online(player) {
            self.close_session(player);
            return;
        }
        let viewer = [(session, self.world.current_position(player))];
        for npc in self.registry.ids() {
            self.evaluate(npc, &viewer);
        }
    }

    /// Re-evaluates one NPC against every viewer, e.g. after a mutation.
    pub fn refresh(&self, npc: NpcId) {
        let viewers = self.viewers();
        self.evaluate(npc, &viewers);
    }

    /// Despawns a removed NPC for every viewer still tracking it. Queued but
    /// unsent intents for its edges are cancelled first.
    pub fn remove_npc(&self, npc: NpcId) -> usize {
        let Some(table) = self.tables.write().remove(&npc) else {
            return 0;
        };
        let mut table = table.lock();
        table.dead = true;
        let mut edges: Vec<(PlayerId, Edge)> = table.edges.drain().collect();
        edges.sort_by_key(|(player, _)| *player);

        let mut despawned = 0;
        for (player, edge) in edges {
            let session = self.session(player).filter(|s| s.is_connected());
            let reason = match session {
                Some(session) => {
                    self.sink.cancel(player, npc);
                    self.sink.enqueue(&session, npc, vec![despawn_intent(&edge.sent)]);
                    despawned += 1;
                    HideReason::Removed
                }
                None => HideReason::Disconnected,
            };
            self.events.push(TrackingEvent::Hidden {
                npc,
                player,
                reason,
            });
        }
        info!(%npc, despawned, "NPC despawned for all viewers");
        despawned
    }

    pub fn edge_state(&self, npc: NpcId, player: PlayerId) -> EdgeState {
        let Some(table) = self.tables.read().get(&npc).cloned() else {
            return EdgeState::NotTracked;
        };
        let table = table.lock();
        table
            .edges
            .get(&player)
            .map(|e| e.state)
            .unwrap_or(EdgeState::NotTracked)
    }

    /// Players currently seeing the NPC, in ascending order.
    pub fn visible_to(&self, npc: NpcId) -> Vec<PlayerId> {
        let Some(table) = self.tables.read().get(&npc).cloned() else {
            return Vec::new();
        };
        let mut players: Vec<PlayerId> = table
            .lock()
            .edges
            .iter()
            .filter(|(_, e)| e.state == EdgeState::Visible)
            .map(|(p, _)| *p)
            .collect();
        players.sort_unstable();
        players
    }

    /// Queues the same intents for every viewer that sees the NPC. Returns
    /// how many viewers got them.
    pub fn broadcast(&self, npc: NpcId, intents: Vec<PacketIntent>) -> usize {
        let Some(table) = self.tables.read().get(&npc).cloned() else {
            return 0;
        };
        let table = table.lock();
        let mut sent = 0;
        for (player, edge) in &table.edges {
            if edge.state != EdgeState::Visible {
                continue;
            }
            if let Some(session) = self.session(*player).filter(|s| s.is_connected()) {
                self.sink.enqueue(&session, npc, intents.clone());
                sent += 1;
            }
        }
        sent
    }

    /// Queues intents for one viewer if it currently sees the NPC.
    pub fn send_to(&self, npc: NpcId, player: PlayerId, intents: Vec<PacketIntent>) -> bool {
        let Some(table) = self.tables.read().get(&npc).cloned() else {
            return false;
        };
        let table = table.lock();
        let visible = table
            .edges
            .get(&player)
            .is_some_and(|e| e.state == EdgeState::Visible);
        match self.session(player).filter(|s| visible && s.is_connected()) {
            Some(session) => {
                self.sink.enqueue(&session, npc, intents);
                true
            }
            None => false,
        }
    }

    /// Turns the NPC's head toward each viewer within the action radius.
    /// Only the viewer being looked at receives the rotation.
    pub fn look_at_viewers(&self, npc: NpcId) {
        let Some(table) = self.tables.read().get(&npc).cloned() else {
            return;
        };
        let mut table = table.lock();
        let Some(def) = self.registry.snapshot(npc) else {
            return;
        };
        let eye = eye_of(&def.location);
        for (player, edge) in table.edges.iter_mut() {
            if edge.state != EdgeState::Visible {
                continue;
            }
            let Some(session) = self.session(*player).filter(|s| s.is_connected()) else {
                continue;
            };
            let Some(viewer) = self.world.current_position(*player) else {
                continue;
            };
            if !def.location.within(&viewer, self.cfg.action_radius) {
                continue;
            }
            let (yaw, pitch) = eye.look_at(eye_of(&viewer).pos);
            let facing = (angle_byte(yaw), angle_byte(pitch));
            if edge.facing == Some(facing) {
                continue;
            }
            edge.facing = Some(facing);
            self.sink.enqueue(
                &session,
                npc,
                vec![PacketIntent::Rotate {
                    entity_id: npc,
                    yaw,
                    pitch,
                }],
            );
        }
    }

    // ─── State machine ───

    fn viewers(&self) -> Vec<Viewer> {
        let mut sessions: Vec<Arc<ViewerSession>> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.player);
        let mut viewers = Vec::with_capacity(sessions.len());
        for session in sessions {
            if !self.world.is_online(session.player) {
                self.close_session(session.player);
                continue;
            }
            let location = self.world.current_position(session.player);
            viewers.push((session, location));
        }
        viewers
    }

    fn table(&self, npc: NpcId) -> Arc<Mutex<NpcEdges>> {
        if let Some(table) = self.tables.read().get(&npc) {
            return table.clone();
        }
        self.tables.write().entry(npc).or_default().clone()
    }

    fn evaluate(&self, npc: NpcId, viewers: &[Viewer]) {
        let entry = self.table(npc);
        let mut table = entry.lock();
        if table.dead {
            return;
        }
        // read under the edge lock so concurrent evaluations see snapshots in order
        let Some(def) = self.registry.snapshot(npc) else {
            // edges left behind are despawned by `remove_npc`
            if table.edges.is_empty() {
                table.dead = true;
                drop(table);
                let mut tables = self.tables.write();
                if tables.get(&npc).is_some_and(|t| Arc::ptr_eq(t, &entry)) {
                    tables.remove(&npc);
                }
            }
            return;
        };
        for (session, location) in viewers {
            self.transition(&mut table, &def, session, location.as_ref());
        }
    }

    fn verdict(&self, def: &NpcDefinition, player: PlayerId, viewer: Option<&Location>) -> Result<(), HideReason> {
        let Some(viewer) = viewer else {
            return Err(HideReason::OutOfRange);
        };
        if !def.audience.includes(player) {
            return Err(HideReason::Excluded);
        }
        if viewer.world != def.location.world {
            return Err(HideReason::WorldChanged);
        }
        if !def.location.within(viewer, def.radius_or(self.cfg.tracking_radius)) {
            return Err(HideReason::OutOfRange);
        }
        Ok(())
    }

    fn transition(
        &self,
        table: &mut NpcEdges,
        def: &Arc<NpcDefinition>,
        session: &Arc<ViewerSession>,
        viewer: Option<&Location>,
    ) {
        let npc = def.id;
        let player = session.player;
        if !session.is_trackable() {
            return;
        }
        if !session.is_connected() {
            if table.edges.remove(&player).is_some() {
                debug!(%npc, %player, "viewer disconnected, edge dropped");
                self.registry.detach_viewer(npc, player);
                self.events.push(TrackingEvent::Hidden {
                    npc,
                    player,
                    reason: HideReason::Disconnected,
                });
            }
            return;
        }

        let verdict = self.verdict(def, player, viewer);
        let state = table.edges.get(&player).map(|e| e.state);
        match (state, verdict) {
            (None, Ok(())) => {
                table.edges.insert(
                    player,
                    Edge {
                        state: EdgeState::Spawning,
                        sent: def.clone(),
                        facing: None,
                        list_removal_due: None,
                    },
                );
                let intents = self.spawn_intents(table, def, viewer);
                let facing = def.look_at_viewer.then(|| spawn_facing(&intents)).flatten();
                self.sink.enqueue(session, npc, intents);
                let due = self.list_removal_due(def);
                if let Some(edge) = table.edges.get_mut(&player) {
                    edge.state = EdgeState::Visible;
                    edge.facing = facing;
                    edge.list_removal_due = due;
                }
                self.registry.attach_viewer(npc, player);
                self.events.push(TrackingEvent::Shown { npc, player });
                info!(%npc, %player, version = %session.version, "NPC shown");
            }
            (None, Err(_)) => {}
            (Some(_), Ok(())) => {
                let Some(sent) = table.edges.get(&player).map(|e| e.sent.clone()) else {
                    return;
                };
                if Arc::ptr_eq(&sent, def) {
                    return;
                }
                let respawn = needs_respawn(&sent, def);
                let intents = if respawn {
                    debug!(%npc, %player, "profile or kind changed, respawning");
                    let mut intents = vec![despawn_intent(&sent)];
                    intents.extend(self.spawn_intents(table, def, viewer));
                    intents
                } else {
                    update_intents(&sent, def)
                };
                let turned = respawn
                    || intents
                        .iter()
                        .any(|i| matches!(i, PacketIntent::Move { .. }));
                if !intents.is_empty() {
                    self.sink.enqueue(session, npc, intents);
                }
                let due = respawn.then(|| self.list_removal_due(def)).flatten();
                if let Some(edge) = table.edges.get_mut(&player) {
                    edge.sent = def.clone();
                    if turned {
                        // the viewer now sees the canonical rotation
                        edge.facing = None;
                    }
                    if respawn {
                        edge.list_removal_due = due;
                    }
                }
            }
            (Some(_), Err(reason)) => {
                if let Some(edge) = table.edges.get_mut(&player) {
                    edge.state = EdgeState::Despawning;
                }
                if let Some(edge) = table.edges.remove(&player) {
                    self.sink.enqueue(session, npc, vec![despawn_intent(&edge.sent)]);
                }
                self.registry.detach_viewer(npc, player);
                self.events.push(TrackingEvent::Hidden {
                    npc,
                    player,
                    reason,
                });
                info!(%npc, %player, ?reason, "NPC hidden");
            }
        }
    }

    /// `[Spawn, Equipment*, full metadata, Rotate]`.
    fn spawn_intents(
        &self,
        table: &mut NpcEdges,
        def: &NpcDefinition,
        viewer: Option<&Location>,
    ) -> Vec<PacketIntent> {
        let npc = def.id;
        let profile = self.resolve_profile(table, def);
        let team_member = if def.kind.is_humanoid() {
            player_name(&profile.name).to_string()
        } else {
            def.unique_id.to_string()
        };

        let mut intents = Vec::with_capacity(8);
        intents.push(PacketIntent::Spawn {
            entity_id: npc,
            unique_id: def.unique_id,
            kind: def.kind,
            profile,
            location: def.location,
            velocity: def.velocity,
        });
        for (slot, item) in def.equipment.iter_filled() {
            intents.push(PacketIntent::UpdateEquipment {
                entity_id: npc,
                slot,
                item: Some(item),
            });
        }
        intents.push(PacketIntent::UpdateMetadata {
            entity_id: npc,
            kind: def.kind,
            fields: full_metadata(&def.kind, &def.metadata),
            scope: MetaScope::Full { team_member },
        });

        let face_viewer = self.cfg.spawn_look_at_viewer
            || (def.look_at_viewer
                && viewer.is_some_and(|v| def.location.within(v, self.cfg.action_radius)));
        let (yaw, pitch) = match viewer {
            Some(v) if face_viewer => eye_of(&def.location).look_at(eye_of(v).pos),
            _ => (def.location.yaw, def.location.pitch),
        };
        intents.push(PacketIntent::Rotate {
            entity_id: npc,
            yaw,
            pitch,
        });
        intents
    }

    /// The profile to show. An invalid or missing skin falls back to the
    /// configured default; an invalid one is reported once per NPC.
    fn resolve_profile(&self, table: &mut NpcEdges, def: &NpcDefinition) -> Profile {
        if !def.kind.is_humanoid() {
            return def.profile.clone();
        }
        let mut profile = def.profile.clone();
        match &def.profile.skin {
            Some(skin) => {
                if let Err(error) = skin.validate() {
                    if !table.skin_reported {
                        table.skin_reported = true;
                        warn!(npc = %def.id, %error, "invalid skin, using default");
                        self.errors.report(Failure::InvalidSkin { npc: def.id, error });
                    }
                    profile.skin = self.cfg.default_skin.clone();
                }
            }
            None => profile.skin = self.cfg.default_skin.clone(),
        }
        profile
    }

    pub fn config(&self) -> &NpcConfig {
        &self.cfg
    }

    /// Current tracker tick.
    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Advances the clock by one tick and drops the player-list entries that
    /// are due. Returns the new tick.
    pub fn advance_tick(&self) -> u64 {
        let now = self.clock.fetch_add(1, Ordering::AcqRel) + 1;
        let tables: Vec<(NpcId, Arc<Mutex<NpcEdges>>)> = self
            .tables
            .read()
            .iter()
            .map(|(id, t)| (*id, t.clone()))
            .collect();
        for (npc, table) in tables {
            let mut table = table.lock();
            for (player, edge) in table.edges.iter_mut() {
                let due = edge.list_removal_due.is_some_and(|due| due <= now);
                if edge.state != EdgeState::Visible || !due {
                    continue;
                }
                edge.list_removal_due = None;
                let Some(session) = self.session(*player).filter(|s| s.is_connected()) else {
                    continue;
                };
                debug!(%npc, player = %session.player, "removing NPC from player list");
                self.sink.enqueue(
                    &session,
                    npc,
                    vec![PacketIntent::HideFromPlayerList {
                        entity_id: npc,
                        unique_id: edge.sent.unique_id,
                    }],
                );
            }
        }
        now
    }

    fn list_removal_due(&self, def: &NpcDefinition) -> Option<u64> {
        let ticks = self.cfg.tab_removal_ticks;
        (def.kind.is_humanoid() && ticks > 0).then(|| self.now() + ticks as u64)
    }

    /// Ids of every NPC with at least one edge.
    pub fn tracked_npcs(&self) -> HashSet<NpcId> {
        let tables: Vec<(NpcId, Arc<Mutex<NpcEdges>>)> = self
            .tables
            .read()
            .iter()
            .map(|(id, t)| (*id, t.clone()))
            .collect();
        tables
            .into_iter()
            .filter(|(_, t)| !t.lock().edges.is_empty())
            .map(|(id, _)| id)
            .collect()
    }
}

/// Intents for a `Visible` self-loop. Empty when nothing changed.
fn update_intents(sent: &NpcDefinition, def: &NpcDefinition) -> Vec<PacketIntent> {
    let npc = def.id;
    let mut intents = Vec::new();
    let spatial = spatial_change(sent, def);
    if spatial.moved {
        intents.push(PacketIntent::Move {
            entity_id: npc,
            from: sent.location,
            to: def.location,
            on_ground: def.on_ground,
        });
    }
    if let Some(velocity) = spatial.velocity {
        intents.push(PacketIntent::Velocity {
            entity_id: npc,
            velocity,
        });
    }
    let fields = diff(&def.kind, &sent.metadata, &def.metadata);
    if !fields.is_empty() {
        intents.push(PacketIntent::UpdateMetadata {
            entity_id: npc,
            kind: def.kind,
            fields,
            scope: MetaScope::Delta,
        });
    }
    for (slot, item) in equipment_changes(sent, def) {
        intents.push(PacketIntent::UpdateEquipment {
            entity_id: npc,
            slot,
            item,
        });
    }
    intents
}

/// Angle bytes of the rotation that closes a spawn sequence.
fn spawn_facing(intents: &[PacketIntent]) -> Option<(u8, u8)> {
    match intents.last() {
        Some(PacketIntent::Rotate { yaw, pitch, .. }) => Some((angle_byte(*yaw), angle_byte(*pitch))),
        _ => None,
    }
}

fn despawn_intent(sent: &NpcDefinition) -> PacketIntent {
    PacketIntent::Despawn {
        entity_id: sent.id,
        unique_id: sent.unique_id,
        kind: sent.kind,
    }
}

fn eye_of(location: &Location) -> Location {
    let mut eye = *location;
    eye.pos = Vec3::new(location.pos.x, location.pos.y + EYE_HEIGHT, location.pos.z);
    eye
}
