//! NPC platform.
//!
//! The facade a hosting application drives. It wires the registry, tracker,
//! router and dispatch scheduler together and runs them on a fixed tick:
//! - Mutations queue refresh requests; each tick refreshes every touched NPC
//!   once.
//! - Every `update_interval_ticks` a full visibility sweep runs.
//! - Connections found closed by the dispatch workers are torn down at the
//!   start of the next tick, unless the player already reconnected.
//!
//! All operations take `&self`; the platform can be shared across tasks
//! while another task drives the tick.
//!
//! Viewer movement can also be pushed in directly (`viewer_moved`) for
//! event-driven range checks between sweeps.

use anyhow::Context;
use bytes::Bytes;
use npc_core::{
    config::NpcConfig,
    dispatch::{IntentSink, Scheduler},
    entity::{NpcDefinition, NpcId, NpcPatch},
    error::{CodecError, RegistryError},
    event::{EventQueue, TrackingEvent},
    host::{ErrorSink, Failure, Transport, WorldView},
    math::Vec3,
    protocol::{Animation, CodecTable, PacketIntent},
    registry::{Mutation, Registry},
    router::{InteractContext, RouteOutcome, Router},
    tracker::{EdgeState, Tracker},
    viewer::{ConnectionHandle, PlayerId, ViewerSession},
};
use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio::{runtime::Handle, sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

/// Handle to a created NPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NpcHandle(NpcId);

impl NpcHandle {
    pub fn id(&self) -> NpcId {
        self.0
    }
}

/// NPC platform.
pub struct NpcPlatform {
    pub cfg: NpcConfig,
    registry: Arc<Registry>,
    tracker: Arc<Tracker>,
    router: Router,
    scheduler: Arc<Scheduler>,
    world: Arc<dyn WorldView>,
    errors: Arc<dyn ErrorSink>,
    events: Arc<EventQueue>,

    inbox: Mutex<Inbox>,
}

/// Notifications drained at the start of each tick. Holding the lock also
/// keeps ticks from overlapping.
struct Inbox {
    refresh_rx: mpsc::UnboundedReceiver<NpcId>,
    closed_rx: mpsc::UnboundedReceiver<Arc<ViewerSession>>,
}

impl NpcPlatform {
    /// Creates a platform. Must be called from inside a tokio runtime; the
    /// dispatch workers are spawned on it.
    pub fn new(
        cfg: NpcConfig,
        codecs: CodecTable,
        transport: Arc<dyn Transport>,
        world: Arc<dyn WorldView>,
        errors: Arc<dyn ErrorSink>,
    ) -> anyhow::Result<Self> {
        cfg.validate().context("validate npc config")?;
        let runtime = Handle::try_current().context("npc platform needs a tokio runtime")?;

        let (registry, refresh_rx) = Registry::new();
        let registry = Arc::new(registry);
        let (scheduler, closed_rx) = Scheduler::new(runtime, transport, errors.clone());
        let scheduler = Arc::new(scheduler);
        let events = Arc::new(EventQueue::default());
        let sink: Arc<dyn IntentSink> = scheduler.clone();
        let tracker = Arc::new(Tracker::new(
            cfg.clone(),
            codecs,
            registry.clone(),
            world.clone(),
            sink,
            errors.clone(),
            events.clone(),
        ));
        let router = Router::new(registry.clone(), tracker.clone(), errors.clone());

        info!(
            tracking_radius = cfg.tracking_radius,
            action_radius = cfg.action_radius,
            update_interval_ticks = cfg.update_interval_ticks,
            tick_hz = cfg.tick_hz,
            "NPC platform ready"
        );
        Ok(Self {
            cfg,
            registry,
            tracker,
            router,
            scheduler,
            world,
            errors,
            events,
            inbox: Mutex::new(Inbox {
                refresh_rx,
                closed_rx,
            }),
        })
    }

    // ─── NPCs ───

    pub fn create_npc(&self, def: NpcDefinition) -> Result<NpcHandle, RegistryError> {
        let snapshot = self.registry.create(def)?;
        Ok(NpcHandle(snapshot.id))
    }

    /// Creates an NPC under a fresh random entity id.
    pub fn create_npc_with<F>(&self, build: F) -> Result<NpcHandle, RegistryError>
    where
        F: FnOnce(NpcId) -> NpcDefinition,
    {
        self.create_npc(build(self.registry.allocate_id()))
    }

    pub fn update_npc(&self, handle: NpcHandle, patch: NpcPatch) -> Result<Mutation, RegistryError> {
        self.registry.mutate(handle.0, &patch)
    }

    /// Removes the NPC and despawns it for every viewer. Returns how many
    /// viewers were sent a despawn.
    pub fn remove_npc(&self, handle: NpcHandle) -> Result<usize, RegistryError> {
        let npc = handle.0;
        let viewers = self.registry.remove(npc)?;
        self.router.unregister(npc);
        let despawned = self.tracker.remove_npc(npc);
        debug!(%npc, viewers = viewers.len(), despawned, "NPC removal done");
        Ok(despawned)
    }

    pub fn snapshot(&self, handle: NpcHandle) -> Option<Arc<NpcDefinition>> {
        self.registry.snapshot(handle.0)
    }

    /// Registers the NPC's interaction callback.
    pub fn on_interact<F>(&self, handle: NpcHandle, callback: F) -> Result<(), RegistryError>
    where
        F: Fn(&InteractContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.ensure_alive(handle.0)?;
        self.router.register(handle.0, Arc::new(callback));
        Ok(())
    }

    /// Plays an animation for every viewer that sees the NPC.
    pub fn animate(&self, handle: NpcHandle, animation: Animation) -> Result<usize, RegistryError> {
        self.ensure_alive(handle.0)?;
        Ok(self.tracker.broadcast(
            handle.0,
            vec![PacketIntent::Animate {
                entity_id: handle.0,
                animation,
            }],
        ))
    }

    /// Turns the NPC to face `target`. This changes its canonical rotation,
    /// so every viewer sees it.
    pub fn look_at(&self, handle: NpcHandle, target: Vec3) -> Result<Mutation, RegistryError> {
        let current = self.registry.get(handle.0)?;
        let (yaw, pitch) = current.location.look_at(target);
        let mut location = current.location;
        location.yaw = yaw;
        location.pitch = pitch;
        self.registry.mutate(handle.0, &NpcPatch::new().move_to(location))
    }

    fn ensure_alive(&self, npc: NpcId) -> Result<(), RegistryError> {
        self.registry.get(npc).map(|_| ())
    }

    // ─── Viewers ───

    /// Opens a session for a player that just joined. Returns `None` when
    /// the host does not know the player's protocol version.
    pub fn viewer_joined(
        &self,
        player: PlayerId,
        connection: ConnectionHandle,
    ) -> Option<Arc<ViewerSession>> {
        let Some(version) = self.world.protocol_version(player) else {
            warn!(%player, "joined player has no protocol version, ignoring");
            return None;
        };
        let session = self.tracker.open_session(player, connection, version);
        self.scheduler.open(session.clone());
        self.tracker.check_viewer(player);
        Some(session)
    }

    pub fn viewer_left(&self, player: PlayerId) {
        self.scheduler.close(player);
        self.tracker.close_session(player);
    }

    /// Tears down a session a dispatch worker found closed. A player that
    /// already reconnected keeps its new session.
    fn connection_lost(&self, lost: &Arc<ViewerSession>) {
        let player = lost.player;
        let current = self.tracker.session(player);
        if current.is_some_and(|s| Arc::ptr_eq(&s, lost)) {
            info!(%player, "viewer connection lost");
            self.viewer_left(player);
        } else {
            debug!(%player, connection = ?lost.connection, "stale connection loss ignored");
        }
    }

    /// Range check for one viewer outside the periodic sweep.
    pub fn viewer_moved(&self, player: PlayerId) {
        self.tracker.check_viewer(player);
    }

    /// Mirrors the swing back to the viewer from every imitating NPC within
    /// the action radius. Returns how many NPCs swung.
    pub fn viewer_swung(&self, player: PlayerId) -> usize {
        let Some(viewer) = self.world.current_position(player) else {
            return 0;
        };
        let mut swung = 0;
        for def in self.registry.snapshots() {
            if !def.imitate_viewer || !def.location.within(&viewer, self.cfg.action_radius) {
                continue;
            }
            let intents = vec![PacketIntent::Animate {
                entity_id: def.id,
                animation: Animation::SwingMainArm,
            }];
            if self.tracker.send_to(def.id, player, intents) {
                swung += 1;
            }
        }
        swung
    }

    /// Inbound bytes from a connection. Frames that are not interactions, or
    /// that fail to decode, yield `None`.
    pub fn on_receive(&self, connection: ConnectionHandle, frame: &[u8]) -> Option<RouteOutcome> {
        let session = self.tracker.session_by_connection(connection)?;
        let codec = session.codec()?;
        match codec.decode(frame) {
            Ok(Some(event)) => Some(self.router.route(session.player, event)),
            Ok(None) => None,
            Err(error) => {
                warn!(player = %session.player, %error, len = frame.len(), "inbound frame discarded");
                self.report_codec(session.player, error);
                None
            }
        }
    }

    /// Convenience for hosts that receive owned buffers.
    pub fn on_receive_bytes(&self, connection: ConnectionHandle, frame: Bytes) -> Option<RouteOutcome> {
        self.on_receive(connection, &frame)
    }

    fn report_codec(&self, player: PlayerId, error: CodecError) {
        self.errors.report(Failure::Codec { player, error });
    }

    pub fn edge_state(&self, handle: NpcHandle, player: PlayerId) -> EdgeState {
        self.tracker.edge_state(handle.0, player)
    }

    pub fn drain_events(&self) -> Vec<TrackingEvent> {
        self.events.drain()
    }

    // ─── Tick ───

    /// Runs the platform for a number of ticks at `tick_hz`.
    pub async fn run_for_ticks(&self, ticks: u32) -> anyhow::Result<()> {
        let dt = self.cfg.tick_duration();
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step().await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one tick.
    pub async fn step(&self) -> anyhow::Result<()> {
        {
            let mut inbox = self.inbox.lock();
            while let Ok(lost) = inbox.closed_rx.try_recv() {
                self.connection_lost(&lost);
            }

            let mut touched = BTreeSet::new();
            while let Ok(npc) = inbox.refresh_rx.try_recv() {
                touched.insert(npc);
            }
            for npc in touched {
                self.tracker.refresh(npc);
            }

            if self.tracker.now() % self.cfg.update_interval_ticks as u64 == 0 {
                self.tracker.sweep();
                let pruned = self.scheduler.prune_closed();
                if pruned > 0 {
                    debug!(pruned, "closed dispatch queues pruned");
                }
            }
            self.tracker.advance_tick();
        }

        // let the dispatch workers run on single-threaded runtimes
        tokio::task::yield_now().await;
        Ok(())
    }

    /// Waits until everything queued so far has been handed to the
    /// transport.
    pub async fn flush(&self) {
        self.scheduler.flush_all().await;
    }

    pub fn tick(&self) -> u64 {
        self.tracker.now()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn tick_duration(&self) -> Duration {
        self.cfg.tick_duration()
    }
}
