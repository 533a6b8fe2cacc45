//! Interaction router.
//!
//! Maps decoded interaction packets to the callback registered for the target
//! NPC. Events for dead NPCs or for viewers that do not currently see the NPC
//! are expected races and are dropped quietly. Callback failures, panics
//! included, go to the error sink and never reach the decode path.

use parking_lot::RwLock;
use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{debug, warn};

use crate::entity::NpcId;
use crate::host::{ErrorSink, Failure};
use crate::protocol::{Hand, InboundEvent, InteractAction};
use crate::registry::Registry;
use crate::tracker::{EdgeState, Tracker};
use crate::viewer::PlayerId;

/// What a callback is told about an interaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InteractContext {
    pub npc: NpcId,
    pub player: PlayerId,
    pub action: InteractAction,
    pub hand: Hand,
    pub sneaking: bool,
}

pub type InteractCallback = Arc<dyn Fn(&InteractContext) -> anyhow::Result<()> + Send + Sync>;

/// How an inbound event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Dispatched,
    /// The callback ran but failed. Already reported.
    CallbackFailed,
    UnknownNpc,
    NotVisible,
    NoCallback,
}

pub struct Router {
    callbacks: RwLock<HashMap<NpcId, InteractCallback>>,
    registry: Arc<Registry>,
    tracker: Arc<Tracker>,
    errors: Arc<dyn ErrorSink>,
}

impl Router {
    pub fn new(registry: Arc<Registry>, tracker: Arc<Tracker>, errors: Arc<dyn ErrorSink>) -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            registry,
            tracker,
            errors,
        }
    }

    /// Sets the NPC's callback, replacing any previous one.
    pub fn register(&self, npc: NpcId, callback: InteractCallback) {
        self.callbacks.write().insert(npc, callback);
    }

    pub fn unregister(&self, npc: NpcId) -> bool {
        self.callbacks.write().remove(&npc).is_some()
    }

    pub fn route(&self, player: PlayerId, event: InboundEvent) -> RouteOutcome {
        let npc = event.target;
        if !self.registry.is_alive(npc) {
            debug!(%npc, %player, "interaction with unknown npc dropped");
            return RouteOutcome::UnknownNpc;
        }
        if self.tracker.edge_state(npc, player) != EdgeState::Visible {
            debug!(%npc, %player, "interaction with npc the viewer cannot see dropped");
            return RouteOutcome::NotVisible;
        }
        // clone out so the callback never runs under the lock
        let Some(callback) = self.callbacks.read().get(&npc).cloned() else {
            return RouteOutcome::NoCallback;
        };
        let ctx = InteractContext {
            npc,
            player,
            action: event.action,
            hand: event.hand,
            sneaking: event.sneaking,
        };
        let message = match catch_unwind(AssertUnwindSafe(|| callback(&ctx))) {
            Ok(Ok(())) => return RouteOutcome::Dispatched,
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "callback panicked".to_string()),
        };
        warn!(%npc, %player, error = %message, "interaction callback failed");
        self.errors.report(Failure::Callback {
            npc,
            player,
            message,
        });
        RouteOutcome::CallbackFailed
    }
}
