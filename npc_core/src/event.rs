//! Visibility notifications.
//!
//! The tracker pushes an event whenever an NPC becomes visible to a viewer or
//! stops being visible. The host drains them once per tick.

use parking_lot::Mutex;

use crate::entity::NpcId;
use crate::viewer::PlayerId;

/// Why an edge went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HideReason {
    OutOfRange,
    WorldChanged,
    /// The NPC's audience no longer includes the viewer.
    Excluded,
    Removed,
    /// No despawn was sent; the connection is gone.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingEvent {
    Shown { npc: NpcId, player: PlayerId },
    Hidden {
        npc: NpcId,
        player: PlayerId,
        reason: HideReason,
    },
}

/// Multi-producer event queue.
#[derive(Default)]
pub struct EventQueue {
    events: Mutex<Vec<TrackingEvent>>,
}

impl EventQueue {
    /// Pushes an event into the queue.
    pub fn push(&self, e: TrackingEvent) {
        self.events.lock().push(e);
    }

    /// Drains all queued events in push order.
    pub fn drain(&self) -> Vec<TrackingEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_in_order() {
        let q = EventQueue::default();
        q.push(TrackingEvent::Shown {
            npc: NpcId(1),
            player: PlayerId(1),
        });
        q.push(TrackingEvent::Hidden {
            npc: NpcId(1),
            player: PlayerId(1),
            reason: HideReason::OutOfRange,
        });
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], TrackingEvent::Shown { .. }));
        assert!(q.is_empty());
    }
}
