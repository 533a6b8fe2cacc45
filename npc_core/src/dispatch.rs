//! Dispatch scheduler.
//!
//! One queue and one worker task per viewer. A batch handed to [`enqueue`] is
//! the unit of ordering: the worker sends its frames back to back, so batches
//! for the same viewer never interleave. Different viewers run in parallel.
//!
//! Cancellation is epoch based. [`cancel`] bumps the (viewer, npc) epoch and
//! the worker drops any queued intent stamped with an older one, including
//! the rest of a batch it is in the middle of.
//!
//! [`enqueue`]: Scheduler::enqueue
//! [`cancel`]: Scheduler::cancel

use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
};
use tracing::{debug, info, trace, warn};

use crate::entity::NpcId;
use crate::error::TransportError;
use crate::host::{ErrorSink, Failure, Transport};
use crate::protocol::{Codec, PacketIntent};
use crate::viewer::{PlayerId, ViewerSession};

/// Where the tracker hands its ordered intent batches.
pub trait IntentSink: Send + Sync {
    /// Queues `intents` for one viewer as a single ordered unit.
    fn enqueue(&self, session: &Arc<ViewerSession>, npc: NpcId, intents: Vec<PacketIntent>);

    /// Drops everything still queued for the (viewer, npc) pair.
    fn cancel(&self, player: PlayerId, npc: NpcId);
}

enum Command {
    Batch {
        npc: NpcId,
        epoch: u64,
        intents: Vec<PacketIntent>,
    },
    Flush(oneshot::Sender<()>),
}

type Epochs = Arc<Mutex<HashMap<NpcId, u64>>>;

struct ViewerQueue {
    session: Arc<ViewerSession>,
    tx: mpsc::UnboundedSender<Command>,
    epochs: Epochs,
}

/// Per-viewer ordered sender.
pub struct Scheduler {
    runtime: Handle,
    transport: Arc<dyn Transport>,
    errors: Arc<dyn ErrorSink>,
    queues: RwLock<HashMap<PlayerId, ViewerQueue>>,
    closed_tx: mpsc::UnboundedSender<Arc<ViewerSession>>,
}

impl Scheduler {
    /// Creates a scheduler that spawns its workers on `runtime`. The returned
    /// receiver yields the session of each viewer whose connection a worker
    /// found closed.
    pub fn new(
        runtime: Handle,
        transport: Arc<dyn Transport>,
        errors: Arc<dyn ErrorSink>,
    ) -> (Self, mpsc::UnboundedReceiver<Arc<ViewerSession>>) {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        (
            Self {
                runtime,
                transport,
                errors,
                queues: RwLock::new(HashMap::new()),
                closed_tx,
            },
            closed_rx,
        )
    }

    /// Starts the worker for a session, replacing any previous queue of the
    /// same player. Sessions without a codec are ignored.
    pub fn open(&self, session: Arc<ViewerSession>) {
        let Some(codec) = session.codec().cloned() else {
            debug!(player = %session.player, "not opening queue for untrackable viewer");
            return;
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let epochs: Epochs = Arc::default();
        let worker = Worker {
            session: session.clone(),
            codec,
            epochs: epochs.clone(),
            transport: self.transport.clone(),
            errors: self.errors.clone(),
            closed_tx: self.closed_tx.clone(),
        };
        self.runtime.spawn(worker.run(rx));

        let player = session.player;
        let previous = self.queues.write().insert(
            player,
            ViewerQueue {
                session,
                tx,
                epochs,
            },
        );
        if let Some(previous) = previous {
            previous.session.mark_closed();
        }
        debug!(%player, "dispatch queue opened");
    }

    pub fn enqueue(&self, session: &Arc<ViewerSession>, npc: NpcId, intents: Vec<PacketIntent>) {
        if intents.is_empty() {
            return;
        }
        let queues = self.queues.read();
        let Some(queue) = queues.get(&session.player) else {
            debug!(player = %session.player, %npc, "no queue for viewer, batch dropped");
            return;
        };
        if !Arc::ptr_eq(&queue.session, session) {
            debug!(player = %session.player, %npc, "stale session, batch dropped");
            return;
        }
        let epoch = queue.epochs.lock().get(&npc).copied().unwrap_or(0);
        trace!(player = %session.player, %npc, intents = intents.len(), "batch queued");
        // a closed channel means the worker already exited for a dead connection
        let _ = queue.tx.send(Command::Batch {
            npc,
            epoch,
            intents,
        });
    }

    pub fn cancel(&self, player: PlayerId, npc: NpcId) {
        if let Some(queue) = self.queues.read().get(&player) {
            *queue.epochs.lock().entry(npc).or_insert(0) += 1;
        }
    }

    /// Resolves once everything queued for `player` before this call has been
    /// sent or dropped. Returns `false` if the viewer has no queue.
    pub async fn flush(&self, player: PlayerId) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        {
            let queues = self.queues.read();
            let Some(queue) = queues.get(&player) else {
                return false;
            };
            if queue.tx.send(Command::Flush(done_tx)).is_err() {
                return false;
            }
        }
        done_rx.await.is_ok()
    }

    /// Flushes every open queue.
    pub async fn flush_all(&self) {
        let players: Vec<PlayerId> = self.queues.read().keys().copied().collect();
        for player in players {
            self.flush(player).await;
        }
    }

    /// Closes the viewer's queue. Anything not yet handed to the transport is
    /// dropped.
    pub fn close(&self, player: PlayerId) -> bool {
        match self.queues.write().remove(&player) {
            Some(queue) => {
                queue.session.mark_closed();
                debug!(%player, "dispatch queue closed");
                true
            }
            None => false,
        }
    }

    /// Drops the queues of sessions that were closed elsewhere.
    pub fn prune_closed(&self) -> usize {
        let mut queues = self.queues.write();
        let before = queues.len();
        queues.retain(|_, q| q.session.is_connected());
        before - queues.len()
    }

    pub fn open_queues(&self) -> usize {
        self.queues.read().len()
    }
}

impl IntentSink for Scheduler {
    fn enqueue(&self, session: &Arc<ViewerSession>, npc: NpcId, intents: Vec<PacketIntent>) {
        Scheduler::enqueue(self, session, npc, intents)
    }

    fn cancel(&self, player: PlayerId, npc: NpcId) {
        Scheduler::cancel(self, player, npc)
    }
}

struct Worker {
    session: Arc<ViewerSession>,
    codec: Arc<dyn Codec>,
    epochs: Epochs,
    transport: Arc<dyn Transport>,
    errors: Arc<dyn ErrorSink>,
    closed_tx: mpsc::UnboundedSender<Arc<ViewerSession>>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Flush(done) => {
                    let _ = done.send(());
                }
                Command::Batch {
                    npc,
                    epoch,
                    intents,
                } => self.send_batch(npc, epoch, intents).await,
            }
        }
        trace!(player = %self.session.player, "dispatch worker stopped");
    }

    fn current(&self, npc: NpcId, epoch: u64) -> bool {
        self.epochs.lock().get(&npc).copied().unwrap_or(0) == epoch
    }

    async fn send_batch(&self, npc: NpcId, epoch: u64, intents: Vec<PacketIntent>) {
        let player = self.session.player;
        for intent in intents {
            if !self.session.is_connected() {
                trace!(%player, %npc, "viewer gone, rest of batch dropped");
                return;
            }
            if !self.current(npc, epoch) {
                trace!(%player, %npc, "batch cancelled");
                return;
            }
            let frames = match self.codec.encode(&intent) {
                Ok(frames) => frames,
                Err(error) => {
                    warn!(%player, %npc, intent = intent.label(), %error, "encode failed, batch dropped");
                    self.errors.report(Failure::Codec { player, error });
                    return;
                }
            };
            for frame in frames {
                match self.transport.send(self.session.connection, frame).await {
                    Ok(()) => {}
                    Err(TransportError::ConnectionClosed) => {
                        self.connection_lost();
                        return;
                    }
                    Err(error) => {
                        warn!(%player, %error, "send failed, closing viewer");
                        self.errors.report(Failure::Transport { player, error });
                        self.connection_lost();
                        return;
                    }
                }
            }
        }
    }

    fn connection_lost(&self) {
        if self.session.mark_closed() {
            info!(player = %self.session.player, "connection closed during dispatch");
            let _ = self.closed_tx.send(self.session.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LogErrorSink;
    use crate::protocol::{wire::frame_packet_id, Animation, CodecTable, ProtocolVersion};
    use crate::viewer::ConnectionHandle;
    use async_trait::async_trait;
    use bytes::Bytes;

    #[derive(Default)]
    struct Sink {
        frames: Mutex<Vec<(ConnectionHandle, i32)>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl Transport for Sink {
        async fn send(&self, c: ConnectionHandle, frame: Bytes) -> Result<(), TransportError> {
            let mut frames = self.frames.lock();
            if self.fail_after.is_some_and(|n| frames.len() >= n) {
                return Err(TransportError::ConnectionClosed);
            }
            frames.push((c, frame_packet_id(&frame).unwrap_or(-1)));
            Ok(())
        }
    }

    fn session(player: u128) -> Arc<ViewerSession> {
        Arc::new(ViewerSession::new(
            PlayerId(player),
            ConnectionHandle::new_unique(),
            ProtocolVersion::V1_16_5,
            CodecTable::standard().select(ProtocolVersion::V1_16_5).ok(),
        ))
    }

    fn animate(npc: i32) -> PacketIntent {
        PacketIntent::Animate {
            entity_id: NpcId(npc),
            animation: Animation::SwingMainArm,
        }
    }

    fn rotate(npc: i32) -> PacketIntent {
        PacketIntent::Rotate {
            entity_id: NpcId(npc),
            yaw: 90.0,
            pitch: 0.0,
        }
    }

    #[tokio::test]
    async fn batches_are_sent_in_order() {
        let transport = Arc::new(Sink::default());
        let (sched, _closed) = Scheduler::new(Handle::current(), transport.clone(), Arc::new(LogErrorSink));
        let s = session(1);
        sched.open(s.clone());

        sched.enqueue(&s, NpcId(1), vec![animate(1), rotate(1)]);
        sched.enqueue(&s, NpcId(2), vec![animate(2)]);
        assert!(sched.flush(s.player).await);

        let ids: Vec<i32> = transport.frames.lock().iter().map(|(_, id)| *id).collect();
        // animation, rotation + head look, animation
        assert_eq!(ids, vec![0x05, 0x29, 0x3A, 0x05]);
    }

    #[tokio::test]
    async fn cancel_drops_queued_batches_only_for_that_npc() {
        let transport = Arc::new(Sink::default());
        let (sched, _closed) = Scheduler::new(Handle::current(), transport.clone(), Arc::new(LogErrorSink));
        let s = session(1);
        sched.open(s.clone());

        // no await between enqueue and cancel, so the worker has not run yet
        sched.enqueue(&s, NpcId(1), vec![animate(1)]);
        sched.enqueue(&s, NpcId(2), vec![animate(2)]);
        sched.cancel(s.player, NpcId(1));
        sched.enqueue(&s, NpcId(1), vec![rotate(1)]);
        assert!(sched.flush(s.player).await);

        let ids: Vec<i32> = transport.frames.lock().iter().map(|(_, id)| *id).collect();
        assert_eq!(ids, vec![0x05, 0x29, 0x3A]);
    }

    #[tokio::test]
    async fn closed_connection_drops_rest_and_reports_once() {
        let transport = Arc::new(Sink {
            fail_after: Some(1),
            ..Default::default()
        });
        let (sched, mut closed) =
            Scheduler::new(Handle::current(), transport.clone(), Arc::new(LogErrorSink));
        let s = session(7);
        sched.open(s.clone());

        sched.enqueue(&s, NpcId(1), vec![rotate(1), animate(1)]);
        sched.enqueue(&s, NpcId(1), vec![animate(1)]);
        assert!(sched.flush(s.player).await);

        assert_eq!(transport.frames.lock().len(), 1);
        assert!(!s.is_connected());
        assert_eq!(closed.recv().await.map(|s| s.player), Some(PlayerId(7)));
        assert!(closed.try_recv().is_err());
    }

    #[tokio::test]
    async fn untrackable_and_closed_viewers_get_nothing() {
        let transport = Arc::new(Sink::default());
        let (sched, _closed) = Scheduler::new(Handle::current(), transport.clone(), Arc::new(LogErrorSink));
        let unsupported = Arc::new(ViewerSession::new(
            PlayerId(2),
            ConnectionHandle::new_unique(),
            ProtocolVersion(5),
            None,
        ));
        sched.open(unsupported.clone());
        assert_eq!(sched.open_queues(), 0);
        sched.enqueue(&unsupported, NpcId(1), vec![animate(1)]);

        let s = session(3);
        sched.open(s.clone());
        assert!(sched.close(s.player));
        sched.enqueue(&s, NpcId(1), vec![animate(1)]);
        assert!(!sched.flush(s.player).await);
        assert!(transport.frames.lock().is_empty());
    }
}
