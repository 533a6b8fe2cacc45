//! Shared fixtures for the scenario tests.
//!
//! - [`RecordingTransport`] keeps every frame per connection and can be told
//!   to report a connection closed after a number of frames.
//! - [`RecordingErrors`] keeps every failure the engine absorbs.
//! - [`Harness`] wires both into an [`NpcPlatform`] over a [`MemoryWorld`].
//! - [`stream`] checks the entity lifecycle a connection's frames describe.

pub mod stream;

use async_trait::async_trait;
use bytes::Bytes;
use npc_core::prelude::*;
use npc_core::protocol::wire::{frame_packet_id, PacketReader, PacketWriter};
use npc_server::{memory::MemoryWorld, NpcHandle, NpcPlatform};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// Packet ids the scenarios assert on.
pub mod ids {
    pub mod v1_8 {
        pub const USE_ENTITY: i32 = 0x02;
        pub const EQUIPMENT: i32 = 0x04;
        pub const ANIMATION: i32 = 0x0B;
        pub const SPAWN_PLAYER: i32 = 0x0C;
        pub const SPAWN_MOB: i32 = 0x0F;
        pub const VELOCITY: i32 = 0x12;
        pub const DESTROY: i32 = 0x13;
        pub const REL_MOVE: i32 = 0x15;
        pub const LOOK: i32 = 0x16;
        pub const LOOK_MOVE: i32 = 0x17;
        pub const TELEPORT: i32 = 0x18;
        pub const HEAD_LOOK: i32 = 0x19;
        pub const METADATA: i32 = 0x1C;
        pub const PLAYER_INFO: i32 = 0x38;
        pub const TEAMS: i32 = 0x3E;
    }

    pub mod v1_16 {
        pub const SPAWN_PLAYER: i32 = 0x04;
        pub const ANIMATION: i32 = 0x05;
        pub const LOOK: i32 = 0x29;
        pub const PLAYER_INFO: i32 = 0x32;
        pub const DESTROY: i32 = 0x36;
        pub const HEAD_LOOK: i32 = 0x3A;
        pub const METADATA: i32 = 0x44;
        pub const TEAMS: i32 = 0x4C;
    }
}

pub const OVERWORLD: WorldId = WorldId(0);
pub const NETHER: WorldId = WorldId(1);

pub fn at(x: f64) -> Location {
    Location::new(OVERWORLD, Vec3::new(x, 64.0, 0.0), 0.0, 0.0)
}

/// Installs a test subscriber once. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Transport that records frames instead of sending them.
#[derive(Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<(ConnectionHandle, Bytes)>>,
    budgets: Mutex<HashMap<ConnectionHandle, usize>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accepts `frames` more frames on `connection`, then reports it closed.
    pub fn close_after(&self, connection: ConnectionHandle, frames: usize) {
        self.budgets.lock().insert(connection, frames);
    }

    pub fn frames(&self, connection: ConnectionHandle) -> Vec<Bytes> {
        self.frames
            .lock()
            .iter()
            .filter(|(c, _)| *c == connection)
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// Packet ids sent to `connection`, in send order.
    pub fn packet_ids(&self, connection: ConnectionHandle) -> Vec<i32> {
        self.frames(connection)
            .iter()
            .filter_map(|f| frame_packet_id(f).ok())
            .collect()
    }

    pub fn count(&self, connection: ConnectionHandle, packet_id: i32) -> usize {
        self.packet_ids(connection)
            .into_iter()
            .filter(|id| *id == packet_id)
            .count()
    }

    /// Player-list frames on `connection` that remove an entry.
    pub fn player_list_removals(&self, connection: ConnectionHandle, player_info: i32) -> usize {
        self.frames(connection)
            .iter()
            .filter(|f| {
                let mut r = PacketReader::new(&f[..]);
                matches!((r.var_int(), r.var_int()), (Ok(id), Ok(4)) if id == player_info)
            })
            .count()
    }

    pub fn total(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, connection: ConnectionHandle, frame: Bytes) -> Result<(), TransportError> {
        if let Some(left) = self.budgets.lock().get_mut(&connection) {
            if *left == 0 {
                return Err(TransportError::ConnectionClosed);
            }
            *left -= 1;
        }
        self.frames.lock().push((connection, frame));
        Ok(())
    }
}

/// Error sink that keeps everything it is given.
#[derive(Default)]
pub struct RecordingErrors {
    failures: Mutex<Vec<Failure>>,
}

impl RecordingErrors {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of recorded failures matching `pred`.
    pub fn count(&self, pred: impl Fn(&Failure) -> bool) -> usize {
        self.failures.lock().iter().filter(|f| pred(f)).count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.failures.lock().iter().map(|f| f.to_string()).collect()
    }
}

impl ErrorSink for RecordingErrors {
    fn report(&self, failure: Failure) {
        self.failures.lock().push(failure);
    }
}

/// A platform over recording collaborators.
pub struct Harness {
    pub platform: NpcPlatform,
    pub world: Arc<MemoryWorld>,
    pub transport: Arc<RecordingTransport>,
    pub errors: Arc<RecordingErrors>,
}

impl Harness {
    pub fn new(cfg: NpcConfig) -> anyhow::Result<Self> {
        init_tracing();
        let world = Arc::new(MemoryWorld::new());
        let transport = RecordingTransport::new();
        let errors = RecordingErrors::new();
        let platform = NpcPlatform::new(
            cfg,
            CodecTable::standard(),
            transport.clone(),
            world.clone(),
            errors.clone(),
        )?;
        Ok(Self {
            platform,
            world,
            transport,
            errors,
        })
    }

    /// Puts a player online at `location` and opens its session.
    pub fn join(
        &self,
        player: PlayerId,
        version: ProtocolVersion,
        location: Location,
    ) -> ConnectionHandle {
        let connection = ConnectionHandle::new_unique();
        self.join_on(connection, player, version, location);
        connection
    }

    /// Like [`Harness::join`] on a connection the caller already set up.
    pub fn join_on(
        &self,
        connection: ConnectionHandle,
        player: PlayerId,
        version: ProtocolVersion,
        location: Location,
    ) {
        self.world.join(player, version, location);
        self.platform.viewer_joined(player, connection);
    }

    /// Frame for a 1.8 use-entity packet.
    pub fn use_entity_1_8(npc: NpcHandle, attack: bool) -> Bytes {
        let mut w = PacketWriter::new(ids::v1_8::USE_ENTITY);
        w.var_int(npc.id().0).var_int(if attack { 1 } else { 0 });
        w.finish()
    }

    pub fn humanoid(&self, name: &str, location: Location) -> anyhow::Result<NpcHandle> {
        Ok(self
            .platform
            .create_npc_with(|id| NpcDefinition::humanoid(id, name, location))?)
    }

    /// Runs one tick and waits for the resulting frames.
    pub async fn tick(&self) -> anyhow::Result<()> {
        self.platform.step().await?;
        self.platform.flush().await;
        Ok(())
    }

    pub async fn ticks(&self, n: u32) -> anyhow::Result<()> {
        for _ in 0..n {
            self.tick().await?;
        }
        Ok(())
    }
}
