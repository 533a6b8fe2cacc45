//! Entity registry.
//!
//! Owns every live [`NpcDefinition`]. Storage is sharded by id and each NPC
//! sits behind its own lock, so mutating one NPC never blocks readers of
//! another. Readers get `Arc` snapshots; a patch builds a new snapshot and
//! swaps it in, so a half-applied patch is never observable.
//!
//! Every successful create or mutate pushes the NPC id onto the refresh
//! channel consumed by the visibility tracker.

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::entity::{NpcDefinition, NpcId, NpcPatch};
use crate::error::RegistryError;
use crate::viewer::PlayerId;

const SHARDS: usize = 16;

/// Result of a mutation: the snapshot before and after the patch.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub previous: Arc<NpcDefinition>,
    pub current: Arc<NpcDefinition>,
}

struct Entry {
    def: Arc<NpcDefinition>,
    viewers: HashSet<PlayerId>,
}

type Shard = RwLock<HashMap<NpcId, Arc<Mutex<Entry>>>>;

pub struct Registry {
    shards: Vec<Shard>,
    removed: RwLock<HashSet<NpcId>>,
    refresh_tx: mpsc::UnboundedSender<NpcId>,
}

impl Registry {
    /// Creates an empty registry and the receiving end of its refresh
    /// channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NpcId>) {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let shards = (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect();
        (
            Self {
                shards,
                removed: RwLock::new(HashSet::new()),
                refresh_tx,
            },
            refresh_rx,
        )
    }

    fn shard(&self, id: NpcId) -> &Shard {
        &self.shards[(id.0 as u32 as usize) % SHARDS]
    }

    fn entry(&self, id: NpcId) -> Result<Arc<Mutex<Entry>>, RegistryError> {
        if let Some(entry) = self.shard(id).read().get(&id) {
            return Ok(entry.clone());
        }
        if self.removed.read().contains(&id) {
            Err(RegistryError::Removed(id))
        } else {
            Err(RegistryError::UnknownNpc(id))
        }
    }

    fn request_refresh(&self, id: NpcId) {
        // receiver gone means the platform is shutting down
        let _ = self.refresh_tx.send(id);
    }

    /// Registers a new NPC. Ids of removed NPCs may be reused.
    pub fn create(&self, def: NpcDefinition) -> Result<Arc<NpcDefinition>, RegistryError> {
        let id = def.id;
        let snapshot = Arc::new(def);
        {
            let mut shard = self.shard(id).write();
            if shard.contains_key(&id) {
                return Err(RegistryError::DuplicateId(id));
            }
            shard.insert(
                id,
                Arc::new(Mutex::new(Entry {
                    def: snapshot.clone(),
                    viewers: HashSet::new(),
                })),
            );
        }
        self.removed.write().remove(&id);
        info!(npc = %id, kind = ?snapshot.kind, name = %snapshot.profile.name, "NPC created");
        self.request_refresh(id);
        Ok(snapshot)
    }

    /// Applies `patch` atomically and returns both snapshots.
    pub fn mutate(&self, id: NpcId, patch: &NpcPatch) -> Result<Mutation, RegistryError> {
        let entry = self.entry(id)?;
        let mutation = {
            let mut entry = entry.lock();
            let previous = entry.def.clone();
            let mut next = (*previous).clone();
            patch.apply(&mut next);
            let current = Arc::new(next);
            entry.def = current.clone();
            Mutation { previous, current }
        };
        debug!(npc = %id, "NPC mutated");
        self.request_refresh(id);
        Ok(mutation)
    }

    /// Marks the NPC dead. Returns the viewers that were tracking it.
    pub fn remove(&self, id: NpcId) -> Result<HashSet<PlayerId>, RegistryError> {
        let entry = self.shard(id).write().remove(&id);
        match entry {
            Some(entry) => {
                self.removed.write().insert(id);
                let viewers = std::mem::take(&mut entry.lock().viewers);
                info!(npc = %id, viewers = viewers.len(), "NPC removed");
                Ok(viewers)
            }
            None if self.removed.read().contains(&id) => Err(RegistryError::Removed(id)),
            None => Err(RegistryError::UnknownNpc(id)),
        }
    }

    pub fn snapshot(&self, id: NpcId) -> Option<Arc<NpcDefinition>> {
        let entry = self.shard(id).read().get(&id).cloned()?;
        let def = entry.lock().def.clone();
        Some(def)
    }

    /// Like [`Registry::snapshot`], but says why the id is missing.
    pub fn get(&self, id: NpcId) -> Result<Arc<NpcDefinition>, RegistryError> {
        let entry = self.entry(id)?;
        let def = entry.lock().def.clone();
        Ok(def)
    }

    pub fn is_alive(&self, id: NpcId) -> bool {
        self.shard(id).read().contains_key(&id)
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> Vec<NpcId> {
        let mut ids: Vec<NpcId> = self
            .shards
            .iter()
            .flat_map(|s| s.read().keys().copied().collect::<Vec<_>>())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Current snapshots of every live NPC, ordered by id.
    pub fn snapshots(&self) -> Vec<Arc<NpcDefinition>> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.snapshot(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records that `player` now tracks the NPC. Returns `false` if the NPC
    /// is gone.
    pub fn attach_viewer(&self, id: NpcId, player: PlayerId) -> bool {
        match self.entry(id) {
            Ok(entry) => {
                entry.lock().viewers.insert(player);
                true
            }
            Err(_) => false,
        }
    }

    pub fn detach_viewer(&self, id: NpcId, player: PlayerId) {
        if let Ok(entry) = self.entry(id) {
            entry.lock().viewers.remove(&player);
        }
    }

    pub fn viewers(&self, id: NpcId) -> HashSet<PlayerId> {
        self.entry(id)
            .map(|entry| entry.lock().viewers.clone())
            .unwrap_or_default()
    }

    /// Picks a random unused entity id. Random ids keep clear of the small
    /// sequential ids a server hands to real entities.
    pub fn allocate_id(&self) -> NpcId {
        let mut rng = rand::thread_rng();
        loop {
            let id = NpcId(rng.gen_range(1_000_000..i32::MAX));
            if !self.is_alive(id) {
                return id;
            }
        }
    }
}
