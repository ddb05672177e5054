//! Players and the player manager.

use bitflags::bitflags;
use sw_schemas::names::{EntityName, EntityNameRef};
use sw_schemas::{PlayerId, ShipKind};

use super::arena::ArenaHandle;
use super::extra::{ExtraData, ExtraDataMap, ExtraSlotKey, ExtraSlotRegistry};
use crate::prelude::*;

/// The player lifecycle state machine, in transition order. The relative
/// order matters: the persist executor selects players by status *windows*
/// (ranges of this enum) to decide whose data is in memory.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum PlayerStatus {
    /// Connection established, nothing exchanged yet.
    Connected,
    /// Waiting on the authentication provider.
    NeedAuth,
    /// Waiting for zone-wide persistent data to load.
    NeedGlobalSync,
    /// Zone-wide data loaded, global callbacks pending.
    DoGlobalCallbacks,
    /// Ready to send the login response.
    SendLoginResponse,
    /// Logged into the zone, not in any arena.
    LoggedIn,
    /// Entering an arena: freq assignment and arena data load queued.
    DoFreqAndArenaSync,
    /// Waiting for the arena persistent data load.
    WaitArenaSync1,
    /// Arena data loaded, arena-entry callbacks pending.
    ArenaRespAndCbs,
    /// Fully in the game.
    Playing,
    /// Leaving the arena, arena-leave callbacks pending.
    LeavingArena,
    /// Arena data save queued.
    DoArenaSync2,
    /// Waiting for the arena persistent data save.
    WaitArenaSync2,
    /// Leaving the zone entirely.
    LeavingZone,
    /// Waiting for the zone-wide persistent data save.
    WaitGlobalSync1,
    /// Global-leave callbacks pending.
    DoGlobalCallbacks2,
    /// Waiting for the final zone-wide sync.
    WaitGlobalSync2,
    /// Lingering so late packets die quietly before the slot is reused.
    TimeWait,
}

impl PlayerStatus {
    /// Whether the player's zone-wide persistent data is in memory.
    pub fn in_global_sync_window(self) -> bool {
        (PlayerStatus::DoGlobalCallbacks..=PlayerStatus::WaitGlobalSync2).contains(&self)
    }

    /// Whether the player's per-arena persistent data is in memory.
    pub fn in_arena_sync_window(self) -> bool {
        (PlayerStatus::ArenaRespAndCbs..=PlayerStatus::WaitArenaSync2).contains(&self)
    }
}

bitflags! {
    /// Miscellaneous per-player state bits.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct PlayerFlags: u8 {
        /// Authentication completed; only authenticated players persist data.
        const AUTHENTICATED = 1 << 0;
        /// Lag action: the player may not enter a ship.
        const NO_SHIP = 1 << 1;
        /// Lag action: the player may not carry flags or balls.
        const NO_FLAGS_BALLS = 1 << 2;
    }
}

/// One connected player.
pub struct Player {
    /// Process-unique identity, assigned at connect.
    pub id: PlayerId,
    /// Case-insensitive display name.
    pub name: EntityName,
    /// Lifecycle status; mutated only on the mainloop thread.
    pub status: PlayerStatus,
    /// The arena the player currently belongs to.
    pub arena: Option<ArenaHandle>,
    /// Current ship, or spectator.
    pub ship: ShipKind,
    /// Current frequency (team).
    pub freq: i16,
    /// State bits.
    pub flags: PlayerFlags,
    /// Whether the client is the game's native flavor (as opposed to a chat
    /// or bot connection); some background services only apply to these.
    pub standard_client: bool,
    /// Slot-indexed module data.
    pub extra: ExtraDataMap,
}

/// Shared handle to one player. Writes happen on the mainloop thread (or the
/// persist worker, for data sync); readers elsewhere take the lock briefly.
pub type PlayerHandle = Arc<RwLock<Player>>;

/// Owns the player table and the player extra-data slot registry.
#[derive(Default)]
pub struct PlayerManager {
    players: RwLock<HashMap<PlayerId, PlayerHandle>>,
    slots: Mutex<ExtraSlotRegistry>,
    next_id: AtomicI32,
}

impl PlayerManager {
    /// Constructs an empty manager.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Admits a new connection. The player starts in
    /// [`PlayerStatus::Connected`] with every live extra-data slot
    /// materialized, so it is fully observable the moment it is inserted.
    pub fn connect(&self, name: &str, standard_client: bool) -> PlayerHandle {
        let id = PlayerId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed) + 1);
        let mut extra = ExtraDataMap::default();
        self.slots.lock().unwrap().materialize(&mut extra);
        let player = Arc::new(RwLock::new(Player {
            id,
            name: EntityName::new(name),
            status: PlayerStatus::Connected,
            arena: None,
            ship: ShipKind::Spectator,
            freq: -1,
            flags: PlayerFlags::empty(),
            standard_client,
            extra,
        }));
        self.players.write().unwrap().insert(id, Arc::clone(&player));
        player
    }

    /// Completes a disconnect: removes the player and recycles its extra
    /// data through the reset hooks.
    pub fn disconnect(&self, id: PlayerId) -> Option<PlayerHandle> {
        let player = self.players.write().unwrap().remove(&id)?;
        {
            let mut guard = player.write().unwrap();
            guard.status = PlayerStatus::TimeWait;
            let mut slots = self.slots.lock().unwrap();
            slots.recycle(&mut guard.extra);
        }
        Some(player)
    }

    /// Looks a player up by id.
    pub fn get(&self, id: PlayerId) -> Option<PlayerHandle> {
        self.players.read().unwrap().get(&id).cloned()
    }

    /// Looks a player up by (case-insensitive) name.
    pub fn find_by_name(&self, name: &str) -> Option<PlayerHandle> {
        let wanted = EntityNameRef::new(name);
        self.players
            .read()
            .unwrap()
            .values()
            .find(|p| p.read().unwrap().name.as_ref() == wanted)
            .cloned()
    }

    /// Snapshots every live player under the read lock.
    pub fn snapshot(&self) -> Vec<PlayerHandle> {
        self.players.read().unwrap().values().cloned().collect()
    }

    /// Allocates an extra-data slot and backfills a value into every player
    /// that already exists.
    pub fn allocate_slot<T: ExtraData + Default>(&self) -> ExtraSlotKey<T> {
        let mut slots = self.slots.lock().unwrap();
        let key = slots.allocate::<T>();
        for player in self.players.read().unwrap().values() {
            slots.produce_for(key, &mut player.write().unwrap().extra);
        }
        key
    }

    /// Frees an extra-data slot, dropping every player's value for it;
    /// stale lookups return `None`.
    pub fn free_slot<T: ExtraData>(&self, key: ExtraSlotKey<T>) {
        let mut slots = self.slots.lock().unwrap();
        slots.free(key);
        for player in self.players.read().unwrap().values() {
            player.write().unwrap().extra.discard(key);
        }
    }
}
