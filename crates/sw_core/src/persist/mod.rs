//! The persistence subsystem: registrations of persistent score data, the
//! public request surface, and the single background worker that owns the
//! datastore.
//!
//! Gameplay modules register [`PlayerPersist`]/[`ArenaPersist`] entries and
//! enqueue get/put requests from the mainloop. The worker serializes every
//! datastore operation, batches a periodic full sync, and re-posts
//! completion callbacks to the mainloop in FIFO order.

pub mod executor;
pub mod store;

use std::path::Path;
use std::thread::JoinHandle;

use static_assertions::const_assert;
use sw_schemas::persist::{ArenaGroup, PersistInterval, PersistKey, PersistScope};
use thiserror::Error;

pub use store::{IntervalGeneration, PersistDatastore};

use crate::config::PersistConfig;
use crate::entity::{Arena, ArenaHandle, ArenaManager, Player, PlayerHandle, PlayerManager};
use crate::mainloop::MainLoop;
use crate::prelude::*;

const_assert!(PersistConfig::MIN_SYNC_SECONDS >= 1);

/// A registration of per-player persistent data.
///
/// `get_data` serializes the player's current state for this entry into the
/// output buffer (at most `Persist.MaxRecordLength` bytes by contract; the
/// core does not truncate). An empty buffer means "no record", deleting any
/// stored one. `set_data`/`clear_data` are called with the entity locked.
pub trait PlayerPersist: Send + Sync + 'static {
    /// Record key; unique together with interval and scope.
    fn key(&self) -> PersistKey;
    /// The score interval this data belongs to.
    fn interval(&self) -> PersistInterval;
    /// Zone-wide or per-arena.
    fn scope(&self) -> PersistScope;
    /// Serializes the entry's state for this player.
    fn get_data(&self, player: &Player, out: &mut Vec<u8>) -> Result<()>;
    /// Applies a loaded record to the player.
    fn set_data(&self, player: &mut Player, data: &[u8]);
    /// Resets the entry's state on the player to "no data".
    fn clear_data(&self, player: &mut Player);
}

/// A registration of per-arena (or, with [`PersistScope::Global`],
/// zone-wide) persistent data. `arena` is `None` for the zone scope.
pub trait ArenaPersist: Send + Sync + 'static {
    /// Record key; unique together with interval and scope.
    fn key(&self) -> PersistKey;
    /// The score interval this data belongs to.
    fn interval(&self) -> PersistInterval;
    /// Zone-wide or per-arena.
    fn scope(&self) -> PersistScope;
    /// Serializes the entry's state.
    fn get_data(&self, arena: Option<&Arena>, out: &mut Vec<u8>) -> Result<()>;
    /// Applies a loaded record.
    fn set_data(&self, arena: Option<&mut Arena>, data: &[u8]);
    /// Resets the entry's state to "no data".
    fn clear_data(&self, arena: Option<&mut Arena>);
}

/// Failures of the persist request surface.
#[derive(Debug, Error)]
pub enum PersistError {
    /// A registration with the same `(key, interval, scope)` already exists.
    #[error("a registration with key {key} for interval {interval} already exists")]
    OverlappingRegistration {
        /// The conflicting key.
        key: PersistKey,
        /// The conflicting interval.
        interval: PersistInterval,
    },
    /// `Forever` intervals have no end.
    #[error("interval {0} cannot be ended")]
    IntervalCannotEnd(PersistInterval),
    /// The worker has shut down; the request was not queued.
    #[error("the persist worker is shut down")]
    ShutDown,
}

/// Completion callback of a persist request, run on the mainloop.
pub type PersistCallback = Box<dyn FnOnce() + Send + 'static>;

/// Listener for ended intervals, run on the mainloop.
pub type IntervalEndedCallback = Box<dyn Fn(PersistInterval, &ArenaGroup) + Send + Sync + 'static>;

pub(crate) enum PersistCommand {
    GetPlayer {
        player: PlayerHandle,
        arena: Option<ArenaHandle>,
        done: PersistCallback,
    },
    PutPlayer {
        player: PlayerHandle,
        arena: Option<ArenaHandle>,
        done: PersistCallback,
    },
    GetArena {
        arena: Option<ArenaHandle>,
        done: PersistCallback,
    },
    PutArena {
        arena: Option<ArenaHandle>,
        done: PersistCallback,
    },
    PutAll {
        done: Option<PersistCallback>,
    },
    EndInterval {
        interval: PersistInterval,
        group: ArenaGroup,
    },
    ResetGameInterval {
        arena: ArenaHandle,
        done: PersistCallback,
    },
}

#[derive(Default)]
pub(crate) struct RegistrationSet {
    pub players: Vec<Arc<dyn PlayerPersist>>,
    pub arenas: Vec<Arc<dyn ArenaPersist>>,
}

pub(crate) struct PersistShared {
    /// Held by the worker for the duration of each dispatch, so
    /// registrations never race a walk of the list.
    pub registrations: Mutex<RegistrationSet>,
    pub mainloop: Arc<MainLoop>,
    pub interval_ended: Mutex<Vec<IntervalEndedCallback>>,
    pub config: PersistConfig,
}

/// The public persistence service. Requests are processed FIFO by one
/// background worker; completion callbacks arrive on the mainloop in the
/// same order, after their datastore effects have committed.
pub struct PersistService {
    shared: Arc<PersistShared>,
    sender: Mutex<Option<StdUnboundedSender<PersistCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PersistService {
    /// Opens the datastore under `data_dir` and starts the worker thread.
    pub fn new(
        mainloop: Arc<MainLoop>,
        players: Arc<PlayerManager>,
        arenas: Arc<ArenaManager>,
        data_dir: &Path,
        config: PersistConfig,
    ) -> Result<Arc<Self>> {
        let datastore = PersistDatastore::open(data_dir)?;
        let shared = Arc::new(PersistShared {
            registrations: Mutex::new(RegistrationSet::default()),
            mainloop,
            interval_ended: Mutex::new(Vec::new()),
            config,
        });
        let (tx, rx) = std_unbounded_channel();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("SW Persist Worker".to_owned())
            .spawn(move || executor::worker_main(datastore, rx, worker_shared, players, arenas))
            .context("could not create the persist worker thread")?;
        Ok(Arc::new(Self {
            shared,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Registers per-player persistent data.
    /// Rejects a duplicate `(key, interval, scope)`.
    pub fn register_player(&self, registration: Arc<dyn PlayerPersist>) -> Result<(), PersistError> {
        let mut regs = self.shared.registrations.lock().unwrap();
        let clash = regs.players.iter().any(|r| {
            r.key() == registration.key()
                && r.interval() == registration.interval()
                && r.scope() == registration.scope()
        });
        if clash {
            return Err(PersistError::OverlappingRegistration {
                key: registration.key(),
                interval: registration.interval(),
            });
        }
        regs.players.push(registration);
        Ok(())
    }

    /// Registers per-arena persistent data.
    /// Rejects a duplicate `(key, interval, scope)`.
    pub fn register_arena(&self, registration: Arc<dyn ArenaPersist>) -> Result<(), PersistError> {
        let mut regs = self.shared.registrations.lock().unwrap();
        let clash = regs.arenas.iter().any(|r| {
            r.key() == registration.key()
                && r.interval() == registration.interval()
                && r.scope() == registration.scope()
        });
        if clash {
            return Err(PersistError::OverlappingRegistration {
                key: registration.key(),
                interval: registration.interval(),
            });
        }
        regs.arenas.push(registration);
        Ok(())
    }

    /// Removes a per-player registration.
    pub fn unregister_player(&self, key: PersistKey, interval: PersistInterval, scope: PersistScope) {
        let mut regs = self.shared.registrations.lock().unwrap();
        regs.players
            .retain(|r| !(r.key() == key && r.interval() == interval && r.scope() == scope));
    }

    /// Removes a per-arena registration.
    pub fn unregister_arena(&self, key: PersistKey, interval: PersistInterval, scope: PersistScope) {
        let mut regs = self.shared.registrations.lock().unwrap();
        regs.arenas
            .retain(|r| !(r.key() == key && r.interval() == interval && r.scope() == scope));
    }

    /// Subscribes to interval-end notifications (fired on the mainloop).
    pub fn on_interval_ended(&self, callback: IntervalEndedCallback) {
        self.shared.interval_ended.lock().unwrap().push(callback);
    }

    fn send(&self, command: PersistCommand) -> Result<(), PersistError> {
        let sender = self.sender.lock().unwrap();
        sender
            .as_ref()
            .ok_or(PersistError::ShutDown)?
            .send(command)
            .map_err(|_| PersistError::ShutDown)
    }

    /// Loads the player's registered data: global entries when `arena` is
    /// `None`, the arena's entries otherwise. `done` runs on the mainloop
    /// after the datastore effects committed.
    pub fn get_player(
        &self,
        player: PlayerHandle,
        arena: Option<ArenaHandle>,
        done: PersistCallback,
    ) -> Result<(), PersistError> {
        self.send(PersistCommand::GetPlayer { player, arena, done })
    }

    /// Saves the player's registered data; see [`Self::get_player`] for the
    /// scope selection. Ignored for unauthenticated players.
    pub fn put_player(
        &self,
        player: PlayerHandle,
        arena: Option<ArenaHandle>,
        done: PersistCallback,
    ) -> Result<(), PersistError> {
        self.send(PersistCommand::PutPlayer { player, arena, done })
    }

    /// Loads arena data (`None` = the zone-global scope).
    pub fn get_arena(&self, arena: Option<ArenaHandle>, done: PersistCallback) -> Result<(), PersistError> {
        self.send(PersistCommand::GetArena { arena, done })
    }

    /// Saves arena data (`None` = the zone-global scope).
    pub fn put_arena(&self, arena: Option<ArenaHandle>, done: PersistCallback) -> Result<(), PersistError> {
        self.send(PersistCommand::PutArena { arena, done })
    }

    /// Queues a full sync of every playing player and running arena.
    pub fn sync_now(&self, done: Option<PersistCallback>) -> Result<(), PersistError> {
        self.send(PersistCommand::PutAll { done })
    }

    /// Ends the current generation of `(group, interval)`: flushes and
    /// clears the affected in-memory data, rotates the generation and fires
    /// the interval-ended notification. `Forever` intervals are refused.
    pub fn end_interval(&self, interval: PersistInterval, group: ArenaGroup) -> Result<(), PersistError> {
        if !interval.can_end() {
            return Err(PersistError::IntervalCannotEnd(interval));
        }
        self.send(PersistCommand::EndInterval { interval, group })
    }

    /// Wipes the current `Game` data of the arena's group, in memory and in
    /// the datastore.
    pub fn reset_game_interval(&self, arena: ArenaHandle, done: PersistCallback) -> Result<(), PersistError> {
        self.send(PersistCommand::ResetGameInterval { arena, done })
    }

    /// Seals the request queue, lets the worker drain and perform its final
    /// sync, and joins it.
    pub fn shutdown(&self) {
        drop(self.sender.lock().unwrap().take());
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}
