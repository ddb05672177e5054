//! The persist worker: a single background thread that owns the datastore,
//! serializes every request, batches the periodic full sync and re-posts
//! completion callbacks to the mainloop.

use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use smallvec::SmallVec;
use sw_schemas::persist::{ArenaGroup, PersistInterval, PersistScope};
use tracing::{error, info_span, warn};

use super::store::PersistDatastore;
use super::{PersistCallback, PersistCommand, PersistShared, RegistrationSet};
use crate::entity::{
    ArenaHandle, ArenaManager, ArenaStatus, PlayerFlags, PlayerHandle, PlayerManager, PlayerStatus,
};
use crate::prelude::*;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

fn command_name(command: &PersistCommand) -> &'static str {
    match command {
        PersistCommand::GetPlayer { .. } => "get-player",
        PersistCommand::PutPlayer { .. } => "put-player",
        PersistCommand::GetArena { .. } => "get-arena",
        PersistCommand::PutArena { .. } => "put-arena",
        PersistCommand::PutAll { .. } => "put-all",
        PersistCommand::EndInterval { .. } => "end-interval",
        PersistCommand::ResetGameInterval { .. } => "reset-game-interval",
    }
}

struct WorkerContext {
    store: PersistDatastore,
    shared: Arc<PersistShared>,
    players: Arc<PlayerManager>,
    arenas: Arc<ArenaManager>,
    scratch: Vec<u8>,
}

/// Entry point of the "SW Persist Worker" thread.
pub(crate) fn worker_main(
    store: PersistDatastore,
    inbox: StdUnboundedReceiver<PersistCommand>,
    shared: Arc<PersistShared>,
    players: Arc<PlayerManager>,
    arenas: Arc<ArenaManager>,
) {
    let _span = info_span!("persist-worker").entered();
    let sync_interval = Duration::from_secs(shared.config.sync_seconds as u64);
    let scratch = Vec::with_capacity(shared.config.max_record_length);
    let mut ctx = WorkerContext {
        store,
        shared,
        players,
        arenas,
        scratch,
    };

    let mut next_sync = Instant::now() + sync_interval;
    loop {
        let timeout = next_sync.saturating_duration_since(Instant::now());
        match inbox.recv_timeout(timeout) {
            Ok(command) => {
                ctx.dispatch(command);
                if Instant::now() >= next_sync {
                    ctx.dispatch(PersistCommand::PutAll { done: None });
                    next_sync = Instant::now() + sync_interval;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                ctx.dispatch(PersistCommand::PutAll { done: None });
                next_sync = Instant::now() + sync_interval;
            }
            // queue sealed and drained: flush once more, then exit
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    ctx.dispatch(PersistCommand::PutAll { done: None });
}

impl WorkerContext {
    /// Runs one command under the registration lock, inside a transaction.
    /// Callbacks run after the commit (or rollback), in request order.
    fn dispatch(&mut self, command: PersistCommand) {
        let op = command_name(&command);
        let shared = Arc::clone(&self.shared);
        let registrations = shared.registrations.lock().unwrap();

        let mut after: SmallVec<[PersistCallback; 2]> = SmallVec::new();
        match self.store.begin_transaction() {
            Ok(()) => {
                match self.handle(&registrations, command, &mut after) {
                    Ok(()) => {
                        if let Err(error) = self.store.commit() {
                            error!(op, "persist commit failed: {error:#}");
                            let _ = self.store.rollback();
                        }
                    }
                    Err(error) => {
                        error!(op, "persist operation failed: {error:#}");
                        let _ = self.store.rollback();
                    }
                }
            }
            Err(error) => {
                error!(op, "could not begin a persist transaction: {error:#}");
                // the command is lost, but its callback must still run
                self.collect_callback(command, &mut after);
            }
        }
        drop(registrations);

        for callback in after {
            self.complete(callback);
        }
    }

    fn collect_callback(&self, command: PersistCommand, after: &mut SmallVec<[PersistCallback; 2]>) {
        match command {
            PersistCommand::GetPlayer { done, .. }
            | PersistCommand::PutPlayer { done, .. }
            | PersistCommand::GetArena { done, .. }
            | PersistCommand::PutArena { done, .. }
            | PersistCommand::ResetGameInterval { done, .. } => after.push(done),
            PersistCommand::PutAll { done } => after.extend(done),
            PersistCommand::EndInterval { .. } => {}
        }
    }

    fn handle(
        &mut self,
        regs: &RegistrationSet,
        command: PersistCommand,
        after: &mut SmallVec<[PersistCallback; 2]>,
    ) -> Result<()> {
        match command {
            PersistCommand::GetPlayer { player, arena, done } => {
                let result = self.do_get_player(regs, &player, arena.as_ref());
                after.push(done);
                result
            }
            PersistCommand::PutPlayer { player, arena, done } => {
                let result = self.do_put_player(regs, &player, arena.as_ref(), None);
                after.push(done);
                result
            }
            PersistCommand::GetArena { arena, done } => {
                let result = self.do_get_arena(regs, arena.as_ref());
                after.push(done);
                result
            }
            PersistCommand::PutArena { arena, done } => {
                let result = self.do_put_arena(regs, arena.as_ref(), None);
                after.push(done);
                result
            }
            PersistCommand::PutAll { done } => {
                let result = self.do_put_all(regs);
                after.extend(done);
                result
            }
            PersistCommand::EndInterval { interval, group } => {
                let result = self.do_end_interval(regs, interval, &group);
                if result.is_ok() {
                    let shared = Arc::clone(&self.shared);
                    after.push(Box::new(move || {
                        for listener in shared.interval_ended.lock().unwrap().iter() {
                            listener(interval, &group);
                        }
                    }));
                }
                result
            }
            PersistCommand::ResetGameInterval { arena, done } => {
                let result = self.do_reset_game_interval(regs, &arena);
                after.push(done);
                result
            }
        }
    }

    /// Posts the callback to the mainloop; if the mainloop has already shut
    /// down, runs it on the worker as a last effort.
    fn complete(&self, callback: PersistCallback) {
        if let Err(callback) = self.shared.mainloop.queue_work_boxed(callback) {
            callback();
        }
    }

    fn group_of(arena: Option<&ArenaHandle>, interval: PersistInterval) -> ArenaGroup {
        match arena {
            None => ArenaGroup::global(),
            Some(arena) => arena.read().unwrap().group_for(interval),
        }
    }

    fn do_get_player(
        &mut self,
        regs: &RegistrationSet,
        player: &PlayerHandle,
        arena: Option<&ArenaHandle>,
    ) -> Result<()> {
        let wanted_scope = match arena {
            None => PersistScope::Global,
            Some(_) => PersistScope::PerArena,
        };
        let name = player.read().unwrap().name.clone();
        for reg in regs.players.iter().filter(|r| r.scope() == wanted_scope) {
            let group = Self::group_of(arena, reg.interval());
            let found = self.store.get_player_data(
                name.as_str(),
                group.as_str(),
                reg.interval(),
                reg.key(),
                unix_now(),
                &mut self.scratch,
            )?;
            let mut guard = player.write().unwrap();
            reg.clear_data(&mut guard);
            if found {
                reg.set_data(&mut guard, &self.scratch);
            }
        }
        Ok(())
    }

    fn do_put_player(
        &mut self,
        regs: &RegistrationSet,
        player: &PlayerHandle,
        arena: Option<&ArenaHandle>,
        only_interval: Option<PersistInterval>,
    ) -> Result<()> {
        let wanted_scope = match arena {
            None => PersistScope::Global,
            Some(_) => PersistScope::PerArena,
        };
        let (name, authenticated) = {
            let guard = player.read().unwrap();
            (guard.name.clone(), guard.flags.contains(PlayerFlags::AUTHENTICATED))
        };
        if !authenticated {
            return Ok(());
        }
        for reg in regs
            .players
            .iter()
            .filter(|r| r.scope() == wanted_scope && only_interval.is_none_or(|iv| r.interval() == iv))
        {
            let group = Self::group_of(arena, reg.interval());
            self.scratch.clear();
            {
                let guard = player.read().unwrap();
                if let Err(error) = reg.get_data(&guard, &mut self.scratch) {
                    warn!(player = %name, key = %reg.key(), "persist get_data failed: {error:#}");
                    continue;
                }
            }
            if self.scratch.len() > self.shared.config.max_record_length {
                warn!(
                    player = %name,
                    key = %reg.key(),
                    len = self.scratch.len(),
                    "record exceeds Persist.MaxRecordLength"
                );
            }
            if self.scratch.is_empty() {
                self.store.delete_player_data(
                    name.as_str(),
                    group.as_str(),
                    reg.interval(),
                    reg.key(),
                    unix_now(),
                )?;
            } else {
                self.store.set_player_data(
                    name.as_str(),
                    group.as_str(),
                    reg.interval(),
                    reg.key(),
                    unix_now(),
                    &self.scratch,
                )?;
            }
        }
        Ok(())
    }

    fn do_get_arena(&mut self, regs: &RegistrationSet, arena: Option<&ArenaHandle>) -> Result<()> {
        let wanted_scope = match arena {
            None => PersistScope::Global,
            Some(_) => PersistScope::PerArena,
        };
        for reg in regs.arenas.iter().filter(|r| r.scope() == wanted_scope) {
            let group = Self::group_of(arena, reg.interval());
            let found = self.store.get_arena_data(
                group.as_str(),
                reg.interval(),
                reg.key(),
                unix_now(),
                &mut self.scratch,
            )?;
            match arena {
                Some(arena) => {
                    let mut guard = arena.write().unwrap();
                    reg.clear_data(Some(&mut guard));
                    if found {
                        reg.set_data(Some(&mut guard), &self.scratch);
                    }
                }
                None => {
                    reg.clear_data(None);
                    if found {
                        reg.set_data(None, &self.scratch);
                    }
                }
            }
        }
        Ok(())
    }

    fn do_put_arena(
        &mut self,
        regs: &RegistrationSet,
        arena: Option<&ArenaHandle>,
        only_interval: Option<PersistInterval>,
    ) -> Result<()> {
        let wanted_scope = match arena {
            None => PersistScope::Global,
            Some(_) => PersistScope::PerArena,
        };
        for reg in regs
            .arenas
            .iter()
            .filter(|r| r.scope() == wanted_scope && only_interval.is_none_or(|iv| r.interval() == iv))
        {
            let group = Self::group_of(arena, reg.interval());
            self.scratch.clear();
            let fetched = match arena {
                Some(arena) => {
                    let guard = arena.read().unwrap();
                    reg.get_data(Some(&guard), &mut self.scratch)
                }
                None => reg.get_data(None, &mut self.scratch),
            };
            if let Err(error) = fetched {
                warn!(group = %group, key = %reg.key(), "persist get_data failed: {error:#}");
                continue;
            }
            if self.scratch.is_empty() {
                self.store
                    .delete_arena_data(group.as_str(), reg.interval(), reg.key(), unix_now())?;
            } else {
                self.store.set_arena_data(
                    group.as_str(),
                    reg.interval(),
                    reg.key(),
                    unix_now(),
                    &self.scratch,
                )?;
            }
        }
        Ok(())
    }

    /// The full sync: every playing player (global plus arena scope), every
    /// running arena, then the zone-global data. Snapshots are taken under
    /// the manager read locks and released before the datastore work.
    fn do_put_all(&mut self, regs: &RegistrationSet) -> Result<()> {
        let playing: Vec<PlayerHandle> = self
            .players
            .snapshot()
            .into_iter()
            .filter(|p| p.read().unwrap().status == PlayerStatus::Playing)
            .collect();
        let running: Vec<ArenaHandle> = self
            .arenas
            .snapshot()
            .into_iter()
            .filter(|a| a.read().unwrap().status == ArenaStatus::Running)
            .collect();

        for player in &playing {
            self.do_put_player(regs, player, None, None)?;
            let arena = player.read().unwrap().arena.clone();
            if let Some(arena) = arena {
                self.do_put_player(regs, player, Some(&arena), None)?;
            }
        }
        for arena in &running {
            self.do_put_arena(regs, Some(arena), None)?;
        }
        self.do_put_arena(regs, None, None)
    }

    /// Flushes and clears every piece of in-memory data bound to
    /// `(group, interval)`, then rotates the generation.
    fn do_end_interval(
        &mut self,
        regs: &RegistrationSet,
        interval: PersistInterval,
        group: &ArenaGroup,
    ) -> Result<()> {
        if group.is_global() {
            for player in self.players.snapshot() {
                if !player.read().unwrap().status.in_global_sync_window() {
                    continue;
                }
                self.do_put_player(regs, &player, None, Some(interval))?;
                let mut guard = player.write().unwrap();
                for reg in regs
                    .players
                    .iter()
                    .filter(|r| r.scope() == PersistScope::Global && r.interval() == interval)
                {
                    reg.clear_data(&mut guard);
                }
            }
            self.do_put_arena(regs, None, Some(interval))?;
            for reg in regs
                .arenas
                .iter()
                .filter(|r| r.scope() == PersistScope::Global && r.interval() == interval)
            {
                reg.clear_data(None);
            }
        } else {
            for player in self.players.snapshot() {
                let (in_window, player_arena) = {
                    let guard = player.read().unwrap();
                    (guard.status.in_arena_sync_window(), guard.arena.clone())
                };
                let Some(player_arena) = player_arena else { continue };
                if !in_window || player_arena.read().unwrap().group_for(interval) != *group {
                    continue;
                }
                self.do_put_player(regs, &player, Some(&player_arena), Some(interval))?;
                let mut guard = player.write().unwrap();
                for reg in regs
                    .players
                    .iter()
                    .filter(|r| r.scope() == PersistScope::PerArena && r.interval() == interval)
                {
                    reg.clear_data(&mut guard);
                }
            }
            for arena in self.arenas.snapshot() {
                if arena.read().unwrap().group_for(interval) != *group {
                    continue;
                }
                self.do_put_arena(regs, Some(&arena), Some(interval))?;
                let mut guard = arena.write().unwrap();
                for reg in regs
                    .arenas
                    .iter()
                    .filter(|r| r.scope() == PersistScope::PerArena && r.interval() == interval)
                {
                    reg.clear_data(Some(&mut guard));
                }
            }
        }
        self.store
            .create_interval_and_make_current(group.as_str(), interval, unix_now())?;
        Ok(())
    }

    /// Clears the in-memory `Game`-interval data of everyone in the arena
    /// and deletes the group's current `Game` generation rows.
    fn do_reset_game_interval(&mut self, regs: &RegistrationSet, arena: &ArenaHandle) -> Result<()> {
        let group = arena.read().unwrap().group_for(PersistInterval::Game);
        for player in self.players.snapshot() {
            let (in_window, player_arena) = {
                let guard = player.read().unwrap();
                (guard.status.in_arena_sync_window(), guard.arena.clone())
            };
            let same_arena = player_arena.map_or(false, |pa| Arc::ptr_eq(&pa, arena));
            if !in_window || !same_arena {
                continue;
            }
            let mut guard = player.write().unwrap();
            for reg in regs.players.iter().filter(|r| {
                r.scope() == PersistScope::PerArena && r.interval() == PersistInterval::Game
            }) {
                reg.clear_data(&mut guard);
            }
        }
        {
            let mut guard = arena.write().unwrap();
            for reg in regs.arenas.iter().filter(|r| {
                r.scope() == PersistScope::PerArena && r.interval() == PersistInterval::Game
            }) {
                reg.clear_data(Some(&mut guard));
            }
        }
        self.store.reset_game_interval(group.as_str(), unix_now())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use sw_schemas::persist::PersistKey;
    use sw_schemas::PlayerId;

    use super::super::{PersistService, PlayerPersist};
    use super::*;
    use crate::config::{ConfigHandle, PersistConfig};
    use crate::entity::Player;
    use crate::mainloop::MainLoop;

    /// Test registration: one little-endian u32 "points" record per player,
    /// held in a side table keyed by player id.
    struct Points {
        interval: PersistInterval,
        scope: PersistScope,
        table: Mutex<HashMap<PlayerId, u32>>,
    }

    impl Points {
        fn new(interval: PersistInterval, scope: PersistScope) -> Arc<Self> {
            Arc::new(Self {
                interval,
                scope,
                table: Mutex::new(HashMap::new()),
            })
        }

        fn set(&self, player: PlayerId, points: u32) {
            self.table.lock().unwrap().insert(player, points);
        }

        fn get(&self, player: PlayerId) -> Option<u32> {
            self.table.lock().unwrap().get(&player).copied()
        }
    }

    impl PlayerPersist for Points {
        fn key(&self) -> PersistKey {
            PersistKey(1)
        }

        fn interval(&self) -> PersistInterval {
            self.interval
        }

        fn scope(&self) -> PersistScope {
            self.scope
        }

        fn get_data(&self, player: &Player, out: &mut Vec<u8>) -> Result<()> {
            if let Some(points) = self.get(player.id) {
                out.extend_from_slice(&points.to_le_bytes());
            }
            Ok(())
        }

        fn set_data(&self, player: &mut Player, data: &[u8]) {
            if let Ok(bytes) = <[u8; 4]>::try_from(data) {
                self.set(player.id, u32::from_le_bytes(bytes));
            }
        }

        fn clear_data(&self, player: &mut Player) {
            self.table.lock().unwrap().remove(&player.id);
        }
    }

    struct Fixture {
        mainloop: Arc<MainLoop>,
        mainloop_thread: Option<std::thread::JoinHandle<i32>>,
        players: Arc<PlayerManager>,
        arenas: Arc<ArenaManager>,
        service: Arc<PersistService>,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mainloop = MainLoop::new();
            let players = PlayerManager::new();
            let arenas = ArenaManager::new();
            let service = PersistService::new(
                Arc::clone(&mainloop),
                Arc::clone(&players),
                Arc::clone(&arenas),
                dir.path(),
                PersistConfig::default(),
            )
            .unwrap();
            let loop_handle = {
                let inner = Arc::clone(&mainloop);
                std::thread::spawn(move || inner.run())
            };
            Self {
                mainloop,
                mainloop_thread: Some(loop_handle),
                players,
                arenas,
                service,
                _dir: dir,
            }
        }

        fn playing_player(&self, name: &str, arena: &ArenaHandle) -> PlayerHandle {
            let player = self.players.connect(name, true);
            {
                let mut guard = player.write().unwrap();
                guard.status = PlayerStatus::Playing;
                guard.arena = Some(Arc::clone(arena));
                guard.flags |= PlayerFlags::AUTHENTICATED;
            }
            player
        }

        fn running_arena(&self, name: &str) -> ArenaHandle {
            let arena = self.arenas.create(name, ConfigHandle::default());
            arena.write().unwrap().status = ArenaStatus::Running;
            arena
        }

    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.service.shutdown();
            self.mainloop.quit(0);
            if let Some(handle) = self.mainloop_thread.take() {
                let _ = handle.join();
            }
        }
    }

    fn done_channel() -> (PersistCallback, StdUnboundedReceiver<()>) {
        let (tx, rx) = std_unbounded_channel::<()>();
        (
            Box::new(move || {
                let _ = tx.send(());
            }),
            rx,
        )
    }

    #[test]
    pub fn callbacks_arrive_in_request_order() {
        let fixture = Fixture::new();
        let arena = fixture.running_arena("turf");
        let player = fixture.playing_player("Alpha", &arena);

        let points = Points::new(PersistInterval::Forever, PersistScope::Global);
        fixture.service.register_player(points.clone()).unwrap();
        points.set(player.read().unwrap().id, 17);

        let (order_tx, order_rx) = std_unbounded_channel::<&'static str>();
        {
            let tx = order_tx.clone();
            fixture
                .service
                .get_player(
                    Arc::clone(&player),
                    None,
                    Box::new(move || {
                        let _ = tx.send("get");
                    }),
                )
                .unwrap();
        }
        {
            let tx = order_tx;
            fixture
                .service
                .put_player(
                    Arc::clone(&player),
                    None,
                    Box::new(move || {
                        let _ = tx.send("put");
                    }),
                )
                .unwrap();
        }

        assert_eq!(order_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "get");
        assert_eq!(order_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "put");
    }

    #[test]
    pub fn put_then_get_round_trips_player_state() {
        let fixture = Fixture::new();
        let arena = fixture.running_arena("turf");
        let player = fixture.playing_player("Alpha", &arena);
        let id = player.read().unwrap().id;

        let points = Points::new(PersistInterval::Forever, PersistScope::Global);
        fixture.service.register_player(points.clone()).unwrap();
        points.set(id, 42);

        let (done, rx) = done_channel();
        fixture.service.put_player(Arc::clone(&player), None, done).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // fake a different in-memory state, then load it back
        points.set(id, 999);
        let (done, rx) = done_channel();
        fixture.service.get_player(Arc::clone(&player), None, done).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(points.get(id), Some(42));
    }

    #[test]
    pub fn unauthenticated_players_are_not_persisted() {
        let fixture = Fixture::new();
        let arena = fixture.running_arena("turf");
        let player = fixture.playing_player("Sneak", &arena);
        player.write().unwrap().flags.remove(PlayerFlags::AUTHENTICATED);
        let id = player.read().unwrap().id;

        let points = Points::new(PersistInterval::Forever, PersistScope::Global);
        fixture.service.register_player(points.clone()).unwrap();
        points.set(id, 5);

        let (done, rx) = done_channel();
        fixture.service.put_player(Arc::clone(&player), None, done).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        points.set(id, 123);
        let (done, rx) = done_channel();
        fixture.service.get_player(Arc::clone(&player), None, done).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // nothing was stored, so the get cleared the table entry
        assert_eq!(points.get(id), None);
    }

    #[test]
    pub fn ending_an_interval_clears_and_rotates() {
        let fixture = Fixture::new();
        let arena = fixture.running_arena("turf");
        let player = fixture.playing_player("Alpha", &arena);
        let id = player.read().unwrap().id;

        let points = Points::new(PersistInterval::Game, PersistScope::PerArena);
        fixture.service.register_player(points.clone()).unwrap();
        points.set(id, 31);

        let ended = Arc::new(AtomicUsize::new(0));
        {
            let ended = Arc::clone(&ended);
            fixture.service.on_interval_ended(Box::new(move |interval, group| {
                assert_eq!(interval, PersistInterval::Game);
                assert_eq!(group.as_str(), "turf");
                ended.fetch_add(1, AtomicOrdering::SeqCst);
            }));
        }

        let group = arena.read().unwrap().group_for(PersistInterval::Game);
        fixture.service.end_interval(PersistInterval::Game, group).unwrap();
        fixture.service.sync_now(None).unwrap();

        // fence on a trailing request so the end-interval has been handled
        let (done, rx) = done_channel();
        fixture
            .service
            .get_player(Arc::clone(&player), Some(Arc::clone(&arena)), done)
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // the new generation holds no data and the notification fired
        assert_eq!(points.get(id), None);
        fixture.mainloop.wait_for_drain();
        assert_eq!(ended.load(AtomicOrdering::SeqCst), 1);

        // Forever intervals refuse to end
        assert!(matches!(
            fixture
                .service
                .end_interval(PersistInterval::Forever, ArenaGroup::global()),
            Err(super::super::PersistError::IntervalCannotEnd(_))
        ));
    }

    #[test]
    pub fn shutdown_runs_a_final_sync() {
        let points = Points::new(PersistInterval::Forever, PersistScope::Global);
        let fixture = Fixture::new();
        let arena = fixture.running_arena("turf");
        let player = fixture.playing_player("Alpha", &arena);
        let id = player.read().unwrap().id;
        fixture.service.register_player(points.clone()).unwrap();
        points.set(id, 77);
        fixture.service.shutdown();

        // reopen the database and confirm the final PutAll landed
        let store = PersistDatastore::open(fixture._dir.path()).unwrap();
        let mut out = Vec::new();
        assert!(store
            .get_player_data(
                "Alpha",
                sw_schemas::persist::GLOBAL_GROUP_NAME,
                PersistInterval::Forever,
                PersistKey(1),
                0,
                &mut out,
            )
            .unwrap());
        assert_eq!(out, 77u32.to_le_bytes());
    }
}
