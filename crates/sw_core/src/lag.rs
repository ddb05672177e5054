//! The lag sampler: a background thread that round-robins over playing
//! players, reads their lag statistics and dispatches corrective actions
//! onto the mainloop.
//!
//! The statistics source and the game actions are external contracts,
//! resolved as trait objects; only the sampling policy lives here.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use smart_default::SmartDefault;
use sw_schemas::PlayerId;
use tracing::info;

use crate::config::ConfigScope;
use crate::entity::{ExtraData, ExtraSlotKey, PlayerHandle, PlayerManager, PlayerStatus};
use crate::mainloop::MainLoop;
use crate::prelude::*;

/// One snapshot of a player's lag statistics. Loss values are in units of
/// 0.1% (permille), times in milliseconds.
#[derive(Copy, Clone, Debug, Default)]
pub struct LagStats {
    /// Average round-trip ping.
    pub avg_ping_ms: i32,
    /// Server-to-client packet loss, permille.
    pub s2c_loss_permille: i32,
    /// Client-to-server packet loss, permille.
    pub c2s_loss_permille: i32,
    /// Worst recent ping spike.
    pub spike_ms: i32,
}

/// Source of per-player lag statistics (the transport's lag tracker).
pub trait LagQuery: Send + Sync + 'static {
    /// The player's current statistics, `None` when nothing is known yet.
    fn current(&self, player: PlayerId) -> Option<LagStats>;
}

/// Corrective actions the sampler can take, implemented by the game module.
pub trait GameActions: Send + Sync + 'static {
    /// Forces the player to spectator.
    fn spec_player(&self, player: PlayerId);
    /// Ignores this permille share of the player's weapons (0 = none,
    /// 1000 = all).
    fn set_ignore_weapons(&self, player: PlayerId, permille: i32);
    /// Allows or disallows carrying flags and balls.
    fn set_disallow_flags(&self, player: PlayerId, disallow: bool);
}

/// Thresholds of the lag sampler, from the global `Lag.*` config options.
#[derive(Copy, Clone, Debug, SmartDefault)]
pub struct LagThresholds {
    /// Ping above which the player is forced to spectator.
    #[default(600)]
    pub ping_to_spec: i32,
    /// Ping at which weapons start being ignored.
    #[default(300)]
    pub ping_to_start_ignoring_weapons: i32,
    /// Ping at which every weapon is ignored.
    #[default(800)]
    pub ping_to_ignore_all_weapons: i32,
    /// Ping above which flags and balls are disallowed.
    #[default(500)]
    pub ping_to_disallow_flags: i32,
    /// S2C loss (0.1% units) above which the player is forced to spectator.
    #[default(150)]
    pub s2c_loss_to_spec: i32,
    /// C2S loss (0.1% units) above which the player is forced to spectator.
    #[default(150)]
    pub c2s_loss_to_spec: i32,
    /// Ping spike (ms) above which the player is forced to spectator.
    #[default(3000)]
    pub spike_to_spec: i32,
    /// Target period between two checks of the same player.
    #[default(Duration::from_secs(30))]
    pub check_interval: Duration,
}

impl LagThresholds {
    /// Reads the thresholds from the global config scope.
    pub fn from_scope(scope: &ConfigScope) -> Self {
        let defaults = Self::default();
        Self {
            ping_to_spec: scope.get_int("Lag", "PingToSpec", defaults.ping_to_spec),
            ping_to_start_ignoring_weapons: scope.get_int(
                "Lag",
                "PingToStartIgnoringWeapons",
                defaults.ping_to_start_ignoring_weapons,
            ),
            ping_to_ignore_all_weapons: scope.get_int(
                "Lag",
                "PingToIgnoreAllWeapons",
                defaults.ping_to_ignore_all_weapons,
            ),
            ping_to_disallow_flags: scope.get_int(
                "Lag",
                "PingToDisallowFlags",
                defaults.ping_to_disallow_flags,
            ),
            s2c_loss_to_spec: scope.get_int("Lag", "S2CLossToSpec", defaults.s2c_loss_to_spec),
            c2s_loss_to_spec: scope.get_int("Lag", "C2SLossToSpec", defaults.c2s_loss_to_spec),
            spike_to_spec: scope.get_int("Lag", "SpikeToSpec", defaults.spike_to_spec),
            check_interval: Duration::from_secs(
                scope.get_int("Lag", "CheckInterval", defaults.check_interval.as_secs() as i32).max(1)
                    as u64,
            ),
        }
    }
}

/// Per-player sampler bookkeeping, kept in a player extra-data slot.
#[derive(Default)]
struct LagCheckData {
    /// A check for this player is queued or running on the mainloop.
    is_checking: bool,
    last_check: Option<Instant>,
}

impl ExtraData for LagCheckData {
    fn try_reset(&mut self) -> bool {
        *self = Self::default();
        true
    }
}

struct LagShared {
    players: Arc<PlayerManager>,
    mainloop: Arc<MainLoop>,
    query: Arc<dyn LagQuery>,
    actions: Arc<dyn GameActions>,
    thresholds: LagThresholds,
    check_slot: ExtraSlotKey<LagCheckData>,
    stop: Mutex<bool>,
    stop_signal: Condvar,
}

/// The background lag sampler.
pub struct LagSampler {
    shared: Arc<LagShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LagSampler {
    /// Allocates the bookkeeping slot and starts the sampler thread.
    pub fn new(
        players: Arc<PlayerManager>,
        mainloop: Arc<MainLoop>,
        query: Arc<dyn LagQuery>,
        actions: Arc<dyn GameActions>,
        thresholds: LagThresholds,
    ) -> Self {
        let check_slot = players.allocate_slot::<LagCheckData>();
        let shared = Arc::new(LagShared {
            players,
            mainloop,
            query,
            actions,
            thresholds,
            check_slot,
            stop: Mutex::new(false),
            stop_signal: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("SW Lag Sampler".to_owned())
            .spawn(move || LagShared::sampler_main(thread_shared))
            .expect("Could not create the lag sampler thread");
        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Stops the sampler thread and joins it.
    pub fn shutdown(&self) {
        {
            let mut stop = self.shared.stop.lock().unwrap();
            *stop = true;
            self.shared.stop_signal.notify_all();
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl LagShared {
    fn sampler_main(shared: Arc<LagShared>) {
        loop {
            let candidate_count = shared.pick_and_dispatch();

            let interval = shared.thresholds.check_interval;
            let sleep = if candidate_count > 0 {
                interval / candidate_count
            } else {
                interval
            };
            let stop = shared.stop.lock().unwrap();
            let (stop, _timeout) = shared.stop_signal.wait_timeout(stop, sleep).unwrap();
            if *stop {
                return;
            }
        }
    }

    /// Selects the least recently checked eligible player, marks it as being
    /// checked and queues the check on the mainloop. Returns how many
    /// players were eligible for rotation pacing.
    fn pick_and_dispatch(self: &Arc<Self>) -> u32 {
        let now = Instant::now();
        let interval = self.thresholds.check_interval;
        let mut count = 0u32;
        let mut best: Option<(PlayerHandle, Option<Instant>)> = None;

        for player in self.players.snapshot() {
            let guard = player.read().unwrap();
            if guard.status != PlayerStatus::Playing || !guard.standard_client {
                continue;
            }
            count += 1;
            let Some(data) = guard.extra.get(self.check_slot) else {
                continue;
            };
            if data.is_checking {
                continue;
            }
            let due = data
                .last_check
                .is_none_or(|checked| now.duration_since(checked) > interval);
            if !due {
                continue;
            }
            let candidate = data.last_check;
            drop(guard);
            // keep the one with the oldest last check (never checked wins)
            if best.as_ref().is_none_or(|(_, last)| candidate < *last) {
                best = Some((player, candidate));
            }
        }

        if let Some((player, _)) = best {
            if let Some(data) = player.write().unwrap().extra.get_mut(self.check_slot) {
                data.is_checking = true;
            }
            let shared = Arc::clone(self);
            let queued = self.mainloop.queue_work(move || shared.run_check(&player));
            if !queued {
                // mainloop is gone; nothing to actuate against anymore
                return count;
            }
        }
        count
    }

    /// Runs on the mainloop: reads the statistics, actuates, and always
    /// restores the bookkeeping.
    fn run_check(&self, player: &PlayerHandle) {
        let id = player.read().unwrap().id;
        if let Some(stats) = self.query.current(id) {
            self.decide(id, &stats);
        }
        let mut guard = player.write().unwrap();
        if let Some(data) = guard.extra.get_mut(self.check_slot) {
            data.is_checking = false;
            data.last_check = Some(Instant::now());
        }
    }

    fn decide(&self, id: PlayerId, stats: &LagStats) {
        let t = &self.thresholds;
        if stats.avg_ping_ms > t.ping_to_spec
            || stats.s2c_loss_permille > t.s2c_loss_to_spec
            || stats.c2s_loss_permille > t.c2s_loss_to_spec
            || stats.spike_ms > t.spike_to_spec
        {
            info!(player = %id, ping = stats.avg_ping_ms, "lag action: forcing to spectator");
            self.actions.spec_player(id);
            return;
        }

        let span = t.ping_to_ignore_all_weapons - t.ping_to_start_ignoring_weapons;
        let permille = if stats.avg_ping_ms <= t.ping_to_start_ignoring_weapons || span <= 0 {
            0
        } else if stats.avg_ping_ms >= t.ping_to_ignore_all_weapons {
            1000
        } else {
            (stats.avg_ping_ms - t.ping_to_start_ignoring_weapons) * 1000 / span
        };
        self.actions.set_ignore_weapons(id, permille);
        self.actions
            .set_disallow_flags(id, stats.avg_ping_ms > t.ping_to_disallow_flags);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct FakeQuery {
        stats: Mutex<HashMap<PlayerId, LagStats>>,
    }

    impl LagQuery for FakeQuery {
        fn current(&self, player: PlayerId) -> Option<LagStats> {
            self.stats.lock().unwrap().get(&player).copied()
        }
    }

    #[derive(Default)]
    struct RecordedActions {
        specced: Mutex<Vec<PlayerId>>,
        weapons: Mutex<Vec<(PlayerId, i32)>>,
        flags: Mutex<Vec<(PlayerId, bool)>>,
    }

    impl GameActions for RecordedActions {
        fn spec_player(&self, player: PlayerId) {
            self.specced.lock().unwrap().push(player);
        }

        fn set_ignore_weapons(&self, player: PlayerId, permille: i32) {
            self.weapons.lock().unwrap().push((player, permille));
        }

        fn set_disallow_flags(&self, player: PlayerId, disallow: bool) {
            self.flags.lock().unwrap().push((player, disallow));
        }
    }

    struct Fixture {
        players: Arc<PlayerManager>,
        mainloop: Arc<MainLoop>,
        mainloop_thread: Option<std::thread::JoinHandle<i32>>,
        query: Arc<FakeQuery>,
        actions: Arc<RecordedActions>,
        sampler: LagSampler,
    }

    impl Fixture {
        fn new() -> Self {
            let players = PlayerManager::new();
            let mainloop = MainLoop::new();
            let query = Arc::new(FakeQuery::default());
            let actions = Arc::new(RecordedActions::default());
            let thresholds = LagThresholds {
                check_interval: Duration::from_millis(10),
                ..Default::default()
            };
            let sampler = LagSampler::new(
                Arc::clone(&players),
                Arc::clone(&mainloop),
                Arc::clone(&query) as Arc<dyn LagQuery>,
                Arc::clone(&actions) as Arc<dyn GameActions>,
                thresholds,
            );
            let loop_handle = {
                let inner = Arc::clone(&mainloop);
                std::thread::spawn(move || inner.run())
            };
            Self {
                players,
                mainloop,
                mainloop_thread: Some(loop_handle),
                query,
                actions,
                sampler,
            }
        }

        fn playing_player(&self, name: &str, stats: LagStats) -> PlayerId {
            let player = self.players.connect(name, true);
            let id = {
                let mut guard = player.write().unwrap();
                guard.status = PlayerStatus::Playing;
                guard.id
            };
            self.query.stats.lock().unwrap().insert(id, stats);
            id
        }

        fn wait_until(&self, mut predicate: impl FnMut() -> bool) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !predicate() {
                assert!(Instant::now() < deadline, "timed out waiting for lag actions");
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.sampler.shutdown();
            self.mainloop.quit(0);
            if let Some(handle) = self.mainloop_thread.take() {
                let _ = handle.join();
            }
        }
    }

    #[test]
    pub fn severe_lag_forces_the_player_to_spectator() {
        let fixture = Fixture::new();
        let id = fixture.playing_player(
            "Laggy",
            LagStats {
                avg_ping_ms: 2000,
                ..Default::default()
            },
        );
        fixture.wait_until(|| fixture.actions.specced.lock().unwrap().contains(&id));
    }

    #[test]
    pub fn moderate_ping_scales_ignored_weapons() {
        let fixture = Fixture::new();
        // defaults: ignoring starts at 300, everything ignored at 800
        let id = fixture.playing_player(
            "Mid",
            LagStats {
                avg_ping_ms: 550,
                ..Default::default()
            },
        );
        fixture.wait_until(|| !fixture.actions.weapons.lock().unwrap().is_empty());
        let (who, permille) = fixture.actions.weapons.lock().unwrap()[0];
        assert_eq!(who, id);
        assert_eq!(permille, 500);
        // 550 > PingToDisallowFlags (500)
        fixture.wait_until(|| !fixture.actions.flags.lock().unwrap().is_empty());
        assert_eq!(fixture.actions.flags.lock().unwrap()[0], (id, true));
        assert!(fixture.actions.specced.lock().unwrap().is_empty());
    }

    #[test]
    pub fn players_are_rechecked_round_robin() {
        let fixture = Fixture::new();
        let id = fixture.playing_player(
            "Fine",
            LagStats {
                avg_ping_ms: 100,
                ..Default::default()
            },
        );
        // the same player is revisited once its cooldown elapses, so the
        // bookkeeping (is_checking, last_check) must be getting restored
        fixture.wait_until(|| {
            fixture
                .actions
                .weapons
                .lock()
                .unwrap()
                .iter()
                .filter(|(who, _)| *who == id)
                .count()
                >= 2
        });
    }

    #[test]
    pub fn non_standard_clients_are_skipped() {
        let fixture = Fixture::new();
        let bot = fixture.players.connect("Bot", false);
        let id = {
            let mut guard = bot.write().unwrap();
            guard.status = PlayerStatus::Playing;
            guard.id
        };
        fixture.query.stats.lock().unwrap().insert(
            id,
            LagStats {
                avg_ping_ms: 5000,
                ..Default::default()
            },
        );
        std::thread::sleep(Duration::from_millis(100));
        assert!(fixture.actions.specced.lock().unwrap().is_empty());
    }
}
