#![warn(missing_docs)]
#![deny(clippy::disallowed_types, clippy::await_holding_lock)]

//! The Subwar zone server runtime: the mainloop and its timer scheduler,
//! the component broker, the entity model, the persistence subsystem, the
//! client settings service and the lag sampler.

pub mod broker;
pub mod config;
pub mod dedicated_server;
pub mod entity;
pub mod lag;
pub mod mainloop;
pub mod net;
pub mod persist;
pub mod prelude;
pub mod settings;

use std::path::PathBuf;
use std::time::Duration;

use smart_default::SmartDefault;
use tracing::info;

use crate::broker::ComponentBroker;
use crate::config::{ConfigHandle, PersistConfig};
use crate::entity::{ArenaHandle, ArenaManager, ArenaStatus, PlayerHandle, PlayerManager};
use crate::lag::{GameActions, LagQuery, LagSampler, LagThresholds};
use crate::mainloop::pool::PoolTimerService;
use crate::mainloop::MainLoop;
use crate::net::{NetworkLink, RecordingLink};
use crate::persist::PersistService;
use crate::prelude::*;
use crate::settings::ClientSettings;
use sw_schemas::PlayerId;

/// How often the mainloop polls arena config subscriptions for changes.
const CONFIG_POLL_PERIOD: Duration = Duration::from_millis(500);

/// Construction options for a [`ZoneServer`].
#[derive(SmartDefault)]
pub struct ZoneOptions {
    /// Directory holding the zone database.
    #[default(PathBuf::from("data"))]
    pub data_dir: PathBuf,
    /// The global (zone-wide) config scope.
    pub global_config: ConfigHandle,
    /// The wire transport; a recording stub is used when absent so the
    /// server can come up without one.
    pub network: Option<Arc<dyn NetworkLink>>,
    /// Lag statistics source; the lag sampler only starts when both this
    /// and `game_actions` are present.
    pub lag_query: Option<Arc<dyn LagQuery>>,
    /// Lag corrective actions sink.
    pub game_actions: Option<Arc<dyn GameActions>>,
}

/// The zone server composition root: owns the mainloop, the worker pool,
/// the broker, the entity managers and the core services, and ties their
/// startup and shutdown together.
pub struct ZoneServer {
    mainloop: Arc<MainLoop>,
    pool_timers: PoolTimerService,
    broker: Arc<ComponentBroker>,
    players: Arc<PlayerManager>,
    arenas: Arc<ArenaManager>,
    persist: Arc<PersistService>,
    settings: Arc<ClientSettings>,
    lag: Option<LagSampler>,
    global_config: ConfigHandle,
    /// Keeps the worker pool alive for the pool timer service.
    _worker_pool: tokio::runtime::Runtime,
}

impl ZoneServer {
    /// Builds the server: opens the datastore, starts the worker threads and
    /// installs the config poll timer. The mainloop does not run until
    /// [`Self::run`] is called.
    pub fn new(options: ZoneOptions) -> Result<Arc<Self>> {
        let mainloop = MainLoop::new();
        let worker_pool = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .thread_name("SW Worker")
            .build()
            .context("could not initialize the worker pool")?;
        let pool_timers = PoolTimerService::new(worker_pool.handle().clone());

        let broker = ComponentBroker::new();
        let players = PlayerManager::new();
        let arenas = ArenaManager::new();

        let network = options.network.unwrap_or_else(|| {
            info!("no transport registered, using the recording stub");
            Arc::new(RecordingLink::default()) as Arc<dyn NetworkLink>
        });
        broker.register::<dyn NetworkLink>(Arc::clone(&network), None);

        let persist_config = PersistConfig::from_scope(&options.global_config.current());
        let persist = PersistService::new(
            Arc::clone(&mainloop),
            Arc::clone(&players),
            Arc::clone(&arenas),
            &options.data_dir,
            persist_config,
        )?;

        let settings = ClientSettings::new(Arc::clone(&players), Arc::clone(&arenas), network);

        let lag = match (options.lag_query, options.game_actions) {
            (Some(query), Some(actions)) => Some(LagSampler::new(
                Arc::clone(&players),
                Arc::clone(&mainloop),
                query,
                actions,
                LagThresholds::from_scope(&options.global_config.current()),
            )),
            _ => {
                info!("lag sampler disabled: no lag query / game actions wired");
                None
            }
        };

        // poll arena config subscriptions from the mainloop
        let poll_tag = mainloop.new_timer_tag();
        {
            let settings = Arc::clone(&settings);
            mainloop.set_timer(
                move || {
                    settings.poll_config_changes();
                    Ok(true)
                },
                CONFIG_POLL_PERIOD,
                Some(CONFIG_POLL_PERIOD),
                poll_tag,
                None,
            );
        }

        Ok(Arc::new(Self {
            mainloop,
            pool_timers,
            broker,
            players,
            arenas,
            persist,
            settings,
            lag,
            global_config: options.global_config,
            _worker_pool: worker_pool,
        }))
    }

    /// Runs the mainloop on the calling thread; returns the process exit
    /// code once [`Self::quit`] has been processed and the background
    /// services have shut down in order.
    pub fn run(&self) -> i32 {
        info!("mainloop starting");
        let code = self.mainloop.run();
        info!(code, "mainloop stopped, shutting down services");
        if let Some(lag) = &self.lag {
            lag.shutdown();
        }
        self.pool_timers.shutdown();
        self.persist.shutdown();
        code
    }

    /// Asks the mainloop to exit with the given code.
    pub fn quit(&self, code: i32) {
        self.mainloop.quit(code);
    }

    /// Creates an arena (idempotent per name), loads its client settings and
    /// queues its persistent data load; the arena goes `Running` when the
    /// load completes.
    pub fn create_arena(&self, name: &str, config: ConfigHandle) -> ArenaHandle {
        let arena = self.arenas.create(name, config);
        self.settings.load_arena(&arena);
        let loaded = Arc::clone(&arena);
        let queued = self.persist.get_arena(
            Some(Arc::clone(&arena)),
            Box::new(move || {
                let mut guard = loaded.write().unwrap();
                if guard.status == ArenaStatus::Loading {
                    guard.status = ArenaStatus::Running;
                    info!(arena = %guard.name, "arena running");
                }
            }),
        );
        if queued.is_err() {
            arena.write().unwrap().status = ArenaStatus::Running;
        }
        arena
    }

    /// Begins destroying an arena: saves its persistent data, then tears it
    /// down on the mainloop.
    pub fn destroy_arena(&self, name: &str) {
        let Some(arena) = self.arenas.get(name) else {
            return;
        };
        arena.write().unwrap().status = ArenaStatus::Closing;
        let arenas = Arc::clone(&self.arenas);
        let doomed = Arc::clone(&arena);
        let queued = self.persist.put_arena(
            Some(arena),
            Box::new(move || {
                let name = doomed.read().unwrap().name.clone();
                arenas.destroy(name.as_str());
            }),
        );
        if queued.is_err() {
            self.arenas.destroy(name);
        }
    }

    /// Admits a new player connection.
    pub fn connect_player(&self, name: &str, standard_client: bool) -> PlayerHandle {
        self.players.connect(name, standard_client)
    }

    /// Saves a player's zone-wide data and completes the disconnect.
    pub fn disconnect_player(&self, id: PlayerId) {
        let Some(player) = self.players.get(id) else {
            return;
        };
        let players = Arc::clone(&self.players);
        let queued = self.persist.put_player(
            player,
            None,
            Box::new(move || {
                players.disconnect(id);
            }),
        );
        if queued.is_err() {
            self.players.disconnect(id);
        }
    }

    /// The mainloop handle.
    pub fn mainloop(&self) -> &Arc<MainLoop> {
        &self.mainloop
    }

    /// The parallel timer service.
    pub fn pool_timers(&self) -> &PoolTimerService {
        &self.pool_timers
    }

    /// The interface broker.
    pub fn broker(&self) -> &Arc<ComponentBroker> {
        &self.broker
    }

    /// The player manager.
    pub fn players(&self) -> &Arc<PlayerManager> {
        &self.players
    }

    /// The arena manager.
    pub fn arenas(&self) -> &Arc<ArenaManager> {
        &self.arenas
    }

    /// The persistence service.
    pub fn persist(&self) -> &Arc<PersistService> {
        &self.persist
    }

    /// The client settings service.
    pub fn settings(&self) -> &Arc<ClientSettings> {
        &self.settings
    }

    /// The global config scope handle.
    pub fn global_config(&self) -> &ConfigHandle {
        &self.global_config
    }
}

impl Drop for ZoneServer {
    fn drop(&mut self) {
        // idempotent with the shutdown sequence in `run`
        if let Some(lag) = &self.lag {
            lag.shutdown();
        }
        self.pool_timers.shutdown();
        self.persist.shutdown();
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::entity::PlayerStatus;

    fn test_server() -> (tempfile::TempDir, Arc<ZoneServer>) {
        let dir = tempfile::tempdir().unwrap();
        let server = ZoneServer::new(ZoneOptions {
            data_dir: dir.path().to_owned(),
            ..Default::default()
        })
        .unwrap();
        (dir, server)
    }

    #[test]
    pub fn run_returns_the_quit_code_after_shutdown() {
        let (_dir, server) = test_server();
        let runner = Arc::clone(&server);
        let handle = std::thread::spawn(move || runner.run());

        server.quit(7);
        assert_eq!(handle.join().unwrap(), 7);
        // sealed after quit
        assert!(!server.mainloop().queue_work(|| {}));
    }

    #[test]
    pub fn arenas_come_up_running_and_serve_settings() {
        let (_dir, server) = test_server();
        let runner = Arc::clone(&server);
        let handle = std::thread::spawn(move || runner.run());

        let mut scope = config::ConfigScope::new();
        scope.set("Ship0", "InitialBombs", "2");
        let arena = server.create_arena("turf", ConfigHandle::new(scope));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while arena.read().unwrap().status != ArenaStatus::Running {
            assert!(std::time::Instant::now() < deadline, "arena never went running");
            std::thread::sleep(Duration::from_millis(5));
        }

        let player = server.connect_player("Alpha", true);
        {
            let mut guard = player.write().unwrap();
            guard.status = PlayerStatus::Playing;
            guard.arena = Some(Arc::clone(&arena));
        }
        server.settings().send_to_player(&player);
        let id = server
            .settings()
            .setting_identifier("Ship0", "InitialBombs")
            .unwrap();
        assert_eq!(server.settings().player_setting(&player, &id), Some(2));

        let player_id = player.read().unwrap().id;
        server.disconnect_player(player_id);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while server.players().get(player_id).is_some() {
            assert!(std::time::Instant::now() < deadline, "player never disconnected");
            std::thread::sleep(Duration::from_millis(5));
        }

        server.quit(0);
        assert_eq!(handle.join().unwrap(), 0);
    }
}
