//! The parallel timer service: the same timer surface as the mainloop, but
//! ticks run on the worker pool.
//!
//! A dedicated scheduler thread watches the deadlines and dispatches due
//! ticks as blocking pool tasks. Each timer carries its own armed/executing
//! guard, so a tick never overlaps itself even when it runs long.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::warn;

use super::{TimerCallback, TimerId, TimerKey, TimerTag};
use crate::prelude::*;

struct PoolTimer {
    id: TimerId,
    tag: TimerTag,
    key: Option<TimerKey>,
    when_due: Instant,
    /// `None` for one-shot timers.
    interval: Option<Duration>,
    stop: bool,
    executing: bool,
    callback: Arc<Mutex<TimerCallback>>,
}

struct PoolState {
    timers: Vec<PoolTimer>,
    next_timer_id: u64,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Signaled on new timers, re-arms and shutdown.
    wake: Condvar,
    /// Signaled when an executing tick has been retired or re-armed.
    tick_done: Condvar,
    pool: tokio::runtime::Handle,
}

/// Schedules timers whose callbacks run on worker-pool threads.
pub struct PoolTimerService {
    shared: Arc<PoolShared>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    next_tag: AtomicU64,
}

impl PoolTimerService {
    /// Starts the scheduler thread against the given worker pool.
    pub fn new(pool: tokio::runtime::Handle) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                timers: Vec::new(),
                next_timer_id: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
            tick_done: Condvar::new(),
            pool,
        });
        let thread_shared = Arc::clone(&shared);
        let scheduler = std::thread::Builder::new()
            .name("SW Pool Timer Scheduler".to_owned())
            .spawn(move || PoolShared::scheduler_main(thread_shared))
            .expect("Could not create the pool timer scheduler thread");
        Self {
            shared,
            scheduler: Mutex::new(Some(scheduler)),
            next_tag: AtomicU64::new(0),
        }
    }

    /// Allocates a fresh timer tag scoped to this service.
    pub fn new_timer_tag(&self) -> TimerTag {
        TimerTag(self.next_tag.fetch_add(1, AtomicOrdering::Relaxed) + 1)
    }

    /// Schedules a pool timer; see
    /// [`MainLoop::set_timer`](super::MainLoop::set_timer) for the tick
    /// contract. A tick returning `Err` is logged and not rescheduled.
    pub fn set_timer<F: FnMut() -> Result<bool> + Send + 'static>(
        &self,
        callback: F,
        initial_delay: Duration,
        interval: Option<Duration>,
        tag: TimerTag,
        key: Option<TimerKey>,
    ) -> TimerId {
        let mut state = self.shared.state.lock().unwrap();
        state.next_timer_id += 1;
        let id = TimerId(state.next_timer_id);
        state.timers.push(PoolTimer {
            id,
            tag,
            key,
            when_due: Instant::now() + initial_delay,
            interval,
            stop: false,
            executing: false,
            callback: Arc::new(Mutex::new(Box::new(callback))),
        });
        self.shared.wake.notify_all();
        id
    }

    /// Removes every timer of `tag` (restricted to `key` when given).
    /// With `wait` set, blocks until any currently executing matching tick
    /// has completed. `cleanup` runs once per removed timer with its key.
    pub fn clear_timers(
        &self,
        tag: TimerTag,
        key: Option<TimerKey>,
        wait: bool,
        mut cleanup: Option<&mut dyn FnMut(Option<TimerKey>)>,
    ) {
        let matches = move |t: &PoolTimer| t.tag == tag && (key.is_none() || t.key == key);
        let mut removed: SmallVec<[Option<TimerKey>; 8]> = SmallVec::new();

        let mut state = self.shared.state.lock().unwrap();
        let mut i = 0;
        while i < state.timers.len() {
            if matches(&state.timers[i]) {
                if state.timers[i].executing {
                    // retired by its own tick once it returns
                    state.timers[i].stop = true;
                    removed.push(state.timers[i].key);
                    i += 1;
                } else {
                    let t = state.timers.remove(i);
                    removed.push(t.key);
                }
            } else {
                i += 1;
            }
        }
        if wait {
            while state.timers.iter().any(|t| t.executing && matches(t)) {
                state = self.shared.tick_done.wait(state).unwrap();
            }
        }
        drop(state);

        if let Some(cleanup) = cleanup.as_mut() {
            for k in removed {
                cleanup(k);
            }
        }
    }

    /// Stops the scheduler thread. Already dispatched ticks finish on the
    /// pool; nothing further is dispatched.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.scheduler.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl PoolShared {
    fn scheduler_main(shared: Arc<PoolShared>) {
        let mut state = shared.state.lock().unwrap();
        loop {
            if state.shutdown {
                return;
            }
            let now = Instant::now();
            for timer in state
                .timers
                .iter_mut()
                .filter(|t| !t.executing && !t.stop && t.when_due <= now)
            {
                timer.executing = true;
                let id = timer.id;
                let callback = Arc::clone(&timer.callback);
                let tick_shared = Arc::clone(&shared);
                shared
                    .pool
                    .spawn_blocking(move || Self::run_tick(tick_shared, id, callback));
            }

            let deadline = state
                .timers
                .iter()
                .filter(|t| !t.executing && !t.stop)
                .map(|t| t.when_due)
                .min();
            match deadline {
                Some(due) => {
                    let now = Instant::now();
                    if due > now {
                        let (s, _timeout) = shared.wake.wait_timeout(state, due - now).unwrap();
                        state = s;
                    }
                }
                None => {
                    state = shared.wake.wait(state).unwrap();
                }
            }
        }
    }

    fn run_tick(shared: Arc<PoolShared>, id: TimerId, callback: Arc<Mutex<TimerCallback>>) {
        let keep = match (callback.lock().unwrap())() {
            Ok(keep) => keep,
            Err(error) => {
                warn!("pool timer tick failed, not rescheduling: {error:#}");
                false
            }
        };

        let mut state = shared.state.lock().unwrap();
        if let Some(idx) = state.timers.iter().position(|t| t.id == id) {
            let timer = &mut state.timers[idx];
            timer.executing = false;
            match timer.interval {
                Some(interval) if keep && !timer.stop => {
                    timer.when_due = Instant::now() + interval;
                }
                _ => {
                    state.timers.remove(idx);
                }
            }
        }
        shared.wake.notify_all();
        shared.tick_done.notify_all();
    }
}
