//! The mainloop thread: a cooperative scheduler driving deferred work items
//! and timers, plus process-wide exit semantics.
//!
//! All gameplay callbacks run on the single mainloop thread. Other threads
//! only ever hand work to it through [`MainLoop::queue_work`]; the loop
//! drains pending work first (bounded per pass so timers cannot starve) and
//! then fires every due timer, strictly one tick in flight at a time.

pub mod pool;

use std::collections::VecDeque;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::warn;

use crate::prelude::*;

/// A deferred closure to run on the mainloop thread.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// A timer tick. `Ok(true)` keeps a repeating timer armed; `Ok(false)` or an
/// error removes it. Errors are logged and never stop the loop.
pub type TimerCallback = Box<dyn FnMut() -> Result<bool> + Send + 'static>;

/// Caller-supplied discriminator to clear a subset of one tag's timers.
pub type TimerKey = u64;

/// Stands in for "callback identity": every module (or purpose) allocates a
/// tag once and sets all of its timers under it, so it can later clear them
/// without handles to the individual timers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TimerTag(u64);

/// Identity of one scheduled timer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TimerId(u64);

struct MainTimer {
    id: TimerId,
    tag: TimerTag,
    key: Option<TimerKey>,
    when_due: Instant,
    /// `None` for one-shot timers.
    interval: Option<Duration>,
    /// Set by a pending clear; the tick result is discarded and the node removed.
    stop: bool,
    /// Taken out while the tick executes.
    callback: Option<TimerCallback>,
}

struct LoopState {
    work: VecDeque<WorkItem>,
    sealed: bool,
    exit_code: Option<i32>,
    timers: Vec<MainTimer>,
    next_timer_id: u64,
    /// Timer currently executing its tick on the mainloop thread.
    in_flight: Option<TimerId>,
}

/// The cooperative mainloop and its timer scheduler.
///
/// [`MainLoop::run`] blocks the calling thread, which becomes *the* mainloop
/// thread until [`MainLoop::quit`] is processed.
pub struct MainLoop {
    state: Mutex<LoopState>,
    /// Signaled on new work, new timer and quit.
    wake: Condvar,
    /// Signaled after an in-flight tick has been retired or re-armed.
    tick_done: Condvar,
    main_thread: Mutex<Option<ThreadId>>,
    next_tag: AtomicU64,
}

impl Default for MainLoop {
    fn default() -> Self {
        Self {
            state: Mutex::new(LoopState {
                work: VecDeque::new(),
                sealed: false,
                exit_code: None,
                timers: Vec::new(),
                next_timer_id: 0,
                in_flight: None,
            }),
            wake: Condvar::new(),
            tick_done: Condvar::new(),
            main_thread: Mutex::new(None),
            next_tag: AtomicU64::new(0),
        }
    }
}

impl MainLoop {
    /// Constructs a fresh, un-run loop.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether the caller is the mainloop thread.
    pub fn is_mainloop(&self) -> bool {
        *self.main_thread.lock().unwrap() == Some(std::thread::current().id())
    }

    /// Allocates a fresh timer tag.
    pub fn new_timer_tag(&self) -> TimerTag {
        TimerTag(self.next_tag.fetch_add(1, AtomicOrdering::Relaxed) + 1)
    }

    /// Enqueues a closure to run on the mainloop thread.
    /// Returns `false` iff the queue has been sealed by [`Self::quit`].
    pub fn queue_work<F: FnOnce() + Send + 'static>(&self, work: F) -> bool {
        self.queue_work_boxed(Box::new(work)).is_ok()
    }

    /// Non-generic version of [`Self::queue_work`]; hands the item back when
    /// the queue is sealed so the caller can dispose of it (or run it
    /// elsewhere as a last effort).
    pub fn queue_work_boxed(&self, work: WorkItem) -> std::result::Result<(), WorkItem> {
        let mut state = self.state.lock().unwrap();
        if state.sealed {
            return Err(work);
        }
        state.work.push_back(work);
        self.wake.notify_all();
        Ok(())
    }

    /// Seals the work queue, stores the exit code and wakes the loop.
    /// Work already queued still runs before [`Self::run`] returns.
    pub fn quit(&self, code: i32) {
        let mut state = self.state.lock().unwrap();
        state.sealed = true;
        if state.exit_code.is_none() {
            state.exit_code = Some(code);
        }
        self.wake.notify_all();
    }

    /// Waits until every work item queued before this call has run.
    /// On the mainloop thread this drains the queue in place; on any other
    /// thread it blocks on a sentinel item (returning immediately if the
    /// queue is already sealed).
    pub fn wait_for_drain(&self) {
        if self.is_mainloop() {
            let mut state = self.state.lock().unwrap();
            state = self.drain_work(state, usize::MAX);
            drop(state);
            return;
        }
        let (tx, rx) = std_bounded_channel::<()>(1);
        if self.queue_work(move || {
            let _ = tx.send(());
        }) {
            let _ = rx.recv();
        }
    }

    /// Schedules a timer on the mainloop thread. The first tick fires after
    /// `initial_delay`; `interval = None` makes it one-shot, otherwise the
    /// timer re-arms `interval` after each completed tick.
    pub fn set_timer<F: FnMut() -> Result<bool> + Send + 'static>(
        &self,
        callback: F,
        initial_delay: Duration,
        interval: Option<Duration>,
        tag: TimerTag,
        key: Option<TimerKey>,
    ) -> TimerId {
        let mut state = self.state.lock().unwrap();
        state.next_timer_id += 1;
        let id = TimerId(state.next_timer_id);
        state.timers.push(MainTimer {
            id,
            tag,
            key,
            when_due: Instant::now() + initial_delay,
            interval,
            stop: false,
            callback: Some(Box::new(callback)),
        });
        self.wake.notify_all();
        id
    }

    /// Removes every timer of `tag` (restricted to `key` when given).
    ///
    /// Synchronous with respect to in-flight ticks: if a matching tick is
    /// executing on the mainloop thread, the caller blocks until it has
    /// completed, so after this returns the callback neither runs nor will
    /// run again. The exception is clearing from the mainloop thread itself
    /// (a tick clearing its own timer): the in-flight node is only marked to
    /// stop and is retired when its tick returns.
    ///
    /// `cleanup` is invoked once per *removed* timer with its key.
    pub fn clear_timers(
        &self,
        tag: TimerTag,
        key: Option<TimerKey>,
        mut cleanup: Option<&mut dyn FnMut(Option<TimerKey>)>,
    ) {
        let on_mainloop = self.is_mainloop();
        let matches =
            move |t: &MainTimer| t.tag == tag && (key.is_none() || t.key == key);
        let mut removed: SmallVec<[Option<TimerKey>; 8]> = SmallVec::new();

        let mut state = self.state.lock().unwrap();
        loop {
            let Some(infl_id) = state.in_flight else { break };
            let Some(idx) = state.timers.iter().position(|t| t.id == infl_id) else {
                break;
            };
            if !matches(&state.timers[idx]) {
                break;
            }
            state.timers[idx].stop = true;
            if on_mainloop {
                // A tick clearing itself cannot wait for its own return; the
                // node is retired when the tick returns, but it is removed by
                // this clear and gets its cleanup like any other.
                removed.push(state.timers[idx].key);
                break;
            }
            let infl_key = state.timers[idx].key;
            while state.in_flight == Some(infl_id) {
                state = self.tick_done.wait(state).unwrap();
            }
            // The stop mark guarantees the node was retired, not re-armed.
            removed.push(infl_key);
        }

        let in_flight = state.in_flight;
        let mut i = 0;
        while i < state.timers.len() {
            if Some(state.timers[i].id) != in_flight && matches(&state.timers[i]) {
                let t = state.timers.remove(i);
                removed.push(t.key);
            } else {
                i += 1;
            }
        }
        drop(state);

        if let Some(cleanup) = cleanup.as_mut() {
            for k in removed {
                cleanup(k);
            }
        }
    }

    /// Blocks on the calling thread, which becomes the mainloop thread;
    /// returns the exit code once [`Self::quit`] has been called and the
    /// pending work queue has drained.
    pub fn run(&self) -> i32 {
        *self.main_thread.lock().unwrap() = Some(std::thread::current().id());
        let code = self.run_inner();
        *self.main_thread.lock().unwrap() = None;
        code
    }

    fn run_inner(&self) -> i32 {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.sealed {
                state = self.drain_work(state, usize::MAX);
                return state.exit_code.unwrap_or(0);
            }

            if state.work.is_empty() {
                let now = Instant::now();
                let deadline = state
                    .timers
                    .iter()
                    .filter(|t| t.callback.is_some() && !t.stop)
                    .map(|t| t.when_due)
                    .min();
                match deadline {
                    Some(due) if due <= now => {}
                    Some(due) => {
                        let (s, _timeout) = self.wake.wait_timeout(state, due - now).unwrap();
                        state = s;
                    }
                    None => {
                        state = self.wake.wait(state).unwrap();
                    }
                }
            }

            // First drain work, bounded by the count observed on wake so a
            // self-requeueing item cannot starve the timers.
            let observed = state.work.len();
            state = self.drain_work(state, observed);

            state = self.run_due_timers(state);
        }
    }

    fn drain_work<'l>(
        &'l self,
        mut state: MutexGuard<'l, LoopState>,
        limit: usize,
    ) -> MutexGuard<'l, LoopState> {
        let mut ran = 0;
        while ran < limit {
            let Some(item) = state.work.pop_front() else { break };
            drop(state);
            item();
            state = self.state.lock().unwrap();
            ran += 1;
        }
        state
    }

    fn run_due_timers<'l>(
        &'l self,
        mut state: MutexGuard<'l, LoopState>,
    ) -> MutexGuard<'l, LoopState> {
        loop {
            let now = Instant::now();
            let Some(idx) = state
                .timers
                .iter()
                .position(|t| t.callback.is_some() && !t.stop && t.when_due <= now)
            else {
                break;
            };
            let id = state.timers[idx].id;
            let interval = state.timers[idx].interval;
            let mut callback = state.timers[idx].callback.take().unwrap();
            state.in_flight = Some(id);
            drop(state);

            let keep = match callback() {
                Ok(keep) => keep,
                Err(error) => {
                    warn!("timer tick failed, not rescheduling: {error:#}");
                    false
                }
            };

            state = self.state.lock().unwrap();
            state.in_flight = None;
            if let Some(idx) = state.timers.iter().position(|t| t.id == id) {
                let stop = state.timers[idx].stop;
                match interval {
                    Some(interval) if keep && !stop => {
                        let timer = &mut state.timers[idx];
                        timer.callback = Some(callback);
                        timer.when_due = Instant::now() + interval;
                    }
                    _ => {
                        state.timers.remove(idx);
                    }
                }
            }
            self.tick_done.notify_all();
        }
        state
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::*;

    fn start(loop_: &Arc<MainLoop>) -> std::thread::JoinHandle<i32> {
        let inner = Arc::clone(loop_);
        std::thread::spawn(move || inner.run())
    }

    #[test]
    pub fn quit_seals_the_queue_and_returns_the_code() {
        let ml = MainLoop::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        assert!(ml.queue_work(move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        }));

        let handle = start(&ml);
        ml.wait_for_drain();
        ml.quit(3);
        assert_eq!(handle.join().unwrap(), 3);
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 1);
        // sealed now
        assert!(!ml.queue_work(|| {}));
    }

    #[test]
    pub fn work_queued_before_quit_still_runs() {
        let ml = MainLoop::new();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&ran);
            assert!(ml.queue_work(move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            }));
        }
        ml.quit(0);
        let handle = start(&ml);
        assert_eq!(handle.join().unwrap(), 0);
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 16);
    }

    #[test]
    pub fn slow_ticks_never_overlap_and_are_bounded() {
        let ml = MainLoop::new();
        let handle = start(&ml);
        let tag = ml.new_timer_tag();

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let count = Arc::new(AtomicUsize::new(0));
        {
            let (active, peak, count) = (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&count));
            ml.set_timer(
                move || {
                    let now_active = active.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                    peak.fetch_max(now_active, AtomicOrdering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    active.fetch_sub(1, AtomicOrdering::SeqCst);
                    count.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(true)
                },
                Duration::from_millis(1),
                Some(Duration::from_millis(1)),
                tag,
                None,
            );
        }

        std::thread::sleep(Duration::from_millis(200));
        ml.quit(0);
        handle.join().unwrap();

        assert_eq!(peak.load(AtomicOrdering::SeqCst), 1);
        assert!(count.load(AtomicOrdering::SeqCst) <= 5);
    }

    #[test]
    pub fn one_shot_and_failing_timers_are_retired() {
        let ml = MainLoop::new();
        let handle = start(&ml);
        let tag = ml.new_timer_tag();

        let one_shot = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&one_shot);
            ml.set_timer(
                move || {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(true) // ignored: no interval means one-shot
                },
                Duration::from_millis(1),
                None,
                tag,
                Some(1),
            );
        }
        let failing = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&failing);
            ml.set_timer(
                move || {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                    anyhow::bail!("tick exploded")
                },
                Duration::from_millis(1),
                Some(Duration::from_millis(1)),
                tag,
                Some(2),
            );
        }

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(one_shot.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(failing.load(AtomicOrdering::SeqCst), 1);

        ml.quit(0);
        handle.join().unwrap();
    }

    #[test]
    pub fn clear_waits_for_the_inflight_tick() {
        let ml = MainLoop::new();
        let handle = start(&ml);
        let tag = ml.new_timer_tag();

        let ticking = Arc::new(AtomicBool::new(false));
        let count = Arc::new(AtomicUsize::new(0));
        {
            let (ticking, count) = (Arc::clone(&ticking), Arc::clone(&count));
            ml.set_timer(
                move || {
                    ticking.store(true, AtomicOrdering::SeqCst);
                    std::thread::sleep(Duration::from_millis(60));
                    ticking.store(false, AtomicOrdering::SeqCst);
                    count.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(true)
                },
                Duration::from_millis(1),
                Some(Duration::from_millis(1)),
                tag,
                None,
            );
        }

        // Let the first tick begin, then clear against it.
        while !ticking.load(AtomicOrdering::SeqCst) {
            std::thread::yield_now();
        }
        let mut cleaned = 0;
        ml.clear_timers(tag, None, Some(&mut |_key| cleaned += 1));
        // After clear returns the tick is not running and never runs again.
        assert!(!ticking.load(AtomicOrdering::SeqCst));
        assert_eq!(cleaned, 1);
        let after_clear = count.load(AtomicOrdering::SeqCst);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(AtomicOrdering::SeqCst), after_clear);

        ml.quit(0);
        handle.join().unwrap();
    }

    #[test]
    pub fn a_tick_may_clear_its_own_timer() {
        let ml = MainLoop::new();
        let handle = start(&ml);
        let tag = ml.new_timer_tag();

        let count = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&count);
            let inner = Arc::clone(&ml);
            ml.set_timer(
                move || {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                    // must not deadlock
                    inner.clear_timers(tag, None, None);
                    Ok(true)
                },
                Duration::from_millis(1),
                Some(Duration::from_millis(1)),
                tag,
                None,
            );
        }

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
        ml.quit(0);
        handle.join().unwrap();
    }

    #[test]
    pub fn a_self_clearing_tick_still_gets_its_cleanup() {
        let ml = MainLoop::new();
        let handle = start(&ml);
        let tag = ml.new_timer_tag();

        let count = Arc::new(AtomicUsize::new(0));
        let cleaned = Arc::new(AtomicUsize::new(0));
        {
            let (count, cleaned) = (Arc::clone(&count), Arc::clone(&cleaned));
            let inner = Arc::clone(&ml);
            ml.set_timer(
                move || {
                    count.fetch_add(1, AtomicOrdering::SeqCst);
                    inner.clear_timers(
                        tag,
                        None,
                        Some(&mut |key| {
                            assert_eq!(key, Some(5));
                            cleaned.fetch_add(1, AtomicOrdering::SeqCst);
                        }),
                    );
                    Ok(true)
                },
                Duration::from_millis(1),
                Some(Duration::from_millis(1)),
                tag,
                Some(5),
            );
        }

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(cleaned.load(AtomicOrdering::SeqCst), 1);
        ml.quit(0);
        handle.join().unwrap();
    }

    #[test]
    pub fn clear_with_a_key_only_removes_that_key() {
        let ml = MainLoop::new();
        let tag = ml.new_timer_tag();
        let other_tag = ml.new_timer_tag();
        ml.set_timer(|| Ok(true), Duration::from_secs(60), None, tag, Some(1));
        ml.set_timer(|| Ok(true), Duration::from_secs(60), None, tag, Some(2));
        ml.set_timer(|| Ok(true), Duration::from_secs(60), None, other_tag, Some(1));

        let mut removed = Vec::new();
        ml.clear_timers(tag, Some(1), Some(&mut |key| removed.push(key)));
        assert_eq!(removed, vec![Some(1)]);

        removed.clear();
        ml.clear_timers(tag, None, Some(&mut |key| removed.push(key)));
        assert_eq!(removed, vec![Some(2)]);

        removed.clear();
        ml.clear_timers(other_tag, None, Some(&mut |key| removed.push(key)));
        assert_eq!(removed, vec![Some(1)]);
    }

    #[test]
    pub fn wait_for_drain_observes_prior_work() {
        let ml = MainLoop::new();
        let handle = start(&ml);

        let stamp = Arc::new(Mutex::new(None::<Instant>));
        {
            let stamp = Arc::clone(&stamp);
            ml.queue_work(move || {
                std::thread::sleep(Duration::from_millis(20));
                *stamp.lock().unwrap() = Some(Instant::now());
            });
        }
        ml.wait_for_drain();
        assert!(stamp.lock().unwrap().is_some());

        ml.quit(0);
        handle.join().unwrap();
    }
}
