//! Global Store - Canonical state plus the debounced write path
//!
//! Owns the committed [`GlobalState`], the [`ChangeCoalescer`] that buffers
//! writes, and a revision signal that subscribers track.
//!
//! # Flow
//!
//! ```text
//! set::<F>(v) → coalescer.record (window re-armed)
//!                     │
//! poll() ─────────────┴─ deadline passed? → merge into committed
//!                                           → revision += 1
//!                                           → every subscriber effect re-runs once
//! ```
//!
//! The store never spawns a timer. The owner's event loop calls [`GlobalStore::poll`]
//! (or waits on [`GlobalStore::time_until_flush`]), the same way the render
//! loop drives everything else.
//!
//! # Example
//!
//! ```ignore
//! use global_bus::{field, GlobalState, GlobalStore};
//!
//! let store = GlobalStore::new(GlobalState::default());
//! let _sub = store.subscribe(|state| println!("progress = {}", state.progress));
//!
//! store.set::<field::Progress>(1);
//! store.set::<field::Progress>(2);
//! store.settle(); // one flush, one re-render, progress = 2
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use spark_signals::{effect, flush_sync, signal, Signal};

use crate::clock::{Clock, SystemClock};
use crate::coalescer::{ChangeCoalescer, DEFAULT_WINDOW, FlushReport};
use crate::config::BusConfig;
use crate::fields::{Field, FieldSet, GlobalState};

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Keeps a subscriber alive. Dropping it stops the subscriber.
pub struct Subscription {
    stop: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Stop the subscriber now.
    pub fn unsubscribe(mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

pub struct GlobalStore {
    committed: Rc<RefCell<GlobalState>>,
    coalescer: RefCell<ChangeCoalescer>,
    clock: Rc<dyn Clock>,
    /// Bumped once per flush or reset. Subscribers track it.
    revision: Signal<u64>,
    revision_count: Cell<u64>,
    flushes: Cell<u64>,
    /// Set while subscribers are running. Bumps made meanwhile are queued.
    publishing: Cell<bool>,
    bump_queued: Cell<bool>,
}

impl GlobalStore {
    /// Store on the wall clock with the default 100ms window.
    pub fn new(init: GlobalState) -> Self {
        Self::with_clock(init, SystemClock)
    }

    pub fn with_clock(init: GlobalState, clock: impl Clock + 'static) -> Self {
        Self::build(init, ChangeCoalescer::new(DEFAULT_WINDOW), Rc::new(clock))
    }

    /// Store whose window and starting values come from config.
    pub fn from_config(config: &BusConfig, clock: impl Clock + 'static) -> Self {
        let coalescer = ChangeCoalescer::new(config.window()).with_max_delay(config.max_delay());
        Self::build(config.init.clone(), coalescer, Rc::new(clock))
    }

    /// Change the debounce window, keeping `max_delay` and pending writes.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.coalescer.get_mut().set_window(window);
        self
    }

    fn build(init: GlobalState, coalescer: ChangeCoalescer, clock: Rc<dyn Clock>) -> Self {
        tracing::debug!(window_ms = coalescer.window().as_millis() as u64, "global store created");
        Self {
            committed: Rc::new(RefCell::new(init)),
            coalescer: RefCell::new(coalescer),
            clock,
            revision: signal(0),
            revision_count: Cell::new(0),
            flushes: Cell::new(0),
            publishing: Cell::new(false),
            bump_queued: Cell::new(false),
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Latest value of `F`: pending if written since the last flush, else committed.
    pub fn get<F: Field>(&self) -> F::Value {
        if let Some(pending) = self.coalescer.borrow().pending::<F>() {
            return pending.clone();
        }
        F::slot(&self.committed.borrow()).clone()
    }

    /// Committed value of `F`, ignoring pending writes.
    pub fn committed<F: Field>(&self) -> F::Value {
        F::slot(&self.committed.borrow()).clone()
    }

    /// Clone of the committed state.
    pub fn snapshot(&self) -> GlobalState {
        self.committed.borrow().clone()
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Buffer a write to `F`.
    ///
    /// Returns `false` without touching the buffer or the timer when `value`
    /// equals the visible value.
    pub fn set<F: Field>(&self, value: F::Value) -> bool {
        let mut coalescer = self.coalescer.borrow_mut();

        let unchanged = match coalescer.pending::<F>() {
            Some(pending) => *pending == value,
            None => *F::slot(&self.committed.borrow()) == value,
        };
        if unchanged {
            return false;
        }

        tracing::trace!(field = F::NAME, value = ?value, "global write buffered");
        coalescer.record::<F>(value, self.clock.now());
        true
    }

    /// Replace the committed state and drop pending writes.
    ///
    /// Subscribers are notified once.
    pub fn reset(&self, init: GlobalState) -> FieldSet {
        let dropped = self.coalescer.borrow_mut().discard();
        let changed = {
            let mut committed = self.committed.borrow_mut();
            let changed = committed.diff(&init);
            *committed = init;
            changed
        };
        tracing::debug!(
            dropped = ?dropped.names(),
            changed = ?changed.names(),
            "global store reset"
        );
        self.bump_revision();
        dropped
    }

    // -------------------------------------------------------------------------
    // Flushing
    // -------------------------------------------------------------------------

    /// Apply pending writes if the window has expired.
    pub fn poll(&self) -> Option<FlushReport> {
        let now = self.clock.now();
        let report = {
            let mut coalescer = self.coalescer.borrow_mut();
            let mut committed = self.committed.borrow_mut();
            coalescer.tick(now, &mut committed)?
        };
        self.publish(&report);
        Some(report)
    }

    /// Apply pending writes now, ignoring the window.
    pub fn flush_now(&self) -> Option<FlushReport> {
        let now = self.clock.now();
        let report = {
            let mut coalescer = self.coalescer.borrow_mut();
            let mut committed = self.committed.borrow_mut();
            coalescer.flush_into(now, &mut committed)?
        };
        self.publish(&report);
        Some(report)
    }

    /// Block until the pending flush lands.
    ///
    /// Returns `None` if nothing was pending. On a clock that does not move
    /// by itself the flush is applied immediately.
    pub fn settle(&self) -> Option<FlushReport> {
        loop {
            let wait = self.time_until_flush()?;
            if !self.clock.is_realtime() {
                return self.flush_now();
            }
            if !wait.is_zero() {
                thread::sleep(wait);
            }
            if let Some(report) = self.poll() {
                return Some(report);
            }
        }
    }

    /// Time until pending writes are due. `None` when clean.
    pub fn time_until_flush(&self) -> Option<Duration> {
        self.coalescer.borrow().time_until_flush(self.clock.now())
    }

    pub fn is_dirty(&self) -> bool {
        self.coalescer.borrow().is_dirty()
    }

    /// Fields written since the last flush.
    pub fn pending_fields(&self) -> FieldSet {
        self.coalescer.borrow().dirty_fields()
    }

    /// Number of flushes applied so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes.get()
    }

    /// Number of state replacements (flushes and resets) so far.
    pub fn revision(&self) -> u64 {
        self.revision_count.get()
    }

    fn publish(&self, report: &FlushReport) {
        self.flushes.set(self.flushes.get() + 1);
        tracing::debug!(
            fields = ?report.fields.names(),
            writes = report.writes,
            held_ms = report.held_for.as_millis() as u64,
            forced = report.forced_by_deadline,
            "flushed global changes"
        );
        self.bump_revision();
    }

    fn bump_revision(&self) {
        self.revision_count.set(self.revision_count.get() + 1);

        // A subscriber flushed or reset from inside its callback. Setting the
        // signal now would re-enter the running effect, so let the outer
        // publish pick it up.
        if self.publishing.get() {
            self.bump_queued.set(true);
            return;
        }

        self.bump_queued.set(true);
        self.drain_bumps();
    }

    fn drain_bumps(&self) {
        self.publishing.set(true);
        while self.bump_queued.replace(false) {
            self.revision.set(self.revision_count.get());
            flush_sync();
        }
        self.publishing.set(false);
    }

    // -------------------------------------------------------------------------
    // Subscribers
    // -------------------------------------------------------------------------

    /// Run `on_change` now and after every flush or reset.
    ///
    /// The callback receives a snapshot, so it may write back into the store,
    /// including `flush_now` and `reset`. Those notify once the current
    /// round of subscribers has finished.
    pub fn subscribe(&self, mut on_change: impl FnMut(&GlobalState) + 'static) -> Subscription {
        let revision = self.revision.clone();
        let committed = Rc::clone(&self.committed);

        // The first run happens here, so it counts as a publish too.
        let nested = self.publishing.replace(true);
        let stop = effect(move || {
            // Read creates the dependency.
            let _ = revision.get();
            let snapshot = committed.borrow().clone();
            on_change(&snapshot);
        });
        flush_sync();
        if !nested {
            self.drain_bumps();
        }

        Subscription {
            stop: Some(Box::new(stop)),
        }
    }

    /// Subscribe to a single field. Runs on every flush, like [`subscribe`](Self::subscribe).
    pub fn subscribe_field<F: Field>(
        &self,
        mut on_change: impl FnMut(&F::Value) + 'static,
    ) -> Subscription {
        self.subscribe(move |state| on_change(F::slot(state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fields::{field, DataHandle};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn setup() -> (GlobalStore, ManualClock) {
        let clock = ManualClock::new();
        let store = GlobalStore::with_clock(GlobalState::default(), clock.clone());
        (store, clock)
    }

    fn count_renders(store: &GlobalStore) -> (Rc<Cell<u32>>, Subscription) {
        let renders = Rc::new(Cell::new(0));
        let counter = renders.clone();
        let sub = store.subscribe(move |_| counter.set(counter.get() + 1));
        (renders, sub)
    }

    #[test]
    fn test_write_is_visible_before_flush() {
        let (store, _clock) = setup();

        assert!(store.set::<field::Project>(Some("p-1".to_string())));

        assert_eq!(store.get::<field::Project>().as_deref(), Some("p-1"));
        assert_eq!(store.committed::<field::Project>(), None);
        assert!(store.is_dirty());
    }

    #[test]
    fn test_poll_waits_for_window() {
        let (store, clock) = setup();

        store.set::<field::Progress>(1);
        clock.advance(ms(99));
        assert!(store.poll().is_none());
        assert_eq!(store.committed::<field::Progress>(), 0);

        clock.advance(ms(1));
        let report = store.poll().unwrap();
        assert_eq!(report.fields, FieldSet::PROGRESS);
        assert_eq!(store.committed::<field::Progress>(), 1);
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_last_write_in_window_is_committed() {
        let (store, clock) = setup();

        store.set::<field::Lang>("fr".to_string());
        store.set::<field::Lang>("de".to_string());
        clock.advance(ms(100));

        assert!(store.poll().is_some());
        assert_eq!(store.committed::<field::Lang>(), "de");
        assert_eq!(store.flush_count(), 1);
        assert!(store.poll().is_none());
    }

    #[test]
    fn test_redundant_write_is_noop() {
        let (store, clock) = setup();
        let (renders, _sub) = count_renders(&store);
        assert_eq!(renders.get(), 1);

        // Equal to the committed value.
        assert!(!store.set::<field::Offline>(false));
        assert!(!store.is_dirty());

        // Equal to the pending value: does not re-arm.
        store.set::<field::Offline>(true);
        clock.advance(ms(60));
        assert!(!store.set::<field::Offline>(true));
        assert_eq!(store.time_until_flush(), Some(ms(40)));

        clock.advance(ms(40));
        store.poll();
        assert_eq!(renders.get(), 2);
    }

    #[test]
    fn test_two_fields_one_flush_one_render() {
        let (store, clock) = setup();
        let (renders, _sub) = count_renders(&store);

        store.set::<field::RemoteBusy>(true);
        clock.advance(ms(30));
        store.set::<field::SnackMessage>(Some("Saved".to_string()));
        clock.advance(ms(100));

        let report = store.poll().unwrap();
        assert_eq!(report.fields, FieldSet::REMOTE_BUSY | FieldSet::SNACK_MESSAGE);
        assert_eq!(store.flush_count(), 1);
        assert_eq!(renders.get(), 2);

        let state = store.snapshot();
        assert!(state.remote_busy);
        assert_eq!(state.snack_message.as_deref(), Some("Saved"));
    }

    #[test]
    fn test_subscriber_sees_committed_state() {
        let (store, clock) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _sub = store.subscribe_field::<field::Progress>(move |value| sink.borrow_mut().push(*value));

        store.set::<field::Progress>(10);
        store.set::<field::Progress>(20);
        clock.advance(ms(100));
        store.poll();

        assert_eq!(*seen.borrow(), vec![0, 20]);
    }

    #[test]
    fn test_unsubscribe_stops_renders() {
        let (store, _clock) = setup();
        let (renders, sub) = count_renders(&store);

        sub.unsubscribe();
        store.set::<field::Changed>(true);
        store.flush_now();

        assert_eq!(renders.get(), 1);
        assert!(store.committed::<field::Changed>());
    }

    #[test]
    fn test_subscriber_may_write_back() {
        let clock = ManualClock::new();
        let store = Rc::new(GlobalStore::with_clock(GlobalState::default(), clock.clone()));
        let inner = Rc::clone(&store);
        let _sub = store.subscribe(move |state| {
            if state.load_complete {
                inner.set::<field::SnackMessage>(Some("Loaded".to_string()));
            }
        });

        store.set::<field::LoadComplete>(true);
        clock.advance(ms(100));
        store.poll();

        assert_eq!(store.get::<field::SnackMessage>().as_deref(), Some("Loaded"));
        assert!(store.is_dirty());
    }

    #[test]
    fn test_subscriber_may_reset() {
        let clock = ManualClock::new();
        let store = Rc::new(GlobalStore::with_clock(GlobalState::default(), clock));
        let inner = Rc::clone(&store);
        let renders = Rc::new(Cell::new(0));
        let counter = renders.clone();
        let _sub = store.subscribe(move |state| {
            counter.set(counter.get() + 1);
            if state.offline {
                inner.reset(GlobalState::default());
            }
        });

        store.set::<field::Offline>(true);
        store.flush_now();

        assert!(!store.committed::<field::Offline>());
        assert_eq!(store.flush_count(), 1);
        assert_eq!(store.revision(), 2);
        assert_eq!(renders.get(), 3);
    }

    #[test]
    fn test_subscriber_may_flush_now() {
        let clock = ManualClock::new();
        let store = Rc::new(GlobalStore::with_clock(GlobalState::default(), clock));
        let inner = Rc::clone(&store);
        let renders = Rc::new(Cell::new(0));
        let counter = renders.clone();
        let _sub = store.subscribe(move |state| {
            counter.set(counter.get() + 1);
            if state.load_complete && state.snack_message.is_none() {
                inner.set::<field::SnackMessage>(Some("Loaded".to_string()));
                inner.flush_now();
            }
        });

        store.set::<field::LoadComplete>(true);
        store.flush_now();

        assert_eq!(store.committed::<field::SnackMessage>().as_deref(), Some("Loaded"));
        assert_eq!(store.flush_count(), 2);
        assert_eq!(renders.get(), 3);
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_reset_during_first_run() {
        let clock = ManualClock::new();
        let store = Rc::new(GlobalStore::with_clock(
            GlobalState {
                offline: true,
                ..Default::default()
            },
            clock,
        ));
        let inner = Rc::clone(&store);
        let renders = Rc::new(Cell::new(0));
        let counter = renders.clone();
        let _sub = store.subscribe(move |state| {
            counter.set(counter.get() + 1);
            if state.offline {
                inner.reset(GlobalState::default());
            }
        });

        assert!(!store.committed::<field::Offline>());
        assert_eq!(store.revision(), 1);
        assert_eq!(renders.get(), 2);
    }

    #[test]
    fn test_reset_discards_pending() {
        let (store, _clock) = setup();
        let (renders, _sub) = count_renders(&store);

        store.set::<field::User>(Some("u-1".to_string()));
        let dropped = store.reset(GlobalState {
            lang: "en".to_string(),
            ..Default::default()
        });

        assert_eq!(dropped, FieldSet::USER);
        assert_eq!(store.get::<field::User>(), None);
        assert_eq!(store.get::<field::Lang>(), "en");
        assert!(!store.is_dirty());
        assert_eq!(renders.get(), 2);
        assert_eq!(store.flush_count(), 0);
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_memory_handle_uses_identity() {
        let (store, _clock) = setup();
        let handle = DataHandle::new(String::from("orbit"));

        assert!(store.set::<field::Memory>(handle.clone()));
        assert!(!store.set::<field::Memory>(handle.clone()));
        store.flush_now();

        assert_eq!(store.get::<field::Memory>(), handle);
        assert!(store.set::<field::Memory>(DataHandle::new(String::from("orbit"))));
    }

    #[test]
    fn test_from_config_uses_window_and_init() {
        let config = BusConfig::from_toml_str("[bus]\ndebounce_ms = 20\n[init]\nlang = \"pt\"\n").unwrap();
        let clock = ManualClock::new();
        let store = GlobalStore::from_config(&config, clock.clone());

        assert_eq!(store.get::<field::Lang>(), "pt");
        store.set::<field::Progress>(3);
        assert_eq!(store.time_until_flush(), Some(ms(20)));
        clock.advance(ms(20));
        assert!(store.poll().is_some());
    }

    #[test]
    fn test_settle_on_manual_clock_flushes_immediately() {
        let (store, _clock) = setup();
        assert!(store.settle().is_none());

        store.set::<field::Progress>(4);
        let report = store.settle().unwrap();
        assert_eq!(report.writes, 1);
        assert_eq!(store.committed::<field::Progress>(), 4);
    }

    #[test]
    fn test_settle_on_system_clock_waits() {
        let store = GlobalStore::new(GlobalState::default()).with_window(ms(10));

        store.set::<field::Progress>(8);
        let report = store.settle().unwrap();

        assert!(report.held_for >= ms(10));
        assert_eq!(store.committed::<field::Progress>(), 8);
    }

    #[test]
    fn test_with_window_keeps_max_delay_and_pending() {
        let config = BusConfig::from_toml_str("[bus]\ndebounce_ms = 100\nmax_delay_ms = 250\n").unwrap();
        let clock = ManualClock::new();
        let store = GlobalStore::from_config(&config, clock.clone());
        store.set::<field::Progress>(1);

        let store = store.with_window(ms(40));

        assert_eq!(store.coalescer.borrow().max_delay(), Some(ms(250)));
        assert_eq!(store.get::<field::Progress>(), 1);
        assert_eq!(store.time_until_flush(), Some(ms(100)));

        // The next write arms the new window.
        store.set::<field::Progress>(2);
        assert_eq!(store.time_until_flush(), Some(ms(40)));
        clock.advance(ms(40));
        assert_eq!(store.poll().unwrap().writes, 2);
    }
}
