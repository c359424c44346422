//! ---
//! ptf_section: "04-simulation"
//! ptf_subsection: "02-clock"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Per-tag simulated clocks with threshold watchers."
//! ptf_version: "v0.1.0"
//! ptf_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use ptf_tag::Tag;
use tracing::{debug, trace};

static GLOBAL: Lazy<Arc<ClockRegistry>> = Lazy::new(|| Arc::new(ClockRegistry::new()));
static NEXT_CONSUMER: AtomicU64 = AtomicU64::new(1);

/// Process-wide clock registry.
pub fn global() -> &'static ClockRegistry {
    &GLOBAL
}

/// Owned handle on the process-wide registry.
pub fn global_handle() -> Arc<ClockRegistry> {
    GLOBAL.clone()
}

/// Identity of a watcher owner. Re-registering with the same id replaces the
/// previous watcher on that clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

impl ConsumerId {
    pub fn next() -> Self {
        ConsumerId(NEXT_CONSUMER.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Watcher {
    consumer: ConsumerId,
    threshold: Duration,
    callback: Callback,
}

#[derive(Default)]
struct ClockState {
    value: Duration,
    watchers: Vec<Watcher>,
}

/// Virtual time of one tag. Starts at zero and only moves forward.
#[derive(Default)]
pub struct SimulatedClock {
    state: Mutex<ClockState>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.state.lock().value
    }

    /// Move the clock forward by `delta` and fire every watcher whose
    /// threshold is now reached, in registration order.
    ///
    /// Callbacks run on the calling thread after the clock lock is released.
    /// Returns the number of callbacks fired.
    pub fn advance(&self, delta: Duration) -> usize {
        let due = {
            let mut state = self.state.lock();
            if delta.is_zero() {
                return 0;
            }
            state.value = state.value.saturating_add(delta);
            let now = state.value;
            let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.watchers)
                .into_iter()
                .partition(|watcher| now >= watcher.threshold);
            state.watchers = pending;
            trace!(now_ms = now.as_millis() as u64, due = due.len(), "simulated clock advanced");
            due
        };
        let fired = due.len();
        for watcher in due {
            (watcher.callback)();
        }
        fired
    }

    /// Fire `callback` once, the first time an advance brings the clock to or
    /// past `threshold`. Replaces any watcher already owned by `consumer`.
    pub fn register_cancel_after<F>(&self, consumer: ConsumerId, threshold: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        state.watchers.retain(|watcher| watcher.consumer != consumer);
        state.watchers.push(Watcher {
            consumer,
            threshold,
            callback: Box::new(callback),
        });
    }

    /// Drop the watcher owned by `consumer`, if any.
    pub fn unregister(&self, consumer: ConsumerId) -> bool {
        let mut state = self.state.lock();
        let before = state.watchers.len();
        state.watchers.retain(|watcher| watcher.consumer != consumer);
        state.watchers.len() != before
    }

    pub fn watcher_count(&self) -> usize {
        self.state.lock().watchers.len()
    }
}

impl fmt::Debug for SimulatedClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedClock")
            .field("value", &state.value)
            .field("watchers", &state.watchers.len())
            .finish()
    }
}

/// Map from tag to its clock.
///
/// A clock stays registered while its clock handle is held outside the
/// registry, or while any live tag shares its seed (tags of one seed share an
/// interned allocation, see [`Tag::share_count`]). [`ClockRegistry::sweep`]
/// drops every other clock.
#[derive(Debug, Default)]
pub struct ClockRegistry {
    clocks: Mutex<HashMap<Tag, Arc<SimulatedClock>>>,
}

impl ClockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock for `tag`, created at zero on first lookup.
    pub fn get_or_create_clock(&self, tag: &Tag) -> Arc<SimulatedClock> {
        self.clocks
            .lock()
            .entry(tag.clone())
            .or_insert_with(|| {
                debug!(tag = %tag, "simulated clock created");
                Arc::new(SimulatedClock::new())
            })
            .clone()
    }

    pub fn advance(&self, tag: &Tag, delta: Duration) -> usize {
        self.get_or_create_clock(tag).advance(delta)
    }

    pub fn now(&self, tag: &Tag) -> Duration {
        self.get_or_create_clock(tag).now()
    }

    pub fn register_cancel_after<F>(
        &self,
        tag: &Tag,
        consumer: ConsumerId,
        threshold: Duration,
        cancel: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        self.get_or_create_clock(tag)
            .register_cancel_after(consumer, threshold, cancel);
    }

    /// Remove clocks that neither a clock handle nor a live tag of the same
    /// seed still references. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut clocks = self.clocks.lock();
        let before = clocks.len();
        // Seed handles held by the registry's own keys.
        let mut own: HashMap<String, usize> = HashMap::new();
        for tag in clocks.keys() {
            *own.entry(tag.seed().to_owned()).or_default() += 1;
        }
        clocks.retain(|tag, clock| {
            let held_by_keys = own.get(tag.seed()).copied().unwrap_or(0);
            Arc::strong_count(clock) > 1 || tag.share_count() > held_by_keys
        });
        let removed = before - clocks.len();
        if removed > 0 {
            debug!(removed, remaining = clocks.len(), "simulated clocks swept");
        }
        removed
    }

    /// Drop every clock.
    pub fn clear(&self) {
        self.clocks.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.clocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.lock().is_empty()
    }
}
