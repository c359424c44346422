//! ---
//! ptf_section: "04-simulation"
//! ptf_subsection: "03-cancellation"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Cancellation driven by simulated time."
//! ptf_version: "v0.1.0"
//! ptf_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use ptf_tag::Tag;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::{self, ClockRegistry, ConsumerId, SimulatedClock};

/// Owner of a [`CancellationToken`] that cancels once the tag's simulated
/// clock reaches the configured delay.
#[derive(Debug)]
pub struct SimulatedCancellation {
    token: CancellationToken,
    clock: Arc<SimulatedClock>,
    consumer: ConsumerId,
    delay: Duration,
}

impl SimulatedCancellation {
    /// Bind to `tag`'s clock in the process-wide registry.
    pub fn new(delay: Duration, tag: &Tag) -> Self {
        Self::new_in(clock::global(), delay, tag)
    }

    pub fn new_in(registry: &ClockRegistry, delay: Duration, tag: &Tag) -> Self {
        let source = Self {
            token: CancellationToken::new(),
            clock: registry.get_or_create_clock(tag),
            consumer: ConsumerId::next(),
            delay,
        };
        source.arm();
        source
    }

    /// Replace the pending deadline with `delay`, measured on the same clock.
    pub fn cancel_after(&mut self, delay: Duration) {
        self.delay = delay;
        self.arm();
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn arm(&self) {
        let token = self.token.clone();
        let delay = self.delay;
        self.clock
            .register_cancel_after(self.consumer, delay, move || {
                debug!(delay_ms = delay.as_millis() as u64, "simulated deadline reached");
                token.cancel();
            });
    }
}

impl Drop for SimulatedCancellation {
    fn drop(&mut self) {
        self.clock.unregister(self.consumer);
    }
}

/// Simulated-time helpers on [`Tag`] backed by the process-wide registry.
pub trait SimulatedTime {
    /// Advance this tag's clock by `delay`.
    fn simulate_delay(&self, delay: Duration);
    /// Current simulated time of this tag.
    fn simulated_now(&self) -> Duration;
}

impl SimulatedTime for Tag {
    fn simulate_delay(&self, delay: Duration) {
        clock::global().advance(self, delay);
    }

    fn simulated_now(&self) -> Duration {
        clock::global().now(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(seed: &str) -> Tag {
        Tag::from_seed(seed).expect("seed")
    }

    #[test]
    fn cancels_once_deadline_reached() {
        let registry = ClockRegistry::new();
        let t = tag("cancel-deadline");
        let source = SimulatedCancellation::new_in(&registry, Duration::from_secs(2), &t);

        registry.advance(&t, Duration::from_secs(1));
        assert!(!source.is_cancelled());
        registry.advance(&t, Duration::from_secs(1));
        assert!(source.is_cancelled());
    }

    #[test]
    fn cancel_after_replaces_deadline() {
        let registry = ClockRegistry::new();
        let t = tag("cancel-replace");
        let mut source = SimulatedCancellation::new_in(&registry, Duration::from_secs(1), &t);
        source.cancel_after(Duration::from_secs(10));
        assert_eq!(source.delay(), Duration::from_secs(10));

        registry.advance(&t, Duration::from_secs(5));
        assert!(!source.is_cancelled());
        registry.advance(&t, Duration::from_secs(5));
        assert!(source.is_cancelled());
    }

    #[test]
    fn dropping_the_source_removes_its_watcher() {
        let registry = ClockRegistry::new();
        let t = tag("cancel-drop");
        let token = {
            let source = SimulatedCancellation::new_in(&registry, Duration::ZERO, &t);
            assert_eq!(registry.get_or_create_clock(&t).watcher_count(), 1);
            source.token()
        };
        assert_eq!(registry.get_or_create_clock(&t).watcher_count(), 0);
        registry.advance(&t, Duration::from_secs(1));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn manual_cancel_does_not_disturb_the_clock() {
        let registry = ClockRegistry::new();
        let t = tag("cancel-manual");
        let source = SimulatedCancellation::new_in(&registry, Duration::ZERO, &t);
        source.cancel();
        assert!(source.is_cancelled());
        registry.advance(&t, Duration::from_secs(1));
        assert_eq!(registry.now(&t), Duration::from_secs(1));
    }

    #[test]
    fn tag_extension_uses_global_registry() {
        let t = tag("extension-trait-clock");
        let source = SimulatedCancellation::new(Duration::ZERO, &t);
        assert_eq!(t.simulated_now(), Duration::ZERO);
        t.simulate_delay(Duration::from_secs(1));
        assert_eq!(t.simulated_now(), Duration::from_secs(1));
        assert!(source.is_cancelled());
    }
}
