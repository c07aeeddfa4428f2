use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bus_gate::{BusGate, Clock, GateError, PowerDomain};
use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

// ---------------------------------------------------------------------------
// Mock domain
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
struct MockError(&'static str);

/// Counters shared between a test and the domain it hands to the gate.
#[derive(Clone, Default)]
struct Rails {
    runtime_refs: Arc<AtomicUsize>,
    iface_on: Arc<AtomicBool>,
    core_on: Arc<AtomicBool>,
    power_ups: Arc<AtomicUsize>,
    fail_runtime: Arc<AtomicBool>,
    fail_core: Arc<AtomicBool>,
    hang_core: Arc<AtomicBool>,
    hang_put: Arc<AtomicBool>,
}

struct MockDomain {
    rails: Rails,
    clocks: bool,
}

impl PowerDomain for MockDomain {
    type Error = MockError;

    async fn runtime_get(&mut self) -> Result<(), MockError> {
        if self.rails.fail_runtime.swap(false, Ordering::SeqCst) {
            return Err(MockError("runtime"));
        }
        self.rails.runtime_refs.fetch_add(1, Ordering::SeqCst);
        self.rails.power_ups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn runtime_put(&mut self) {
        if self.rails.hang_put.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.rails.runtime_refs.fetch_sub(1, Ordering::SeqCst);
    }

    fn has_clocks(&self) -> bool {
        self.clocks
    }

    async fn clock_enable(&mut self, clock: Clock) -> Result<(), MockError> {
        match clock {
            Clock::Interface => self.rails.iface_on.store(true, Ordering::SeqCst),
            Clock::Core => {
                if self.rails.hang_core.load(Ordering::SeqCst) {
                    std::future::pending::<()>().await;
                }
                if self.rails.fail_core.swap(false, Ordering::SeqCst) {
                    return Err(MockError("core clock"));
                }
                assert!(
                    self.rails.iface_on.load(Ordering::SeqCst),
                    "core clock enabled before interface clock"
                );
                self.rails.core_on.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn clock_disable(&mut self, clock: Clock) {
        match clock {
            Clock::Interface => {
                assert!(
                    !self.rails.core_on.load(Ordering::SeqCst),
                    "interface clock disabled while core clock running"
                );
                self.rails.iface_on.store(false, Ordering::SeqCst)
            }
            Clock::Core => self.rails.core_on.store(false, Ordering::SeqCst),
        }
    }
}

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

fn make_gate(
    clocks: bool,
) -> (BusGate<CriticalSectionRawMutex, MockDomain>, Rails) {
    let rails = Rails::default();
    let domain = MockDomain { rails: rails.clone(), clocks };
    (BusGate::new(domain), rails)
}

fn all_off(rails: &Rails) -> bool {
    rails.runtime_refs.load(Ordering::SeqCst) == 0
        && !rails.iface_on.load(Ordering::SeqCst)
        && !rails.core_on.load(Ordering::SeqCst)
}

/// Poll `fut` once, then drop it.
async fn cancel<F: core::future::Future>(fut: F) {
    match select(fut, async {}).await {
        Either::First(_) => panic!("transition completed before it was dropped"),
        Either::Second(()) => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[futures_test::test]
async fn acquire_powers_up_domain() {
    let (gate, rails) = make_gate(true);

    gate.acquire().await.unwrap();

    assert_eq!(gate.user_count(), 1);
    assert_eq!(gate.is_powered(), Some(true));
    assert_eq!(rails.runtime_refs.load(Ordering::SeqCst), 1);
    assert!(rails.iface_on.load(Ordering::SeqCst));
    assert!(rails.core_on.load(Ordering::SeqCst));
}

#[futures_test::test]
async fn second_vote_shares_power() {
    let (gate, rails) = make_gate(true);

    gate.acquire().await.unwrap();
    gate.acquire().await.unwrap();

    assert_eq!(gate.user_count(), 2);
    assert_eq!(rails.power_ups.load(Ordering::SeqCst), 1);

    gate.release().await.unwrap();
    assert_eq!(gate.is_powered(), Some(true));
    assert!(rails.core_on.load(Ordering::SeqCst));
}

#[futures_test::test]
async fn last_release_powers_down() {
    let (gate, rails) = make_gate(true);

    gate.acquire().await.unwrap();
    gate.release().await.unwrap();

    assert_eq!(gate.user_count(), 0);
    assert_eq!(gate.is_powered(), Some(false));
    assert!(all_off(&rails));
}

#[futures_test::test]
async fn release_without_vote_is_rejected() {
    let (gate, _) = make_gate(true);

    assert_eq!(gate.release().await, Err(GateError::NotAcquired));
}

#[futures_test::test]
async fn core_clock_failure_rolls_back() {
    let (gate, rails) = make_gate(true);
    rails.fail_core.store(true, Ordering::SeqCst);

    let result = gate.acquire().await;

    assert_eq!(result, Err(GateError::Domain(MockError("core clock"))));
    assert_eq!(gate.user_count(), 0);
    assert_eq!(gate.is_powered(), Some(false));
    assert!(all_off(&rails));

    // The failure was one-shot; a retry must come up cleanly.
    gate.acquire().await.unwrap();
    assert!(rails.core_on.load(Ordering::SeqCst));
}

#[futures_test::test]
async fn runtime_failure_leaves_clocks_untouched() {
    let (gate, rails) = make_gate(true);
    rails.fail_runtime.store(true, Ordering::SeqCst);

    let result = gate.acquire().await;

    assert_eq!(result, Err(GateError::Domain(MockError("runtime"))));
    assert!(all_off(&rails));
}

#[futures_test::test]
async fn clockless_domain_only_takes_runtime_ref() {
    let (gate, rails) = make_gate(false);

    gate.acquire().await.unwrap();
    assert_eq!(rails.runtime_refs.load(Ordering::SeqCst), 1);
    assert!(!rails.iface_on.load(Ordering::SeqCst));

    gate.release().await.unwrap();
    assert!(all_off(&rails));
}

#[futures_test::test]
async fn wait_powered_down_completes_on_last_release() {
    let (gate, _) = make_gate(true);

    gate.acquire().await.unwrap();
    let ((), released) = join(gate.wait_powered_down(), async {
        gate.release().await
    })
    .await;

    released.unwrap();
    assert_eq!(gate.user_count(), 0);
}

#[futures_test::test]
async fn wait_powered_down_when_already_off() {
    let (gate, _) = make_gate(true);

    // Never acquired; must not block.
    gate.wait_powered_down().await;
}

#[futures_test::test]
async fn multiple_cycles() {
    let (gate, rails) = make_gate(true);

    for _ in 0..3 {
        gate.acquire().await.unwrap();
        gate.release().await.unwrap();
    }

    assert_eq!(rails.power_ups.load(Ordering::SeqCst), 3);
    assert!(all_off(&rails));
}

#[futures_test::test]
async fn dropped_power_up_is_undone_by_settle() {
    let (gate, rails) = make_gate(true);
    rails.hang_core.store(true, Ordering::SeqCst);

    cancel(gate.acquire()).await;

    assert_eq!(gate.user_count(), 0);
    assert_eq!(gate.is_powered(), Some(false));
    assert_eq!(rails.runtime_refs.load(Ordering::SeqCst), 1);

    gate.settle().await;
    assert!(all_off(&rails));
    gate.wait_powered_down().await;
}

#[futures_test::test]
async fn acquire_after_dropped_power_up_takes_one_ref() {
    let (gate, rails) = make_gate(true);
    rails.hang_core.store(true, Ordering::SeqCst);
    cancel(gate.acquire()).await;
    rails.hang_core.store(false, Ordering::SeqCst);

    gate.acquire().await.unwrap();

    assert_eq!(gate.user_count(), 1);
    assert_eq!(rails.runtime_refs.load(Ordering::SeqCst), 1);
    assert!(rails.core_on.load(Ordering::SeqCst));

    gate.release().await.unwrap();
    assert!(all_off(&rails));
}

#[futures_test::test]
async fn dropped_power_down_keeps_vote_released() {
    let (gate, rails) = make_gate(true);
    gate.acquire().await.unwrap();
    rails.hang_put.store(true, Ordering::SeqCst);

    cancel(gate.release()).await;

    // The vote went with the first poll; a second release has nothing to drop.
    assert_eq!(gate.user_count(), 0);
    assert_eq!(gate.release().await, Err(GateError::NotAcquired));
    assert_eq!(gate.user_count(), 0);
    assert_eq!(rails.runtime_refs.load(Ordering::SeqCst), 1);

    rails.hang_put.store(false, Ordering::SeqCst);
    gate.settle().await;
    assert_eq!(gate.is_powered(), Some(false));
    assert!(all_off(&rails));
}

#[futures_test::test]
async fn settle_leaves_voted_bus_powered() {
    let (gate, rails) = make_gate(true);
    gate.acquire().await.unwrap();

    gate.settle().await;

    assert_eq!(gate.is_powered(), Some(true));
    assert_eq!(rails.runtime_refs.load(Ordering::SeqCst), 1);
}
