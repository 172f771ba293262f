//! Process-wide atomic counters (§3 "Counters").
//!
//! Six gauges, each a plain `AtomicU64` wrapped so the underflow guard
//! (read-compare-exchange, never saturating past zero silently through a
//! signed wraparound) lives in one place instead of at every call site.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    pub const fn new() -> AtomicCounter {
        AtomicCounter(AtomicU64::new(0))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::Relaxed) + n
    }

    /// Decrement, guarded against underflow: never takes the counter below
    /// zero, even racing against concurrent decrements. Returns the value
    /// after the (possibly no-op) decrement.
    pub fn decrement(&self) -> u64 {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            if cur == 0 {
                return 0;
            }
            match self.0.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return cur - 1,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// The six process-wide gauges from §3. Grouped in one struct so the
/// `fork()` interceptor can reset them all atomically-enough (each field
/// resets independently; a reader racing the reset may see a momentarily
/// inconsistent mix, which is acceptable per §5's ordering model).
#[derive(Debug, Default)]
pub struct Counters {
    pub open_ports: AtomicCounter,
    pub tcp_connections: AtomicCounter,
    pub active_connections: AtomicCounter,
    pub net_rx: AtomicCounter,
    pub net_tx: AtomicCounter,
    pub dns: AtomicCounter,
}

impl Counters {
    pub const fn new() -> Counters {
        Counters {
            open_ports: AtomicCounter::new(),
            tcp_connections: AtomicCounter::new(),
            active_connections: AtomicCounter::new(),
            net_rx: AtomicCounter::new(),
            net_tx: AtomicCounter::new(),
            dns: AtomicCounter::new(),
        }
    }

    /// §5 "Fork": the child zeros every counter.
    pub fn reset_all(&self) {
        self.open_ports.reset();
        self.tcp_connections.reset();
        self.active_connections.reset();
        self.net_rx.reset();
        self.net_tx.reset();
        self.dns.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrement_never_underflows() {
        let c = AtomicCounter::new();
        assert_eq!(c.decrement(), 0);
        assert_eq!(c.get(), 0);
        c.increment();
        assert_eq!(c.decrement(), 0);
    }

    #[test]
    fn add_and_reset() {
        let c = AtomicCounter::new();
        c.add(30);
        assert_eq!(c.get(), 30);
        c.reset();
        assert_eq!(c.get(), 0);
    }

    #[test]
    fn reset_all_zeroes_every_gauge() {
        let counters = Counters::new();
        counters.open_ports.increment();
        counters.net_tx.add(1000);
        counters.net_rx.add(500);
        counters.reset_all();
        assert_eq!(counters.open_ports.get(), 0);
        assert_eq!(counters.net_tx.get(), 0);
        assert_eq!(counters.net_rx.get(), 0);
    }
}
