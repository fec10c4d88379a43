use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::{info, trace};

use super::lock;
use crate::config::CommonConfig;

/// Called with the absolute simulation time in seconds.
pub type TickHandler = Arc<dyn Fn(f64) + Send + Sync>;

/// Shared simulation clock. Every advance is fanned out to all subscribers.
pub struct TimeBus {
    common: CommonConfig,
    ticks: AtomicU64,
    subscribers: Mutex<HashMap<u64, TickHandler>>,
    next_id: AtomicU64,
}

impl TimeBus {
    pub fn new(common: CommonConfig) -> Self {
        Self {
            common,
            ticks: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, handler: TickHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).insert(id, handler);
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        lock(&self.subscribers).remove(&id).is_some()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn now(&self) -> f64 {
        self.common.ticks_to_time(self.ticks())
    }

    pub fn start_time(&self) -> f64 {
        self.common.absolute_start_time
    }

    /// Advance one tick and deliver the new time. Returns the new tick count.
    pub fn advance(&self) -> u64 {
        let ticks = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        let now = self.common.ticks_to_time(ticks);
        let handlers: Vec<TickHandler> = lock(&self.subscribers).values().cloned().collect();
        trace!("tick {} (t={:.6}) to {} subscribers", ticks, now, handlers.len());
        for handler in handlers {
            handler(now);
        }
        ticks
    }
}

/// Drives a [`TimeBus`] from the wall clock, one tick per
/// `real-microseconds-per-tick`.
pub struct TimeDriver {
    bus: Arc<TimeBus>,
    period: Duration,
}

impl TimeDriver {
    pub fn new(bus: Arc<TimeBus>, common: &CommonConfig) -> Self {
        let micros = u64::try_from(common.real_microseconds_per_tick.max(1)).unwrap_or(1);
        Self {
            bus,
            period: Duration::from_micros(micros),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Tick until `shutdown` becomes true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("time driver started, {:?} per tick", self.period);
        let mut interval = time::interval(self.period);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.bus.advance();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("time driver stopped at tick {}", self.bus.ticks());
    }

    pub async fn run_ticks(&self, count: u64) {
        let mut interval = time::interval(self.period);
        interval.tick().await;
        for _ in 0..count {
            interval.tick().await;
            self.bus.advance();
        }
    }
}
