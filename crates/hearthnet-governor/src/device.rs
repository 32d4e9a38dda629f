use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};

use hearthnet_types::{Generation, GenerationConfig};

use crate::circuit::{CircuitBreaker, CircuitBreakerStats};
use crate::clock::Clock;
use crate::context::RequestContext;

struct Mutable {
    generation: Generation,
    semaphore: Arc<Semaphore>,
    min_interval: Duration,
}

/// Diagnostic snapshot of one device's state, safe to hand to callers.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeviceStats {
    pub generation: Generation,
    pub in_flight: usize,
    pub total_admissions: u64,
    pub total_failures: u64,
    pub breaker: CircuitBreakerStats,
}

/// Per-address bundle: a generation-sized semaphore, the minimum-interval
/// gate, and the embedded circuit breaker.
///
/// `mutable` and `last_admission` are two separate locks on purpose: the
/// interval gate must serialize admission starts for this device even
/// while a concurrent `update_generation` call only needs to swap the
/// semaphore and config, a much shorter critical section.
pub struct DeviceState {
    address: String,
    mutable: RwLock<Mutable>,
    last_admission: Mutex<Option<std::time::Instant>>,
    breaker: CircuitBreaker,
    clock: Arc<dyn Clock>,
    in_flight: Arc<AtomicUsize>,
    total_admissions: AtomicU64,
    total_failures: AtomicU64,
}

impl DeviceState {
    pub fn new(
        address: impl Into<String>,
        generation: Generation,
        gen_config: GenerationConfig,
        fail_threshold: u32,
        success_threshold: u32,
        open_duration: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            address: address.into(),
            mutable: RwLock::new(Mutable {
                generation,
                semaphore: Arc::new(Semaphore::new(gen_config.max_concurrent)),
                min_interval: gen_config.min_interval,
            }),
            last_admission: Mutex::new(None),
            breaker: CircuitBreaker::new(fail_threshold, success_threshold, open_duration, clock.clone()),
            clock,
            in_flight: Arc::new(AtomicUsize::new(0)),
            total_admissions: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn in_flight_counter(&self) -> Arc<AtomicUsize> {
        self.in_flight.clone()
    }

    pub async fn generation(&self) -> Generation {
        self.mutable.read().await.generation
    }

    /// Resize the device semaphore and interval for a new generation.
    /// Permits already checked out from the old semaphore remain valid —
    /// they hold their own `Arc` clone and keep it alive until released,
    /// so shrinking never invalidates in-flight admissions ("shrink
    /// lazily, grow immediately").
    pub async fn update_generation(&self, new_generation: Generation, gen_config: GenerationConfig) {
        let mut mutable = self.mutable.write().await;
        if mutable.generation == new_generation {
            return;
        }
        tracing::info!(
            address = %self.address,
            from = mutable.generation,
            to = new_generation,
            "device generation changed"
        );
        mutable.generation = new_generation;
        mutable.semaphore = Arc::new(Semaphore::new(gen_config.max_concurrent));
        mutable.min_interval = gen_config.min_interval;
    }

    /// Blocking acquisition of one device slot, respecting `ctx`'s
    /// cancellation and deadline.
    pub async fn bounded_acquire(
        &self,
        ctx: &RequestContext,
    ) -> Result<OwnedSemaphorePermit, hearthnet_types::GovernorError> {
        let semaphore = self.mutable.read().await.semaphore.clone();
        ctx.race(async move {
            semaphore
                .acquire_owned()
                .await
                .expect("device semaphore is never closed")
        })
        .await
    }

    /// Non-blocking attempt at one device slot.
    pub async fn bounded_try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.mutable.read().await.semaphore.clone();
        semaphore.try_acquire_owned().ok()
    }

    /// Wait until `now >= last_admission + min_interval`, then record
    /// `now` as the new `last_admission`. Held under this device's own
    /// interval-gate lock so admission starts for one device are
    /// strictly serialized, matching the spec's "anchored on start"
    /// semantics exactly rather than approximately.
    pub async fn wait_min_interval(
        &self,
        ctx: &RequestContext,
    ) -> Result<(), hearthnet_types::GovernorError> {
        let mut last = self.last_admission.lock().await;
        let min_interval = self.mutable.read().await.min_interval;
        let now = self.clock.now();
        if let Some(previous) = *last {
            let target = previous + min_interval;
            if now < target {
                let wait = target - now;
                ctx.race(tokio::time::sleep(wait)).await?;
            }
        }
        *last = Some(self.clock.now());
        Ok(())
    }

    /// Non-blocking interval check-and-set: if an admission could proceed
    /// right now without waiting, atomically records `now` as the new
    /// `last_admission` and returns true; otherwise leaves `last_admission`
    /// untouched and returns false. The check and the write happen under
    /// one hold of the interval-gate lock, mirroring `wait_min_interval`'s
    /// atomicity — without this, two concurrent non-blocking callers could
    /// both observe the interval as elapsed before either records its own
    /// admission, and both would be admitted inside the same window.
    pub async fn try_record_admission_start(&self) -> bool {
        let mut last = self.last_admission.lock().await;
        let min_interval = self.mutable.read().await.min_interval;
        let now = self.clock.now();
        let elapsed = match *last {
            None => true,
            Some(previous) => now >= previous + min_interval,
        };
        if elapsed {
            *last = Some(now);
        }
        elapsed
    }

    pub fn record_admission(&self) {
        self.total_admissions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure_count(&self) {
        self.total_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn stats(&self) -> DeviceStats {
        DeviceStats {
            generation: self.mutable.read().await.generation,
            in_flight: self.in_flight.load(Ordering::SeqCst),
            total_admissions: self.total_admissions.load(Ordering::SeqCst),
            total_failures: self.total_failures.load(Ordering::SeqCst),
            breaker: self.breaker.stats().await,
        }
    }
}
