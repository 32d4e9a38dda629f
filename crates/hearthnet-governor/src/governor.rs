use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};

use hearthnet_types::{
    is_connectivity_failure, normalize_generation, Generation, GovernorConfig, GovernorError,
};

use crate::clock::{Clock, RealClock};
use crate::context::RequestContext;
use crate::device::{DeviceState, DeviceStats};
use crate::release::ReleaseHandle;

/// The process-wide per-device request governor.
///
/// One instance should be constructed at program start and shared (via
/// `Arc`) with every call site that talks to a device — it is meant to be
/// an injected dependency, not a hidden global singleton, so that tests
/// can construct independent instances freely.
pub struct Governor {
    config: GovernorConfig,
    global_semaphore: Arc<Semaphore>,
    states: RwLock<HashMap<String, Arc<DeviceState>>>,
    clock: Arc<dyn Clock>,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Self {
        Self::with_clock(config, Arc::new(RealClock))
    }

    /// Construct with an injected clock, for deterministic tests.
    pub fn with_clock(config: GovernorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            global_semaphore: Arc::new(Semaphore::new(config.global.max_concurrent)),
            config,
            states: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Blocking admission: suspends on the global semaphore, the device
    /// semaphore, and the minimum-interval gate in turn, any of which may
    /// be interrupted by `ctx`'s cancellation or deadline. No slot is
    /// left acquired on an error return.
    pub async fn acquire(
        &self,
        ctx: &RequestContext,
        address: &str,
        generation: Generation,
    ) -> Result<ReleaseHandle, GovernorError> {
        let generation = normalize_generation(generation);
        let device = self.get_or_create_device(address, generation).await;

        if !device.breaker().allow().await {
            let retry_after = device.breaker().retry_after().await;
            return Err(GovernorError::CircuitOpen {
                address: address.to_string(),
                retry_after,
            });
        }

        let global_semaphore = self.global_semaphore.clone();
        let global_permit = ctx
            .race(async move {
                global_semaphore
                    .acquire_owned()
                    .await
                    .expect("global semaphore is never closed")
            })
            .await?;

        let device_permit = match device.bounded_acquire(ctx).await {
            Ok(permit) => permit,
            Err(err) => {
                drop(global_permit);
                return Err(err);
            }
        };

        if let Err(err) = device.wait_min_interval(ctx).await {
            drop(device_permit);
            drop(global_permit);
            return Err(err);
        }

        device.record_admission();
        tracing::debug!(address, "admission granted");
        Ok(ReleaseHandle::new(
            device_permit,
            global_permit,
            device.in_flight_counter(),
        ))
    }

    /// Non-blocking admission. Returns `None` immediately if the breaker
    /// is open, either semaphore is exhausted, or the minimum interval
    /// has not yet elapsed. No partial acquisition is retained on a
    /// `None` return.
    pub async fn try_acquire(
        &self,
        address: &str,
        generation: Generation,
    ) -> Option<ReleaseHandle> {
        let generation = normalize_generation(generation);
        let device = self.get_or_create_device(address, generation).await;

        if !device.breaker().allow().await {
            return None;
        }

        let global_permit = self.global_semaphore.clone().try_acquire_owned().ok()?;

        let device_permit = match device.bounded_try_acquire().await {
            Some(permit) => permit,
            None => {
                drop(global_permit);
                return None;
            }
        };

        if !device.try_record_admission_start().await {
            drop(device_permit);
            drop(global_permit);
            return None;
        }

        device.record_admission();
        Some(ReleaseHandle::new(
            device_permit,
            global_permit,
            device.in_flight_counter(),
        ))
    }

    /// Unconditionally record a success against `address`'s breaker.
    /// No-op if `address` has never been seen.
    pub async fn record_success(&self, address: &str) {
        if let Some(device) = self.lookup(address).await {
            device.breaker().record_success().await;
        }
    }

    /// Unconditionally record a failure against `address`'s breaker.
    /// No-op if `address` has never been seen. Unlike
    /// [`Governor::record_failure_for`], this always forwards the
    /// failure regardless of whether the originating context was a
    /// polling context.
    pub async fn record_failure(&self, address: &str) {
        if let Some(device) = self.lookup(address).await {
            device.record_failure_count();
            device.breaker().record_failure().await;
        }
    }

    /// Policy-aware failure recording: suppressed entirely when `ctx` is
    /// tagged as background polling, so periodic health checks can never
    /// trip a breaker that would then block user-initiated requests.
    pub async fn record_failure_for(&self, ctx: &RequestContext, address: &str) {
        if ctx.is_polling() {
            tracing::debug!(address, "dropping failure from polling context");
            return;
        }
        self.record_failure(address).await;
    }

    /// Convenience wrapper classifying `err` via
    /// [`hearthnet_types::is_connectivity_failure`] and routing the
    /// outcome through [`Governor::record_failure_for`] /
    /// [`Governor::record_success`] accordingly.
    pub async fn record_outcome(
        &self,
        ctx: &RequestContext,
        address: &str,
        err: Option<&dyn std::error::Error>,
    ) {
        match err {
            Some(err) if is_connectivity_failure(err) => {
                self.record_failure_for(ctx, address).await;
            }
            _ => {
                self.record_success(address).await;
            }
        }
    }

    pub async fn is_circuit_open(&self, address: &str) -> bool {
        match self.lookup(address).await {
            Some(device) => {
                device.breaker().state().await == crate::circuit::CircuitState::Open
            }
            None => false,
        }
    }

    /// Change a known (or not-yet-seen) address's generation, resizing
    /// its semaphore per the "shrink lazily, grow immediately" policy.
    pub async fn set_generation(&self, address: &str, generation: Generation) {
        let generation = normalize_generation(generation);
        let device = self.get_or_create_device(address, generation).await;
        let gen_config = self.config.generation(generation);
        device.update_generation(generation, gen_config).await;
    }

    pub async fn reset(&self, address: &str) {
        if let Some(device) = self.lookup(address).await {
            device.breaker().reset().await;
        }
    }

    pub async fn reset_all(&self) {
        let states = self.states.read().await;
        for device in states.values() {
            device.breaker().reset().await;
        }
    }

    pub async fn stats(&self, address: &str) -> Option<DeviceStats> {
        match self.lookup(address).await {
            Some(device) => Some(device.stats().await),
            None => None,
        }
    }

    pub async fn all_stats(&self) -> HashMap<String, DeviceStats> {
        let states = self.states.read().await;
        let mut result = HashMap::with_capacity(states.len());
        for (address, device) in states.iter() {
            result.insert(address.clone(), device.stats().await);
        }
        result
    }

    async fn lookup(&self, address: &str) -> Option<Arc<DeviceState>> {
        self.states.read().await.get(address).cloned()
    }

    /// Double-checked lazy creation: look up under a read lock first;
    /// only take the write lock (and re-check) if the address is
    /// missing, so the common case of an already-known address never
    /// blocks concurrent readers on each other.
    async fn get_or_create_device(&self, address: &str, generation: Generation) -> Arc<DeviceState> {
        if let Some(device) = self.lookup(address).await {
            if device.generation().await != generation {
                let gen_config = self.config.generation(generation);
                device.update_generation(generation, gen_config).await;
            }
            return device;
        }

        let mut states = self.states.write().await;
        if let Some(device) = states.get(address) {
            let device = device.clone();
            drop(states);
            if device.generation().await != generation {
                let gen_config = self.config.generation(generation);
                device.update_generation(generation, gen_config).await;
            }
            return device;
        }

        tracing::info!(address, generation, "creating new device state");
        let gen_config = self.config.generation(generation);
        let device = Arc::new(DeviceState::new(
            address,
            generation,
            gen_config,
            gen_config.fail_threshold,
            self.config.global.success_threshold,
            self.config.global.open_duration,
            self.clock.clone(),
        ));
        states.insert(address.to_string(), device.clone());
        device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use std::time::Duration;

    fn config() -> GovernorConfig {
        GovernorConfig {
            gen1: hearthnet_types::GenerationConfig {
                min_interval: Duration::from_millis(10),
                max_concurrent: 1,
                fail_threshold: 3,
            },
            gen2: hearthnet_types::GenerationConfig {
                min_interval: Duration::from_millis(1),
                max_concurrent: 10,
                fail_threshold: 2,
            },
            global: hearthnet_types::GlobalConfig {
                max_concurrent: 3,
                open_duration: Duration::from_millis(50),
                success_threshold: 2,
            },
        }
    }

    #[tokio::test]
    async fn gen1_exclusivity() {
        let governor = Governor::new(config());
        let ctx = RequestContext::background();

        let first = governor.acquire(&ctx, "A1", 1).await.unwrap();
        assert!(governor.try_acquire("A1", 1).await.is_none());
        first.release();

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(governor.try_acquire("A1", 1).await.is_some());
    }

    #[tokio::test]
    async fn global_cap_blocks_a_fourth_admission() {
        let governor = Governor::new(config());
        let ctx = RequestContext::background();

        let a = governor.acquire(&ctx, "A", 2).await.unwrap();
        let _b = governor.acquire(&ctx, "B", 2).await.unwrap();
        let _c = governor.acquire(&ctx, "C", 2).await.unwrap();

        assert!(governor.try_acquire("D", 2).await.is_none());

        a.release();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(governor.try_acquire("D", 2).await.is_some());
    }

    #[tokio::test]
    async fn circuit_opens_then_recovers() {
        let clock = Arc::new(FakeClock::new());
        let governor = Governor::with_clock(config(), clock.clone());
        let ctx = RequestContext::background();

        for _ in 0..2 {
            let handle = governor.acquire(&ctx, "A", 2).await.unwrap();
            governor.record_failure("A").await;
            handle.release();
        }
        assert!(governor.is_circuit_open("A").await);

        let err = governor.acquire(&ctx, "A", 2).await.unwrap_err();
        assert!(matches!(err, GovernorError::CircuitOpen { .. }));

        clock.advance(Duration::from_millis(60));

        let probe1 = governor.acquire(&ctx, "A", 2).await.unwrap();
        governor.record_success("A").await;
        probe1.release();

        let probe2 = governor.acquire(&ctx, "A", 2).await.unwrap();
        governor.record_success("A").await;
        probe2.release();

        assert!(!governor.is_circuit_open("A").await);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let clock = Arc::new(FakeClock::new());
        let governor = Governor::with_clock(config(), clock.clone());
        let ctx = RequestContext::background();

        for _ in 0..2 {
            let handle = governor.acquire(&ctx, "A", 2).await.unwrap();
            governor.record_failure("A").await;
            handle.release();
        }
        clock.advance(Duration::from_millis(60));

        let probe = governor.acquire(&ctx, "A", 2).await.unwrap();
        governor.record_success("A").await;
        probe.release();

        let probe2 = governor.acquire(&ctx, "A", 2).await.unwrap();
        governor.record_failure("A").await;
        probe2.release();

        assert!(governor.is_circuit_open("A").await);
    }

    #[tokio::test]
    async fn polling_context_does_not_trip_circuit() {
        let mut cfg = config();
        cfg.gen2.fail_threshold = 1;
        let governor = Governor::new(cfg);
        let ctx = RequestContext::background();
        let polling_ctx = ctx.mark_as_polling();

        let handle = governor.acquire(&polling_ctx, "A", 2).await.unwrap();
        governor.record_failure_for(&polling_ctx, "A").await;
        handle.release();
        assert!(!governor.is_circuit_open("A").await);

        let handle = governor.acquire(&ctx, "A", 2).await.unwrap();
        governor.record_failure_for(&ctx, "A").await;
        handle.release();
        assert!(governor.is_circuit_open("A").await);
    }

    #[tokio::test]
    async fn cancellation_leaks_no_slots() {
        let mut cfg = config();
        cfg.gen2.min_interval = Duration::from_secs(1);
        cfg.gen2.max_concurrent = 1;
        let governor = Governor::new(cfg);
        let ctx = RequestContext::background();

        let held = governor.acquire(&ctx, "A1", 2).await.unwrap();
        assert_eq!(governor.stats("A1").await.unwrap().in_flight, 1);

        let deadline_ctx = ctx.with_timeout(Duration::from_millis(10));
        let err = governor.acquire(&deadline_ctx, "A1", 2).await.unwrap_err();
        assert_eq!(err, GovernorError::DeadlineExceeded);
        assert_eq!(governor.stats("A1").await.unwrap().in_flight, 1);

        held.release();
        assert_eq!(governor.stats("A1").await.unwrap().in_flight, 0);
    }

    #[tokio::test]
    async fn generation_normalization_maps_out_of_range_values() {
        let governor = Governor::new(config());
        governor.set_generation("low", 0).await;
        governor.set_generation("high", 99).await;
        assert_eq!(governor.stats("low").await.unwrap().generation, 1);
        assert_eq!(governor.stats("high").await.unwrap().generation, 2);
    }

    /// Regression test for the non-atomic interval gate: several tasks
    /// race `try_acquire` against the same gen-2 device (capacity > 1,
    /// so the device semaphore alone can't serialize them) concurrently,
    /// from real OS threads. Only one racer may be admitted inside a
    /// single min-interval window.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_try_acquire_admits_only_one_per_interval_window() {
        let mut cfg = config();
        cfg.gen2.max_concurrent = 5;
        cfg.gen2.min_interval = Duration::from_millis(50);
        let governor = Arc::new(Governor::new(cfg));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let governor = governor.clone();
            tasks.push(tokio::spawn(async move {
                governor.try_acquire("A1", 2).await
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                admitted += 1;
            }
        }
        assert_eq!(
            admitted, 1,
            "only one of several concurrent try_acquire racers should be admitted inside one min-interval window"
        );
    }

    #[tokio::test]
    async fn reset_all_closes_every_breaker() {
        let governor = Governor::new(config());
        let ctx = RequestContext::background();
        for _ in 0..3 {
            let handle = governor.acquire(&ctx, "A", 2).await.unwrap();
            governor.record_failure("A").await;
            handle.release();
        }
        assert!(governor.is_circuit_open("A").await);
        governor.reset_all().await;
        assert!(!governor.is_circuit_open("A").await);
    }
}
