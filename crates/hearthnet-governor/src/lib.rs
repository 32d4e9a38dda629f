//! Per-device request governor: gates every outbound call to a fleet of
//! resource-constrained devices through a generation-aware concurrency
//! semaphore, a minimum-interval spacer, and a per-device circuit
//! breaker, all bounded by a process-wide global concurrency cap.
//!
//! The [`Governor`] is the only type most callers need. Construct one at
//! program start from a [`hearthnet_types::GovernorConfig`] and share it
//! (behind an `Arc`) with every call site that talks to a device.

mod circuit;
mod clock;
mod context;
mod device;
mod governor;
mod release;

pub use circuit::{CircuitBreakerStats, CircuitState};
pub use clock::{Clock, FakeClock, RealClock};
pub use context::RequestContext;
pub use device::DeviceStats;
pub use governor::Governor;
pub use release::ReleaseHandle;

pub use hearthnet_types::{
    is_connectivity_failure, normalize_generation, ConfigError, GenerationConfig, GlobalConfig,
    Generation, GovernorConfig, GovernorError,
};
