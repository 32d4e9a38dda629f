use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedSemaphorePermit;

struct Permits {
    device: OwnedSemaphorePermit,
    global: OwnedSemaphorePermit,
}

/// The one-shot token returned by a successful `acquire`/`try_acquire`.
///
/// `release()` is idempotent: the first call returns the device and
/// global permits to their semaphores and decrements the device's
/// in-flight counter; every subsequent call is a no-op. Dropping the
/// handle without calling `release()` releases it anyway, so a caller
/// that forgets never leaks a slot — but callers should still call
/// `release()` explicitly once their operation completes, since that is
/// the point at which `last_admission`-adjacent bookkeeping is
/// considered final.
#[derive(Debug)]
pub struct ReleaseHandle {
    permits: Mutex<Option<Permits>>,
    in_flight: Arc<AtomicUsize>,
}

impl ReleaseHandle {
    pub(crate) fn new(
        device: OwnedSemaphorePermit,
        global: OwnedSemaphorePermit,
        in_flight: Arc<AtomicUsize>,
    ) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            permits: Mutex::new(Some(Permits { device, global })),
            in_flight,
        }
    }

    /// Return this admission's slots. Safe to call any number of times;
    /// only the first call has any effect.
    pub fn release(&self) {
        let taken = self
            .permits
            .lock()
            .expect("release handle mutex poisoned")
            .take();
        if taken.is_some() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!("released device admission slot");
        }
    }
}

impl Drop for ReleaseHandle {
    fn drop(&mut self) {
        self.release();
    }
}
