use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::trace;

use crate::counters::{CounterReclaimer, counter_offset};
use crate::error::{CountersError, Result};
use crate::memory::{MemoryRegion, atomic_i64_at};
use crate::position::{CLOSED_POSITION_VALUE, Position, ReadablePosition};

/// A [`Position`] stored in one slot of a counters region.
///
/// The position owns no counter memory: it keeps a handle to the region so
/// the mapping outlives it, and, when built with a reclaimer, hands the slot
/// back exactly once on [`close`](ReadablePosition::close) or drop.
///
/// Writing through a closed position is a contract violation. Debug builds
/// panic; release builds ignore the write.
pub struct CounterPosition<R: MemoryRegion> {
    counter_id: i32,
    value: NonNull<AtomicI64>,
    reclaimer: Option<Arc<dyn CounterReclaimer>>,
    closed: bool,
    // Keeps `value` mapped
    _region: R,
}

// `value` points into `_region`, which is Send + Sync, and is only touched atomically
unsafe impl<R: MemoryRegion> Send for CounterPosition<R> {}
unsafe impl<R: MemoryRegion> Sync for CounterPosition<R> {}

impl<R: MemoryRegion> CounterPosition<R> {
    /// Map a position over slot `counter_id` of `region`.
    pub fn new(region: R, counter_id: i32) -> Result<Self> {
        Self::build(region, counter_id, None)
    }

    /// Map a position that releases `counter_id` to `reclaimer` when closed.
    pub fn with_reclaimer(
        region: R,
        counter_id: i32,
        reclaimer: Arc<dyn CounterReclaimer>,
    ) -> Result<Self> {
        Self::build(region, counter_id, Some(reclaimer))
    }

    fn build(
        region: R,
        counter_id: i32,
        reclaimer: Option<Arc<dyn CounterReclaimer>>,
    ) -> Result<Self> {
        let offset = counter_offset(counter_id).ok_or_else(|| {
            CountersError::InvalidArgument(format!("counter id {counter_id} has no slot offset"))
        })?;
        let value = atomic_i64_at(&region, offset)?;

        Ok(CounterPosition {
            counter_id,
            value,
            reclaimer,
            closed: false,
            _region: region,
        })
    }

    /// Does closing this position free its slot.
    pub fn owns_counter(&self) -> bool {
        self.reclaimer.is_some()
    }

    #[inline]
    fn slot(&self) -> &AtomicI64 {
        // Valid while `_region` is alive, which is as long as `self`
        unsafe { self.value.as_ref() }
    }

    #[inline]
    fn load(&self, order: Ordering) -> i64 {
        if self.closed {
            CLOSED_POSITION_VALUE
        } else {
            self.slot().load(order)
        }
    }

    #[inline]
    fn store(&self, value: i64, order: Ordering) {
        debug_assert!(!self.closed, "write to closed counter {}", self.counter_id);
        if !self.closed {
            self.slot().store(value, order);
        }
    }

    #[inline]
    fn propose(&self, proposed: i64, order: Ordering) -> bool {
        debug_assert!(!self.closed, "propose on closed counter {}", self.counter_id);
        if self.closed {
            return false;
        }

        let slot = self.slot();
        if slot.load(Ordering::Relaxed) < proposed {
            slot.store(proposed, order);
            true
        } else {
            false
        }
    }
}

impl<R: MemoryRegion> ReadablePosition for CounterPosition<R> {
    fn id(&self) -> i32 {
        self.counter_id
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn get_volatile(&self) -> i64 {
        self.load(Ordering::SeqCst)
    }

    fn get_acquire(&self) -> i64 {
        self.load(Ordering::Acquire)
    }

    fn get_opaque(&self) -> i64 {
        self.load(Ordering::Relaxed)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }

        self.closed = true;
        if let Some(reclaimer) = self.reclaimer.take() {
            reclaimer.free(self.counter_id);
        }
        trace!(counter_id = self.counter_id, "closed position");
    }
}

impl<R: MemoryRegion> Position for CounterPosition<R> {
    fn get(&self) -> i64 {
        self.load(Ordering::Relaxed)
    }

    fn set_volatile(&self, value: i64) {
        self.store(value, Ordering::SeqCst);
    }

    fn set_release(&self, value: i64) {
        self.store(value, Ordering::Release);
    }

    fn set_opaque(&self, value: i64) {
        self.store(value, Ordering::Relaxed);
    }

    fn set(&self, value: i64) {
        self.store(value, Ordering::Relaxed);
    }

    fn propose_max(&self, proposed: i64) -> bool {
        self.propose(proposed, Ordering::Relaxed)
    }

    fn propose_max_release(&self, proposed: i64) -> bool {
        self.propose(proposed, Ordering::Release)
    }

    fn propose_max_opaque(&self, proposed: i64) -> bool {
        self.propose(proposed, Ordering::Relaxed)
    }
}

impl<R: MemoryRegion> Drop for CounterPosition<R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<R: MemoryRegion> fmt::Display for CounterPosition<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CounterPosition {{ closed: {}, counter_id: {}, value: {} }}",
            self.closed,
            self.counter_id,
            self.get_volatile()
        )
    }
}

impl<R: MemoryRegion> fmt::Debug for CounterPosition<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterPosition")
            .field("counter_id", &self.counter_id)
            .field("closed", &self.closed)
            .field("owns_counter", &self.owns_counter())
            .field("value", &self.get_volatile())
            .finish()
    }
}
