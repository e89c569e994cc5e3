use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::CountersConfig;
use crate::counter_position::CounterPosition;
use crate::error::{CountersError, Result};
use crate::memory::{MemoryRegion, SIZE_OF_I64, atomic_i64_at};

/// Length of one counter slot in bytes: two cache lines.
pub const COUNTER_LENGTH: usize = 128;

/// Byte offset of slot `counter_id` within a counters region.
///
/// `None` for negative ids or offsets that do not fit in `usize`.
#[inline]
pub fn counter_offset(counter_id: i32) -> Option<usize> {
    usize::try_from(counter_id).ok()?.checked_mul(COUNTER_LENGTH)
}

/// Takes counter slots back when the position that owns them closes.
pub trait CounterReclaimer: Send + Sync {
    /// Mark `counter_id` as free for reuse.
    fn free(&self, counter_id: i32);
}

/// Lifecycle state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterState {
    /// Never handed out.
    Unused,
    /// Handed out and not yet freed.
    Allocated,
    /// Freed and waiting to be reused.
    Reclaimed,
}

struct SlotRecord {
    state: CounterState,
    label: String,
    freed_at: Option<Instant>,
    // An owning position exists for the current allocation
    owned: bool,
}

struct Registry {
    slots: Vec<SlotRecord>,
    free_list: VecDeque<i32>,
}

/// Owns a counters region and arbitrates which ids are live.
pub struct CountersManager<R: MemoryRegion> {
    region: R,
    max_counters: usize,
    reuse_timeout: Duration,
    registry: Mutex<Registry>,
}

impl<R: MemoryRegion> CountersManager<R> {
    /// Manage `config.max_counters` slots at the start of `region`.
    pub fn new(region: R, config: &CountersConfig) -> Result<Self> {
        config.validate()?;

        let required = config.required_capacity().ok_or_else(|| {
            CountersError::InvalidConfig("region size overflows usize".into())
        })?;
        region.bounds_check(0, required)?;

        // Every slot starts on a multiple of the slot length, so checking slot 0 covers them all
        atomic_i64_at(&region, 0)?;

        let slots = (0..config.max_counters)
            .map(|_| SlotRecord {
                state: CounterState::Unused,
                label: String::new(),
                freed_at: None,
                owned: false,
            })
            .collect();

        debug!(
            max_counters = config.max_counters,
            capacity = region.capacity(),
            "counters manager ready"
        );

        Ok(CountersManager {
            region,
            max_counters: config.max_counters,
            reuse_timeout: config.reuse_timeout(),
            registry: Mutex::new(Registry {
                slots,
                free_list: VecDeque::new(),
            }),
        })
    }

    pub fn max_counters(&self) -> usize {
        self.max_counters
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    /// Hand out a slot, resetting its value to zero.
    pub fn allocate(&self, label: &str) -> Result<i32> {
        let mut registry = self.registry.lock();
        let counter_id = self.next_counter_id(&mut registry)?;

        let record = &mut registry.slots[counter_id as usize];
        record.state = CounterState::Allocated;
        record.label = label.to_owned();
        record.freed_at = None;
        record.owned = false;

        self.slot(counter_id)?.store(0, Ordering::Release);

        debug!(counter_id, label, "allocated counter");
        Ok(counter_id)
    }

    fn next_counter_id(&self, registry: &mut Registry) -> Result<i32> {
        let now = Instant::now();
        if let Some(&candidate) = registry.free_list.front() {
            let ready = registry.slots[candidate as usize]
                .freed_at
                .is_none_or(|freed_at| now.duration_since(freed_at) >= self.reuse_timeout);
            if ready {
                registry.free_list.pop_front();
                return Ok(candidate);
            }
        }

        // Ids below `max_counters` fit in i32, checked by the config
        registry
            .slots
            .iter()
            .position(|record| record.state == CounterState::Unused)
            .map(|index| index as i32)
            .ok_or(CountersError::CapacityExhausted {
                capacity: self.max_counters,
            })
    }

    /// State of `counter_id`, or `None` if the id is outside the region.
    pub fn counter_state(&self, counter_id: i32) -> Option<CounterState> {
        let index = usize::try_from(counter_id).ok()?;
        self.registry.lock().slots.get(index).map(|record| record.state)
    }

    /// Label given at allocation, while the counter is allocated.
    pub fn label(&self, counter_id: i32) -> Option<String> {
        let index = usize::try_from(counter_id).ok()?;
        self.registry
            .lock()
            .slots
            .get(index)
            .filter(|record| record.state == CounterState::Allocated)
            .map(|record| record.label.clone())
    }

    /// Current value of a slot, read with acquire ordering.
    pub fn counter_value(&self, counter_id: i32) -> Result<i64> {
        Ok(self.slot(counter_id)?.load(Ordering::Acquire))
    }

    /// Number of ids currently allocated.
    pub fn allocated_count(&self) -> usize {
        self.registry
            .lock()
            .slots
            .iter()
            .filter(|record| record.state == CounterState::Allocated)
            .count()
    }

    fn slot(&self, counter_id: i32) -> Result<&AtomicI64> {
        let index = self.checked_index(counter_id)?;
        // `index < max_counters`, whose byte size the config already checked
        let slot = atomic_i64_at(&self.region, index * COUNTER_LENGTH)?;
        // The region lives as long as `self`
        Ok(unsafe { slot.as_ref() })
    }

    fn checked_index(&self, counter_id: i32) -> Result<usize> {
        match usize::try_from(counter_id) {
            Ok(index) if index < self.max_counters => Ok(index),
            Ok(index) => Err(CountersError::OutOfBounds {
                offset: index.saturating_mul(COUNTER_LENGTH),
                length: SIZE_OF_I64,
                capacity: self.max_counters * COUNTER_LENGTH,
            }),
            Err(_) => Err(CountersError::InvalidArgument(format!(
                "counter id {counter_id} is negative"
            ))),
        }
    }
}

impl<R: MemoryRegion + Clone> CountersManager<R> {
    /// Position over `counter_id` that frees the slot when closed or dropped.
    ///
    /// The id must be allocated, and each allocation gets at most one owner.
    pub fn new_position(self: &Arc<Self>, counter_id: i32) -> Result<CounterPosition<R>>
    where
        R: 'static,
    {
        let index = self.checked_index(counter_id)?;

        let mut registry = self.registry.lock();
        let record = &mut registry.slots[index];
        if record.state != CounterState::Allocated {
            return Err(CountersError::InvalidArgument(format!(
                "counter {counter_id} is {:?}, not allocated",
                record.state
            )));
        }
        if record.owned {
            return Err(CountersError::InvalidArgument(format!(
                "counter {counter_id} already has an owning position"
            )));
        }

        let reclaimer: Arc<dyn CounterReclaimer> = Arc::clone(self) as Arc<dyn CounterReclaimer>;
        let position =
            CounterPosition::with_reclaimer(self.region.clone(), counter_id, reclaimer)?;
        record.owned = true;
        Ok(position)
    }

    /// Position over `counter_id` that leaves the slot alone on close.
    pub fn reader_position(&self, counter_id: i32) -> Result<CounterPosition<R>> {
        self.checked_index(counter_id)?;
        CounterPosition::new(self.region.clone(), counter_id)
    }
}

impl<R: MemoryRegion> CounterReclaimer for CountersManager<R> {
    fn free(&self, counter_id: i32) {
        let Ok(index) = self.checked_index(counter_id) else {
            warn!(counter_id, "ignoring free of counter outside the region");
            return;
        };

        let mut registry = self.registry.lock();
        let record = &mut registry.slots[index];
        if record.state != CounterState::Allocated {
            warn!(counter_id, state = ?record.state, "ignoring free of unallocated counter");
            return;
        }

        record.state = CounterState::Reclaimed;
        record.freed_at = Some(Instant::now());
        record.owned = false;
        registry.free_list.push_back(counter_id);

        debug!(counter_id, "freed counter");
    }
}

impl<R: MemoryRegion> std::fmt::Debug for CountersManager<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountersManager")
            .field("max_counters", &self.max_counters)
            .field("allocated", &self.allocated_count())
            .field("reuse_timeout", &self.reuse_timeout)
            .finish()
    }
}
