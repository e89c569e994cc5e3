// Orderings: volatile is SeqCst, acquire/release as named, opaque and plain are Relaxed.
// Plain stays atomic since another process may write the slot concurrently.

/// Value returned by reads once a position has been closed.
pub const CLOSED_POSITION_VALUE: i64 = -1;

/// Read side of a position.
pub trait ReadablePosition {
    /// Identifier of the counter slot backing this position.
    fn id(&self) -> i32;

    /// Has [`close`](Self::close) been called.
    fn is_closed(&self) -> bool;

    /// Sequentially consistent read.
    fn get_volatile(&self) -> i64;

    /// Read that synchronises with a prior release write.
    fn get_acquire(&self) -> i64;

    /// Coherent read with no cross-thread synchronisation.
    fn get_opaque(&self) -> i64;

    /// Stop using the slot, releasing it to its manager if this position owns it.
    ///
    /// Idempotent.
    fn close(&mut self);
}

/// Read and write side of a position.
///
/// The `propose_max*` family reads and then conditionally writes. It is not a
/// single atomic step, so at most one thread may propose on a given slot.
pub trait Position: ReadablePosition {
    /// Plain read, for single-threaded or externally synchronised use.
    fn get(&self) -> i64;

    fn set_volatile(&self, value: i64);

    fn set_release(&self, value: i64);

    /// Alias for [`set_release`](Self::set_release).
    fn set_ordered(&self, value: i64) {
        self.set_release(value);
    }

    fn set_opaque(&self, value: i64);

    fn set(&self, value: i64);

    /// Write `proposed` with plain ordering if it is greater than the current value.
    fn propose_max(&self, proposed: i64) -> bool;

    /// Write `proposed` with release ordering if it is greater than the current value.
    fn propose_max_release(&self, proposed: i64) -> bool;

    /// Alias for [`propose_max_release`](Self::propose_max_release).
    fn propose_max_ordered(&self, proposed: i64) -> bool {
        self.propose_max_release(proposed)
    }

    /// Write `proposed` with opaque ordering if it is greater than the current value.
    fn propose_max_opaque(&self, proposed: i64) -> bool;
}
