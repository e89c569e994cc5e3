use std::cell::UnsafeCell;
use std::fmt;
use std::hint;
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

use tracing::trace;

use crate::node::Node;
use crate::node_allocator::NodeAllocator;

// Keeps the consumer-owned head and the producer-contended tail on separate lines
#[repr(align(128))]
struct LinePadded<T>(T);

// Node chain shared by the consumer handle and every producer handle
struct Shared<T> {
    head: LinePadded<UnsafeCell<*mut Node<T>>>,
    tail: LinePadded<AtomicPtr<Node<T>>>,
    allocator: NodeAllocator<T>,
}

unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn new() -> Self {
        let allocator = NodeAllocator::new();
        let sentinel = allocator.allocate_sentinel();

        Shared {
            head: LinePadded(UnsafeCell::new(sentinel)),
            tail: LinePadded(AtomicPtr::new(sentinel)),
            allocator,
        }
    }

    fn offer(&self, value: T) -> bool {
        let node = self.allocator.allocate(value);

        let mut prev_tail = self.tail.0.load(Ordering::Acquire);
        loop {
            match self.tail.0.compare_exchange_weak(
                prev_tail,
                node,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => {
                    prev_tail = current;
                    hint::spin_loop();
                }
            }
        }

        // Only the winner of the CAS for `prev_tail` writes its link, and the
        // consumer cannot free `prev_tail` until that link is visible
        unsafe { (*prev_tail).publish_next(node) };

        true
    }

    // Only called through the consumer handle
    #[inline]
    fn head(&self) -> *mut Node<T> {
        unsafe { *self.head.0.get() }
    }

    fn walk<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(&T),
    {
        let tail = self.tail.0.load(Ordering::Acquire);
        let mut current = self.head();
        let mut count = 0;

        while current != tail {
            let next = unsafe { (*current).load_next() };
            if next.is_null() {
                break;
            }

            visit(unsafe { (*next).value.assume_init_ref() });
            current = next;
            count += 1;
        }

        count
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // No handle is left, so the whole chain is exclusively ours
        let sentinel = self.head();
        let mut current = unsafe { (*sentinel).swap_next(ptr::null_mut()) };
        unsafe { self.allocator.deallocate(sentinel) };

        let mut undrained = 0usize;
        while !current.is_null() {
            unsafe {
                let next = (*current).swap_next(ptr::null_mut());
                (*current).value.assume_init_drop();
                self.allocator.deallocate(current);
                current = next;
            }
            undrained += 1;
        }

        if undrained > 0 {
            trace!(undrained, "dropping queue with undrained elements");
        }
    }
}

/// Unbounded FIFO for many producer threads and exactly one consumer.
///
/// This handle is the consumer: it is not `Clone`, and the operations that
/// move the head take `&mut self`, so the single-consumer rule is enforced by
/// the borrow checker instead of by convention. Producers on other threads
/// use [`Producer`] handles from [`ManyToOneLinkedQueue::producer`].
pub struct ManyToOneLinkedQueue<T> {
    shared: Arc<Shared<T>>,
    // Hands out `&T` from `&self`, so sharing the consumer needs `T: Sync`
    _marker: PhantomData<*const T>,
}

unsafe impl<T: Send> Send for ManyToOneLinkedQueue<T> {}
unsafe impl<T: Send + Sync> Sync for ManyToOneLinkedQueue<T> {}

impl<T> Default for ManyToOneLinkedQueue<T> {
    fn default() -> Self {
        ManyToOneLinkedQueue::new()
    }
}

impl<T> ManyToOneLinkedQueue<T> {
    /// Create an empty queue holding only its sentinel node.
    pub fn new() -> Self {
        ManyToOneLinkedQueue {
            shared: Arc::new(Shared::new()),
            _marker: PhantomData,
        }
    }

    /// Create a producer handle that can be moved to another thread.
    pub fn producer(&self) -> Producer<T> {
        Producer {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Append `value` at the tail. Never blocks and always returns `true`.
    pub fn offer(&self, value: T) -> bool {
        self.shared.offer(value)
    }

    /// Remove and return the element after the sentinel, if one is visible.
    ///
    /// An offer that has swung the tail but not yet linked its node is not
    /// visible, so `None` does not prove the queue is empty.
    pub fn poll(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let head = shared.head();
        let next = unsafe { (*head).load_next() };

        if next.is_null() {
            return None;
        }

        unsafe {
            // `next` becomes the sentinel, so its payload is moved out
            let value = (*next).value.assume_init_read();
            *shared.head.0.get() = next;
            shared.allocator.deallocate(head);
            Some(value)
        }
    }

    /// Borrow the element that the next [`poll`](Self::poll) would return.
    pub fn peek(&self) -> Option<&T> {
        let next = unsafe { (*self.shared.head()).load_next() };

        if next.is_null() {
            None
        } else {
            // Nodes are only freed by `poll`, which needs `&mut self`
            Some(unsafe { (*next).value.assume_init_ref() })
        }
    }

    /// True if no element is currently visible to the consumer.
    pub fn is_empty(&self) -> bool {
        unsafe { (*self.shared.head()).load_next().is_null() }
    }

    /// Number of visible elements. O(n) and only a snapshot under concurrent offers.
    pub fn size(&self) -> usize {
        self.shared.walk(|_| {})
    }

    /// Poll until nothing is visible.
    pub fn clear(&mut self) {
        while self.poll().is_some() {}
    }
}

impl<T: fmt::Display> fmt::Display for ManyToOneLinkedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut result = f.write_str("{");
        let mut first = true;

        self.shared.walk(|value| {
            if result.is_err() {
                return;
            }
            result = if first {
                write!(f, "{value}")
            } else {
                write!(f, ", {value}")
            };
            first = false;
        });

        result?;
        f.write_str("}")
    }
}

impl<T> fmt::Debug for ManyToOneLinkedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManyToOneLinkedQueue")
            .field("size", &self.size())
            .field("producers", &(Arc::strong_count(&self.shared) - 1))
            .finish()
    }
}

/// Producer side of a [`ManyToOneLinkedQueue`].
///
/// Cheap to clone; every clone links into the same queue.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Producer {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Producer<T> {
    /// Append `value` at the tail. Never blocks and always returns `true`.
    pub fn offer(&self, value: T) -> bool {
        self.shared.offer(value)
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}
