use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

// Queue cell with careful memory layout
#[repr(C)]
pub(crate) struct Node<T> {
    // Forward link, published exactly once with release ordering
    pub(crate) next: AtomicPtr<Node<T>>,
    // Uninitialised while the node acts as the queue sentinel
    pub(crate) value: MaybeUninit<T>,
}

impl<T> Node<T> {
    pub(crate) fn new(value: T) -> Self {
        Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value: MaybeUninit::new(value),
        }
    }

    pub(crate) fn sentinel() -> Self {
        Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value: MaybeUninit::uninit(),
        }
    }

    /// Successor as seen by the consumer; pairs with [`Node::publish_next`].
    #[inline]
    pub(crate) fn load_next(&self) -> *mut Node<T> {
        self.next.load(Ordering::Acquire)
    }

    /// Link `successor` after this node so the consumer can reach it.
    #[inline]
    pub(crate) fn publish_next(&self, successor: *mut Node<T>) {
        self.next.store(successor, Ordering::Release);
    }

    /// Swap the forward link, returning the previous successor.
    #[inline]
    pub(crate) fn swap_next(&self, successor: *mut Node<T>) -> *mut Node<T> {
        self.next.swap(successor, Ordering::AcqRel)
    }
}
