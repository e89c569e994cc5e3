use std::{
    alloc::{Layout, alloc, dealloc, handle_alloc_error},
    marker::PhantomData,
};

use crate::{CACHE_LINE_SIZE, node::Node};

/// Memory manager for queue [`Node`] allocation.
///
/// Every node occupies whole cache lines so producers linking adjacent nodes
/// do not contend on the same line.
pub(crate) struct NodeAllocator<T> {
    layout: Layout,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for NodeAllocator<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeAllocator<T> {}

impl<T> Default for NodeAllocator<T> {
    fn default() -> Self {
        NodeAllocator::new()
    }
}

impl<T> NodeAllocator<T> {
    pub(crate) fn new() -> Self {
        let natural = Layout::new::<Node<T>>();

        // Round up to cache line size, keeping the natural layout if the
        // payload already demands a stricter alignment
        let layout = natural
            .align_to(*CACHE_LINE_SIZE)
            .map(|layout| layout.pad_to_align())
            .unwrap_or(natural);

        NodeAllocator {
            layout,
            _marker: PhantomData,
        }
    }

    /// Layout used for every node handed out by this allocator.
    pub(crate) fn layout(&self) -> Layout {
        self.layout
    }

    /// Allocate a node carrying `value`.
    pub(crate) fn allocate(&self, value: T) -> *mut Node<T> {
        self.place(Node::new(value))
    }

    /// Allocate a payload-less sentinel node.
    pub(crate) fn allocate_sentinel(&self) -> *mut Node<T> {
        self.place(Node::sentinel())
    }

    fn place(&self, node: Node<T>) -> *mut Node<T> {
        let layout = self.layout();
        let ptr = unsafe { alloc(layout) as *mut Node<T> };
        if ptr.is_null() {
            handle_alloc_error(layout);
        }

        unsafe { ptr.write(node) };
        ptr
    }

    /// Release the memory of `node` without dropping its payload.
    ///
    /// # Safety
    ///
    /// `node` must come from an allocator of the same `T`, must not be
    /// reachable by any other thread, and its payload must already have been
    /// moved out or dropped (or never initialised).
    pub(crate) unsafe fn deallocate(&self, node: *mut Node<T>) {
        unsafe { dealloc(node as *mut u8, self.layout()) }
    }
}
