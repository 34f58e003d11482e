//! The Proxy Synchronization Model: wait-free handoff instead of locking.
//!
//! When two or more threads contend for the same region, the first arrival
//! becomes the proxy and is responsible for draining the region's queue
//! until it is empty. Threads that arrive while the region is busy link
//! their load into the queue and return immediately; the proxy applies it
//! on their behalf. Nobody blocks on a lock and nobody but the proxy
//! touches the protected region.
//!
//! Two observationally equivalent closing strategies are provided:
//! [`process_cas`] (single compare-exchange, the default) and
//! [`process_fas`] (two swaps, for targets where compare-exchange is
//! disproportionately expensive).

use std::hint;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    data: ManuallyDrop<T>,
}

impl<T> Node<T> {
    fn boxed(data: T) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            data: ManuallyDrop::new(data),
        }))
    }
}

/// Per-region handoff queue.
///
/// The tail pointer is the sole synchronization variable: null means the
/// region is idle and the next arrival becomes its proxy.
pub struct PsmQueue<T> {
    tail: AtomicPtr<Node<T>>,
}

// SAFETY: nodes are heap-allocated and reached only through the atomic
// tail / next pointers; ownership of a node transfers to the region's
// proxy the moment it is linked in.
unsafe impl<T: Send> Send for PsmQueue<T> {}
unsafe impl<T: Send> Sync for PsmQueue<T> {}

impl<T> PsmQueue<T> {
    pub const fn new() -> Self {
        Self {
            tail: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl<T> Default for PsmQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for PsmQueue<T> {
    fn drop(&mut self) {
        // After every producer has returned, a drained queue holds a null
        // tail. A proxy that panicked inside `apply` can abandon the queue
        // mid-chain; its tail node is still allocated (nodes are unlinked
        // from the tail before they are freed), but whether the payload
        // was already taken is unknowable here, so only the allocation is
        // reclaimed and the payload is left untouched.
        let tail = *self.tail.get_mut();
        if !tail.is_null() {
            // SAFETY: no producer or proxy is active during drop, and the
            // tail never points at a reclaimed node.
            unsafe { drop(Box::from_raw(tail)) };
        }
    }
}

/// Deliver `data` to the region guarded by `q`.
///
/// `apply` runs only on the region's proxy thread, serialized, in enqueue
/// order; it is the exclusive mutation window for whatever the queue
/// protects. Returns true when this call took the proxy branch (the
/// handoff branch returns without doing any work of its own).
pub fn process_cas<T>(q: &PsmQueue<T>, data: T, mut apply: impl FnMut(T)) -> bool {
    let node = Node::boxed(data);
    let pred = q.tail.swap(node, Ordering::AcqRel);
    if !pred.is_null() {
        // Handoff: the region is busy, delegate to the current proxy.
        // SAFETY: pred cannot be freed before this store is visible; the
        // proxy only reclaims a node after loading a non-null next from
        // it, or after closing the queue while pred was still the tail.
        unsafe { (*pred).next.store(node, Ordering::Release) };
        return false;
    }

    // Proxy: drain until the queue closes.
    let mut node = node;
    loop {
        // SAFETY: the proxy exclusively owns every node from `node` up to
        // the current tail; data is taken exactly once per node.
        apply(unsafe { ManuallyDrop::take(&mut (*node).data) });
        let mut next = unsafe { (*node).next.load(Ordering::Acquire) };
        if next.is_null() {
            // Seemingly no successor: close the queue if the tail still
            // points here.
            if q
                .tail
                .compare_exchange(node, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                unsafe { drop(Box::from_raw(node)) };
                return true;
            }
            // A successor is in flight; wait for its link to appear.
            next = wait_next(node);
        }
        unsafe { drop(Box::from_raw(node)) };
        node = next;
    }
}

/// [`process_cas`] with a fetch-and-store closing sequence.
///
/// Closing swaps the tail to null; if the swapped-out tail is not the
/// draining node, late arrivals extended the queue, so the observed tail
/// is republished for future enqueuers. The second swap can itself race a
/// fresh arrival that saw the momentary null and became a new proxy; that
/// phantom successor is repaired by splicing the remainder of the old
/// chain onto the new proxy's node.
pub fn process_fas<T>(q: &PsmQueue<T>, data: T, mut apply: impl FnMut(T)) -> bool {
    let node = Node::boxed(data);
    let pred = q.tail.swap(node, Ordering::AcqRel);
    if !pred.is_null() {
        // SAFETY: as in `process_cas`.
        unsafe { (*pred).next.store(node, Ordering::Release) };
        return false;
    }

    let mut node = node;
    loop {
        // SAFETY: as in `process_cas`.
        apply(unsafe { ManuallyDrop::take(&mut (*node).data) });
        let mut next = unsafe { (*node).next.load(Ordering::Acquire) };
        if next.is_null() {
            let pred = q.tail.swap(ptr::null_mut(), Ordering::AcqRel);
            if pred == node {
                unsafe { drop(Box::from_raw(node)) };
                return true;
            }
            // The queue grew past `node`: put the real tail back so
            // enqueuers keep appending to it.
            let usurper = q.tail.swap(pred, Ordering::AcqRel);
            next = wait_next(node);
            if !usurper.is_null() {
                // A new proxy claimed the queue between the two swaps and
                // is draining from `usurper`; give it the rest of our
                // chain and retire.
                // SAFETY: the usurper node is live (its proxy is inside
                // the drain loop waiting on next) and `next` onward is
                // exclusively ours to hand over.
                unsafe { (*usurper).next.store(next, Ordering::Release) };
                unsafe { drop(Box::from_raw(node)) };
                return true;
            }
        }
        unsafe { drop(Box::from_raw(node)) };
        node = next;
    }
}

#[inline]
fn wait_next<T>(node: *mut Node<T>) -> *mut Node<T> {
    // Bounded wait: the producer has already swapped the tail and is one
    // store away from publishing the link.
    loop {
        // SAFETY: caller owns the node; the producer of its successor only
        // writes `next` once.
        let next = unsafe { (*node).next.load(Ordering::Acquire) };
        if !next.is_null() {
            return next;
        }
        hint::spin_loop();
    }
}
