//! Stream slot pool (spec.md §4.D).
//!
//! Grounded on `get_ReadStreamRec`/`release_ReadStreamRec` in
//! `examples/original_source/mount.tproj/webdav_network.c`: a fixed table
//! of `N+1` slots (one per worker thread plus the keep-alive pulse),
//! guarded by a single mutex, that prefers reusing a slot whose connection
//! is still open.

use std::sync::Mutex;

/// One reusable persistent-connection slot (spec.md §3).
pub struct Slot {
    pub in_use: bool,
    /// `true` once a stream has been opened in this slot at least once and
    /// not yet closed — stands in for a non-null `stream` pointer.
    pub stream_open: bool,
    /// Stable per-slot tag threaded onto every connection opened in this
    /// slot so the HTTP client can key connection reuse on it.
    pub unique_tag: String,
    /// Set from the last response's `Connection: close` header.
    pub connection_close: bool,
}

impl Slot {
    fn new(index: usize) -> Self {
        Self {
            in_use: false,
            stream_open: false,
            unique_tag: format!("webdavfs-slot-{index}"),
            connection_close: false,
        }
    }
}

/// A leased slot index, returned by `acquire`. `Drop` does **not**
/// auto-release: ownership can be handed off to a background worker
/// (spec.md §9, background-download handoff), so release is always
/// explicit via `StreamSlotPool::release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandle(pub usize);

/// Fixed-size table of `N+1` slots, guarded by one mutex (spec.md §5).
pub struct StreamSlotPool {
    slots: Mutex<Vec<Slot>>,
}

impl StreamSlotPool {
    /// `worker_threads` is N; one extra slot is reserved for the
    /// keep-alive pulse thread.
    pub fn new(worker_threads: usize) -> Self {
        let slots = (0..worker_threads + 1).map(Slot::new).collect();
        Self { slots: Mutex::new(slots) }
    }

    /// Leases a slot: prefers a free slot whose stream is still open,
    /// otherwise the first free slot with a closed stream. Never blocks
    /// beyond the mutex. The external request queue is expected to bound
    /// concurrency to `worker_threads + 1` in flight transactions, so
    /// finding no free slot at all is a fatal invariant violation
    /// (`acquire` panics rather than silently deadlocking).
    pub fn acquire(&self) -> SlotHandle {
        let mut slots = self.slots.lock().expect("slot pool mutex poisoned");

        let mut first_closed_free: Option<usize> = None;
        for (i, slot) in slots.iter().enumerate() {
            if !slot.in_use {
                if slot.stream_open {
                    // prefer a free slot with an open stream
                    slots[i].in_use = true;
                    return SlotHandle(i);
                } else if first_closed_free.is_none() {
                    first_closed_free = Some(i);
                }
            }
        }

        match first_closed_free {
            Some(i) => {
                slots[i].in_use = true;
                SlotHandle(i)
            }
            None => panic!(
                "stream slot pool exhausted: all {} slots in use (invariant violation, \
                 the request queue must bound concurrency to the pool size)",
                slots.len()
            ),
        }
    }

    /// Marks the slot free for reuse.
    pub fn release(&self, handle: SlotHandle) {
        let mut slots = self.slots.lock().expect("slot pool mutex poisoned");
        slots[handle.0].in_use = false;
    }

    /// Called when a new transaction begins on `handle`: closes and
    /// forgets any existing open stream before the caller attaches a new
    /// one, per spec.md §4.D "Stream replacement".
    pub fn replace_stream(&self, handle: SlotHandle) {
        let mut slots = self.slots.lock().expect("slot pool mutex poisoned");
        slots[handle.0].stream_open = false;
        slots[handle.0].connection_close = false;
    }

    /// Records that `handle`'s stream is now open and tags it.
    pub fn mark_stream_open(&self, handle: SlotHandle) {
        let mut slots = self.slots.lock().expect("slot pool mutex poisoned");
        slots[handle.0].stream_open = true;
    }

    /// Records the `Connection: close` bit observed on the last response;
    /// a `true` value means the stream must be closed before the slot is
    /// reused.
    pub fn set_connection_close(&self, handle: SlotHandle, close: bool) {
        let mut slots = self.slots.lock().expect("slot pool mutex poisoned");
        slots[handle.0].connection_close = close;
        if close {
            slots[handle.0].stream_open = false;
        }
    }

    pub fn unique_tag(&self, handle: SlotHandle) -> String {
        self.slots.lock().expect("slot pool mutex poisoned")[handle.0].unique_tag.clone()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("slot pool mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_never_returns_same_slot_twice_without_release() {
        let pool = StreamSlotPool::new(1); // 2 slots total
        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a, b);
    }

    #[test]
    fn acquire_prefers_slots_with_open_streams() {
        let pool = StreamSlotPool::new(2); // 3 slots
        let a = pool.acquire();
        pool.mark_stream_open(a);
        pool.release(a);

        // a's stream is open and it's free; a fresh acquire should prefer it
        // over the still-closed slots.
        let picked = pool.acquire();
        assert_eq!(picked, a);
    }

    #[test]
    fn release_makes_slot_available_again() {
        let pool = StreamSlotPool::new(0); // 1 slot
        let a = pool.acquire();
        pool.release(a);
        let b = pool.acquire();
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic(expected = "stream slot pool exhausted")]
    fn exhausting_all_slots_is_an_invariant_violation() {
        let pool = StreamSlotPool::new(0); // 1 slot
        let _a = pool.acquire();
        let _b = pool.acquire(); // panics: none free
    }

    #[test]
    fn connection_close_forces_stream_closed() {
        let pool = StreamSlotPool::new(0);
        let a = pool.acquire();
        pool.mark_stream_open(a);
        pool.set_connection_close(a, true);
        pool.release(a);
        // Re-acquiring after a close shouldn't report a dangling open stream.
        let b = pool.acquire();
        assert_eq!(a, b);
    }
}
