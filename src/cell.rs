//! `Cell<T>` — the global cell: a many-reader, mutex-serialized-writer
//! publication point with wait-(almost)-free reads.
//!
//! Two slots hold the current and the about-to-be-overwritten value; a
//! monotonic version counter's parity selects which slot is current. A
//! writer takes an internal mutex, waits for the target slot's readers to
//! drain, swaps in the new value, and bumps the version. A reader bumps a
//! slot's reader count, re-checks it picked the right slot against a
//! concurrent writer, takes a reference to the value, and drops the count.

use crate::atomics::{Arc, AtomicPtr, AtomicU64, AtomicUsize, Condvar, Mutex, Ordering};
use crate::error::{Error, Result};
use crate::key::Key;
use std::ops::Deref;
use std::ptr;

/// A heap-allocated value plus its reference count and the version it was
/// published with.
///
/// When the count reaches zero the wrapper, and the `T` inside it, is
/// dropped.
struct Wrapper<T> {
    payload: T,
    refcount: AtomicUsize,
    version: u64,
}

impl<T> Wrapper<T> {
    fn alloc(payload: T, version: u64) -> *mut Wrapper<T> {
        Box::into_raw(Box::new(Wrapper {
            payload,
            refcount: AtomicUsize::new(0),
            version,
        }))
    }

    /// # Safety
    /// `ptr` must point at a live `Wrapper<T>` that the caller already
    /// holds (directly or transitively) at least one reference to.
    unsafe fn incr(ptr: *const Wrapper<T>) {
        (*ptr).refcount.fetch_add(1, Ordering::SeqCst);
    }

    /// # Safety
    /// `ptr` must point at a live `Wrapper<T>`, and the caller must own
    /// exactly one of its references (this consumes it).
    unsafe fn release(ptr: *mut Wrapper<T>) {
        if (*ptr).refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            drop(Box::from_raw(ptr));
        }
    }
}

/// One of a cell's two slots. The sibling relationship is never stored:
/// the two slots form a fixed two-node cycle of stable indices (`idx`,
/// `1 - idx`) rather than an owning pointer.
struct Slot<T> {
    active_readers: AtomicUsize,
    current: AtomicPtr<Wrapper<T>>,
}

impl<T> Slot<T> {
    fn new() -> Slot<T> {
        Slot {
            active_readers: AtomicUsize::new(0),
            current: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

struct Shared<T> {
    slots: [Slot<T>; 2],
    /// The most recently published version; `0` means no value has been
    /// set yet. The first `set` produces version 1, the second version 2,
    /// and so on.
    version: AtomicU64,
    write_mutex: Mutex<()>,
    drain_mutex: Mutex<()>,
    drain_condvar: Condvar,
    first_write_mutex: Mutex<()>,
    first_write_condvar: Condvar,
    /// This thread's cached `CellRef`, used both as the read fast path and
    /// the thing `release()`/thread-exit clear.
    cache: Key<CellRef<T>>,
}

impl<T> Shared<T> {
    /// Drops this slot's reader count by one; if that was the last reader,
    /// wakes a writer waiting in the drain loop. The drain mutex is held
    /// across the signal, so a writer that is about to wait never misses it.
    fn release_reader(&self, idx: usize) {
        if self.slots[idx].active_readers.fetch_sub(1, Ordering::SeqCst) == 1 {
            let guard = self
                .drain_mutex
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            self.drain_condvar.notify_one();
            drop(guard);
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Tears down both slots' wrappers directly; the caller must have
        // guaranteed quiescence by the time the last `Arc<Shared<T>>` goes.
        for slot in &mut self.slots {
            let wrapper = *slot.current.get_mut();
            if !wrapper.is_null() {
                unsafe { Wrapper::release(wrapper) };
            }
        }
    }
}

/// A thread-safe, many-reader, mutex-serialized-writer global cell.
///
/// Cheaply cloneable: every clone shares the same underlying state (an
/// `Arc`) and observes the same sequence of published values. `T` need not
/// be `Clone` — only the handle is.
pub struct Cell<T> {
    shared: Arc<Shared<T>>,
}

unsafe impl<T: Send + Sync> Send for Cell<T> {}
unsafe impl<T: Send + Sync> Sync for Cell<T> {}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Cell {
            shared: self.shared.clone(),
        }
    }
}

impl<T: 'static> Default for Cell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Cell<T> {
    /// Creates an empty cell. The first successful [`Cell::set`] gives it
    /// a value; reads before that return `Ok(None)`.
    pub fn new() -> Cell<T> {
        Cell {
            shared: Arc::new(Shared {
                slots: [Slot::new(), Slot::new()],
                version: AtomicU64::new(0),
                write_mutex: Mutex::new(()),
                drain_mutex: Mutex::new(()),
                drain_condvar: Condvar::new(),
                first_write_mutex: Mutex::new(()),
                first_write_condvar: Condvar::new(),
                cache: Key::new(),
            }),
        }
    }

    /// Returns the cell's current value and version, or `None` if nothing
    /// has been set yet.
    ///
    /// The returned [`CellRef`] is valid for as long as it is held,
    /// independent of `set`s performed by other threads in the meantime: it
    /// owns its own hold on the underlying value.
    pub fn get(&self) -> Result<Option<CellRef<T>>> {
        let shared = &*self.shared;

        // Fast path: this thread's cached ref is still current if nothing
        // has been published since it was cached.
        let fast = shared.cache.with(|slot: &mut Option<CellRef<T>>| {
            let v = shared.version.load(Ordering::SeqCst);
            match slot {
                Some(cached) if v != 0 && cached.version() == v => Some(cached.clone()),
                _ => None,
            }
        });
        if fast.is_some() {
            return Ok(fast);
        }

        let mut v = shared.version.load(Ordering::SeqCst);
        if v == 0 {
            return Ok(None);
        }

        // Candidate current slot, selected by version parity.
        let mut idx = (v & 1) as usize;
        shared.slots[idx].active_readers.fetch_add(1, Ordering::SeqCst);

        // Did a write race us between the load and the increment?
        let v2 = shared.version.load(Ordering::SeqCst);
        if v2 != v {
            // Protect the sibling before releasing this slot, so at least
            // one of the two stays protected throughout.
            let sibling = 1 - idx;
            shared.slots[sibling]
                .active_readers
                .fetch_add(1, Ordering::SeqCst);
            let v3 = shared.version.load(Ordering::SeqCst);
            debug_assert!(v3 > v, "cell version observed to go backwards");
            shared.release_reader(idx);
            idx = sibling;
            v = v3;
        }

        // Read and hold the slot's wrapper.
        let wrapper = shared.slots[idx].current.load(Ordering::SeqCst);
        if wrapper.is_null() {
            shared.release_reader(idx);
            // version > 0 implies some write installed a wrapper in every
            // slot at least once; a null wrapper here is an algorithmic
            // invariant violation, not a recoverable error.
            panic!("global cell: current slot has version > 0 but no wrapper");
        }
        unsafe { Wrapper::incr(wrapper) };

        // Release the held slot(s).
        shared.release_reader(idx);

        // Cache this read for the fast path and for `release()`.
        let cell_ref = CellRef { wrapper };
        shared.cache.with(|slot: &mut Option<CellRef<T>>| {
            *slot = Some(cell_ref.clone());
        });

        Ok(Some(cell_ref))
    }

    /// Publishes `value`, returning its version.
    ///
    /// Blocks on the write mutex if another thread is concurrently
    /// `set`ing, and may briefly wait for the target slot's readers to
    /// drain; never blocks a reader.
    pub fn set(&self, value: T) -> Result<u64> {
        let shared = &*self.shared;
        let write_guard = shared.write_mutex.lock().map_err(|_| Error::Poisoned)?;

        let current_version = shared.version.load(Ordering::SeqCst);
        let new_version = current_version
            .checked_add(1)
            .ok_or(Error::Overflow)?;
        let wrapper = Wrapper::alloc(value, new_version);

        if current_version == 0 {
            // First write installs on both slots so a reader of either
            // parity finds it.
            unsafe {
                Wrapper::incr(wrapper);
                Wrapper::incr(wrapper);
            }
            shared.slots[0].current.store(wrapper, Ordering::SeqCst);
            shared.slots[1].current.store(wrapper, Ordering::SeqCst);
            shared.version.store(new_version, Ordering::SeqCst);
            drop(write_guard);

            let first_guard = shared
                .first_write_mutex
                .lock()
                .map_err(|_| Error::Poisoned)?;
            shared.first_write_condvar.notify_one();
            drop(first_guard);
            return Ok(new_version);
        }

        let target = (new_version & 1) as usize;
        {
            let mut drain_guard = shared.drain_mutex.lock().map_err(|_| Error::Poisoned)?;
            while shared.slots[target].active_readers.load(Ordering::SeqCst) > 0 {
                drain_guard = shared
                    .drain_condvar
                    .wait(drain_guard)
                    .map_err(|_| Error::Poisoned)?;
            }
        }

        unsafe { Wrapper::incr(wrapper) }; // owned by the slot now
        let old = shared.slots[target].current.swap(wrapper, Ordering::SeqCst);
        shared.version.store(new_version, Ordering::SeqCst);
        drop(write_guard);

        if !old.is_null() {
            unsafe { Wrapper::release(old) };
        }
        Ok(new_version)
    }

    /// Clears this thread's cached reference, if any, decrementing its
    /// wrapper's reference count.
    pub fn release(&self) {
        self.shared.cache.with(|slot: &mut Option<CellRef<T>>| {
            slot.take();
        });
    }

    /// Blocks until the cell's first value is set, then returns it.
    pub fn wait_first(&self) -> Result<CellRef<T>> {
        let shared = &*self.shared;
        let mut guard = shared
            .first_write_mutex
            .lock()
            .map_err(|_| Error::Poisoned)?;
        loop {
            if let Some(value) = self.get()? {
                // No thundering herd: wake exactly one more waiter.
                shared.first_write_condvar.notify_one();
                drop(guard);
                return Ok(value);
            }
            guard = shared
                .first_write_condvar
                .wait(guard)
                .map_err(|_| Error::Poisoned)?;
        }
    }
}

/// A held reference to a value read from a [`Cell`].
///
/// Cheap to clone (a refcount bump); dropping the last clone runs `T`'s
/// `Drop` and frees the wrapper. Stays valid regardless of subsequent
/// `set`s on the cell, on this thread or any other.
pub struct CellRef<T> {
    wrapper: *mut Wrapper<T>,
}

unsafe impl<T: Send + Sync> Send for CellRef<T> {}
unsafe impl<T: Send + Sync> Sync for CellRef<T> {}

impl<T> CellRef<T> {
    /// The version this value was published with.
    pub fn version(&self) -> u64 {
        unsafe { (*self.wrapper).version }
    }
}

impl<T> Clone for CellRef<T> {
    fn clone(&self) -> Self {
        unsafe { Wrapper::incr(self.wrapper) };
        CellRef {
            wrapper: self.wrapper,
        }
    }
}

impl<T> Deref for CellRef<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &(*self.wrapper).payload }
    }
}

impl<T> Drop for CellRef<T> {
    fn drop(&mut self) {
        unsafe { Wrapper::release(self.wrapper) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_before_first_set() {
        let cell: Cell<u32> = Cell::new();
        assert!(cell.get().unwrap().is_none());
    }

    #[test]
    fn set_then_get_roundtrips() {
        let cell = Cell::new();
        let v = cell.set(100).unwrap();
        assert_eq!(v, 1);
        let r = cell.get().unwrap().unwrap();
        assert_eq!(*r, 100);
        assert_eq!(r.version(), 1);
    }

    #[test]
    fn versions_increase_monotonically() {
        let cell = Cell::new();
        assert_eq!(cell.set(1).unwrap(), 1);
        assert_eq!(cell.set(2).unwrap(), 2);
        assert_eq!(cell.set(3).unwrap(), 3);
        let r = cell.get().unwrap().unwrap();
        assert_eq!(*r, 3);
        assert_eq!(r.version(), 3);
    }

    #[test]
    fn release_drops_cached_ref() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc as StdArc;

        struct Counted(StdArc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = StdArc::new(AtomicUsize::new(0));
        let cell = Cell::new();
        cell.set(Counted(drops.clone())).unwrap();
        let _r = cell.get().unwrap().unwrap();
        cell.release();
        drop(_r);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
