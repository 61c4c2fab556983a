//! `HazardRegistry<T>` — a per-owner singly-linked list of hazard records.
//!
//! A reader publishes the pointer it is about to dereference before
//! confirming that pointer is still current; once published, the pointer
//! is protected against reclamation by a concurrent writer until the
//! reader clears its publication. A registry owner scans the list before
//! destroying a retired value and defers destruction if any active record
//! still publishes it.
//!
//! The `Cell` in this crate does not use this registry for its own drain
//! coordination (it uses reader counts on slots instead, see `cell.rs`);
//! this module is a standalone primitive used by `descriptor.rs`.

use crate::atomics::{AtomicBool, AtomicPtr, AtomicU32, Ordering};
use std::marker::PhantomData;
use std::ptr;

struct Record<T> {
    value: AtomicPtr<T>,
    inuse: AtomicBool,
    next: AtomicPtr<Record<T>>,
}

pub struct HazardRegistry<T> {
    head: AtomicPtr<Record<T>>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for HazardRegistry<T> {}
unsafe impl<T: Sync> Sync for HazardRegistry<T> {}

impl<T> HazardRegistry<T> {
    pub fn new() -> HazardRegistry<T> {
        HazardRegistry {
            head: AtomicPtr::new(ptr::null_mut()),
            _marker: PhantomData,
        }
    }

    /// Returns a free hazard record, allocating one if none is inactive.
    pub fn acquire(&self) -> Hazard<'_, T> {
        let mut first = self.head.load(Ordering::Acquire);
        let mut cursor = first;
        while !cursor.is_null() {
            let rec = unsafe { &*cursor };
            if rec
                .inuse
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                rec.value.store(ptr::null_mut(), Ordering::Release);
                return Hazard {
                    _marker: PhantomData,
                    record: cursor,
                };
            }
            cursor = rec.next.load(Ordering::Acquire);
        }

        let rec = Box::into_raw(Box::new(Record {
            value: AtomicPtr::new(ptr::null_mut()),
            inuse: AtomicBool::new(true),
            next: AtomicPtr::new(first),
        }));
        loop {
            match self
                .head
                .compare_exchange(first, rec, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    log::trace!("hazard registry grew a new record");
                    return Hazard {
                        _marker: PhantomData,
                        record: rec,
                    };
                }
                Err(actual) => {
                    first = actual;
                    unsafe { (*rec).next.store(first, Ordering::Release) };
                }
            }
        }
    }

    /// True if no active hazard record currently publishes `value`.
    pub fn safe_to_destroy(&self, value: *mut T) -> bool {
        let mut cursor = self.head.load(Ordering::Acquire);
        while !cursor.is_null() {
            let rec = unsafe { &*cursor };
            if rec.inuse.load(Ordering::Acquire) && rec.value.load(Ordering::Acquire) == value {
                return false;
            }
            cursor = rec.next.load(Ordering::Acquire);
        }
        true
    }

    /// Invokes `dtor` on `value` unless some active record still
    /// publishes it (mirrors `ctp_hazards_gc`).
    pub fn gc(&self, value: *mut T, dtor: impl FnOnce(*mut T)) {
        if self.safe_to_destroy(value) {
            dtor(value);
        }
    }
}

impl<T> Default for HazardRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for HazardRegistry<T> {
    fn drop(&mut self) {
        let mut cursor = *self.head.get_mut();
        while !cursor.is_null() {
            let rec = unsafe { Box::from_raw(cursor) };
            cursor = rec.next.load(Ordering::Relaxed);
        }
    }
}

/// A thread's hold on one hazard record.
pub struct Hazard<'a, T> {
    _marker: PhantomData<&'a HazardRegistry<T>>,
    record: *mut Record<T>,
}

impl<'a, T> Hazard<'a, T> {
    /// Publishes `value` with release semantics, protecting it from
    /// reclamation until the next `publish`/`retire`.
    pub fn publish(&self, value: *mut T) {
        unsafe { (*self.record).value.store(value, Ordering::Release) };
    }

    pub fn clear(&self) {
        self.publish(ptr::null_mut());
    }

    /// Releases this record back to the registry for reuse.
    pub fn retire(self) {
        drop(self)
    }
}

impl<'a, T> Drop for Hazard<'a, T> {
    fn drop(&mut self) {
        let rec = unsafe { &*self.record };
        rec.value.store(ptr::null_mut(), Ordering::Release);
        rec.inuse.store(false, Ordering::Release);
    }
}
