//! `ArrayRope<T>` — an unbounded, append-only, lock-free chunked array.
//!
//! A rope is a singly-linked list of chunks, each chunk larger than the
//! last by at least 1.5x + a fixed increment. Appending claims a slot by
//! CASing a chunk's `used` counter; growing the rope by linking a new
//! chunk is itself a CAS, so concurrent appenders that both run off the
//! end race to add the successor chunk and the loser's chunk is freed.
//! The rope never shrinks; `Drop` walks and frees every chunk.

use crate::atomics::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use crate::error::{Error, Result};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;

/// Maximum index a rope will hand out, reserving the high bits for
/// domain-specific verifiers (descriptor tables stash a verifier number
/// alongside the index).
const MAX_INDEX: usize = usize::MAX >> 4;

/// How fast a rope's chunks grow. Chunk `k+1`'s capacity is at least
/// `capacity(k) + capacity(k) * numerator / denominator + min_increment`.
#[derive(Clone, Copy, Debug)]
pub struct ChunkGrowth {
    pub initial_capacity: usize,
    pub numerator: usize,
    pub denominator: usize,
    pub min_increment: usize,
}

impl Default for ChunkGrowth {
    fn default() -> Self {
        ChunkGrowth {
            initial_capacity: 8,
            numerator: 1,
            denominator: 2,
            min_increment: 4,
        }
    }
}

impl ChunkGrowth {
    fn next_capacity(&self, prev: usize) -> Result<usize> {
        prev.checked_add(prev / self.denominator * self.numerator)
            .and_then(|v| v.checked_add(self.min_increment))
            .filter(|&v| v > 0)
            .ok_or(Error::Overflow)
    }
}

struct Chunk<T> {
    capacity: usize,
    /// Number of slots claimed by a CAS, whether or not their element has
    /// finished being written yet. Only ever used to hand out a fresh,
    /// exclusive slot index — never read to decide whether a slot's value
    /// is safe to dereference; `ready` is what gates that.
    used: AtomicUsize,
    /// Per-slot readiness: set with `Release` ordering only after the
    /// element at that index has been fully written, so an `Acquire` load
    /// that observes it `true` happens-after the write. `get`/`iter` gate
    /// every read of `elems` on this, not on `used`.
    ready: Box<[AtomicBool]>,
    elems: Box<[UnsafeCell<MaybeUninit<T>>]>,
    next: AtomicPtr<Chunk<T>>,
}

unsafe impl<T: Send> Send for Chunk<T> {}
unsafe impl<T: Sync> Sync for Chunk<T> {}

impl<T> Chunk<T> {
    fn new(capacity: usize) -> Box<Chunk<T>> {
        let mut v = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            v.push(UnsafeCell::new(MaybeUninit::uninit()));
        }
        let ready: Box<[AtomicBool]> = (0..capacity).map(|_| AtomicBool::new(false)).collect();
        Box::new(Chunk {
            capacity,
            used: AtomicUsize::new(0),
            ready,
            elems: v.into_boxed_slice(),
            next: AtomicPtr::new(ptr::null_mut()),
        })
    }

    fn start_ptr(&self) -> *const T {
        self.elems.as_ptr() as *const T
    }

    /// Spins until the slot at `local` has been published by its writer.
    /// The window between a slot being claimed (`used` bumped) and its
    /// element being written and marked `ready` is just a `write` plus a
    /// store, so this never spins for long.
    fn await_ready(&self, local: usize) {
        while !self.ready[local].load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    /// Drops every initialized element in this chunk only (not successor
    /// chunks). Caller must guarantee exclusivity and quiescence (no
    /// in-flight `append`/`materialize`), so every claimed slot below
    /// `used` is guaranteed to have already been written and marked ready.
    fn drop_elements(&mut self) {
        let used = *self.used.get_mut();
        for (i, cell) in self.elems[..used].iter_mut().enumerate() {
            debug_assert!(*self.ready[i].get_mut(), "claimed slot never published");
            unsafe { ptr::drop_in_place(cell.get_mut().as_mut_ptr()) };
        }
    }
}

/// Whether `get` may extend the in-use prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GetMode {
    /// Fail with `NotFound` if `index` is beyond the in-use prefix.
    RequireSet,
    /// Extend the in-use prefix (default-filling any intervening slots)
    /// to include `index`, allocating chunks as needed.
    ForceMaterialize,
}

pub struct ArrayRope<T> {
    first: Box<Chunk<T>>,
    growth: ChunkGrowth,
}

unsafe impl<T: Send> Send for ArrayRope<T> {}
unsafe impl<T: Sync> Sync for ArrayRope<T> {}

impl<T: Default> ArrayRope<T> {
    pub fn new() -> ArrayRope<T> {
        Self::with_growth(ChunkGrowth::default())
    }

    pub fn with_growth(growth: ChunkGrowth) -> ArrayRope<T> {
        ArrayRope {
            first: Chunk::new(growth.initial_capacity),
            growth,
        }
    }

    fn grow(&self, last: &Chunk<T>) -> Result<()> {
        let cap = self.growth.next_capacity(last.capacity)?;
        let next = Box::into_raw(Chunk::new(cap));
        if last
            .next
            .compare_exchange(ptr::null_mut(), next, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Lost the race to add the new chunk.
            drop(unsafe { Box::from_raw(next) });
        } else {
            log::trace!("array rope grew a chunk to capacity {cap}");
        }
        Ok(())
    }

    /// Appends `value`, returning its dense index.
    pub fn append(&self, value: T) -> Result<usize> {
        let mut base = 0usize;
        let mut chunk: &Chunk<T> = &self.first;
        loop {
            loop {
                let used = chunk.used.load(Ordering::SeqCst);
                if used >= chunk.capacity {
                    break;
                }
                // Check the prospective index *before* claiming the slot:
                // once claimed, the slot must be written, so a bounds
                // failure has to happen first and leave it unclaimed.
                let idx = base.checked_add(used).ok_or(Error::Overflow)?;
                if idx >= MAX_INDEX {
                    return Err(Error::TooMany);
                }
                if chunk
                    .used
                    .compare_exchange(used, used + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    unsafe { (*chunk.elems[used].get()).write(value) };
                    // Publish after the write: anything that observes this
                    // flag set happens-after the element is initialized.
                    chunk.ready[used].store(true, Ordering::Release);
                    return Ok(idx);
                }
            }

            base = base.checked_add(chunk.capacity).ok_or(Error::Overflow)?;
            let next = chunk.next.load(Ordering::SeqCst);
            if next.is_null() {
                self.grow(chunk)?;
                let next = chunk.next.load(Ordering::SeqCst);
                chunk = unsafe { &*next };
            } else {
                chunk = unsafe { &*next };
            }
        }
    }

    /// Returns a reference to element `index`, per `mode`.
    pub fn get(&self, index: usize, mode: GetMode) -> Result<&T> {
        if index >= MAX_INDEX {
            return Err(Error::TooMany);
        }
        let mut base = 0usize;
        let mut chunk: &Chunk<T> = &self.first;
        loop {
            if index < base + chunk.capacity {
                let local = index - base;
                let used = chunk.used.load(Ordering::SeqCst);
                if local >= used {
                    match mode {
                        GetMode::RequireSet => return Err(Error::NotFound),
                        GetMode::ForceMaterialize => self.materialize(chunk, local),
                    }
                }
                // The slot may be claimed but not yet written by its
                // appender/materializer; wait for the matching `ready`
                // publication before dereferencing it.
                chunk.await_ready(local);
                let cell = &chunk.elems[local];
                return Ok(unsafe { (*cell.get()).assume_init_ref() });
            }

            base += chunk.capacity;
            let next = chunk.next.load(Ordering::SeqCst);
            if next.is_null() {
                match mode {
                    GetMode::RequireSet => return Err(Error::NotFound),
                    GetMode::ForceMaterialize => {
                        self.grow(chunk)?;
                        let next = chunk.next.load(Ordering::SeqCst);
                        chunk = unsafe { &*next };
                    }
                }
            } else {
                chunk = unsafe { &*next };
            }
        }
    }

    /// Default-fills `chunk.elems[..=local]` that aren't already in use.
    fn materialize(&self, chunk: &Chunk<T>, local: usize) {
        let mut cur = chunk.used.load(Ordering::SeqCst);
        loop {
            if cur >= local + 1 {
                return;
            }
            match chunk.used.compare_exchange(
                cur,
                local + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    for i in cur..local + 1 {
                        unsafe { (*chunk.elems[i].get()).write(T::default()) };
                        chunk.ready[i].store(true, Ordering::Release);
                    }
                    return;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    /// Reverse-maps a pointer previously produced by `append`/`get`.
    pub fn address_to_index(&self, ptr: *const T) -> Option<usize> {
        let mut base = 0usize;
        let mut chunk: &Chunk<T> = &self.first;
        loop {
            let start = chunk.start_ptr();
            // SAFETY: both pointers are derived from the same allocation
            // family (`Vec<T>`-backed slices), so offsetting is sound.
            let end = unsafe { start.add(chunk.capacity) };
            if ptr >= start && ptr < end {
                let offset = unsafe { ptr.offset_from(start) } as usize;
                return base.checked_add(offset);
            }
            base += chunk.capacity;
            let next = chunk.next.load(Ordering::SeqCst);
            if next.is_null() {
                return None;
            }
            chunk = unsafe { &*next };
        }
    }

    /// Iterates every in-use element exactly once, `(index, &T)`.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            chunk: Some(&self.first),
            local: 0,
            base: 0,
        }
    }
}

impl<T: Default> Default for ArrayRope<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, T> {
    chunk: Option<&'a Chunk<T>>,
    local: usize,
    base: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let chunk = self.chunk?;
            let used = chunk.used.load(Ordering::SeqCst);
            if self.local < used {
                let local = self.local;
                let idx = self.base + local;
                self.local += 1;
                chunk.await_ready(local);
                let cell = &chunk.elems[local];
                return Some((idx, unsafe { (*cell.get()).assume_init_ref() }));
            }
            let next = chunk.next.load(Ordering::SeqCst);
            if next.is_null() {
                self.chunk = None;
                return None;
            }
            self.base += chunk.capacity;
            self.local = 0;
            self.chunk = Some(unsafe { &*next });
        }
    }
}

impl<T> Drop for ArrayRope<T> {
    fn drop(&mut self) {
        self.first.drop_elements();
        let mut next = *self.first.next.get_mut();
        while !next.is_null() {
            let mut chunk = unsafe { Box::from_raw(next) };
            chunk.drop_elements();
            next = *chunk.next.get_mut();
        }
    }
}
