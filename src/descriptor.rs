//! `DescriptorTable<T>` — a generic descriptor table atop [`ArrayRope`].
//!
//! `open` scans for a reusable slot (lowest-available discipline), falling
//! back to appending a new one; every occupied slot carries a `verifier` so
//! a stale index (one that was since closed and reopened) is rejected
//! rather than silently handed another caller's value. Slot occupancy is a
//! real `enum` rather than a magic-number sentinel.
//!
//! A closed value is freed immediately if no hazard record still publishes
//! it; otherwise it is pushed to a `retired` list and retried on every
//! subsequent `open`/`close`, so it is eventually freed rather than leaked.

use crate::array::{ArrayRope, GetMode};
use crate::atomics::{AtomicU64, Mutex, Ordering};
use crate::error::{Error, Result};
use crate::hazard::HazardRegistry;

enum SlotState<T> {
    Empty,
    Open { value: *mut T, verifier: u64 },
    Closed,
}

impl<T> SlotState<T> {
    fn is_reusable(&self) -> bool {
        matches!(self, SlotState::Empty | SlotState::Closed)
    }
}

struct DescSlot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T> Default for DescSlot<T> {
    fn default() -> Self {
        DescSlot {
            state: Mutex::new(SlotState::Empty),
        }
    }
}

unsafe impl<T: Send> Send for DescSlot<T> {}
unsafe impl<T: Send> Sync for DescSlot<T> {}

struct Retired<T> {
    value: *mut T,
}

unsafe impl<T: Send> Send for Retired<T> {}

/// A table of integer handles, each validated against a per-slot verifier
/// so a stale handle (reused index, wrong generation) is rejected rather
/// than silently dereferenced.
pub struct DescriptorTable<T> {
    slots: ArrayRope<DescSlot<T>>,
    hazards: HazardRegistry<T>,
    next_verifier: AtomicU64,
    retired: Mutex<Vec<Retired<T>>>,
}

unsafe impl<T: Send> Send for DescriptorTable<T> {}
unsafe impl<T: Send + Sync> Sync for DescriptorTable<T> {}

impl<T> DescriptorTable<T> {
    pub fn new() -> DescriptorTable<T> {
        DescriptorTable {
            slots: ArrayRope::new(),
            hazards: HazardRegistry::new(),
            next_verifier: AtomicU64::new(1),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Opens a new descriptor for `value`, returning its `(index,
    /// verifier)` handle. Reuses the lowest-indexed empty or closed slot
    /// if one exists, otherwise appends a new one.
    pub fn open(&self, value: T) -> Result<(usize, u64)> {
        self.reclaim_pending();

        let verifier = self.next_verifier.fetch_add(1, Ordering::SeqCst);
        let boxed = Box::into_raw(Box::new(value));

        for (index, slot) in self.slots.iter() {
            let mut guard = slot.state.lock().map_err(|_| Error::Poisoned)?;
            if guard.is_reusable() {
                *guard = SlotState::Open {
                    value: boxed,
                    verifier,
                };
                return Ok((index, verifier));
            }
        }

        let index = self.slots.append(DescSlot::default())?;
        let slot = self.slots.get(index, GetMode::RequireSet)?;
        let mut guard = slot.state.lock().map_err(|_| Error::Poisoned)?;
        *guard = SlotState::Open {
            value: boxed,
            verifier,
        };
        drop(guard);
        Ok((index, verifier))
    }

    /// Returns a held reference to the value at `(index, verifier)`, or
    /// `BadHandle` if the index is unknown or the verifier is stale.
    pub fn get(&self, index: usize, verifier: u64) -> Result<ValueRef<'_, T>> {
        let slot = self
            .slots
            .get(index, GetMode::RequireSet)
            .map_err(|_| Error::BadHandle)?;

        let hazard = self.hazards.acquire();
        let guard = slot.state.lock().map_err(|_| Error::Poisoned)?;
        match &*guard {
            SlotState::Open { value, verifier: v } if *v == verifier => {
                hazard.publish(*value);
                let value = *value;
                drop(guard);
                Ok(ValueRef { hazard, value })
            }
            _ => Err(Error::BadHandle),
        }
    }

    /// Closes `(index, verifier)`, returning its value. The value is
    /// dropped as soon as no outstanding [`ValueRef`] still publishes it
    /// (immediately, in the common case); otherwise it joins the retired
    /// list and is reclaimed by a later `open`/`close`.
    pub fn close(&self, index: usize, verifier: u64) -> Result<()> {
        let slot = self
            .slots
            .get(index, GetMode::RequireSet)
            .map_err(|_| Error::BadHandle)?;

        let value = {
            let mut guard = slot.state.lock().map_err(|_| Error::Poisoned)?;
            match &*guard {
                SlotState::Open { verifier: v, .. } if *v == verifier => {}
                _ => return Err(Error::BadHandle),
            }
            let prev = std::mem::replace(&mut *guard, SlotState::Closed);
            match prev {
                SlotState::Open { value, .. } => value,
                _ => unreachable!("verifier checked above"),
            }
        };

        self.reclaim(value);
        self.reclaim_pending();
        Ok(())
    }

    /// Iterates every currently-open `(index, verifier)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.slots.iter().filter_map(|(index, slot)| {
            let guard = slot.state.lock().ok()?;
            match &*guard {
                SlotState::Open { verifier, .. } => Some((index, *verifier)),
                _ => None,
            }
        })
    }

    fn reclaim(&self, value: *mut T) {
        if self.hazards.safe_to_destroy(value) {
            drop(unsafe { Box::from_raw(value) });
        } else {
            if let Ok(mut retired) = self.retired.lock() {
                retired.push(Retired { value });
            }
        }
    }

    /// Opportunistically frees anything that could not be reclaimed at
    /// the time it was closed.
    fn reclaim_pending(&self) {
        let pending = match self.retired.lock() {
            Ok(mut retired) => std::mem::take(&mut *retired),
            Err(_) => return,
        };
        let mut still_pending = Vec::new();
        for r in pending {
            if self.hazards.safe_to_destroy(r.value) {
                drop(unsafe { Box::from_raw(r.value) });
            } else {
                still_pending.push(r);
            }
        }
        if !still_pending.is_empty() {
            if let Ok(mut retired) = self.retired.lock() {
                retired.extend(still_pending);
            }
        }
    }
}

impl<T> Default for DescriptorTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for DescriptorTable<T> {
    fn drop(&mut self) {
        for (_, slot) in self.slots.iter() {
            if let Ok(mut guard) = slot.state.lock() {
                if let SlotState::Open { value, .. } = &*guard {
                    drop(unsafe { Box::from_raw(*value) });
                }
                *guard = SlotState::Closed;
            }
        }
        if let Ok(mut retired) = self.retired.lock() {
            for r in retired.drain(..) {
                drop(unsafe { Box::from_raw(r.value) });
            }
        }
    }
}

/// A held reference to a descriptor's value, protected against
/// reclamation by a hazard record for as long as it lives.
pub struct ValueRef<'a, T> {
    hazard: crate::hazard::Hazard<'a, T>,
    value: *mut T,
}

impl<'a, T> std::ops::Deref for ValueRef<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.value }
    }
}

impl<'a, T> Drop for ValueRef<'a, T> {
    fn drop(&mut self) {
        self.hazard.clear();
    }
}
