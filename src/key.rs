//! Process-wide thread-specific-key multiplexer.
//!
//! Rather than allocating one real OS thread-local slot per collaborator,
//! every `Key<T>` here is handed an atomically-assigned index into a single
//! process-wide `thread_local!` table, which grows a per-thread `Vec` on
//! demand.
//!
//! `Cell<T>` is this module's only customer: each `Cell<T>` owns a
//! `Key<CellRef<T>>` holding the calling thread's most recently read value,
//! used both as the read fast path and as the thing `Cell::release` and
//! ordinary thread exit clear. The single static key is a `thread_local!`
//! whose destructor runs `T`'s `Drop` deterministically at thread exit, so
//! nothing here is ever leaked.

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_INDEX: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static SLOTS: RefCell<Vec<Option<Box<dyn Any>>>> = RefCell::new(Vec::new());
}

/// An atomically-assigned index into the process-wide thread-local table.
///
/// Each `Key<T>` owns one slot per thread, lazily created on first access
/// and torn down (running `T`'s `Drop`) when that thread exits.
pub struct Key<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Key<T> {
    pub fn new() -> Key<T> {
        Key {
            index: NEXT_INDEX.fetch_add(1, Ordering::Relaxed),
            _marker: PhantomData,
        }
    }

    /// Runs `f` with mutable access to the calling thread's slot for this
    /// key, growing the per-thread table if this thread has never touched
    /// an index this high before.
    pub fn with<R>(&self, f: impl FnOnce(&mut Option<T>) -> R) -> R {
        SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            if slots.len() <= self.index {
                slots.resize_with(self.index + 1, || None);
            }
            let boxed =
                slots[self.index].get_or_insert_with(|| Box::new(None::<T>) as Box<dyn Any>);
            let slot = boxed
                .downcast_mut::<Option<T>>()
                .expect("Key<T> index reused with a mismatched T");
            f(slot)
        })
    }
}

impl<T: 'static> Default for Key<T> {
    fn default() -> Self {
        Self::new()
    }
}

// `Key<T>` carries no `T` and no interior state beyond an index, so it is
// `Send`/`Sync` regardless of `T` — only the per-thread `SLOTS` table (never
// shared across threads) actually stores a `T`.
unsafe impl<T> Send for Key<T> {}
unsafe impl<T> Sync for Key<T> {}

#[cfg(test)]
mod tests {
    use super::Key;

    #[test]
    fn distinct_keys_do_not_collide() {
        let a: Key<u32> = Key::new();
        let b: Key<u32> = Key::new();

        a.with(|slot| *slot = Some(1));
        b.with(|slot| *slot = Some(2));

        a.with(|slot| assert_eq!(*slot, Some(1)));
        b.with(|slot| assert_eq!(*slot, Some(2)));
    }

    #[test]
    fn per_thread_isolation() {
        let k: Key<u32> = Key::new();
        k.with(|slot| *slot = Some(42));

        let k2 = Key { index: k.index, _marker: std::marker::PhantomData };
        std::thread::spawn(move || {
            k2.with(|slot| assert_eq!(*slot, None));
            k2.with(|slot| *slot = Some(7));
        })
        .join()
        .unwrap();

        k.with(|slot| assert_eq!(*slot, Some(42)));
    }
}
