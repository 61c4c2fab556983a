//! Thin atomics layer.
//!
//! Everything in this crate wants sequentially-consistent CAS, increment,
//! decrement, acquire-load and release-store on 32/64-bit words and on
//! pointer-width values. Under `cfg(loom)` we re-export loom's shadow
//! atomics so the model checker can explore interleavings; otherwise we
//! re-export the real thing. No code outside this module should `use
//! std::sync::atomic` (or `loom::sync::atomic`) directly.

#[cfg(loom)]
pub use loom::sync::atomic::{
    fence, AtomicBool, AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering,
};
#[cfg(not(loom))]
pub use std::sync::atomic::{
    fence, AtomicBool, AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering,
};

#[cfg(loom)]
pub use loom::sync::{Arc, Condvar, Mutex};
#[cfg(not(loom))]
pub use std::sync::{Arc, Condvar, Mutex};

#[cfg(loom)]
pub use loom::thread;
#[cfg(not(loom))]
pub use std::thread;
