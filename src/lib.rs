//! A thread-safe global cell: a single-writer-at-a-time, many-reader
//! container whose readers never block on a contended resource and whose
//! writers never starve.
//!
//! [`Cell<T>`] is the crate's centerpiece: call [`Cell::set`] to publish a
//! new value, [`Cell::get`] to read the most recently published one. A
//! value returned by `get` stays valid for as long as its [`CellRef`] is
//! held, independent of later `set`s on any thread.
//!
//! The cell is built from two lower-level primitives that are also
//! exported for standalone use: [`ArrayRope`], a lock-free append-only
//! chunked array, and [`HazardRegistry`]/[`Hazard`], a hazard-pointer
//! registry used by [`DescriptorTable`] (a generic handle table atop
//! `ArrayRope`) to defer reclamation until no reader still observes a
//! value.
//!
//! No atomic compare-and-swap is on `Cell::get`'s common path: a thread
//! that has already read the cell's current version just clones its
//! cached [`CellRef`]. `Cell::set` acquires an internal mutex and may
//! briefly wait for the slot it is about to overwrite to drain its
//! readers; it never blocks a reader.

mod array;
mod atomics;
mod cell;
mod descriptor;
mod error;
mod hazard;
mod key;

pub use array::{ArrayRope, ChunkGrowth, GetMode};
pub use cell::{Cell, CellRef};
pub use descriptor::{DescriptorTable, ValueRef};
pub use error::{Error, Result};
pub use hazard::{Hazard, HazardRegistry};
