//! Atom-cell implements [`AtomicCell<T>`], an atomic, lock-free
//! reference cell for immutable values.  An [`AtomicCell`] always
//! holds exactly one `T`, and that value changes only by being
//! replaced wholesale: either unconditionally, with
//! [`AtomicCell::set`], or as a function of the current value, with
//! [`AtomicCell::swap`].
//!
//! [`AtomicCell::swap`] is the functional face of compare-and-swap.
//! Rather than exposing loads, expected values and stores, it takes
//! an update function, reads the current value, computes its
//! replacement, and installs the replacement only if the cell still
//! holds the value it read.  When another thread got there first, the
//! replacement is thrown away and the update runs again against the
//! newer value.  Concurrent swaps therefore never lose each other's
//! updates: a thousand threads each incrementing a counter by one
//! leave it exactly a thousand higher.
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use atom_cell::AtomicCell;
//!
//! let count = Arc::new(AtomicCell::of(0u64));
//! let threads: Vec<_> = (0..8)
//!     .map(|_| {
//!         let count = Arc::clone(&count);
//!         thread::spawn(move || {
//!             count.swap(|x| x + 1);
//!         })
//!     })
//!     .collect();
//!
//! for thread in threads {
//!     thread.join().unwrap();
//! }
//!
//! assert_eq!(*count.get(), 8);
//! ```
//!
//! The price of retrying is that the update function must be pure.
//! It may run many times under contention before one of its results
//! sticks, so it must not have side effects, block, or perform I/O,
//! and its result must only depend on its argument.  The function
//! only ever sees a shared `&T`, so it can't modify the current value
//! in place; nothing else about purity is checked.  There is no retry
//! limit, no backoff and no fairness among competing swappers: under
//! pathological contention a swapper may keep losing.  Callers that
//! need bounded latency have to layer that policy on top.
//!
//! Reads are plain atomic loads and hand out [`Arc<T>`] snapshots,
//! courtesy of [ArcSwap](https://crates.io/crates/arc-swap), which
//! also takes care of reclaiming displaced values once the last
//! snapshot referring to them goes away.  A snapshot never changes
//! under its holder's feet, and it never observes a value that wasn't
//! fully installed.  All writes to a given cell are linearizable;
//! distinct cells are completely independent of each other.
//!
//! Failed updates leave no trace.  A panic inside the update function
//! unwinds out of [`AtomicCell::swap`] before anything is installed,
//! and [`AtomicCell::try_swap`] hands the update function's
//! [`Err`] straight back to the caller, again without touching the
//! cell.
//!
//! [`Arc<T>`]: std::sync::Arc
mod cell;

pub use cell::AtomicCell;
