use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use tracing::{debug, trace};

/// An [`AtomicCell<T>`] is an atomic, lock-free reference cell that
/// always holds exactly one immutable `T`.  The current value can be
/// read ([`AtomicCell::get`]), unconditionally replaced
/// ([`AtomicCell::set`]), or replaced by a pure function of itself
/// ([`AtomicCell::swap`]).
///
/// Values are handed out as [`Arc<T>`] snapshots: a snapshot remains
/// valid (and unchanged) for as long as the caller holds it, no
/// matter how many times the cell is updated afterwards.
///
/// Updates never lose each other.  [`AtomicCell::swap`] computes the
/// replacement from the value it read, and only installs it if that
/// value is still current; otherwise it reads again and recomputes.
/// The update function must therefore be pure: it may run any number
/// of times before one of its results is installed.
pub struct AtomicCell<T> {
    slot: ArcSwap<T>,
}

impl<T> AtomicCell<T> {
    /// Returns a fresh [`AtomicCell`] that holds `value`.
    #[inline(always)]
    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Returns a fresh [`AtomicCell`] that holds `value`.  Same as
    /// [`AtomicCell::new`].
    #[inline(always)]
    pub fn of(value: T) -> Self {
        Self::new(value)
    }

    /// Returns a fresh [`AtomicCell`] that holds the already shared
    /// `value`, without allocating.
    #[inline(always)]
    pub fn from_arc(value: Arc<T>) -> Self {
        Self {
            slot: ArcSwap::new(value),
        }
    }

    /// Returns a snapshot of the value currently installed in this
    /// [`AtomicCell`].
    #[inline(always)]
    pub fn get(&self) -> Arc<T> {
        self.slot.load_full()
    }

    /// Replaces the current value with `value`, regardless of what it
    /// was, and returns the newly installed value.
    ///
    /// Any [`AtomicCell::swap`] racing with this store will notice the
    /// change and retry against `value`.
    pub fn set(&self, value: T) -> Arc<T> {
        self.set_arc(Arc::new(value))
    }

    /// Like [`AtomicCell::set`], for a value that is already shared.
    pub fn set_arc(&self, value: Arc<T>) -> Arc<T> {
        self.slot.store(Arc::clone(&value));
        value
    }

    /// Replaces the current value with `value` and returns the value
    /// it displaced.
    pub fn replace(&self, value: T) -> Arc<T> {
        self.slot.swap(Arc::new(value))
    }

    /// Atomically replaces the current value `v` with `update(&v)`,
    /// and returns the newly installed value.
    ///
    /// When another thread installs a value between the read and the
    /// install, the result is discarded and `update` runs again on
    /// the new current value.  There is no bound on the number of
    /// attempts, and no fairness between competing swappers.
    ///
    /// `update` must be a pure function of its argument: no side
    /// effects, no blocking, no I/O.  A panic in `update` propagates
    /// to the caller and leaves the cell unchanged.
    pub fn swap<F>(&self, update: F) -> Arc<T>
    where
        F: FnMut(&T) -> T,
    {
        self.swap_vals(update).1
    }

    /// Like [`AtomicCell::swap`], but returns both the value `update`
    /// was applied to and the value it produced, as `(old, new)`.
    pub fn swap_vals<F>(&self, mut update: F) -> (Arc<T>, Arc<T>)
    where
        F: FnMut(&T) -> T,
    {
        match self.update(|current| Ok::<T, Infallible>(update(current))) {
            Ok(vals) => vals,
            Err(never) => match never {},
        }
    }

    /// Like [`AtomicCell::swap`], for a fallible `update`.
    ///
    /// The first [`Err`] returned by `update` aborts the swap and is
    /// passed back as is; the cell keeps whatever value it held.
    /// Only lost races are retried, never errors.
    pub fn try_swap<E, F>(&self, update: F) -> Result<Arc<T>, E>
    where
        F: FnMut(&T) -> Result<T, E>,
    {
        self.update(update).map(|(_, new)| new)
    }

    /// Consumes this [`AtomicCell`], returning its current value.
    #[inline(always)]
    pub fn into_inner(self) -> Arc<T> {
        self.slot.into_inner()
    }

    fn update<E, F>(&self, mut update: F) -> Result<(Arc<T>, Arc<T>), E>
    where
        F: FnMut(&T) -> Result<T, E>,
    {
        let mut current = self.slot.load_full();
        let mut retries: u64 = 0;

        loop {
            let next = Arc::new(update(&current)?);

            // We keep `current` alive across the exchange, so its
            // allocation can't be recycled for a newer value: pointer
            // identity is as good as value identity here.
            let witness = self.slot.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&*witness, &current) {
                if retries > 0 {
                    debug!(retries, "swap installed after contention");
                }

                return Ok((current, next));
            }

            retries += 1;
            trace!(retries, "swap lost a race, retrying");
            current = Guard::into_inner(witness);
        }
    }
}

impl<T: Default> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Clone for AtomicCell<T> {
    /// Returns a new, independent [`AtomicCell`] that starts out with
    /// this cell's current value.
    fn clone(&self) -> AtomicCell<T> {
        AtomicCell::from_arc(self.get())
    }
}

impl<T: fmt::Debug> fmt::Debug for AtomicCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.slot.load();
        fmt::Debug::fmt(&**current, f)
    }
}

impl<T> fmt::Pointer for AtomicCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.slot.load();
        fmt::Pointer::fmt(&*current, f)
    }
}

impl<T> From<T> for AtomicCell<T> {
    fn from(value: T) -> AtomicCell<T> {
        AtomicCell::new(value)
    }
}

impl<T> From<Arc<T>> for AtomicCell<T> {
    #[inline(always)]
    fn from(value: Arc<T>) -> AtomicCell<T> {
        AtomicCell::from_arc(value)
    }
}

impl<T> From<AtomicCell<T>> for Arc<T> {
    #[inline(always)]
    fn from(cell: AtomicCell<T>) -> Arc<T> {
        cell.into_inner()
    }
}

#[cfg(test)]
#[derive(Debug, PartialEq, thiserror::Error)]
#[error("rejected {0}")]
struct Rejected(u64);

#[test]
fn test_of() {
    assert_eq!(*AtomicCell::of(0u64).get(), 0);
    assert_eq!(*AtomicCell::of(u64::MAX).get(), u64::MAX);
    assert_eq!(*AtomicCell::of(String::new()).get(), "");
    assert_eq!(*AtomicCell::<Option<u8>>::of(None).get(), None);
    assert_eq!(*AtomicCell::<()>::default().get(), ());
}

#[test]
fn test_set() {
    let cell = AtomicCell::of(vec![1]);

    assert_eq!(*cell.set(vec![2, 3]), [2, 3]);
    assert_eq!(*cell.get(), [2, 3]);

    let shared = Arc::new(vec![4]);
    let installed = cell.set_arc(Arc::clone(&shared));
    assert!(Arc::ptr_eq(&installed, &shared));
    assert!(Arc::ptr_eq(&cell.get(), &shared));
}

#[test]
fn test_replace() {
    let cell = AtomicCell::of("a".to_string());

    assert_eq!(*cell.replace("b".to_string()), "a");
    assert_eq!(*cell.replace("c".to_string()), "b");
    assert_eq!(*cell.get(), "c");
}

#[test]
fn test_swap() {
    let cell = AtomicCell::of(1u64);

    for _ in 0..10 {
        let before = cell.get();
        let after = cell.swap(|x| x * 3);
        assert_eq!(*after, *before * 3);
        assert!(Arc::ptr_eq(&after, &cell.get()));
    }

    assert_eq!(*cell.get(), 59049);
}

#[test]
fn test_swap_identity() {
    let cell = AtomicCell::of(vec![1, 2]);

    assert_eq!(*cell.swap(|v| v.clone()), [1, 2]);
}

#[test]
fn test_swap_vals() {
    let cell = AtomicCell::of(10);
    let installed = cell.get();

    let (old, new) = cell.swap_vals(|x| x - 4);
    assert!(Arc::ptr_eq(&old, &installed));
    assert_eq!((*old, *new), (10, 6));
    assert!(Arc::ptr_eq(&new, &cell.get()));
}

#[test]
fn test_snapshot_outlives_updates() {
    let cell = AtomicCell::of("first".to_string());
    let snapshot = cell.get();

    cell.set("second".to_string());
    cell.swap(|s| format!("{s}!"));

    assert_eq!(*snapshot, "first");
    assert_eq!(*cell.get(), "second!");

    let current = cell.get();
    drop(cell);
    assert_eq!(*current, "second!");
}

#[test]
fn test_try_swap() {
    let cell = AtomicCell::of(1u64);

    assert_eq!(cell.try_swap(|x| Ok::<_, Rejected>(x + 1)).map(|v| *v), Ok(2));
    assert_eq!(*cell.get(), 2);

    let before = cell.get();
    let mut calls = 0;
    let result = cell.try_swap(|x| {
        calls += 1;
        Err(Rejected(*x))
    });

    assert_eq!(result, Err(Rejected(2)));
    assert_eq!(result.unwrap_err().to_string(), "rejected 2");
    assert_eq!(calls, 1);
    assert!(Arc::ptr_eq(&cell.get(), &before));
}

#[test]
fn test_swap_panic() {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    let cell = AtomicCell::of(7);
    let before = cell.get();

    let result = catch_unwind(AssertUnwindSafe(|| {
        cell.swap(|_| panic!("update failed"));
    }));

    assert!(result.is_err());
    assert!(Arc::ptr_eq(&cell.get(), &before));
    assert_eq!(*cell.swap(|x| x + 1), 8);
}

#[test]
fn test_clone() {
    let cell = AtomicCell::of(1);
    let copy = cell.clone();

    assert!(Arc::ptr_eq(&cell.get(), &copy.get()));

    copy.set(2);
    assert_eq!(*cell.get(), 1);
    assert_eq!(*copy.get(), 2);
}

#[test]
fn test_fmt() {
    let cell = AtomicCell::of(Some(3));

    assert_eq!(format!("{:?}", &cell), "Some(3)");
    assert_eq!(format!("{:p}", cell), format!("{:p}", cell.get()));

    // `&cell` formats the cell's own address, not the snapshot's.
    assert_ne!(format!("{:p}", &cell), format!("{:p}", cell));

    let previous = cell.get();
    cell.set(Some(4));
    assert_ne!(format!("{:p}", cell), format!("{:p}", previous));
}

#[test]
fn test_conversions() {
    let cell: AtomicCell<String> = "foo".to_string().into();
    assert_eq!(*cell.get(), "foo");

    let shared = Arc::new("bar".to_string());
    let cell: AtomicCell<String> = Arc::clone(&shared).into();
    assert!(Arc::ptr_eq(&cell.get(), &shared));

    let back: Arc<String> = cell.into();
    assert!(Arc::ptr_eq(&back, &shared));

    assert_eq!(*AtomicCell::of(5).into_inner(), 5);
}

#[test]
fn test_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}

    assert_send_sync::<AtomicCell<u64>>();
    assert_send_sync::<AtomicCell<Vec<String>>>();
}
