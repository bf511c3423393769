/*!
 * Atomic Cell
 *
 * Lock-free compare-and-swap cell over the native atomic integer and bool types.
 * Every operation is sequentially consistent and non-blocking; read-modify-write helpers retry
 * their CAS until it succeeds. There is no starvation bound under extreme contention, the usual
 * price of CAS retry loops.
 */

use std::fmt;
use std::sync::atomic::{
    AtomicBool, AtomicI32, AtomicI64, AtomicIsize, AtomicU32, AtomicU64, AtomicUsize, Ordering,
};

const ORDER: Ordering = Ordering::SeqCst;

/// Value types with a native atomic representation
pub trait AtomicValue: Copy + Eq + Send + Sync + 'static {
    #[doc(hidden)]
    type Atomic: Send + Sync;

    #[doc(hidden)]
    fn new_atomic(value: Self) -> Self::Atomic;
    #[doc(hidden)]
    fn load(atomic: &Self::Atomic) -> Self;
    #[doc(hidden)]
    fn store(atomic: &Self::Atomic, value: Self);
    #[doc(hidden)]
    fn swap(atomic: &Self::Atomic, value: Self) -> Self;
    #[doc(hidden)]
    fn compare_exchange(atomic: &Self::Atomic, current: Self, new: Self) -> Result<Self, Self>;
    #[doc(hidden)]
    fn compare_exchange_weak(atomic: &Self::Atomic, current: Self, new: Self)
        -> Result<Self, Self>;
    #[doc(hidden)]
    fn into_inner(atomic: Self::Atomic) -> Self;
}

/// Integer types supporting atomic arithmetic (wrapping, like hardware fetch-add)
pub trait AtomicInteger: AtomicValue + Ord + fmt::Debug {
    const ZERO: Self;
    const ONE: Self;

    #[doc(hidden)]
    fn fetch_add(atomic: &Self::Atomic, delta: Self) -> Self;
    #[doc(hidden)]
    fn fetch_sub(atomic: &Self::Atomic, delta: Self) -> Self;
    #[doc(hidden)]
    fn wrapping_add(self, other: Self) -> Self;
    #[doc(hidden)]
    fn wrapping_sub(self, other: Self) -> Self;
}

macro_rules! impl_atomic_value {
    ($($ty:ty => $atomic:ty),* $(,)?) => {$(
        impl AtomicValue for $ty {
            type Atomic = $atomic;

            #[inline]
            fn new_atomic(value: Self) -> Self::Atomic {
                <$atomic>::new(value)
            }
            #[inline]
            fn load(atomic: &Self::Atomic) -> Self {
                atomic.load(ORDER)
            }
            #[inline]
            fn store(atomic: &Self::Atomic, value: Self) {
                atomic.store(value, ORDER)
            }
            #[inline]
            fn swap(atomic: &Self::Atomic, value: Self) -> Self {
                atomic.swap(value, ORDER)
            }
            #[inline]
            fn compare_exchange(atomic: &Self::Atomic, current: Self, new: Self) -> Result<Self, Self> {
                atomic.compare_exchange(current, new, ORDER, ORDER)
            }
            #[inline]
            fn compare_exchange_weak(atomic: &Self::Atomic, current: Self, new: Self) -> Result<Self, Self> {
                atomic.compare_exchange_weak(current, new, ORDER, ORDER)
            }
            #[inline]
            fn into_inner(atomic: Self::Atomic) -> Self {
                atomic.into_inner()
            }
        }
    )*};
}

macro_rules! impl_atomic_integer {
    ($($ty:ty),* $(,)?) => {$(
        impl AtomicInteger for $ty {
            const ZERO: Self = 0;
            const ONE: Self = 1;

            #[inline]
            fn fetch_add(atomic: &Self::Atomic, delta: Self) -> Self {
                atomic.fetch_add(delta, ORDER)
            }
            #[inline]
            fn fetch_sub(atomic: &Self::Atomic, delta: Self) -> Self {
                atomic.fetch_sub(delta, ORDER)
            }
            #[inline]
            fn wrapping_add(self, other: Self) -> Self {
                <$ty>::wrapping_add(self, other)
            }
            #[inline]
            fn wrapping_sub(self, other: Self) -> Self {
                <$ty>::wrapping_sub(self, other)
            }
        }
    )*};
}

impl_atomic_value! {
    bool => AtomicBool,
    i32 => AtomicI32,
    i64 => AtomicI64,
    isize => AtomicIsize,
    u32 => AtomicU32,
    u64 => AtomicU64,
    usize => AtomicUsize,
}

impl_atomic_integer!(i32, i64, isize, u32, u64, usize);

/// Lock-free CAS cell
///
/// # Examples
///
/// ```
/// use sync_primitives::sync::AtomicCell;
///
/// let cell = AtomicCell::new(10_i32);
/// assert_eq!(cell.increment(), 11);
/// assert_eq!(cell.add(5), 16);
///
/// // compare_exchange returns the value observed before the attempted write
/// assert_eq!(cell.compare_exchange(16, 0), 16);
/// assert_eq!(cell.compare_exchange(16, 1), 0);
/// ```
pub struct AtomicCell<T: AtomicValue> {
    value: T::Atomic,
}

impl<T: AtomicValue> AtomicCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: T::new_atomic(value),
        }
    }

    #[inline]
    pub fn load(&self) -> T {
        T::load(&self.value)
    }

    #[inline]
    pub fn store(&self, value: T) {
        T::store(&self.value, value)
    }

    /// Replace the value, returning the previous one
    #[inline]
    pub fn swap(&self, value: T) -> T {
        T::swap(&self.value, value)
    }

    /// Write `desired` if the cell holds `expected`; always returns the value seen before the write
    #[inline]
    pub fn compare_exchange(&self, expected: T, desired: T) -> T {
        match T::compare_exchange(&self.value, expected, desired) {
            Ok(previous) | Err(previous) => previous,
        }
    }

    /// `compare_exchange` reporting success as a bool
    #[inline]
    pub fn compare_and_set(&self, expected: T, desired: T) -> bool {
        T::compare_exchange(&self.value, expected, desired).is_ok()
    }

    /// Generic CAS retry loop
    ///
    /// `f` receives the freshly read value and returns the replacement, or `None` to abort without
    /// writing. Returns `Ok(previous)` on success or `Err(current)` if aborted. `f` may run more than
    /// once under contention and must not have side effects.
    pub fn update(&self, mut f: impl FnMut(T) -> Option<T>) -> Result<T, T> {
        let mut current = self.load();
        loop {
            let next = match f(current) {
                Some(next) => next,
                None => return Err(current),
            };
            match T::compare_exchange_weak(&self.value, current, next) {
                Ok(previous) => return Ok(previous),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn into_inner(self) -> T {
        T::into_inner(self.value)
    }
}

impl<T: AtomicInteger> AtomicCell<T> {
    /// Atomically add one, returning the new value
    #[inline]
    pub fn increment(&self) -> T {
        T::fetch_add(&self.value, T::ONE).wrapping_add(T::ONE)
    }

    /// Atomically subtract one, returning the new value
    #[inline]
    pub fn decrement(&self) -> T {
        T::fetch_sub(&self.value, T::ONE).wrapping_sub(T::ONE)
    }

    /// Atomically add `delta`, returning the new value
    #[inline]
    pub fn add(&self, delta: T) -> T {
        T::fetch_add(&self.value, delta).wrapping_add(delta)
    }

    /// Atomically subtract `delta`, returning the new value
    #[inline]
    pub fn sub(&self, delta: T) -> T {
        T::fetch_sub(&self.value, delta).wrapping_sub(delta)
    }
}

impl<T: AtomicValue + Default> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: AtomicValue + fmt::Debug> fmt::Debug for AtomicCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicCell").field(&self.load()).finish()
    }
}

impl<T: AtomicValue> From<T> for AtomicCell<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
