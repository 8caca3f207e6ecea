//! Compute-once values.

use parking_lot::Mutex;
use std::fmt;
use std::sync::OnceLock;

type Thunk<T> = Box<dyn FnOnce() -> T + Send>;

/// A value computed on first access and cached afterwards.
///
/// Safe to share between threads; concurrent first accesses run the thunk
/// once and all observe the same value.
pub struct Lazy<T> {
    value: OnceLock<T>,
    thunk: Mutex<Option<Thunk<T>>>,
}

impl<T> Lazy<T> {
    pub fn new(thunk: impl FnOnce() -> T + Send + 'static) -> Self {
        Self {
            value: OnceLock::new(),
            thunk: Mutex::new(Some(Box::new(thunk))),
        }
    }

    /// An already computed value.
    pub fn ready(value: T) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(value);
        Self {
            value: cell,
            thunk: Mutex::new(None),
        }
    }

    pub fn get(&self) -> &T {
        self.value.get_or_init(|| {
            let thunk = self.thunk.lock().take();
            match thunk {
                Some(thunk) => thunk(),
                // the thunk was taken by an earlier access that panicked
                None => panic!("re-raising: lazy value initializer panicked on an earlier access"),
            }
        })
    }

    pub fn is_evaluated(&self) -> bool {
        self.value.get().is_some()
    }
}

impl<T: fmt::Debug> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.get() {
            Some(value) => f.debug_tuple("Lazy").field(value).finish(),
            None => f.write_str("Lazy(<pending>)"),
        }
    }
}
