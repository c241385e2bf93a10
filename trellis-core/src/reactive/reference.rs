//! Untracked mutable references.
//!
//! A [`Ref`] persists across runs of the code that holds it but sits outside
//! the dependency graph. Writing it never stages anything, never opens a
//! batch, and never makes a derivation stale or an effect due. Reading it
//! inside a derivation does not record a dependency either.
//!
//! The typical use is remembering the previous value of a cell:
//!
//! ```rust,ignore
//! let prev = Ref::new(String::new());
//! let (n, p) = (name.clone(), prev.clone());
//! Effect::new(&rt, &[&name], move || {
//!     p.set(n.read());
//!     None
//! });
//! ```

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

/// A mutable slot that is deliberately not reactive.
pub struct Ref<T> {
    current: Rc<RefCell<T>>,
}

impl<T> Ref<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: Rc::new(RefCell::new(value)),
        }
    }

    pub fn set(&self, value: T) {
        *self.current.borrow_mut() = value;
    }

    /// Store `value` and return what was there.
    pub fn replace(&self, value: T) -> T {
        self.current.replace(value)
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.current.borrow())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.current.borrow_mut())
    }
}

impl<T: Clone> Ref<T> {
    pub fn get(&self) -> T {
        self.current.borrow().clone()
    }
}

impl<T: Default> Default for Ref<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            current: Rc::clone(&self.current),
        }
    }
}

impl<T: Debug> Debug for Ref<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Ref").field(&*self.current.borrow()).finish()
    }
}
