//! Watched Values and Deep Traversal
//!
//! A watcher needs three things from the values it produces:
//!
//! - whether a value is primitive, because non-primitive values always count
//!   as changed (their contents may have been mutated in place);
//! - an identity comparison for primitive values;
//! - a way to read every reachable nested source, so a `deep` watcher
//!   subscribes to all of them.
//!
//! [`WatchValue`] bundles these. [`Traversal`] remembers which shared
//! structures have already been visited, so traversal terminates on shared
//! and cyclic data.

use std::collections::HashSet;
use std::rc::Rc;

/// Visited-set for one deep traversal.
#[derive(Debug, Default)]
pub struct Traversal {
    seen: HashSet<usize>,
}

impl Traversal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the structure at `ptr` as visited.
    ///
    /// Returns `false` if it had already been visited.
    pub fn visit<T: ?Sized>(&mut self, ptr: *const T) -> bool {
        self.seen.insert(ptr as *const () as usize)
    }

    /// Forget the structure at `ptr`, so it can be visited again.
    pub fn leave<T: ?Sized>(&mut self, ptr: *const T) {
        self.seen.remove(&(ptr as *const () as usize));
    }

    /// Number of distinct structures visited so far.
    pub fn visited(&self) -> usize {
        self.seen.len()
    }
}

/// Read every reachable nested source of `value` inside the active context.
pub fn traverse<T: WatchValue>(value: &T) {
    let mut traversal = Traversal::new();
    value.traverse(&mut traversal);
}

/// A value a watcher can produce.
pub trait WatchValue: Clone + 'static {
    /// Primitive values are compared by identity; everything else is
    /// treated as changed on every run.
    fn is_primitive(&self) -> bool;

    /// Identity comparison.
    fn same_as(&self, other: &Self) -> bool;

    /// Touch every nested source reachable from this value.
    fn traverse(&self, _traversal: &mut Traversal) {}
}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WatchValue for $ty {
                fn is_primitive(&self) -> bool {
                    true
                }

                fn same_as(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

impl_primitive!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
);

impl<T: WatchValue> WatchValue for Option<T> {
    fn is_primitive(&self) -> bool {
        self.as_ref().map_or(true, WatchValue::is_primitive)
    }

    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_as(b),
            _ => false,
        }
    }

    fn traverse(&self, traversal: &mut Traversal) {
        if let Some(value) = self {
            value.traverse(traversal);
        }
    }
}

impl<T: WatchValue> WatchValue for Vec<T> {
    fn is_primitive(&self) -> bool {
        false
    }

    // An owned vector has no identity of its own.
    fn same_as(&self, _other: &Self) -> bool {
        false
    }

    fn traverse(&self, traversal: &mut Traversal) {
        for item in self {
            item.traverse(traversal);
        }
    }
}

impl<T: WatchValue> WatchValue for Rc<T> {
    fn is_primitive(&self) -> bool {
        false
    }

    fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }

    fn traverse(&self, traversal: &mut Traversal) {
        if traversal.visit(Rc::as_ptr(self)) {
            (**self).traverse(traversal);
        }
    }
}
