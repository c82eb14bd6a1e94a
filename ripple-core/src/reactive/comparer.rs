//! Equality comparers used to decide whether a new value is a change.

use std::fmt;
use std::rc::Rc;

/// Decides whether two values are equal for change-detection purposes.
///
/// Computed values only propagate a confirmed change when their comparer
/// says the new value differs from the old one; observable values skip
/// writes of equal values.
pub struct Comparer<T> {
    equals: Rc<dyn Fn(&T, &T) -> bool>,
}

impl<T: 'static> Comparer<T> {
    /// Compare with a custom predicate.
    pub fn new(equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            equals: Rc::new(equals),
        }
    }

    pub fn equals(&self, a: &T, b: &T) -> bool {
        (self.equals)(a, b)
    }
}

impl<T: PartialEq + 'static> Comparer<T> {
    /// Compare with `PartialEq`.
    pub fn by_eq() -> Self {
        Self::new(|a: &T, b: &T| a == b)
    }
}

impl<T: PartialEq + 'static> Default for Comparer<T> {
    fn default() -> Self {
        Self::by_eq()
    }
}

impl<T> Clone for Comparer<T> {
    fn clone(&self) -> Self {
        Self {
            equals: Rc::clone(&self.equals),
        }
    }
}

impl<T> fmt::Debug for Comparer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Comparer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn by_eq_uses_partial_eq() {
        let comparer = Comparer::by_eq();
        assert!(comparer.equals(&1, &1));
        assert!(!comparer.equals(&1, &2));
    }

    #[test]
    fn custom_comparer_can_ignore_noise() {
        let comparer = Comparer::new(|a: &f64, b: &f64| (a - b).abs() < 0.01);
        assert!(comparer.equals(&1.0, &1.001));
        assert!(!comparer.equals(&1.0, &1.1));
    }
}
