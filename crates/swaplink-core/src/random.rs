//! Random candidate selection.
//!
//! Turns "no candidates yet" into a fallback value instead of a failure.

use rand::seq::IndexedRandom;

/// Uniformly pick one element of `items`, or `default` if it is empty.
pub fn random_choice_safe<T: Clone>(items: &[T], default: T) -> T {
    random_choice(items).unwrap_or(default)
}

/// Uniformly pick one element of `items`, `None` if it is empty.
pub fn random_choice<T: Clone>(items: &[T]) -> Option<T> {
    items.choose(&mut rand::rng()).cloned()
}
