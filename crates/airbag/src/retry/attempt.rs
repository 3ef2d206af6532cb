// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;

/// A single try of a call request.
///
/// Attempts are 0-based: the initial try has index `0`, the first retry index `1`, and so on.
///
/// # Examples
///
/// ```
/// use airbag::retry::Attempt;
///
/// let attempt = Attempt::new(2, true);
/// assert_eq!(attempt.index(), 2);
/// assert_eq!(attempt.number(), 3);
/// assert!(!attempt.is_first());
/// assert!(attempt.is_last());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    index: u32,
    is_last: bool,
}

impl Default for Attempt {
    /// A single-shot attempt: both the first and the last one.
    fn default() -> Self {
        Self::new(0, true)
    }
}

impl Attempt {
    /// Creates an attempt with the given index.
    #[must_use]
    pub fn new(index: u32, is_last: bool) -> Self {
        Self { index, is_last }
    }

    /// The initial attempt of a request allowed `max_attempts` tries.
    #[must_use]
    pub fn first(max_attempts: u32) -> Self {
        Self::new(0, max_attempts <= 1)
    }

    /// Returns `true` for the initial attempt.
    #[must_use]
    pub fn is_first(self) -> bool {
        self.index == 0
    }

    /// Returns `true` if no further attempt is allowed after this one.
    #[must_use]
    pub fn is_last(self) -> bool {
        self.is_last
    }

    /// Returns the 0-based index.
    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Returns the 1-based number, i.e. how many attempts have been made including this one.
    #[must_use]
    pub fn number(self) -> u32 {
        self.index.saturating_add(1)
    }

    /// Returns the following attempt, or `None` once `max_attempts` is reached.
    pub(crate) fn next(self, max_attempts: u32) -> Option<Self> {
        let next = self.index.saturating_add(1);

        if next >= max_attempts {
            return None;
        }

        Some(Self::new(next, next == max_attempts.saturating_sub(1)))
    }
}

impl Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.index.fmt(f)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_of_single_shot_is_last() {
        assert!(Attempt::first(1).is_last());
        assert!(Attempt::first(0).is_last());
        assert!(!Attempt::first(3).is_last());
        assert_eq!(Attempt::default(), Attempt::first(1));
    }

    #[test]
    fn next_walks_up_to_max() {
        let first = Attempt::first(3);
        let second = first.next(3).unwrap();
        let third = second.next(3).unwrap();

        assert_eq!(second.index(), 1);
        assert!(!second.is_last());
        assert_eq!(third.number(), 3);
        assert!(third.is_last());
        assert_eq!(third.next(3), None);
    }

    #[test]
    fn next_saturates() {
        let attempt = Attempt::new(u32::MAX, false);
        assert_eq!(attempt.next(u32::MAX), None);
        assert_eq!(attempt.number(), u32::MAX);
    }

    #[test]
    fn display_shows_index() {
        assert_eq!(Attempt::new(4, false).to_string(), "4");
    }
}
