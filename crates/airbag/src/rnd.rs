// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;

/// Source of randomness for backoff jitter.
///
/// Not cryptographically secure; jitter only needs to spread callers apart.
#[derive(Clone, Default)]
pub(crate) enum Rnd {
    #[default]
    Real,

    #[cfg(test)]
    Test(std::sync::Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl Debug for Rnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "Real"),
            #[cfg(test)]
            Self::Test(_) => write!(f, "Test"),
        }
    }
}

impl Rnd {
    #[cfg(test)]
    pub fn new_fixed(value: f64) -> Self {
        Self::Test(std::sync::Arc::new(move || value))
    }

    /// Returns a value in `[0, 1)`.
    pub fn next_f64(&self) -> f64 {
        match self {
            Self::Real => fastrand::f64(),
            #[cfg(test)]
            Self::Test(generator) => generator(),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_stays_in_unit_range() {
        let rnd = Rnd::default();
        for _ in 0..100 {
            let value = rnd.next_f64();
            assert!((0.0..1.0).contains(&value));
        }
    }

    #[test]
    fn fixed_returns_value() {
        let rnd = Rnd::new_fixed(0.25);
        assert!((rnd.next_f64() - 0.25).abs() < f64::EPSILON);
        assert_eq!(format!("{rnd:?}"), "Test");
        assert_eq!(format!("{:?}", Rnd::Real), "Real");
    }
}
