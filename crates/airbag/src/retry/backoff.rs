// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::min;
use std::time::Duration;

use crate::rnd::Rnd;

/// Upper bound of the jitter relative to the delay: jitter is drawn from `[0, delay * 0.5)`.
const JITTER_FACTOR: f64 = 0.5;

const EXPONENTIAL_FACTOR: f64 = 2.0;

/// `min(base * 2^index, max)`, saturating instead of overflowing.
pub(super) fn exponential(base: Duration, index: u32, max: Duration) -> Duration {
    min(duration_mul_pow2(base, index), max)
}

/// Adds uniform jitter in `[0, delay / 2)` on top of `delay`.
pub(super) fn add_jitter(delay: Duration, rnd: &Rnd) -> Duration {
    let jitter = secs_to_duration_saturating(delay.as_secs_f64() * JITTER_FACTOR * rnd.next_f64());
    delay.saturating_add(jitter)
}

fn duration_mul_pow2(base: Duration, index: u32) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }

    let factor = EXPONENTIAL_FACTOR.powi(i32::try_from(index).unwrap_or(i32::MAX));
    secs_to_duration_saturating(base.as_secs_f64() * factor)
}

fn secs_to_duration_saturating(secs: f64) -> Duration {
    if secs <= 0.0 {
        return Duration::ZERO;
    }

    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
