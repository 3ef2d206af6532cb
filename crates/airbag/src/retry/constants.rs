// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Default attempt budget, including the first try.
///
/// Matches the common default of resilience libraries: two retries after the initial call.
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry; doubles with every further attempt.
pub(crate) const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound of the exponential part of the delay.
pub(crate) const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Jitter desynchronizes callers that failed at the same moment.
///
/// See [Exponential Backoff and Jitter](https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter).
pub(crate) const DEFAULT_USE_JITTER: bool = true;
