// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Consecutive dependency failures that open the circuit.
pub(crate) const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// How long the circuit stays open before a probe is let through.
pub(crate) const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(30);

/// A single probe at a time keeps the load on a recovering dependency minimal.
pub(crate) const DEFAULT_MAX_HALF_OPEN_TRIALS: u32 = 1;
