// SPDX-License-Identifier: MIT OR Apache-2.0

//! Default values used for replication configuration.
use std::time::Duration;

/// Wait time after a successful replication before the same pair may run again.
pub const SUCCESS_COOLDOWN: Duration = Duration::from_secs(60);

/// Wait time after a server error, rate limit or network failure.
pub const TRANSIENT_COOLDOWN: Duration = Duration::from_secs(15 * 60);

/// Wait time after the target rejected our credentials.
pub const AUTH_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Wait time after the target rejected the request as not supported.
pub const UNSUPPORTED_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Wait time after the blob could not be read from the source server.
pub const SOURCE_UNAVAILABLE_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Number of sync progress records kept for observers.
pub const SYNC_HISTORY: usize = 40;

/// Number of transfer progress records kept for observers.
pub const TRANSFER_HISTORY: usize = 60;

/// Interval in which the background sync loop re-runs a pass without any input change.
pub const RESCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Number of replications one loop runs at the same time.
pub const WORKERS: usize = 1;
