// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults::{
    AUTH_COOLDOWN, RESCAN_INTERVAL, SOURCE_UNAVAILABLE_COOLDOWN, SUCCESS_COOLDOWN, SYNC_HISTORY,
    TRANSFER_HISTORY, TRANSIENT_COOLDOWN, UNSUPPORTED_COOLDOWN, WORKERS,
};

/// Configuration parameters for the replication engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cooldown after a replication succeeded.
    pub success_cooldown: Duration,

    /// Cooldown after a transient failure (5xx, 429, network).
    pub transient_cooldown: Duration,

    /// Cooldown after the target answered with 401.
    pub auth_cooldown: Duration,

    /// Cooldown after the target answered an upload with 404 or 405.
    pub unsupported_cooldown: Duration,

    /// Cooldown after the blob could not be read from its source.
    pub source_unavailable_cooldown: Duration,

    /// Maximum number of sync progress records kept.
    pub sync_history: usize,

    /// Maximum number of transfer progress records kept.
    pub transfer_history: usize,

    /// Interval after which an idle background sync loop runs another pass.
    pub rescan_interval: Duration,

    /// Number of replications a single loop runs concurrently.
    ///
    /// Defaults to 1 so slow source servers don't get overwhelmed.
    pub workers: usize,

    /// Drop pending authentication cooldowns as soon as a signer gets installed.
    ///
    /// When disabled, targets which rejected our credentials are only retried after their
    /// cooldown ran out, even if a signer is available again.
    pub reset_auth_cooldowns_on_signer: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            success_cooldown: SUCCESS_COOLDOWN,
            transient_cooldown: TRANSIENT_COOLDOWN,
            auth_cooldown: AUTH_COOLDOWN,
            unsupported_cooldown: UNSUPPORTED_COOLDOWN,
            source_unavailable_cooldown: SOURCE_UNAVAILABLE_COOLDOWN,
            sync_history: SYNC_HISTORY,
            transfer_history: TRANSFER_HISTORY,
            rescan_interval: RESCAN_INTERVAL,
            workers: WORKERS,
            reset_auth_cooldowns_on_signer: false,
        }
    }
}
