// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state::{TransferState, TransferStatus};

/// Aggregate state of the background synchronisation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Fewer than two servers have sync enabled or no pass ran yet.
    #[default]
    Idle,
    Syncing,
    Synced,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        };
        f.write_str(value)
    }
}

/// Status and progress of the current sync epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOverview {
    pub status: SyncStatus,
    /// Bytes transferred by running and finished replications.
    pub transferred: u64,
    pub total: u64,
    /// Progress in percent, `0..=100`.
    pub percent: u8,
    pub uploading: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl SyncOverview {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Aggregate the sync states dispatched in the current epoch.
    pub fn from_states<'a>(states: impl IntoIterator<Item = &'a TransferState>) -> Self {
        let mut overview = Self::default();
        for state in states {
            match state.status {
                TransferStatus::Uploading => overview.uploading += 1,
                TransferStatus::Success => overview.succeeded += 1,
                TransferStatus::Error => {
                    overview.failed += 1;
                    continue;
                }
            }
            overview.transferred += state.transferred;
            overview.total += state.total;
        }

        overview.status = if overview.uploading > 0 {
            SyncStatus::Syncing
        } else if overview.failed > 0 {
            SyncStatus::Error
        } else {
            SyncStatus::Synced
        };

        overview.percent = if overview.total > 0 {
            (overview.transferred.saturating_mul(100) / overview.total).min(100) as u8
        } else if overview.status == SyncStatus::Synced {
            100
        } else {
            0
        };

        overview
    }
}

#[cfg(test)]
mod tests {
    use blobmesh_core::{ServerUrl, Sha256};

    use crate::state::{TransferKind, TransferState};

    use super::{SyncOverview, SyncStatus};

    fn state(content: &[u8], total: u64) -> TransferState {
        let target = ServerUrl::new("https://b.example.com").unwrap();
        TransferState::uploading(TransferKind::Sync, &target, Sha256::new(content), "file", total)
    }

    #[test]
    fn syncing_while_uploads_run() {
        let mut running = state(b"one", 100);
        running.transferred = 50;
        let done = state(b"two", 100).succeed(None);
        let failed = state(b"three", 1000).fail("Sync auth failed");

        let overview = SyncOverview::from_states(&[running, done, failed.clone()]);
        assert_eq!(overview.status, SyncStatus::Syncing);
        assert_eq!(overview.transferred, 150);
        assert_eq!(overview.total, 200);
        assert_eq!(overview.percent, 75);
        assert_eq!(overview.failed, 1);

        let overview = SyncOverview::from_states(&[state(b"two", 100).succeed(None), failed]);
        assert_eq!(overview.status, SyncStatus::Error);
    }

    #[test]
    fn synced_without_failures() {
        let overview = SyncOverview::from_states(&[state(b"one", 0).succeed(None)]);
        assert_eq!(overview.status, SyncStatus::Synced);
        assert_eq!(overview.percent, 100);

        let none: Vec<TransferState> = Vec::new();
        assert_eq!(SyncOverview::from_states(&none).status, SyncStatus::Synced);
        assert_eq!(SyncOverview::idle().status, SyncStatus::Idle);
    }
}
