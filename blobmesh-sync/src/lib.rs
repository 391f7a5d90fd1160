// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keep blobs replicated across multiple storage servers.
//!
//! The [`Distribution`] tells which server holds which blob. A [`SyncScheduler`] compares it
//! against all servers with sync enabled and copies missing blobs over, while a
//! [`TransferOrchestrator`] copies an explicit selection of blobs to explicitly chosen servers.
//! Both drive the same [`ReplicationEngine`], which first asks the target server to mirror the
//! blob from a public URL and falls back to streaming the bytes through this process.
//!
//! Progress of every replication is recorded in the [`TransferStateStore`].
mod config;
pub mod defaults;
mod distribution;
mod engine;
mod error;
mod executor;
mod scheduler;
mod state;
mod status;
mod tables;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
mod transfer;

pub use config::Config;
pub use distribution::{Distribution, DistributionEntry};
pub use engine::ReplicationEngine;
pub use error::{ReplicationError, TransferError};
pub use executor::ReplicationRequest;
pub use scheduler::{PassReport, SyncHandle, SyncInput, SyncScheduler};
pub use state::{TransferKind, TransferState, TransferStateStore, TransferStatus};
pub use status::{SyncOverview, SyncStatus};
pub use tables::{CooldownReason, ReplicationKey};
pub use transfer::{
    Eligibility, SelectedBlob, TransferOrchestrator, TransferRequest, TransferSummary,
    destination_eligibility,
};
