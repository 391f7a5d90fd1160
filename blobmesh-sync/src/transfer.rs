// SPDX-License-Identifier: MIT OR Apache-2.0

//! Copy blobs chosen by the user to servers chosen by the user.
use std::collections::BTreeSet;

use blobmesh_core::{BlobRecord, Server, ServerUrl};
use futures_util::{StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::distribution::Distribution;
use crate::engine::ReplicationEngine;
use crate::error::{ReplicationError, TransferError};
use crate::executor::ReplicationRequest;
use crate::state::{TransferKind, TransferState};

const ALREADY_PRESENT: &str = "Already present";

/// Blob picked by the user, together with the server it was picked from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedBlob {
    pub record: BlobRecord,
    pub source: Server,
}

#[derive(Clone, Debug, Default)]
pub struct TransferRequest {
    pub blobs: Vec<SelectedBlob>,
    pub destinations: Vec<Server>,
}

/// Result of a transfer over all blob and destination pairs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// Pairs replicated by this transfer.
    pub succeeded: usize,
    /// Pairs skipped because the destination held the blob already.
    pub already_present: usize,
    pub failed: usize,
    /// Pairs not attempted because the transfer got cancelled.
    pub skipped: usize,
    pub cancelled: bool,
}

impl TransferSummary {
    /// Returns `true` if every pair was attempted and none failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.already_present + self.failed + self.skipped
    }
}

/// Whether a server may be offered as transfer destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// There is no other server to transfer from.
    SoleServer,
    /// Every selected blob comes from this server.
    SourceOfSelection,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// Eligibility of every registered server as destination for the given selection.
pub fn destination_eligibility<'a>(
    servers: &'a [Server],
    selection: &[SelectedBlob],
) -> Vec<(&'a Server, Eligibility)> {
    let sources: BTreeSet<&ServerUrl> = selection.iter().map(|blob| &blob.source.url).collect();
    let single_source = match sources.len() {
        1 => sources.into_iter().next(),
        _ => None,
    };

    servers
        .iter()
        .map(|server| {
            let eligibility = if servers.len() == 1 {
                Eligibility::SoleServer
            } else if single_source == Some(&server.url) {
                Eligibility::SourceOfSelection
            } else {
                Eligibility::Eligible
            };
            (server, eligibility)
        })
        .collect()
}

#[derive(Debug)]
enum Outcome {
    Succeeded,
    AlreadyPresent,
    Failed,
    Cancelled,
}

/// Runs user-requested transfers through the shared [`ReplicationEngine`].
///
/// Transfers ignore cooldowns, the user asked for them explicitly. Pairs already being replicated
/// by the sync loop are not started twice.
#[derive(Clone, Debug)]
pub struct TransferOrchestrator {
    engine: ReplicationEngine,
}

impl TransferOrchestrator {
    pub fn new(engine: ReplicationEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &ReplicationEngine {
        &self.engine
    }

    /// Check the request can be run, before anything gets dispatched.
    pub fn validate(&self, request: &TransferRequest) -> Result<(), TransferError> {
        if request.destinations.is_empty() {
            return Err(TransferError::NoDestinations);
        }

        if request.blobs.is_empty() {
            return Err(TransferError::EmptySelection);
        }

        if !self.engine.has_signer() {
            let servers = request
                .blobs
                .iter()
                .map(|blob| &blob.source)
                .chain(request.destinations.iter());
            for server in servers {
                if server.requires_auth {
                    return Err(TransferError::AuthRequired {
                        server: server.url.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Copy every selected blob to every destination.
    ///
    /// All pairs are attempted, failures don't stop the transfer. Destinations the distribution
    /// lists as holding a blob are reported as successful right away without contacting them.
    pub async fn transfer(
        &self,
        request: &TransferRequest,
        distribution: &Distribution,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary, TransferError> {
        self.validate(request)?;

        let mut seen = BTreeSet::new();
        let destinations: Vec<&Server> = request
            .destinations
            .iter()
            .filter(|server| seen.insert(&server.url))
            .collect();

        let pairs = destinations.into_iter().flat_map(|destination| {
            request.blobs.iter().map(move |blob| (destination, blob))
        });
        debug!(
            blobs = request.blobs.len(),
            destinations = seen.len(),
            "transfer started"
        );

        let outcomes: Vec<Outcome> = stream::iter(pairs)
            .map(|(destination, blob)| self.dispatch(destination, blob, distribution, cancel))
            .buffer_unordered(self.engine.config().workers.max(1))
            .collect()
            .await;

        let mut summary = TransferSummary::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Succeeded => summary.succeeded += 1,
                Outcome::AlreadyPresent => summary.already_present += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Cancelled => {
                    summary.skipped += 1;
                    summary.cancelled = true;
                }
            }
        }

        debug!(?summary, "transfer finished");
        Ok(summary)
    }

    async fn dispatch(
        &self,
        destination: &Server,
        blob: &SelectedBlob,
        distribution: &Distribution,
        cancel: &CancellationToken,
    ) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let hash = blob.record.sha256;
        if blob.source.url == destination.url || distribution.is_present_on(&hash, &destination.url)
        {
            trace!(hash = %hash.short(), server = %destination.url, "blob already present");
            let state = TransferState::uploading(
                TransferKind::Transfer,
                &destination.url,
                hash,
                blob.record.display_name(),
                blob.record.size.unwrap_or_default(),
            );
            self.engine
                .states()
                .upsert(state.succeed(Some(ALREADY_PRESENT.to_owned())));
            return Outcome::AlreadyPresent;
        }

        let request = ReplicationRequest {
            target: destination.clone(),
            record: blob.record.clone(),
            source: blob.source.clone(),
            kind: TransferKind::Transfer,
        };
        match self.engine.replicate(request).await {
            Ok(_) => Outcome::Succeeded,
            Err(err @ ReplicationError::InFlight { .. }) => {
                let id = TransferState::id_for(TransferKind::Transfer, &destination.url, &hash);
                let running = self
                    .engine
                    .states()
                    .get(TransferKind::Transfer, &id)
                    .is_some_and(|state| state.is_uploading());
                // Keep the progress of a transfer still running.
                if !running {
                    let state = TransferState::uploading(
                        TransferKind::Transfer,
                        &destination.url,
                        hash,
                        blob.record.display_name(),
                        blob.record.size.unwrap_or_default(),
                    );
                    self.engine
                        .states()
                        .upsert(state.fail(err.message(TransferKind::Transfer)));
                }
                Outcome::Failed
            }
            Err(_) => Outcome::Failed,
        }
    }
}
