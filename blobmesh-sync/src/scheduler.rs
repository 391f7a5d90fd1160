// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background reconciliation of all servers with sync enabled.
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use blobmesh_backend::ServerSnapshot;
use blobmesh_core::{BlobRecord, Server};
use futures_util::{StreamExt, stream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::distribution::{Distribution, DistributionEntry};
use crate::engine::ReplicationEngine;
use crate::error::ReplicationError;
use crate::executor::ReplicationRequest;
use crate::state::{TransferKind, TransferState};
use crate::status::SyncOverview;

/// Server listings a sync pass works on.
#[derive(Clone, Debug, Default)]
pub struct SyncInput {
    pub snapshots: Vec<ServerSnapshot>,
    pub distribution: Distribution,
}

impl SyncInput {
    pub fn new(snapshots: Vec<ServerSnapshot>) -> Self {
        let distribution = Distribution::rebuild(&snapshots);
        Self {
            snapshots,
            distribution,
        }
    }

    /// Snapshots of all servers with sync enabled.
    pub fn sync_servers(&self) -> impl Iterator<Item = &ServerSnapshot> {
        self.snapshots
            .iter()
            .filter(|snapshot| snapshot.server.sync_enabled)
    }
}

/// Outcome of one sync pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Replications started.
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Missing blobs not attempted: cooling down, already in flight, no usable source, missing
    /// credentials or backend, or left over after cancellation.
    pub skipped: usize,
    pub cancelled: bool,
}

/// Missing blob on a sync target, together with the server to copy it from.
#[derive(Debug)]
struct Candidate {
    target: Server,
    source: Server,
    record: BlobRecord,
}

#[derive(Debug)]
enum Outcome {
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

/// Sync states belonging to the current epoch.
///
/// An epoch begins with the first dispatch after all earlier replications settled, the aggregate
/// status only looks at the states of the current epoch.
#[derive(Debug, Default)]
struct Epoch {
    ids: HashSet<String>,
    pending_reset: bool,
    sync_servers: usize,
    has_run: bool,
}

/// Copies blobs between sync-enabled servers until every one of them holds all blobs any other
/// one holds.
#[derive(Clone, Debug)]
pub struct SyncScheduler {
    engine: ReplicationEngine,
    epoch: Arc<Mutex<Epoch>>,
}

impl SyncScheduler {
    pub fn new(engine: ReplicationEngine) -> Self {
        Self {
            engine,
            epoch: Arc::default(),
        }
    }

    pub fn engine(&self) -> &ReplicationEngine {
        &self.engine
    }

    fn epoch(&self) -> MutexGuard<'_, Epoch> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replicate every blob missing on a sync target from another sync server holding it.
    ///
    /// The cancellation token is checked before each replication, replications already running
    /// are never interrupted.
    pub async fn run_pass(&self, input: &SyncInput, cancel: &CancellationToken) -> PassReport {
        let sync_servers = input.sync_servers().count();
        {
            let mut epoch = self.epoch();
            epoch.sync_servers = sync_servers;
            epoch.has_run = true;
        }

        let mut report = PassReport::default();
        if sync_servers < 2 {
            trace!(sync_servers, "not enough sync servers, skip pass");
            return report;
        }

        self.engine.prune_cooldowns();
        self.begin_epoch();

        let (candidates, unsourced) = candidates(input);
        report.skipped += unsourced;
        debug!(
            candidates = candidates.len(),
            unsourced, "sync pass started"
        );

        let outcomes: Vec<Outcome> = stream::iter(candidates)
            .map(|candidate| self.dispatch(candidate, cancel))
            .buffer_unordered(self.engine.config().workers.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Succeeded => {
                    report.dispatched += 1;
                    report.succeeded += 1;
                }
                Outcome::Failed => {
                    report.dispatched += 1;
                    report.failed += 1;
                }
                Outcome::Skipped => report.skipped += 1,
                Outcome::Cancelled => {
                    report.skipped += 1;
                    report.cancelled = true;
                }
            }
        }

        debug!(?report, "sync pass finished");
        report
    }

    /// Mark the next dispatch as the beginning of a new epoch if nothing is uploading anymore.
    fn begin_epoch(&self) {
        let states = self.engine.states().list(TransferKind::Sync);
        let mut epoch = self.epoch();
        let quiescent = !states
            .iter()
            .any(|state| state.is_uploading() && epoch.ids.contains(&state.id));
        epoch.pending_reset = quiescent;
    }

    fn track(&self, request: &ReplicationRequest) {
        let id = TransferState::id_for(
            TransferKind::Sync,
            &request.target.url,
            &request.record.sha256,
        );
        let mut epoch = self.epoch();
        if epoch.pending_reset {
            epoch.ids.clear();
            epoch.pending_reset = false;
        }
        epoch.ids.insert(id);
    }

    async fn dispatch(&self, candidate: Candidate, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let request = ReplicationRequest {
            target: candidate.target,
            record: candidate.record,
            source: candidate.source,
            kind: TransferKind::Sync,
        };
        let key = request.key();

        if self.engine.is_cooling_down(&key) {
            trace!(%key, "cooling down");
            return Outcome::Skipped;
        }

        if self.engine.is_in_flight(&key) {
            trace!(%key, "already in flight");
            return Outcome::Skipped;
        }

        if request.target.requires_auth && !self.engine.has_signer() {
            trace!(%key, "target requires authentication but no signer is installed");
            return Outcome::Skipped;
        }

        if !self.engine.backends().supports(request.target.kind) {
            trace!(%key, kind = %request.target.kind, "no backend for target");
            return Outcome::Skipped;
        }

        self.track(&request);
        match self.engine.replicate(request).await {
            Ok(_) => Outcome::Succeeded,
            Err(ReplicationError::InFlight { .. }) => Outcome::Skipped,
            Err(_) => Outcome::Failed,
        }
    }

    /// Aggregate status and progress of the current epoch.
    pub fn status(&self) -> SyncOverview {
        let epoch = self.epoch();
        if epoch.sync_servers < 2 || !epoch.has_run {
            return SyncOverview::idle();
        }

        let states: Vec<TransferState> = self
            .engine
            .states()
            .list(TransferKind::Sync)
            .into_iter()
            .filter(|state| epoch.ids.contains(&state.id))
            .collect();
        SyncOverview::from_states(&states)
    }

    /// Run passes in the background whenever the input changes.
    ///
    /// A change of input cancels the running pass, a new one starts with the newest input as soon
    /// as the cancelled one returned. Without changes another pass runs every `rescan_interval`
    /// so pairs whose cooldown ran out get retried. The loop ends when the handle gets shut down
    /// or the input sender is dropped.
    pub fn spawn(&self, mut inputs: watch::Receiver<SyncInput>) -> SyncHandle {
        let shutdown = CancellationToken::new();
        let scheduler = self.clone();
        let token = shutdown.clone();
        let rescan_interval = self.engine.config().rescan_interval;

        let task = tokio::spawn(async move {
            loop {
                let input = inputs.borrow_and_update().clone();
                let pass = token.child_token();
                let mut rerun = false;

                {
                    let run = scheduler.run_pass(&input, &pass);
                    tokio::pin!(run);

                    tokio::select! {
                        biased;
                        _ = &mut run => {},
                        // Newer input arrived, stop dispatching and start over once the running
                        // replications finished
                        Ok(()) = inputs.changed() => {
                            pass.cancel();
                            rerun = true;
                            run.await;
                        },
                        // Child token got cancelled along with the shutdown token
                        _ = token.cancelled() => {
                            run.await;
                        },
                    }
                }

                if token.is_cancelled() {
                    break;
                }

                match inputs.has_changed() {
                    Ok(true) => continue,
                    Ok(false) if rerun => continue,
                    Ok(false) => {}
                    Err(_) => break,
                }

                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    changed = inputs.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    },
                    _ = tokio::time::sleep(rescan_interval) => {
                        trace!("rescan");
                    },
                }
            }

            debug!("sync loop stopped");
        });

        SyncHandle {
            scheduler: self.clone(),
            shutdown,
            task,
        }
    }
}

/// Collect all blobs missing on a sync target which another sync server can provide.
///
/// Also returns the number of missing blobs whose holders are all still loading.
fn candidates(input: &SyncInput) -> (Vec<Candidate>, usize) {
    let mut candidates = Vec::new();
    let mut unsourced = 0;

    for target in input.sync_servers() {
        // Contents of servers still loading or failing to list are unknown.
        if !target.is_ready() {
            continue;
        }

        for (hash, entry) in input.distribution.iter() {
            if entry.servers.contains(&target.server.url) {
                continue;
            }

            let mut sync_holders = input.sync_servers().filter(|snapshot| {
                snapshot.server.url != target.server.url
                    && entry.servers.contains(&snapshot.server.url)
            });
            let Some(first) = sync_holders.next() else {
                continue;
            };

            let Some(source) = std::iter::once(first)
                .chain(sync_holders)
                .find(|snapshot| snapshot.is_ready())
            else {
                trace!(hash = %hash.short(), server = %target.server.url, "no loaded source");
                unsourced += 1;
                continue;
            };

            let Some(record) = source_record(source, entry) else {
                unsourced += 1;
                continue;
            };

            candidates.push(Candidate {
                target: target.server.clone(),
                source: source.server.clone(),
                record,
            });
        }
    }

    (candidates, unsourced)
}

/// Record of the blob as listed by the source server, with descriptive fields taken from the
/// representative where the source lacks them.
fn source_record(source: &ServerSnapshot, entry: &DistributionEntry) -> Option<BlobRecord> {
    let hash = entry.representative.sha256;
    let mut record = source
        .blobs
        .iter()
        .find(|record| record.sha256 == hash)?
        .clone();

    let representative = &entry.representative;
    if record.name.is_none() {
        record.name.clone_from(&representative.name);
    }
    if record.mime_type.is_none() {
        record.mime_type.clone_from(&representative.mime_type);
    }
    if record.size.is_none() {
        record.size = representative.size;
    }

    Some(record)
}

/// Handle to a sync loop running in the background.
#[derive(Debug)]
pub struct SyncHandle {
    scheduler: SyncScheduler,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn status(&self) -> SyncOverview {
        self.scheduler.status()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop dispatching and wait until running replications finished.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.task.await {
            error!("sync loop failed: {err}");
        }
    }
}
