// SPDX-License-Identifier: MIT OR Apache-2.0

use blobmesh_core::{BlobRecord, Server};
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::registry::Backends;
use crate::signer::Signer;

/// State of the listing fetched for one server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotStatus {
    /// Listing is being fetched, blobs may hold the result of an earlier fetch.
    Loading,
    Ready,
    Failed(String),
}

/// Point-in-time listing of all blobs held by one server.
#[derive(Clone, Debug)]
pub struct ServerSnapshot {
    pub server: Server,
    pub blobs: Vec<BlobRecord>,
    pub status: SnapshotStatus,
}

impl ServerSnapshot {
    pub fn ready(server: Server, blobs: Vec<BlobRecord>) -> Self {
        Self {
            server,
            blobs,
            status: SnapshotStatus::Ready,
        }
    }

    pub fn loading(server: Server) -> Self {
        Self {
            server,
            blobs: Vec::new(),
            status: SnapshotStatus::Loading,
        }
    }

    pub fn failed(server: Server, reason: impl Into<String>) -> Self {
        Self {
            server,
            blobs: Vec::new(),
            status: SnapshotStatus::Failed(reason.into()),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status, SnapshotStatus::Loading)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status, SnapshotStatus::Ready)
    }
}

/// Fetch the listings of all given servers concurrently.
///
/// A server whose listing fails, or whose kind has no registered backend, yields a `Failed`
/// snapshot. Servers requiring authentication are listed without credentials when no signer is
/// available and the server gets to decide.
pub async fn fetch_snapshots(
    backends: &Backends,
    servers: &[Server],
    owner: &str,
    signer: Option<&dyn Signer>,
) -> Vec<ServerSnapshot> {
    let requests = servers.iter().map(|server| async move {
        let Some(backend) = backends.for_server(server) else {
            return ServerSnapshot::failed(
                server.clone(),
                format!("no backend registered for {} servers", server.kind),
            );
        };

        let signer = if server.requires_auth { signer } else { None };
        match backend.list(server, owner, signer).await {
            Ok(blobs) => {
                debug!(server = %server.url, blobs = blobs.len(), "fetched server listing");
                ServerSnapshot::ready(server.clone(), blobs)
            }
            Err(err) => {
                warn!(server = %server.url, "listing failed: {err}");
                ServerSnapshot::failed(server.clone(), err.to_string())
            }
        }
    });

    join_all(requests).await
}
