// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use blobmesh_backend::memory::{MemoryBackend, MemoryNetwork};
use blobmesh_backend::{AuthRequest, AuthToken, Backends, ServerSnapshot, Signer, SignerError};
use blobmesh_core::{BlobRecord, Server, ServerKind, ServerUrl, Sha256};

use crate::config::Config;
use crate::engine::ReplicationEngine;
use crate::scheduler::SyncInput;

pub use blobmesh_backend::memory::Operation;
pub use blobmesh_backend::test_utils::{server, setup_logging, sync_server};

/// In-memory servers of all kinds sharing one network.
///
/// Only the Blossom backend supports mirroring.
#[derive(Clone, Debug)]
pub struct TestNetwork {
    pub network: MemoryNetwork,
    pub blossom: Arc<MemoryBackend>,
    pub nip96: Arc<MemoryBackend>,
    pub satellite: Arc<MemoryBackend>,
}

impl TestNetwork {
    pub fn new() -> Self {
        let network = MemoryNetwork::default();
        Self {
            blossom: Arc::new(MemoryBackend::new(ServerKind::Blossom, network.clone())),
            nip96: Arc::new(MemoryBackend::new(ServerKind::Nip96, network.clone())),
            satellite: Arc::new(MemoryBackend::new(ServerKind::Satellite, network.clone())),
            network,
        }
    }

    pub fn backends(&self) -> Backends {
        Backends::new()
            .with(ServerKind::Blossom, self.blossom.clone())
            .with(ServerKind::Nip96, self.nip96.clone())
            .with(ServerKind::Satellite, self.satellite.clone())
    }

    pub fn engine(&self) -> ReplicationEngine {
        self.engine_with(Config::default())
    }

    pub fn engine_with(&self, config: Config) -> ReplicationEngine {
        ReplicationEngine::new(config, self.backends())
    }

    pub fn insert(
        &self,
        server: &Server,
        bytes: &[u8],
        name: Option<&str>,
        mime_type: Option<&str>,
    ) -> BlobRecord {
        self.network.insert(server, bytes, name, mime_type)
    }

    pub fn contains(&self, server: &ServerUrl, hash: &Sha256) -> bool {
        self.network.contains(server, hash)
    }

    /// Current listing of the server.
    pub fn snapshot(&self, server: &Server) -> ServerSnapshot {
        ServerSnapshot::ready(server.clone(), self.network.blobs(&server.url))
    }

    /// Current listings of all servers.
    pub fn input(&self, servers: &[Server]) -> SyncInput {
        SyncInput::new(servers.iter().map(|server| self.snapshot(server)).collect())
    }

    /// Calls of this operation over all backends.
    pub fn total_calls(&self, operation: Operation) -> usize {
        [&self.blossom, &self.nip96, &self.satellite]
            .into_iter()
            .map(|backend| backend.total_calls(operation))
            .sum()
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Signer handing out the same token for every request.
#[derive(Debug)]
pub struct TestSigner;

#[async_trait]
impl Signer for TestSigner {
    async fn sign(&self, _request: AuthRequest<'_>) -> Result<AuthToken, SignerError> {
        Ok(AuthToken::new("test-token"))
    }
}
