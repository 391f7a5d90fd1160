// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory storage servers for tests.
//!
//! A [`MemoryNetwork`] holds the blobs of any number of servers. [`MemoryBackend`]s of different
//! kinds can share one network, so a blob mirrored or uploaded by one backend is visible to all of
//! them, just like public URLs on the internet. Failures can be scripted per server and operation
//! and every call is counted.
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use blobmesh_core::{BlobRecord, Server, ServerKind, ServerUrl, Sha256};
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use tokio::sync::Notify;
use tracing::trace;

use crate::error::BackendError;
use crate::signer::Signer;
use crate::stream::{BlobStream, Progress, StreamUpload, track_progress};
use crate::traits::BlobBackend;

const DEFAULT_CHUNK_SIZE: usize = 1024;

#[derive(Clone, Debug)]
pub struct StoredBlob {
    pub record: BlobRecord,
    pub bytes: Bytes,
}

/// Blobs of all in-memory servers, addressable by their public URL.
#[derive(Clone, Debug, Default)]
pub struct MemoryNetwork {
    servers: Arc<Mutex<HashMap<ServerUrl, BTreeMap<Sha256, StoredBlob>>>>,
}

impl MemoryNetwork {
    /// Store a blob on a server and return its record.
    pub fn insert(
        &self,
        server: &Server,
        bytes: &[u8],
        name: Option<&str>,
        mime_type: Option<&str>,
    ) -> BlobRecord {
        let hash = Sha256::new(bytes);
        let record = BlobRecord {
            sha256: hash,
            size: Some(bytes.len() as u64),
            name: name.map(str::to_owned),
            mime_type: mime_type.map(str::to_owned),
            url: Some(server.url.join(&hash.to_hex())),
            uploaded_at: None,
        };
        self.store(&server.url, record.clone(), Bytes::copy_from_slice(bytes));
        record
    }

    fn store(&self, server: &ServerUrl, record: BlobRecord, bytes: Bytes) {
        let mut servers = self.servers.lock().unwrap();
        servers
            .entry(server.clone())
            .or_default()
            .insert(record.sha256, StoredBlob { record, bytes });
    }

    pub fn blobs(&self, server: &ServerUrl) -> Vec<BlobRecord> {
        let servers = self.servers.lock().unwrap();
        servers
            .get(server)
            .map(|blobs| blobs.values().map(|blob| blob.record.clone()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, server: &ServerUrl, hash: &Sha256) -> bool {
        self.get(server, hash).is_some()
    }

    pub fn get(&self, server: &ServerUrl, hash: &Sha256) -> Option<StoredBlob> {
        let servers = self.servers.lock().unwrap();
        servers.get(server)?.get(hash).cloned()
    }

    pub fn remove(&self, server: &ServerUrl, hash: &Sha256) -> bool {
        let mut servers = self.servers.lock().unwrap();
        servers
            .get_mut(server)
            .is_some_and(|blobs| blobs.remove(hash).is_some())
    }

    /// Look up a blob by its public URL.
    pub fn resolve(&self, url: &str) -> Option<StoredBlob> {
        let servers = self.servers.lock().unwrap();
        servers
            .values()
            .flat_map(|blobs| blobs.values())
            .find(|blob| blob.record.url.as_deref() == Some(url))
            .cloned()
    }
}

/// Backend operations which can be counted and made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Mirror,
    Upload,
    Delete,
    Read,
}

#[derive(Debug, Default)]
struct BackendState {
    next_failures: HashMap<(ServerUrl, Operation), VecDeque<u16>>,
    failures: HashMap<(ServerUrl, Operation), u16>,
    calls: HashMap<(ServerUrl, Operation), usize>,
    protected: HashSet<ServerUrl>,
    gate: Option<Arc<Notify>>,
}

#[derive(Clone, Debug)]
pub struct MemoryBackend {
    kind: ServerKind,
    network: MemoryNetwork,
    mirror: bool,
    chunk_size: usize,
    state: Arc<Mutex<BackendState>>,
}

impl MemoryBackend {
    /// Backend for servers of the given kind. Only Blossom backends support mirroring by default.
    pub fn new(kind: ServerKind, network: MemoryNetwork) -> Self {
        Self {
            kind,
            network,
            mirror: kind == ServerKind::Blossom,
            chunk_size: DEFAULT_CHUNK_SIZE,
            state: Arc::default(),
        }
    }

    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn kind(&self) -> ServerKind {
        self.kind
    }

    /// Fail the next call of this operation against the server with the given status.
    pub fn fail_next(&self, server: &ServerUrl, operation: Operation, status: u16) {
        let mut state = self.state.lock().unwrap();
        state
            .next_failures
            .entry((server.clone(), operation))
            .or_default()
            .push_back(status);
    }

    /// Fail every call of this operation against the server with the given status.
    pub fn fail_always(&self, server: &ServerUrl, operation: Operation, status: u16) {
        let mut state = self.state.lock().unwrap();
        state.failures.insert((server.clone(), operation), status);
    }

    /// Answer every call against the server with 401 unless a signer is passed along.
    pub fn require_signer(&self, server: &ServerUrl) {
        let mut state = self.state.lock().unwrap();
        state.protected.insert(server.clone());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.next_failures.clear();
        state.failures.clear();
    }

    /// Number of calls of this operation made against the server, failed ones included.
    pub fn calls(&self, server: &ServerUrl, operation: Operation) -> usize {
        let state = self.state.lock().unwrap();
        state
            .calls
            .get(&(server.clone(), operation))
            .copied()
            .unwrap_or_default()
    }

    /// Number of calls of this operation against any server.
    pub fn total_calls(&self, operation: Operation) -> usize {
        let state = self.state.lock().unwrap();
        state
            .calls
            .iter()
            .filter(|((_, op), _)| *op == operation)
            .map(|(_, count)| count)
            .sum()
    }

    /// Hold every mirror and upload call until the gate gets notified.
    pub fn set_gate(&self, gate: Option<Arc<Notify>>) {
        let mut state = self.state.lock().unwrap();
        state.gate = gate;
    }

    fn call(
        &self,
        server: &ServerUrl,
        operation: Operation,
        signer: Option<&dyn Signer>,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        let key = (server.clone(), operation);
        *state.calls.entry(key.clone()).or_default() += 1;
        trace!(%server, ?operation, signed = signer.is_some(), "memory backend call");

        if signer.is_none() && state.protected.contains(server) {
            return Err(BackendError::status(401, "missing authorization"));
        }

        let scripted = state
            .next_failures
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        let status = scripted.or(state.failures.get(&key).copied());

        match status {
            Some(status) => Err(BackendError::status(status, format!("{operation:?} failed"))),
            None => Ok(()),
        }
    }

    async fn wait_for_gate(&self) {
        let gate = self.state.lock().unwrap().gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn list(
        &self,
        server: &Server,
        _owner: &str,
        signer: Option<&dyn Signer>,
    ) -> Result<Vec<BlobRecord>, BackendError> {
        self.call(&server.url, Operation::List, signer)?;
        Ok(self.network.blobs(&server.url))
    }

    fn supports_mirror(&self) -> bool {
        self.mirror
    }

    async fn mirror(
        &self,
        server: &Server,
        source_url: &str,
        hash: &Sha256,
        signer: Option<&dyn Signer>,
    ) -> Result<BlobRecord, BackendError> {
        if !self.mirror {
            return Err(BackendError::MirrorNotSupported(server.kind));
        }

        self.call(&server.url, Operation::Mirror, signer)?;
        self.wait_for_gate().await;

        let source = self
            .network
            .resolve(source_url)
            .ok_or_else(|| BackendError::status(502, "could not fetch source url"))?;
        if &source.record.sha256 != hash {
            return Err(BackendError::status(409, "hash mismatch"));
        }

        let record = BlobRecord {
            url: Some(server.url.join(&hash.to_hex())),
            ..source.record
        };
        self.network.store(&server.url, record.clone(), source.bytes);
        Ok(record)
    }

    async fn upload_stream(
        &self,
        server: &Server,
        upload: StreamUpload,
        signer: Option<&dyn Signer>,
        progress: Progress,
    ) -> Result<BlobRecord, BackendError> {
        self.call(&server.url, Operation::Upload, signer)?;
        self.wait_for_gate().await;

        let total = upload.stream.size.or(upload.size);
        let mut stream = track_progress(upload.stream.stream, total, progress);
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }

        if Sha256::new(&data) != upload.sha256 {
            return Err(BackendError::status(400, "hash mismatch"));
        }

        let record = BlobRecord {
            sha256: upload.sha256,
            size: Some(data.len() as u64),
            name: Some(upload.file_name),
            mime_type: Some(upload.content_type),
            url: Some(server.url.join(&upload.sha256.to_hex())),
            uploaded_at: None,
        };
        self.network
            .store(&server.url, record.clone(), Bytes::from(data));
        Ok(record)
    }

    async fn delete(
        &self,
        server: &Server,
        hash: &Sha256,
        signer: Option<&dyn Signer>,
    ) -> Result<(), BackendError> {
        self.call(&server.url, Operation::Delete, signer)?;
        if self.network.remove(&server.url, hash) {
            Ok(())
        } else {
            Err(BackendError::status(404, "blob not found"))
        }
    }

    async fn read_stream(
        &self,
        server: &Server,
        record: &BlobRecord,
        signer: Option<&dyn Signer>,
    ) -> Result<BlobStream, BackendError> {
        self.call(&server.url, Operation::Read, signer)?;
        let blob = self
            .network
            .get(&server.url, &record.sha256)
            .ok_or_else(|| BackendError::status(404, "blob not found"))?;

        let size = blob.bytes.len();
        let chunks: Vec<io::Result<Bytes>> = (0..size)
            .step_by(self.chunk_size)
            .map(|start| Ok(blob.bytes.slice(start..(start + self.chunk_size).min(size))))
            .collect();

        Ok(BlobStream::new(stream::iter(chunks).boxed())
            .with_size(Some(size as u64))
            .with_content_type(blob.record.mime_type.clone()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use blobmesh_core::{ServerKind, Sha256};

    use crate::error::BackendError;
    use crate::signer::{AuthRequest, AuthToken, Signer, SignerError};
    use crate::stream::{Progress, StreamUpload};
    use crate::test_utils::server;
    use crate::traits::BlobBackend;

    use super::{MemoryBackend, MemoryNetwork, Operation};

    #[tokio::test]
    async fn mirror_between_servers() {
        let network = MemoryNetwork::default();
        let backend = MemoryBackend::new(ServerKind::Blossom, network.clone());
        let a = server("https://a.example.com", ServerKind::Blossom);
        let b = server("https://b.example.com", ServerKind::Blossom);

        let record = network.insert(&a, b"picture", Some("cat.png"), Some("image/png"));
        let mirrored = backend
            .mirror(&b, record.url.as_deref().unwrap(), &record.sha256, None)
            .await
            .unwrap();

        assert_eq!(mirrored.sha256, record.sha256);
        assert_eq!(mirrored.name.as_deref(), Some("cat.png"));
        assert!(network.contains(&b.url, &record.sha256));
        assert_eq!(backend.calls(&b.url, Operation::Mirror), 1);
    }

    #[tokio::test]
    async fn stream_between_servers() {
        let network = MemoryNetwork::default();
        let backend = MemoryBackend::new(ServerKind::Nip96, network.clone()).with_chunk_size(3);
        let a = server("https://a.example.com", ServerKind::Nip96);
        let b = server("https://b.example.com", ServerKind::Nip96);
        let record = network.insert(&a, b"0123456789", Some("digits.txt"), None);

        assert_matches!(
            backend.mirror(&b, "https://a.example.com/x", &record.sha256, None).await,
            Err(BackendError::MirrorNotSupported(ServerKind::Nip96))
        );

        let stream = backend.read_stream(&a, &record, None).await.unwrap();
        assert_eq!(stream.size, Some(10));

        let upload = StreamUpload {
            sha256: record.sha256,
            stream,
            file_name: "digits.txt".into(),
            content_type: "text/plain".into(),
            size: record.size,
        };
        let uploaded = backend
            .upload_stream(&b, upload, None, Progress::noop())
            .await
            .unwrap();
        assert_eq!(uploaded.size, Some(10));
        assert!(network.contains(&b.url, &Sha256::new(b"0123456789")));
    }

    #[tokio::test]
    async fn scripted_failures() {
        let network = MemoryNetwork::default();
        let backend = MemoryBackend::new(ServerKind::Blossom, network.clone());
        let a = server("https://a.example.com", ServerKind::Blossom);

        backend.fail_next(&a.url, Operation::List, 401);
        assert_matches!(
            backend.list(&a, "owner", None).await,
            Err(BackendError::Status { status: 401, .. })
        );
        assert!(backend.list(&a, "owner", None).await.is_ok());

        backend.fail_always(&a.url, Operation::Delete, 503);
        for _ in 0..2 {
            assert_matches!(
                backend.delete(&a, &Sha256::new(b"x"), None).await,
                Err(BackendError::Status { status: 503, .. })
            );
        }
        assert_eq!(backend.calls(&a.url, Operation::List), 2);
        assert_eq!(backend.total_calls(Operation::Delete), 2);
    }

    #[derive(Debug)]
    struct StaticSigner;

    #[async_trait::async_trait]
    impl Signer for StaticSigner {
        async fn sign(&self, _request: AuthRequest<'_>) -> Result<AuthToken, SignerError> {
            Ok(AuthToken::new("token"))
        }
    }

    #[tokio::test]
    async fn protected_server_needs_signer() {
        let network = MemoryNetwork::default();
        let backend = MemoryBackend::new(ServerKind::Blossom, network.clone());
        let a = server("https://a.example.com", ServerKind::Blossom);
        let record = network.insert(&a, b"private", None, None);
        backend.require_signer(&a.url);

        assert_matches!(
            backend.read_stream(&a, &record, None).await,
            Err(BackendError::Status { status: 401, .. })
        );
        assert!(backend.read_stream(&a, &record, Some(&StaticSigner)).await.is_ok());
        assert_eq!(backend.list(&a, "owner", Some(&StaticSigner)).await.unwrap().len(), 1);
    }
}
