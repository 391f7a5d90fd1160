// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use blobmesh_core::{BlobRecord, Server, Sha256};

use crate::error::BackendError;
use crate::signer::Signer;
use crate::stream::{BlobStream, Progress, StreamUpload};

/// Client for one kind of storage server.
///
/// The same instance serves all registered servers of its kind, the target server is passed into
/// every call. Signers are handed through so implementations can authorize requests the way their
/// protocol requires; `None` means no credential is available right now.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// List all blobs the given owner has stored on the server.
    async fn list(
        &self,
        server: &Server,
        owner: &str,
        signer: Option<&dyn Signer>,
    ) -> Result<Vec<BlobRecord>, BackendError>;

    /// Returns `true` if servers of this kind can fetch blobs from a public URL themselves.
    fn supports_mirror(&self) -> bool {
        false
    }

    /// Ask the server to download the blob from `source_url` directly.
    async fn mirror(
        &self,
        server: &Server,
        _source_url: &str,
        _hash: &Sha256,
        _signer: Option<&dyn Signer>,
    ) -> Result<BlobRecord, BackendError> {
        Err(BackendError::MirrorNotSupported(server.kind))
    }

    /// Upload blob content to the server, reporting progress while bytes are sent.
    async fn upload_stream(
        &self,
        server: &Server,
        upload: StreamUpload,
        signer: Option<&dyn Signer>,
        progress: Progress,
    ) -> Result<BlobRecord, BackendError>;

    async fn delete(
        &self,
        server: &Server,
        hash: &Sha256,
        signer: Option<&dyn Signer>,
    ) -> Result<(), BackendError>;

    /// Open a stream reading the content of a blob stored on the server.
    async fn read_stream(
        &self,
        server: &Server,
        record: &BlobRecord,
        signer: Option<&dyn Signer>,
    ) -> Result<BlobStream, BackendError>;
}
