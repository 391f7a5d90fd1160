// SPDX-License-Identifier: MIT OR Apache-2.0

//! Replicate one blob to one server, mirror first and stream the bytes over if that fails.
use std::sync::Arc;

use blobmesh_backend::{BlobBackend, Progress, Signer, StreamUpload};
use blobmesh_core::{BlobRecord, Server};
use tracing::{debug, trace, warn};

use crate::engine::ReplicationEngine;
use crate::error::{Classification, ReplicationError};
use crate::state::{TransferKind, TransferState};
use crate::tables::{CooldownReason, ReplicationKey};

/// Copy the blob described by `record` from `source` to `target`.
#[derive(Clone, Debug)]
pub struct ReplicationRequest {
    pub target: Server,
    pub record: BlobRecord,
    pub source: Server,
    pub kind: TransferKind,
}

impl ReplicationRequest {
    pub fn key(&self) -> ReplicationKey {
        ReplicationKey::new(self.target.url.clone(), self.record.sha256)
    }
}

impl ReplicationEngine {
    /// Replicate a blob to the target server.
    ///
    /// Targets able to mirror are asked to fetch the blob from its public URL. Targets refusing
    /// that with 404 or 405 are remembered and from then on receive the bytes streamed through
    /// this process, like all other targets.
    ///
    /// Every attempt records a transfer state and puts the pair on cooldown, only replications
    /// refused because the pair is already in flight leave no trace.
    pub async fn replicate(
        &self,
        request: ReplicationRequest,
    ) -> Result<BlobRecord, ReplicationError> {
        let key = request.key();
        let Some(_guard) = self.begin(&key) else {
            trace!(%key, "replication already in flight");
            return Err(ReplicationError::InFlight { key });
        };

        let kind = request.kind;
        let state = TransferState::uploading(
            kind,
            &request.target.url,
            request.record.sha256,
            request.record.display_name(),
            request.record.size.unwrap_or_default(),
        );
        let id = state.id.clone();
        self.states().upsert(state.clone());
        debug!(%key, %kind, source = %request.source.url, "replication started");

        let result = self.attempt(&request, &id).await;

        // Pick up the latest progress, the state might have been evicted in the meantime.
        let mut current = self.states().get(kind, &id).unwrap_or(state);
        match &result {
            Ok(uploaded) => {
                self.tables().set_cooldown(
                    key.clone(),
                    self.config().success_cooldown,
                    CooldownReason::Success,
                );
                if current.total == 0 {
                    current.total = uploaded.size.or(request.record.size).unwrap_or_default();
                }
                self.states().upsert(current.succeed(None));
                debug!(%key, %kind, "replication finished");
            }
            Err(err) => {
                if let (Some(reason), Some(cooldown)) = (err.reason(), err.cooldown(self.config()))
                {
                    self.tables().set_cooldown(key.clone(), cooldown, reason);
                }
                self.states().upsert(current.fail(err.message(kind)));
                warn!(%key, %kind, "replication failed: {err}");
            }
        }

        result
    }

    async fn attempt(
        &self,
        request: &ReplicationRequest,
        id: &str,
    ) -> Result<BlobRecord, ReplicationError> {
        let target = &request.target;
        let backend = self
            .backends()
            .for_server(target)
            .ok_or(ReplicationError::NoBackend(target.kind))?;

        let signer = self.signer();
        if signer.is_none() && self.is_unauthorized(&target.url) {
            return Err(ReplicationError::AuthRequired {
                target: target.url.clone(),
            });
        }

        let mut mirror_blocked = self.is_mirror_unsupported(&target.url);
        if backend.supports_mirror() && !mirror_blocked {
            if let Some(source_url) = request.record.url.as_deref() {
                let hash = &request.record.sha256;
                match backend
                    .mirror(target, source_url, hash, signer.as_deref())
                    .await
                {
                    Ok(record) => {
                        debug!(server = %target.url, hash = %hash.short(), "blob mirrored");
                        return Ok(record);
                    }
                    Err(err) => match Classification::of(&err) {
                        Classification::Unsupported => {
                            self.tables().mark_mirror_unsupported(&target.url);
                            mirror_blocked = true;
                            debug!(server = %target.url, "mirror refused, falling back to upload: {err}");
                        }
                        Classification::Unauthorized => {
                            self.tables().mark_unauthorized(&target.url);
                            return Err(ReplicationError::AuthRequired {
                                target: target.url.clone(),
                            });
                        }
                        Classification::Other => {
                            return Err(ReplicationError::Transient {
                                target: target.url.clone(),
                                source: err,
                            });
                        }
                    },
                }
            }
        }

        self.stream_upload(request, id, backend, signer, mirror_blocked)
            .await
    }

    async fn stream_upload(
        &self,
        request: &ReplicationRequest,
        id: &str,
        backend: Arc<dyn BlobBackend>,
        signer: Option<Arc<dyn Signer>>,
        mirror_blocked: bool,
    ) -> Result<BlobRecord, ReplicationError> {
        let ReplicationRequest {
            target,
            record,
            source,
            kind,
        } = request;

        let source_backend = self
            .backends()
            .for_server(source)
            .ok_or(ReplicationError::NoBackend(source.kind))?;
        let source_signer = if source.requires_auth {
            signer.as_deref()
        } else {
            None
        };
        let stream = source_backend
            .read_stream(source, record, source_signer)
            .await
            .map_err(|err| ReplicationError::SourceUnavailable {
                source_server: source.url.clone(),
                source: err,
            })?;

        let content_type = match record.mime_type.as_deref() {
            Some(mime_type) if !mime_type.trim().is_empty() => mime_type.to_owned(),
            _ => stream
                .content_type
                .clone()
                .unwrap_or_else(|| record.content_type().to_owned()),
        };
        let size = stream.size.or(record.size);

        let progress = {
            let states = self.states().clone();
            let id = id.to_owned();
            let kind = *kind;
            Progress::new(move |loaded, total| {
                states.progress(kind, &id, loaded, total.or(size));
            })
        };

        let upload = StreamUpload {
            sha256: record.sha256,
            stream,
            file_name: record.display_name(),
            content_type,
            size,
        };
        trace!(server = %target.url, hash = %record.sha256.short(), "streaming blob");

        backend
            .upload_stream(target, upload, signer.as_deref(), progress)
            .await
            .map_err(|err| match Classification::of(&err) {
                Classification::Unsupported => {
                    self.tables().mark_mirror_unsupported(&target.url);
                    ReplicationError::ProtocolUnsupported {
                        target: target.url.clone(),
                        mirror_blocked,
                        source: err,
                    }
                }
                Classification::Unauthorized => {
                    self.tables().mark_unauthorized(&target.url);
                    ReplicationError::AuthRequired {
                        target: target.url.clone(),
                    }
                }
                Classification::Other => ReplicationError::Transient {
                    target: target.url.clone(),
                    source: err,
                },
            })
    }
}
