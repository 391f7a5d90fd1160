// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use blobmesh_core::{Server, ServerKind};

use crate::traits::BlobBackend;

/// Backend implementations by server kind.
///
/// Backends are registered once on startup, afterwards every server is served by the backend of
/// its kind.
#[derive(Clone, Default)]
pub struct Backends {
    backends: BTreeMap<ServerKind, Arc<dyn BlobBackend>>,
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the backend for a server kind, replacing any previous one.
    pub fn register(&mut self, kind: ServerKind, backend: Arc<dyn BlobBackend>) -> &mut Self {
        self.backends.insert(kind, backend);
        self
    }

    pub fn with(mut self, kind: ServerKind, backend: Arc<dyn BlobBackend>) -> Self {
        self.register(kind, backend);
        self
    }

    pub fn get(&self, kind: ServerKind) -> Option<Arc<dyn BlobBackend>> {
        self.backends.get(&kind).cloned()
    }

    pub fn for_server(&self, server: &Server) -> Option<Arc<dyn BlobBackend>> {
        self.get(server.kind)
    }

    pub fn supports(&self, kind: ServerKind) -> bool {
        self.backends.contains_key(&kind)
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("kinds", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}
