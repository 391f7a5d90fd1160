// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::{self, Debug};

use async_trait::async_trait;
use blobmesh_core::{Server, Sha256};
use thiserror::Error;

/// Operation an authentication token is requested for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthAction {
    List,
    Get,
    Upload,
    Mirror,
    Delete,
}

/// Everything a signer needs to know to authorize one request.
#[derive(Clone, Copy, Debug)]
pub struct AuthRequest<'a> {
    pub action: AuthAction,
    pub server: &'a Server,
    pub hash: Option<&'a Sha256>,
}

/// Opaque, already encoded authorization value (for example a signed Nostr event) which backends
/// attach to their requests.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tokens are credentials, keep them out of logs.
        f.write_str("AuthToken(..)")
    }
}

/// Produces authentication tokens for requests against storage servers.
///
/// How tokens are constructed is up to the application, the replication engine only cares about
/// whether a signer is installed or not.
#[async_trait]
pub trait Signer: Send + Sync + Debug {
    async fn sign(&self, request: AuthRequest<'_>) -> Result<AuthToken, SignerError>;
}

#[derive(Error, Debug)]
pub enum SignerError {
    /// User declined or the signing extension is gone.
    #[error("signing request was rejected: {0}")]
    Rejected(String),

    #[error("signer unavailable")]
    Unavailable,
}
