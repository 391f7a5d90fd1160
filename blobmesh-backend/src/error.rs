// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io;

use blobmesh_core::{ServerKind, Sha256};
use thiserror::Error;

use crate::signer::SignerError;

/// Failure reported by a storage backend.
///
/// Errors which came from a server response always keep the numeric HTTP status so callers can
/// tell "not supported" (404, 405) apart from "not authorized" (401) and everything else.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Server answered with a non-success HTTP status.
    #[error("server responded with status {status}: {message}")]
    Status { status: u16, message: String },

    /// Server could not be reached or the connection broke.
    #[error("network error: {0}")]
    Network(String),

    /// I/O error while reading or writing a byte stream.
    #[error("input/output error: {0}")]
    Io(#[from] io::Error),

    /// Authentication token could not be created.
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),

    /// Backend for this server kind has no mirror endpoint.
    #[error("mirroring is not supported by {0} servers")]
    MirrorNotSupported(ServerKind),

    /// Blob record carries no URL to read its content from.
    #[error("blob {0} has no url to fetch it from")]
    MissingUrl(Sha256),
}

impl BackendError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// HTTP status code associated with this error, if any.
    ///
    /// A backend without mirror support behaves like a server answering "405 Method Not
    /// Allowed".
    pub fn http_status(&self) -> Option<u16> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            BackendError::MirrorNotSupported(_) => Some(405),
            _ => None,
        }
    }
}
