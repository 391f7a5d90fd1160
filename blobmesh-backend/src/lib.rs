// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interface to the storage servers blobs are replicated between.
//!
//! Every server kind (Blossom, NIP-96, Satellite) gets one [`BlobBackend`] implementation which
//! is registered once in [`Backends`]. The replication engine never looks at wire formats, it
//! only sees [`BlobRecord`](blobmesh_core::BlobRecord)s, byte streams and [`BackendError`]s
//! carrying the HTTP status the server answered with.
mod error;
#[cfg(any(test, feature = "test_utils"))]
pub mod memory;
mod registry;
mod signer;
mod snapshot;
mod stream;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
mod traits;

pub use error::BackendError;
pub use registry::Backends;
pub use signer::{AuthAction, AuthRequest, AuthToken, Signer, SignerError};
pub use snapshot::{ServerSnapshot, SnapshotStatus, fetch_snapshots};
pub use stream::{BlobStream, ByteStream, Progress, StreamUpload, track_progress};
pub use traits::BlobBackend;
