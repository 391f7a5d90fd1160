// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data types shared by all `blobmesh` crates.
//!
//! Blobs are addressed by the SHA-256 digest of their content, so the same file stored on
//! different servers always carries the same [`Sha256`]. Servers are identified by their
//! normalized [`ServerUrl`].
pub mod blob;
pub mod hash;
pub mod server;

pub use blob::BlobRecord;
pub use hash::{HASH_LEN, HashError, Sha256};
pub use server::{Server, ServerKind, ServerUrl, ServerUrlError};
