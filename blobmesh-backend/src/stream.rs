// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::io;
use std::sync::Arc;

use blobmesh_core::Sha256;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Readable content of a blob together with what the server told us about it.
pub struct BlobStream {
    pub stream: ByteStream,
    /// Size reported by the server (for example via `Content-Length`).
    pub size: Option<u64>,
    pub content_type: Option<String>,
}

impl BlobStream {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            size: None,
            content_type: None,
        }
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }
}

impl fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStream")
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Blob content to be uploaded to a server.
#[derive(Debug)]
pub struct StreamUpload {
    pub sha256: Sha256,
    pub stream: BlobStream,
    pub file_name: String,
    pub content_type: String,
    /// Expected size in bytes, if known.
    pub size: Option<u64>,
}

/// Callback receiving `(loaded, total)` byte counts while an upload is running.
#[derive(Clone)]
pub struct Progress(Arc<dyn Fn(u64, Option<u64>) + Send + Sync>);

impl Progress {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    /// Callback which ignores all reports.
    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    pub fn report(&self, loaded: u64, total: Option<u64>) {
        (self.0)(loaded, total)
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Progress(..)")
    }
}

/// Wrap a byte stream so every chunk passing through it reports the number of bytes read so far.
pub fn track_progress(stream: ByteStream, total: Option<u64>, progress: Progress) -> ByteStream {
    let mut loaded = 0u64;
    stream
        .map(move |chunk| {
            if let Ok(bytes) = &chunk {
                loaded += bytes.len() as u64;
                progress.report(loaded, total);
            }
            chunk
        })
        .boxed()
}
