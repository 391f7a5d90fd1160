// SPDX-License-Identifier: MIT OR Apache-2.0

use blobmesh_core::{Server, ServerKind, ServerUrl};

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Server without sync and authentication.
pub fn server(url: &str, kind: ServerKind) -> Server {
    let url = ServerUrl::new(url).expect("valid server url");
    let name = url.as_str().trim_start_matches("https://").to_owned();
    Server::new(url, name, kind)
}

/// Server with sync enabled.
pub fn sync_server(url: &str, kind: ServerKind) -> Server {
    server(url, kind).with_sync(true)
}
