// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use blobmesh_backend::BackendError;
use blobmesh_core::{ServerKind, ServerUrl};
use thiserror::Error;

use crate::config::Config;
use crate::state::TransferKind;
use crate::tables::{CooldownReason, ReplicationKey};

/// Failure of a single replication of one blob to one target server.
///
/// None of these errors are fatal, they end up as a failed transfer state and a cooldown for the
/// affected pair.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Target rejected our credentials or we have none to offer.
    #[error("{target} requires authentication")]
    AuthRequired { target: ServerUrl },

    /// Target refused the upload with 404 or 405.
    #[error("{target} does not accept uploads: {source}")]
    ProtocolUnsupported {
        target: ServerUrl,
        /// Target also refused to mirror earlier.
        mirror_blocked: bool,
        source: BackendError,
    },

    /// Server error, rate limit or network failure.
    #[error("replication to {target} failed: {source}")]
    Transient {
        target: ServerUrl,
        source: BackendError,
    },

    /// Blob could not be read from the server holding it.
    #[error("blob could not be read from {source_server}: {source}")]
    SourceUnavailable {
        source_server: ServerUrl,
        source: BackendError,
    },

    #[error("replication {key} is already in progress")]
    InFlight { key: ReplicationKey },

    #[error("no backend registered for {0} servers")]
    NoBackend(ServerKind),
}

impl ReplicationError {
    /// Reason recorded with the cooldown this error causes, `None` if it causes none.
    pub fn reason(&self) -> Option<CooldownReason> {
        match self {
            ReplicationError::AuthRequired { .. } => Some(CooldownReason::Unauthorized),
            ReplicationError::ProtocolUnsupported { .. } => Some(CooldownReason::Unsupported),
            ReplicationError::Transient { .. } => Some(CooldownReason::Transient),
            ReplicationError::SourceUnavailable { .. } => Some(CooldownReason::SourceUnavailable),
            ReplicationError::InFlight { .. } | ReplicationError::NoBackend(_) => None,
        }
    }

    /// How long the failed pair is not attempted again.
    pub fn cooldown(&self, config: &Config) -> Option<Duration> {
        let duration = match self.reason()? {
            CooldownReason::Success => config.success_cooldown,
            CooldownReason::Transient => config.transient_cooldown,
            CooldownReason::Unsupported => config.unsupported_cooldown,
            CooldownReason::Unauthorized => config.auth_cooldown,
            CooldownReason::SourceUnavailable => config.source_unavailable_cooldown,
        };
        Some(duration)
    }

    /// Short message shown next to the failed transfer.
    pub fn message(&self, kind: TransferKind) -> String {
        let label = kind.label();
        match self {
            ReplicationError::AuthRequired { .. } => format!("{label} auth failed"),
            ReplicationError::ProtocolUnsupported {
                mirror_blocked: true,
                ..
            } => format!("{label} unsupported: target blocks mirroring"),
            ReplicationError::ProtocolUnsupported { .. } => {
                format!("{label} unsupported: target rejects uploads")
            }
            ReplicationError::Transient { source, .. } => format!("{label} failed: {source}"),
            ReplicationError::SourceUnavailable { .. } => {
                format!("{label} failed: source unavailable")
            }
            ReplicationError::InFlight { .. } => format!("{label} already in progress"),
            ReplicationError::NoBackend(kind) => {
                format!("{label} failed: no backend for {kind} servers")
            }
        }
    }
}

/// How a backend error is treated by the replication engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Classification {
    /// 404 or 405.
    Unsupported,
    /// 401.
    Unauthorized,
    Other,
}

impl Classification {
    pub fn of(err: &BackendError) -> Self {
        match err.http_status() {
            Some(404 | 405) => Classification::Unsupported,
            Some(401) => Classification::Unauthorized,
            _ => Classification::Other,
        }
    }
}

/// Refusal to start a user-requested transfer.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("no destination servers selected")]
    NoDestinations,

    #[error("no blobs selected")]
    EmptySelection,

    #[error("{server} requires authentication but no signer is available")]
    AuthRequired { server: ServerUrl },
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use blobmesh_backend::BackendError;
    use blobmesh_core::ServerUrl;

    use crate::config::Config;
    use crate::state::TransferKind;
    use crate::tables::CooldownReason;

    use super::{Classification, ReplicationError};

    fn target() -> ServerUrl {
        ServerUrl::new("https://b.example.com").unwrap()
    }

    #[test]
    fn classify_by_status() {
        assert_eq!(
            Classification::of(&BackendError::status(404, "not found")),
            Classification::Unsupported
        );
        assert_eq!(
            Classification::of(&BackendError::status(405, "not allowed")),
            Classification::Unsupported
        );
        assert_eq!(
            Classification::of(&BackendError::status(401, "unauthorized")),
            Classification::Unauthorized
        );
        assert_eq!(
            Classification::of(&BackendError::status(429, "slow down")),
            Classification::Other
        );
        assert_eq!(
            Classification::of(&BackendError::Network("reset".into())),
            Classification::Other
        );
    }

    #[test]
    fn cooldowns_per_failure() {
        let config = Config::default();

        let auth = ReplicationError::AuthRequired { target: target() };
        assert_eq!(auth.reason(), Some(CooldownReason::Unauthorized));
        assert_eq!(auth.cooldown(&config), Some(Duration::from_secs(30 * 60)));

        let transient = ReplicationError::Transient {
            target: target(),
            source: BackendError::status(503, "unavailable"),
        };
        assert_eq!(transient.cooldown(&config), Some(Duration::from_secs(15 * 60)));

        let busy = ReplicationError::NoBackend(blobmesh_core::ServerKind::Satellite);
        assert_eq!(busy.cooldown(&config), None);
    }

    #[test]
    fn user_facing_messages() {
        let blocked = ReplicationError::ProtocolUnsupported {
            target: target(),
            mirror_blocked: true,
            source: BackendError::status(405, "not allowed"),
        };
        assert_eq!(
            blocked.message(TransferKind::Sync),
            "Sync unsupported: target blocks mirroring"
        );

        let auth = ReplicationError::AuthRequired { target: target() };
        assert_eq!(auth.message(TransferKind::Transfer), "Transfer auth failed");
    }
}
