// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use blobmesh_backend::{Backends, Signer};
use blobmesh_core::ServerUrl;
use tracing::debug;

use crate::config::Config;
use crate::state::TransferStateStore;
use crate::tables::{CooldownReason, ReplicationKey, Tables};

/// Shared state of all replications: backends, signer, cooldowns, in-flight replications, learned
/// server capabilities and progress records.
///
/// The engine is cheap to clone, the background sync loop and user-requested transfers each hold
/// a clone and coordinate through it.
#[derive(Clone)]
pub struct ReplicationEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    backends: Backends,
    tables: Mutex<Tables>,
    signer: RwLock<Option<Arc<dyn Signer>>>,
    states: TransferStateStore,
}

impl ReplicationEngine {
    pub fn new(config: Config, backends: Backends) -> Self {
        let states = TransferStateStore::new(config.sync_history, config.transfer_history);
        Self {
            inner: Arc::new(Inner {
                config,
                backends,
                tables: Mutex::default(),
                signer: RwLock::default(),
                states,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn backends(&self) -> &Backends {
        &self.inner.backends
    }

    /// Progress records of all replications run through this engine.
    pub fn states(&self) -> &TransferStateStore {
        &self.inner.states
    }

    /// Install or remove the signer used for servers requiring authentication.
    ///
    /// Installing a signer forgets which servers rejected us earlier. Authentication cooldowns are
    /// only dropped as well if `reset_auth_cooldowns_on_signer` is enabled.
    pub fn set_signer(&self, signer: Option<Arc<dyn Signer>>) {
        let installed = signer.is_some();
        *self
            .inner
            .signer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = signer;

        if installed {
            let mut tables = self.tables();
            let targets = tables.clear_unauthorized();
            let cooldowns = if self.inner.config.reset_auth_cooldowns_on_signer {
                tables.clear_auth_cooldowns()
            } else {
                0
            };
            debug!(targets, cooldowns, "signer installed");
        } else {
            debug!("signer removed");
        }
    }

    pub fn signer(&self) -> Option<Arc<dyn Signer>> {
        self.inner
            .signer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_signer(&self) -> bool {
        self.inner
            .signer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn is_cooling_down(&self, key: &ReplicationKey) -> bool {
        self.tables().is_cooling_down(key)
    }

    pub fn cooldown_remaining(&self, key: &ReplicationKey) -> Option<Duration> {
        self.tables().cooldown_remaining(key)
    }

    /// Outcome which put the pair on cooldown, `None` if it isn't cooling down.
    pub fn cooldown_reason(&self, key: &ReplicationKey) -> Option<CooldownReason> {
        self.tables().cooldown_reason(key)
    }

    pub fn is_in_flight(&self, key: &ReplicationKey) -> bool {
        self.tables().is_in_flight(key)
    }

    /// Number of replications currently running.
    pub fn in_flight(&self) -> usize {
        self.tables().in_flight_len()
    }

    /// Target answered a mirror request with 404 or 405 before.
    pub fn is_mirror_unsupported(&self, target: &ServerUrl) -> bool {
        self.tables().is_mirror_unsupported(target)
    }

    /// Target rejected our credentials and no signer got installed since.
    pub fn is_unauthorized(&self, target: &ServerUrl) -> bool {
        self.tables().is_unauthorized(target)
    }

    pub fn prune_cooldowns(&self) {
        self.tables().prune_cooldowns();
    }

    pub(crate) fn tables(&self) -> MutexGuard<'_, Tables> {
        // Critical sections never panic halfway through an update.
        self.inner
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the pair as in-flight until the returned guard is dropped.
    pub(crate) fn begin(&self, key: &ReplicationKey) -> Option<InFlightGuard> {
        if self.tables().try_begin(key) {
            Some(InFlightGuard {
                engine: self.clone(),
                key: key.clone(),
            })
        } else {
            None
        }
    }
}

impl fmt::Debug for ReplicationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationEngine")
            .field("config", &self.inner.config)
            .field("backends", &self.inner.backends)
            .field("has_signer", &self.has_signer())
            .finish_non_exhaustive()
    }
}

/// Releases the in-flight mark of a replication, also when its future gets dropped.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    engine: ReplicationEngine,
    key: ReplicationKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.engine.tables().finish(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use blobmesh_backend::Backends;
    use blobmesh_core::{ServerUrl, Sha256};

    use crate::config::Config;
    use crate::tables::{CooldownReason, ReplicationKey};
    use crate::test_utils::TestSigner;

    use super::ReplicationEngine;

    fn key() -> ReplicationKey {
        ReplicationKey::new(
            ServerUrl::new("https://b.example.com").unwrap(),
            Sha256::new(b"one"),
        )
    }

    #[test]
    fn in_flight_guard_releases_on_drop() {
        let engine = ReplicationEngine::new(Config::default(), Backends::new());
        let guard = engine.begin(&key()).unwrap();
        assert!(engine.is_in_flight(&key()));
        assert!(engine.begin(&key()).is_none());

        drop(guard);
        assert!(!engine.is_in_flight(&key()));
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn signer_clears_unauthorized_targets() {
        let engine = ReplicationEngine::new(Config::default(), Backends::new());
        let key = key();
        {
            let mut tables = engine.tables();
            tables.mark_unauthorized(&key.target);
            tables.set_cooldown(key.clone(), Duration::from_secs(60), CooldownReason::Unauthorized);
        }

        engine.set_signer(Some(Arc::new(TestSigner)));
        assert!(engine.has_signer());
        assert!(!engine.is_unauthorized(&key.target));
        // Cooldown is waited out by default.
        assert!(engine.is_cooling_down(&key));

        engine.set_signer(None);
        assert!(!engine.has_signer());
    }

    #[test]
    fn signer_can_reset_auth_cooldowns() {
        let config = Config {
            reset_auth_cooldowns_on_signer: true,
            ..Config::default()
        };
        let engine = ReplicationEngine::new(config, Backends::new());
        let key = key();
        engine
            .tables()
            .set_cooldown(key.clone(), Duration::from_secs(60), CooldownReason::Unauthorized);

        engine.set_signer(Some(Arc::new(TestSigner)));
        assert!(!engine.is_cooling_down(&key));
    }
}
