// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cooldowns, in-flight replications and learned server capabilities.
#[cfg(test)]
use mock_instant::thread_local::Instant;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
#[cfg(not(test))]
use std::time::Instant;

use blobmesh_core::{ServerUrl, Sha256};

/// Replication of one blob to one target server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplicationKey {
    pub target: ServerUrl,
    pub hash: Sha256,
}

impl ReplicationKey {
    pub fn new(target: ServerUrl, hash: Sha256) -> Self {
        Self { target, hash }
    }
}

impl fmt::Display for ReplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.hash.short(), self.target)
    }
}

/// Outcome which caused a cooldown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CooldownReason {
    Success,
    Transient,
    Unsupported,
    Unauthorized,
    SourceUnavailable,
}

#[derive(Clone, Copy, Debug)]
struct Cooldown {
    until: Instant,
    reason: CooldownReason,
}

#[derive(Debug, Default)]
pub(crate) struct Tables {
    cooldowns: HashMap<ReplicationKey, Cooldown>,
    in_flight: HashSet<ReplicationKey>,
    unsupported_mirror: HashSet<ServerUrl>,
    unauthorized: HashSet<ServerUrl>,
}

impl Tables {
    pub fn set_cooldown(&mut self, key: ReplicationKey, duration: Duration, reason: CooldownReason) {
        let until = Instant::now() + duration;
        self.cooldowns.insert(key, Cooldown { until, reason });
    }

    /// Time left until the pair may be attempted again, `None` if it may run right away.
    pub fn cooldown_remaining(&self, key: &ReplicationKey) -> Option<Duration> {
        let cooldown = self.cooldowns.get(key)?;
        let now = Instant::now();
        if now < cooldown.until {
            Some(cooldown.until - now)
        } else {
            None
        }
    }

    pub fn cooldown_reason(&self, key: &ReplicationKey) -> Option<CooldownReason> {
        self.cooldown_remaining(key)?;
        self.cooldowns.get(key).map(|cooldown| cooldown.reason)
    }

    pub fn is_cooling_down(&self, key: &ReplicationKey) -> bool {
        self.cooldown_remaining(key).is_some()
    }

    /// Remove all cooldowns which ran out already.
    pub fn prune_cooldowns(&mut self) {
        let now = Instant::now();
        self.cooldowns.retain(|_, cooldown| now < cooldown.until);
    }

    /// Remove cooldowns caused by rejected credentials.
    pub fn clear_auth_cooldowns(&mut self) -> usize {
        let before = self.cooldowns.len();
        self.cooldowns
            .retain(|_, cooldown| cooldown.reason != CooldownReason::Unauthorized);
        before - self.cooldowns.len()
    }

    /// Mark the pair as in-flight. Returns `false` if it already was.
    pub fn try_begin(&mut self, key: &ReplicationKey) -> bool {
        self.in_flight.insert(key.clone())
    }

    pub fn finish(&mut self, key: &ReplicationKey) {
        self.in_flight.remove(key);
    }

    pub fn is_in_flight(&self, key: &ReplicationKey) -> bool {
        self.in_flight.contains(key)
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn mark_mirror_unsupported(&mut self, target: &ServerUrl) -> bool {
        self.unsupported_mirror.insert(target.clone())
    }

    pub fn is_mirror_unsupported(&self, target: &ServerUrl) -> bool {
        self.unsupported_mirror.contains(target)
    }

    pub fn mark_unauthorized(&mut self, target: &ServerUrl) {
        self.unauthorized.insert(target.clone());
    }

    pub fn is_unauthorized(&self, target: &ServerUrl) -> bool {
        self.unauthorized.contains(target)
    }

    pub fn clear_unauthorized(&mut self) -> usize {
        let cleared = self.unauthorized.len();
        self.unauthorized.clear();
        cleared
    }
}
