// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use blobmesh_core::{ServerUrl, Sha256};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Channel capacity for state updates, slow observers miss intermediate progress ticks.
const UPDATES_CAPACITY: usize = 256;

/// Which loop started a replication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Background synchronisation between sync-enabled servers.
    Sync,
    /// Transfer explicitly requested by the user.
    Transfer,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Sync => "sync",
            TransferKind::Transfer => "transfer",
        }
    }

    /// Capitalised name used in user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            TransferKind::Sync => "Sync",
            TransferKind::Transfer => "Transfer",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Uploading,
    Success,
    Error,
}

/// Progress of one blob being copied to one server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferState {
    pub id: String,
    pub kind: TransferKind,
    pub hash: Sha256,
    pub target_server: ServerUrl,
    pub file_name: String,
    pub transferred: u64,
    pub total: u64,
    pub status: TransferStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Milliseconds since UNIX epoch.
    pub updated_at: u64,
}

impl TransferState {
    /// Identifier of the state for a blob and target, namespaced by kind.
    pub fn id_for(kind: TransferKind, target: &ServerUrl, hash: &Sha256) -> String {
        format!("{}-{}-{}", kind.as_str(), target.key(), hash.to_hex())
    }

    /// New state for a replication which is about to start.
    pub fn uploading(
        kind: TransferKind,
        target: &ServerUrl,
        hash: Sha256,
        file_name: impl Into<String>,
        total: u64,
    ) -> Self {
        Self {
            id: Self::id_for(kind, target, &hash),
            kind,
            hash,
            target_server: target.clone(),
            file_name: file_name.into(),
            transferred: 0,
            total,
            status: TransferStatus::Uploading,
            message: None,
            updated_at: now_millis(),
        }
    }

    pub fn succeed(mut self, message: Option<String>) -> Self {
        self.status = TransferStatus::Success;
        self.transferred = self.total;
        self.message = message;
        self.updated_at = now_millis();
        self
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.status = TransferStatus::Error;
        self.message = Some(message.into());
        self.updated_at = now_millis();
        self
    }

    pub fn is_uploading(&self) -> bool {
        self.status == TransferStatus::Uploading
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct Lists {
    sync: VecDeque<TransferState>,
    transfer: VecDeque<TransferState>,
}

impl Lists {
    fn list_mut(&mut self, kind: TransferKind) -> &mut VecDeque<TransferState> {
        match kind {
            TransferKind::Sync => &mut self.sync,
            TransferKind::Transfer => &mut self.transfer,
        }
    }

    fn list(&self, kind: TransferKind) -> &VecDeque<TransferState> {
        match kind {
            TransferKind::Sync => &self.sync,
            TransferKind::Transfer => &self.transfer,
        }
    }
}

/// Bounded history of replication progress, one list per [`TransferKind`].
///
/// States are replaced in place by id. New states are appended and the oldest ones get dropped
/// once a list exceeds its capacity. Every change is also sent to subscribers.
#[derive(Clone, Debug)]
pub struct TransferStateStore {
    lists: Arc<Mutex<Lists>>,
    sync_capacity: usize,
    transfer_capacity: usize,
    updates: broadcast::Sender<TransferState>,
}

impl TransferStateStore {
    pub fn new(sync_capacity: usize, transfer_capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(UPDATES_CAPACITY);
        Self {
            lists: Arc::default(),
            sync_capacity: sync_capacity.max(1),
            transfer_capacity: transfer_capacity.max(1),
            updates,
        }
    }

    fn lists(&self) -> MutexGuard<'_, Lists> {
        // Lists are always left in a consistent state, a panicking observer can't corrupt them.
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn capacity(&self, kind: TransferKind) -> usize {
        match kind {
            TransferKind::Sync => self.sync_capacity,
            TransferKind::Transfer => self.transfer_capacity,
        }
    }

    /// Insert a state or replace the one with the same id.
    pub fn upsert(&self, state: TransferState) {
        let capacity = self.capacity(state.kind);
        {
            let mut lists = self.lists();
            let list = lists.list_mut(state.kind);
            match list.iter_mut().find(|existing| existing.id == state.id) {
                Some(existing) => *existing = state.clone(),
                None => {
                    list.push_back(state.clone());
                    while list.len() > capacity {
                        list.pop_front();
                    }
                }
            }
        }

        // Sending only fails when nobody is subscribed.
        let _ = self.updates.send(state);
    }

    /// Apply a modification to the state with the given id, if it is still known.
    pub fn update<F>(&self, kind: TransferKind, id: &str, f: F) -> Option<TransferState>
    where
        F: FnOnce(&mut TransferState),
    {
        let updated = {
            let mut lists = self.lists();
            let state = lists
                .list_mut(kind)
                .iter_mut()
                .find(|existing| existing.id == id)?;
            f(state);
            state.updated_at = now_millis();
            state.clone()
        };

        let _ = self.updates.send(updated.clone());
        Some(updated)
    }

    /// Record byte progress of a running upload.
    ///
    /// `total` falls back to the total already known for this state. The transferred amount
    /// never exceeds the total when one is known.
    pub fn progress(&self, kind: TransferKind, id: &str, loaded: u64, total: Option<u64>) {
        self.update(kind, id, |state| {
            if let Some(total) = total.filter(|total| *total > 0) {
                state.total = total;
            }
            state.transferred = if state.total > 0 {
                loaded.min(state.total)
            } else {
                loaded
            };
        });
    }

    pub fn get(&self, kind: TransferKind, id: &str) -> Option<TransferState> {
        self.lists()
            .list(kind)
            .iter()
            .find(|state| state.id == id)
            .cloned()
    }

    /// All states of one kind, oldest first.
    pub fn list(&self, kind: TransferKind) -> Vec<TransferState> {
        self.lists().list(kind).iter().cloned().collect()
    }

    /// States of both kinds, deduplicated by id.
    ///
    /// Sync states come first, then transfer states, both in insertion order. On an id collision
    /// the transfer state replaces the sync state at its position.
    pub fn merged(&self) -> Vec<TransferState> {
        let lists = self.lists();
        let mut merged: Vec<TransferState> = Vec::with_capacity(lists.sync.len() + lists.transfer.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        for state in lists.sync.iter().chain(lists.transfer.iter()) {
            match positions.get(&state.id) {
                Some(index) => merged[*index] = state.clone(),
                None => {
                    positions.insert(state.id.clone(), merged.len());
                    merged.push(state.clone());
                }
            }
        }

        merged
    }

    pub fn clear(&self, kind: TransferKind) {
        self.lists().list_mut(kind).clear();
    }

    /// Receive every state change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferState> {
        self.updates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use blobmesh_core::{ServerUrl, Sha256};

    use super::{TransferKind, TransferState, TransferStateStore, TransferStatus};

    fn target() -> ServerUrl {
        ServerUrl::new("https://B.example.com/").unwrap()
    }

    #[test]
    fn id_is_namespaced_by_kind() {
        let hash = Sha256::new(b"one");
        let id = TransferState::id_for(TransferKind::Sync, &target(), &hash);
        assert_eq!(id, format!("sync-https://b.example.com-{}", hash.to_hex()));
        assert_ne!(id, TransferState::id_for(TransferKind::Transfer, &target(), &hash));
    }

    #[test]
    fn replace_in_place_by_id() {
        let store = TransferStateStore::new(10, 10);
        let hash = Sha256::new(b"one");
        let state = TransferState::uploading(TransferKind::Sync, &target(), hash, "one.txt", 10);
        store.upsert(state.clone());
        store.upsert(TransferState::uploading(
            TransferKind::Sync,
            &target(),
            Sha256::new(b"two"),
            "two.txt",
            5,
        ));
        store.upsert(state.clone().succeed(None));

        let list = store.list(TransferKind::Sync);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, state.id);
        assert_eq!(list[0].status, TransferStatus::Success);
        assert_eq!(list[0].transferred, 10);
    }

    #[test]
    fn evicts_oldest_over_capacity() {
        let store = TransferStateStore::new(2, 5);
        for content in [b"1", b"2", b"3"] {
            store.upsert(TransferState::uploading(
                TransferKind::Sync,
                &target(),
                Sha256::new(content),
                "file",
                1,
            ));
        }

        let hashes: Vec<Sha256> = store
            .list(TransferKind::Sync)
            .into_iter()
            .map(|state| state.hash)
            .collect();
        assert_eq!(hashes, vec![Sha256::new(b"2"), Sha256::new(b"3")]);
    }

    #[test]
    fn progress_is_capped_by_total() {
        let store = TransferStateStore::new(5, 5);
        let state =
            TransferState::uploading(TransferKind::Transfer, &target(), Sha256::new(b"x"), "x", 0);
        store.upsert(state.clone());

        // Unknown total keeps the raw byte count.
        store.progress(TransferKind::Transfer, &state.id, 3, None);
        assert_eq!(store.get(TransferKind::Transfer, &state.id).unwrap().transferred, 3);

        store.progress(TransferKind::Transfer, &state.id, 12, Some(10));
        let updated = store.get(TransferKind::Transfer, &state.id).unwrap();
        assert_eq!(updated.total, 10);
        assert_eq!(updated.transferred, 10);

        // Unknown ids are ignored.
        store.progress(TransferKind::Transfer, "transfer-unknown", 1, None);
        assert_eq!(store.list(TransferKind::Transfer).len(), 1);
    }

    #[test]
    fn merged_view_prefers_transfer_entries() {
        let store = TransferStateStore::new(5, 5);
        let sync = TransferState::uploading(TransferKind::Sync, &target(), Sha256::new(b"a"), "a", 1);
        let transfer =
            TransferState::uploading(TransferKind::Transfer, &target(), Sha256::new(b"b"), "b", 1);

        // Force a collision to check which entry wins.
        let mut colliding = transfer.clone();
        colliding.id = sync.id.clone();
        colliding.file_name = "from transfer".into();

        store.upsert(sync.clone());
        store.upsert(transfer.clone());
        store.upsert(colliding);

        let merged = store.merged();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, sync.id);
        assert_eq!(merged[0].file_name, "from transfer");
        assert_eq!(merged[1].id, transfer.id);
    }

    #[tokio::test]
    async fn subscribers_receive_updates() {
        let store = TransferStateStore::new(5, 5);
        let mut updates = store.subscribe();

        let state = TransferState::uploading(TransferKind::Sync, &target(), Sha256::new(b"a"), "a", 4);
        store.upsert(state.clone());
        store.progress(TransferKind::Sync, &state.id, 2, None);

        assert_eq!(updates.recv().await.unwrap().transferred, 0);
        assert_eq!(updates.recv().await.unwrap().transferred, 2);

        store.clear(TransferKind::Sync);
        assert!(store.list(TransferKind::Sync).is_empty());
    }
}
