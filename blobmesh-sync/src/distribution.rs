// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use blobmesh_backend::ServerSnapshot;
use blobmesh_core::{BlobRecord, ServerUrl, Sha256};

/// All servers known to hold one blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistributionEntry {
    /// Most descriptive record seen for this blob.
    pub representative: BlobRecord,
    pub servers: BTreeSet<ServerUrl>,
}

/// Which blob is stored on which servers, derived from server listings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Distribution {
    entries: BTreeMap<Sha256, DistributionEntry>,
}

impl Distribution {
    /// Derive the distribution from the current listings of all servers.
    ///
    /// The first record seen for a hash becomes its representative and is only replaced by a
    /// record with strictly more descriptive fields.
    pub fn rebuild(snapshots: &[ServerSnapshot]) -> Self {
        let mut entries: BTreeMap<Sha256, DistributionEntry> = BTreeMap::new();

        for snapshot in snapshots {
            for record in &snapshot.blobs {
                match entries.entry(record.sha256) {
                    Entry::Vacant(vacant) => {
                        vacant.insert(DistributionEntry {
                            representative: record.clone(),
                            servers: BTreeSet::from([snapshot.server.url.clone()]),
                        });
                    }
                    Entry::Occupied(mut occupied) => {
                        let entry = occupied.get_mut();
                        entry.servers.insert(snapshot.server.url.clone());
                        if record.richness() > entry.representative.richness() {
                            entry.representative = record.clone();
                        }
                    }
                }
            }
        }

        Self { entries }
    }

    pub fn get(&self, hash: &Sha256) -> Option<&DistributionEntry> {
        self.entries.get(hash)
    }

    /// Servers holding the blob, empty if it is unknown.
    pub fn holders(&self, hash: &Sha256) -> Vec<&ServerUrl> {
        self.entries
            .get(hash)
            .map(|entry| entry.servers.iter().collect())
            .unwrap_or_default()
    }

    pub fn is_present_on(&self, hash: &Sha256, server: &ServerUrl) -> bool {
        self.entries
            .get(hash)
            .is_some_and(|entry| entry.servers.contains(server))
    }

    /// Hashes of all known blobs the server does not hold.
    pub fn missing_on(&self, server: &ServerUrl) -> Vec<Sha256> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.servers.contains(server))
            .map(|(hash, _)| *hash)
            .collect()
    }

    /// Iterate over all entries, ordered by hash.
    pub fn iter(&self) -> impl Iterator<Item = (&Sha256, &DistributionEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use blobmesh_backend::ServerSnapshot;
    use blobmesh_core::{BlobRecord, ServerKind, Sha256};

    use crate::test_utils::server;

    use super::Distribution;

    fn record(content: &[u8], name: Option<&str>, mime_type: Option<&str>) -> BlobRecord {
        BlobRecord {
            name: name.map(str::to_owned),
            mime_type: mime_type.map(str::to_owned),
            ..BlobRecord::new(Sha256::new(content))
        }
    }

    #[test]
    fn collects_holders_per_hash() {
        let a = server("https://a.example.com", ServerKind::Blossom);
        let b = server("https://b.example.com", ServerKind::Nip96);

        let snapshots = vec![
            ServerSnapshot::ready(a.clone(), vec![record(b"one", None, None)]),
            ServerSnapshot::ready(
                b.clone(),
                vec![record(b"one", None, None), record(b"two", None, None)],
            ),
        ];
        let distribution = Distribution::rebuild(&snapshots);

        assert_eq!(distribution.len(), 2);
        assert_eq!(distribution.holders(&Sha256::new(b"one")), vec![&a.url, &b.url]);
        assert!(distribution.is_present_on(&Sha256::new(b"two"), &b.url));
        assert!(!distribution.is_present_on(&Sha256::new(b"two"), &a.url));
        assert_eq!(distribution.missing_on(&a.url), vec![Sha256::new(b"two")]);
        assert!(distribution.holders(&Sha256::new(b"three")).is_empty());
    }

    #[test]
    fn richer_record_wins() {
        let a = server("https://a.example.com", ServerKind::Blossom);
        let b = server("https://b.example.com", ServerKind::Blossom);
        let c = server("https://c.example.com", ServerKind::Blossom);

        let snapshots = vec![
            ServerSnapshot::ready(a, vec![record(b"cat", Some("cat.png"), None)]),
            ServerSnapshot::ready(b, vec![record(b"cat", Some("cat.png"), Some("image/png"))]),
            // Equally rich records don't replace the representative.
            ServerSnapshot::ready(c, vec![record(b"cat", Some("kitten.png"), Some("image/png"))]),
        ];
        let distribution = Distribution::rebuild(&snapshots);

        let entry = distribution.get(&Sha256::new(b"cat")).unwrap();
        assert_eq!(entry.servers.len(), 3);
        assert_eq!(entry.representative.name.as_deref(), Some("cat.png"));
        assert_eq!(entry.representative.mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn empty_and_failed_listings() {
        let a = server("https://a.example.com", ServerKind::Blossom);
        let snapshots = vec![
            ServerSnapshot::failed(a.clone(), "offline"),
            ServerSnapshot::loading(a),
        ];
        assert!(Distribution::rebuild(&snapshots).is_empty());
        assert!(Distribution::rebuild(&[]).is_empty());
    }
}
