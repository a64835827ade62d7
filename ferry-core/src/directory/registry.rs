//! In-memory registry of which node advertises which files.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::DirectoryError;
use crate::protocol::{NodeSummary, PeerLocation};

/// A registered node as last reported by the node itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Control-plane endpoint; the node's identity
    pub endpoint: String,
    pub transfer_port: u16,
    /// Advertised file set
    pub files: BTreeSet<String>,
    /// When the most recent registration was applied
    pub registered_at: DateTime<Utc>,
    /// How many registrations this node has performed
    pub registrations: u64,
}

impl NodeRecord {
    /// Location entry this node contributes to every file it advertises.
    pub fn location(&self) -> PeerLocation {
        PeerLocation::new(self.endpoint.clone(), self.transfer_port)
    }

    /// Converts the record into its `/peers` representation.
    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            rest: self.endpoint.clone(),
            transfer_port: self.transfer_port,
            files: self.files.iter().cloned().collect(),
            registered_at: self.registered_at,
            registrations: self.registrations,
        }
    }
}

/// Acknowledgement of an applied registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationAck {
    pub node_id: String,
    /// Deduplicated file set now advertised by the node
    pub files: Vec<String>,
    pub transfer_port: u16,
    pub registrations: u64,
}

#[derive(Debug, Default)]
struct DirectoryState {
    nodes: HashMap<String, NodeRecord>,
    /// Node identities in first-registration order
    node_order: Vec<String>,
    /// file -> locations in insertion order, deduplicated by endpoint
    entries: HashMap<String, Vec<PeerLocation>>,
}

impl DirectoryState {
    fn upsert_membership(&mut self, file: &str, node_id: &str, transfer_port: u16) {
        let locations = self.entries.entry(file.to_string()).or_default();
        match locations.iter_mut().find(|loc| loc.endpoint == node_id) {
            Some(existing) => existing.transfer_port = transfer_port,
            None => locations.push(PeerLocation::new(node_id, transfer_port)),
        }
    }

    fn remove_membership(&mut self, file: &str, node_id: &str) {
        if let Some(locations) = self.entries.get_mut(file) {
            locations.retain(|loc| loc.endpoint != node_id);
            if locations.is_empty() {
                self.entries.remove(file);
            }
        }
    }
}

/// Directory of file locations shared by every node of the network.
///
/// All state sits behind one lock: `register` holds the write lock for the
/// whole update so readers never observe a half-applied registration.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    state: RwLock<DirectoryState>,
}

impl PeerDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts a node and makes `files` exactly the set of entries it appears in.
    ///
    /// Files the node advertised previously but no longer lists are dropped
    /// from their entries; entries left without locations disappear.
    /// Registering the same node and files again changes nothing except the
    /// registration marker.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::InvalidRegistration` - Blank node identity or blank file name
    pub fn register(
        &self,
        node_id: &str,
        files: &[String],
        transfer_port: u16,
    ) -> Result<RegistrationAck, DirectoryError> {
        if node_id.trim().is_empty() {
            return Err(DirectoryError::InvalidRegistration {
                reason: "node identity must not be empty".to_string(),
            });
        }
        if files.iter().any(|file| file.trim().is_empty()) {
            return Err(DirectoryError::InvalidRegistration {
                reason: format!("node {node_id} advertised an empty file name"),
            });
        }

        let advertised: BTreeSet<String> = files.iter().cloned().collect();
        let mut state = self.state.write();

        let stale: Vec<String> = state
            .nodes
            .get(node_id)
            .map(|record| record.files.difference(&advertised).cloned().collect())
            .unwrap_or_default();
        for file in &stale {
            state.remove_membership(file, node_id);
        }
        for file in &advertised {
            state.upsert_membership(file, node_id, transfer_port);
        }

        let now = Utc::now();
        let registrations = match state.nodes.get_mut(node_id) {
            Some(record) => {
                record.transfer_port = transfer_port;
                record.files = advertised.clone();
                record.registered_at = now;
                record.registrations += 1;
                record.registrations
            }
            None => {
                state.node_order.push(node_id.to_string());
                state.nodes.insert(
                    node_id.to_string(),
                    NodeRecord {
                        endpoint: node_id.to_string(),
                        transfer_port,
                        files: advertised.clone(),
                        registered_at: now,
                        registrations: 1,
                    },
                );
                1
            }
        };

        tracing::debug!(
            "Registered {} with {} files ({} dropped), transfer port {}",
            node_id,
            advertised.len(),
            stale.len(),
            transfer_port
        );

        Ok(RegistrationAck {
            node_id: node_id.to_string(),
            files: advertised.into_iter().collect(),
            transfer_port,
            registrations,
        })
    }

    /// Returns every location currently advertising `file`, in insertion order.
    ///
    /// Unknown files yield an empty list.
    pub fn locate(&self, file: &str) -> Vec<PeerLocation> {
        self.state
            .read()
            .entries
            .get(file)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns a snapshot of every registered node in first-registration order.
    pub fn list_nodes(&self) -> Vec<NodeRecord> {
        let state = self.state.read();
        state
            .node_order
            .iter()
            .filter_map(|id| state.nodes.get(id).cloned())
            .collect()
    }

    /// Returns the full file to locations map.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<PeerLocation>> {
        self.state
            .read()
            .entries
            .iter()
            .map(|(file, locations)| (file.clone(), locations.clone()))
            .collect()
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use proptest::prelude::*;

    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    const NODE_A: &str = "http://127.0.0.1:9001";
    const NODE_B: &str = "http://127.0.0.1:9003";

    #[test]
    fn test_register_is_idempotent() {
        let directory = PeerDirectory::new();

        directory.register(NODE_A, &files(&["a", "b"]), 9002).unwrap();
        let before = directory.snapshot();
        directory.register(NODE_A, &files(&["a", "b"]), 9002).unwrap();

        assert_eq!(directory.snapshot(), before);
        assert_eq!(directory.locate("a"), vec![PeerLocation::new(NODE_A, 9002)]);
        assert_eq!(directory.locate("b"), vec![PeerLocation::new(NODE_A, 9002)]);
        assert_eq!(directory.list_nodes()[0].registrations, 2);
    }

    #[test]
    fn test_reregistration_narrows_membership() {
        let directory = PeerDirectory::new();

        directory.register(NODE_A, &files(&["a", "b"]), 9002).unwrap();
        directory.register(NODE_A, &files(&["a"]), 9002).unwrap();

        assert_eq!(directory.locate("a").len(), 1);
        assert!(directory.locate("b").is_empty());
        assert!(!directory.snapshot().contains_key("b"));
    }

    #[test]
    fn test_narrowing_keeps_other_nodes() {
        let directory = PeerDirectory::new();

        directory.register(NODE_A, &files(&["shared"]), 9002).unwrap();
        directory.register(NODE_B, &files(&["shared"]), 9004).unwrap();
        directory.register(NODE_A, &files(&[]), 9002).unwrap();

        assert_eq!(
            directory.locate("shared"),
            vec![PeerLocation::new(NODE_B, 9004)]
        );
        assert_eq!(directory.node_count(), 2);
    }

    #[test]
    fn test_locate_unknown_file_is_empty() {
        let directory = PeerDirectory::new();
        directory.register(NODE_A, &files(&["a"]), 9002).unwrap();

        assert!(directory.locate("missing.txt").is_empty());
    }

    #[test]
    fn test_locate_preserves_insertion_order() {
        let directory = PeerDirectory::new();

        directory.register(NODE_B, &files(&["x"]), 9004).unwrap();
        directory.register(NODE_A, &files(&["x"]), 9002).unwrap();
        // Re-registering must not move NODE_B behind NODE_A.
        directory.register(NODE_B, &files(&["x"]), 9004).unwrap();

        let endpoints: Vec<String> = directory
            .locate("x")
            .into_iter()
            .map(|loc| loc.endpoint)
            .collect();
        assert_eq!(endpoints, vec![NODE_B.to_string(), NODE_A.to_string()]);
    }

    #[test]
    fn test_transfer_port_change_updates_in_place() {
        let directory = PeerDirectory::new();

        directory.register(NODE_A, &files(&["a"]), 9002).unwrap();
        directory.register(NODE_A, &files(&["a"]), 9102).unwrap();

        assert_eq!(directory.locate("a"), vec![PeerLocation::new(NODE_A, 9102)]);
        assert_eq!(directory.list_nodes()[0].transfer_port, 9102);
    }

    #[test]
    fn test_duplicate_files_collapse() {
        let directory = PeerDirectory::new();

        let ack = directory
            .register(NODE_A, &files(&["a", "a", "b"]), 9002)
            .unwrap();

        assert_eq!(ack.files, files(&["a", "b"]));
        assert_eq!(directory.locate("a").len(), 1);
    }

    #[test]
    fn test_register_rejects_blank_identity() {
        let directory = PeerDirectory::new();

        let result = directory.register("  ", &files(&["a"]), 9002);

        assert!(matches!(
            result,
            Err(DirectoryError::InvalidRegistration { .. })
        ));
        assert_eq!(directory.node_count(), 0);
        assert!(directory.snapshot().is_empty());
    }

    #[test]
    fn test_register_rejects_blank_file_without_side_effects() {
        let directory = PeerDirectory::new();
        directory.register(NODE_A, &files(&["a"]), 9002).unwrap();

        let result = directory.register(NODE_A, &files(&["b", ""]), 9002);

        assert!(result.is_err());
        assert_eq!(directory.locate("a").len(), 1);
        assert!(directory.locate("b").is_empty());
    }

    #[test]
    fn test_list_nodes_in_registration_order() {
        let directory = PeerDirectory::new();

        directory.register(NODE_B, &files(&["b"]), 9004).unwrap();
        directory.register(NODE_A, &files(&["a"]), 9002).unwrap();

        let nodes = directory.list_nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].endpoint, NODE_B);
        assert_eq!(nodes[1].endpoint, NODE_A);
        assert_eq!(nodes[1].summary().files, files(&["a"]));
    }

    #[test]
    fn test_concurrent_register_never_exposes_partial_update() {
        let directory = Arc::new(PeerDirectory::new());
        directory.register(NODE_A, &files(&["left"]), 9002).unwrap();

        let writer = {
            let directory = Arc::clone(&directory);
            thread::spawn(move || {
                for i in 0..2_000 {
                    let side = if i % 2 == 0 { "right" } else { "left" };
                    directory.register(NODE_A, &files(&[side]), 9002).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let directory = Arc::clone(&directory);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snapshot = directory.snapshot();
                        let memberships = ["left", "right"]
                            .iter()
                            .filter(|file| snapshot.contains_key(**file))
                            .count();
                        assert_eq!(memberships, 1, "node visible in {memberships} entries");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    proptest! {
        #[test]
        fn prop_entries_match_node_records(
            registrations in prop::collection::vec(
                (0usize..3, prop::collection::vec(0usize..5, 0..5), 9000u16..9010),
                1..40,
            )
        ) {
            let directory = PeerDirectory::new();
            let nodes = [NODE_A, NODE_B, "http://127.0.0.1:9005"];

            for (node, file_ids, port) in &registrations {
                let names: Vec<String> = file_ids.iter().map(|id| format!("file-{id}")).collect();
                directory.register(nodes[*node], &names, *port).unwrap();
            }

            let snapshot = directory.snapshot();
            for record in directory.list_nodes() {
                let appears_in: BTreeSet<String> = snapshot
                    .iter()
                    .filter(|(_, locations)| {
                        locations.iter().any(|loc| loc.endpoint == record.endpoint)
                    })
                    .map(|(file, _)| file.clone())
                    .collect();
                prop_assert_eq!(&appears_in, &record.files);
            }
            for locations in snapshot.values() {
                prop_assert!(!locations.is_empty());
                let unique: BTreeSet<&str> =
                    locations.iter().map(|loc| loc.endpoint.as_str()).collect();
                prop_assert_eq!(unique.len(), locations.len());
            }
        }
    }
}
