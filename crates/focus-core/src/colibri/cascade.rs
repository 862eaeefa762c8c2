//! Inter-bridge cascade topology.
//!
//! A directed graph whose nodes are bridges and whose edges carry a
//! mesh id. Within a mesh the graph is a clique, so the mesh is stored
//! as a set of bridges and edges are derived. Removing a bridge's last
//! mesh membership removes the node.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::bridge::BridgeId;

/// The mesh every bridge joins unless told otherwise.
pub const DEFAULT_MESH: &str = "0";

/// The relay topology of one conference.
#[derive(Debug, Clone, Default)]
pub struct Cascade {
    meshes: HashMap<String, HashSet<BridgeId>>,
}

impl Cascade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bridge to a mesh, cliquing it with every bridge already
    /// there. Returns the peers it must now relay to.
    pub fn add_bridge(&mut self, mesh_id: &str, bridge: BridgeId) -> Vec<BridgeId> {
        let mesh = self.meshes.entry(mesh_id.to_string()).or_default();
        let peers: Vec<BridgeId> = mesh.iter().filter(|b| **b != bridge).cloned().collect();
        mesh.insert(bridge);
        peers
    }

    /// Remove a bridge from every mesh; empty meshes disappear.
    pub fn remove_bridge(&mut self, bridge: &BridgeId) {
        for mesh in self.meshes.values_mut() {
            mesh.remove(bridge);
        }
        self.meshes.retain(|_, mesh| !mesh.is_empty());
    }

    pub fn contains(&self, bridge: &BridgeId) -> bool {
        self.meshes.values().any(|mesh| mesh.contains(bridge))
    }

    pub fn bridges(&self) -> HashSet<BridgeId> {
        self.meshes.values().flatten().cloned().collect()
    }

    /// Direct relay peers of a bridge across all its meshes.
    pub fn peers_of(&self, bridge: &BridgeId) -> HashSet<BridgeId> {
        let mut peers = HashSet::new();
        for mesh in self.meshes.values() {
            if mesh.contains(bridge) {
                peers.extend(mesh.iter().filter(|b| *b != bridge).cloned());
            }
        }
        peers
    }

    /// Whether a relay path connects two bridges, possibly across
    /// meshes.
    pub fn path_exists(&self, from: &BridgeId, to: &BridgeId) -> bool {
        if from == to {
            return self.contains(from);
        }
        let mut visited: HashSet<BridgeId> = HashSet::new();
        let mut queue: VecDeque<BridgeId> = VecDeque::new();
        queue.push_back(from.clone());
        visited.insert(from.clone());
        while let Some(current) = queue.pop_front() {
            for peer in self.peers_of(&current) {
                if peer == *to {
                    return true;
                }
                if visited.insert(peer.clone()) {
                    queue.push_back(peer);
                }
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}
