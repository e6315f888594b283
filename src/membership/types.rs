use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

/// Represents a single member in the cluster.
///
/// The `incarnation` field is a logical clock used to order updates and resolve conflicts
/// (e.g., refuting a false "Suspect" claim).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// One versioned write to a replicated map.
///
/// `values == None` is a tombstone left by the owner removing its entry.
/// Versions only ever grow, and only the owner of `key` bumps them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapUpdate {
    pub map: String,
    pub key: NodeId,
    pub version: u64,
    pub values: Option<BTreeSet<String>>,
}

/// The wire protocol for inter-node communication.
///
/// - `Ping/Ack`: Liveness checks; acks also carry members and map state.
/// - `Join/Leave`: Entering and cleanly exiting the cluster.
/// - `Suspect/Alive`: Disseminates changes in node health.
/// - `MapUpdate`: Pushes a replicated map write to every live member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: NodeId,
        incarnation: u64,
    },

    Ack {
        from: NodeId,
        incarnation: u64,
        members: Vec<Node>,
        maps: Vec<MapUpdate>,
    },

    Join {
        node: Node,
    },

    Leave {
        node_id: NodeId,
        incarnation: u64,
    },

    Suspect {
        node_id: NodeId,
        incarnation: u64,
    },

    Alive {
        node_id: NodeId,
        incarnation: u64,
    },

    MapUpdate {
        update: MapUpdate,
    },
}

/// Every datagram is tagged with the cluster name; nodes drop traffic
/// addressed to a different cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipEnvelope {
    pub cluster: String,
    pub message: GossipMessage,
}
