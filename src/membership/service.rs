use super::ClusterClient;
use super::replicated::ReplicatedMap;
use super::types::{GossipEnvelope, GossipMessage, MapUpdate, Node, NodeId, NodeState};
use crate::config::ClusterConfig;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use std::{net::SocketAddr, time::Duration};
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_secs(2);
const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEAD_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a dead member, and every map entry it owns, is remembered.
pub(crate) const DEAD_RETENTION: Duration = Duration::from_secs(60);
/// Upper bound for one encoded gossip datagram.
pub(crate) const MAX_DATAGRAM_SIZE: usize = 16 * 1024;

pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    cluster_name: String,
    socket: Arc<UdpSocket>,
    incarnation: Arc<RwLock<u64>>,
    maps: DashMap<String, Arc<ReplicatedMap>>,
    outbox: mpsc::UnboundedSender<MapUpdate>,
    outbox_rx: Mutex<Option<mpsc::UnboundedReceiver<MapUpdate>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MembershipService {
    /// Validates the cluster settings, binds the gossip socket, joins through
    /// the seeds and starts the background loops.
    pub async fn connect(config: &ClusterConfig) -> Result<Arc<Self>> {
        let bind_addr = config.endpoint()?;
        let service = Self::new(&config.name, bind_addr, config.seeds.clone()).await?;
        service.clone().start().await;
        Ok(service)
    }

    pub async fn new(
        cluster_name: &str,
        bind_addr: SocketAddr,
        seed_nodes: Vec<SocketAddr>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        // Port 0 binds resolve to a concrete port here
        let local_addr = socket.local_addr()?;
        let incarnation_counter = Arc::new(RwLock::new(1));
        let current_inc = *incarnation_counter.read().await;
        let local_node = Node {
            id: NodeId::new(),
            addr: local_addr,
            state: NodeState::Alive,
            incarnation: current_inc,
            last_seen: Some(Instant::now()),
        };
        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());

        if !seed_nodes.is_empty() {
            info!("Joining cluster '{}' via {} seed node(s)", cluster_name, seed_nodes.len());

            let encoded = bincode::serialize(&GossipEnvelope {
                cluster: cluster_name.to_string(),
                message: GossipMessage::Join {
                    node: local_node.clone(),
                },
            })?;

            for seed_node in seed_nodes.iter() {
                socket.send_to(&encoded, seed_node).await?;
                info!("Sent join request to {}", seed_node);
            }
        }

        let (outbox, outbox_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            local_node,
            members,
            cluster_name: cluster_name.to_string(),
            socket: Arc::new(socket),
            incarnation: incarnation_counter,
            maps: DashMap::new(),
            outbox,
            outbox_rx: Mutex::new(Some(outbox_rx)),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting membership service...");

        let mut handles = vec![
            tokio::spawn(self.clone().gossip_loop()),
            tokio::spawn(self.clone().receive_loop()),
            tokio::spawn(self.clone().failure_detection_loop()),
        ];

        let outbox_rx = self
            .outbox_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(rx) = outbox_rx {
            handles.push(tokio::spawn(self.clone().dissemination_loop(rx)));
        }

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);

        tracing::info!("All background tasks started");
    }

    pub fn get_alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get_member(&self, node_id: &NodeId) -> Option<Node> {
        self.members.get(node_id).map(|entry| entry.value().clone())
    }

    fn map_snapshots(&self) -> Vec<MapUpdate> {
        self.maps
            .iter()
            .flat_map(|entry| entry.value().snapshot())
            .collect()
    }

    fn apply_map_update(&self, update: MapUpdate) {
        if update.key == self.local_node.id {
            // Our own entry is only ever written here
            return;
        }
        let map = self.replicated_map(&update.map);
        map.apply(update);
    }

    fn encode(&self, message: GossipMessage) -> Result<Vec<u8>> {
        let envelope = GossipEnvelope {
            cluster: self.cluster_name.clone(),
            message,
        };
        Ok(bincode::serialize(&envelope)?)
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GOSSIP_INTERVAL);

        loop {
            interval.tick().await;

            // Suspected members are still pinged so they can answer
            let reachable: Vec<Node> = self
                .members
                .iter()
                .filter(|entry| {
                    entry.value().id != self.local_node.id
                        && entry.value().state != NodeState::Dead
                })
                .map(|entry| entry.value().clone())
                .collect();

            if reachable.is_empty() {
                continue;
            }

            let target = {
                use rand::Rng;
                let idx = rand::thread_rng().gen_range(0..reachable.len());
                &reachable[idx]
            };

            let incarnation = *self.incarnation.read().await;
            let msg = GossipMessage::Ping {
                from: self.local_node.id.clone(),
                incarnation,
            };

            match self.encode(msg) {
                Ok(encoded) => {
                    if let Err(e) = self.socket.send_to(&encoded, target.addr).await {
                        tracing::warn!("Failed to send ping to {:?}: {}", target.id, e);
                    } else {
                        tracing::trace!("Sent ping to {:?}", target.id);
                    }
                }
                Err(e) => tracing::error!("Failed to serialize GossipMessage::Ping: {}", e),
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipEnvelope>(&buf[..len]) {
                    Ok(envelope) if envelope.cluster != self.cluster_name => {
                        tracing::debug!(
                            "Dropping message from {} for foreign cluster '{}'",
                            src,
                            envelope.cluster
                        );
                    }
                    Ok(envelope) => {
                        if let Err(e) = self.handle_message(envelope.message, src).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Pushes local replicated map writes to every live member.
    async fn dissemination_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<MapUpdate>) {
        while let Some(update) = rx.recv().await {
            tracing::debug!(
                "Disseminating {} update for {:?} (version {})",
                update.map,
                update.key,
                update.version
            );
            self.broadcast_message(GossipMessage::MapUpdate { update })
                .await;
        }
    }

    pub(crate) async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Ping { from, incarnation } => {
                self.handle_ping(from, incarnation, src).await?;
            }

            GossipMessage::Ack {
                from,
                incarnation,
                members,
                maps,
            } => {
                self.handle_ack(from, incarnation, members, maps).await?;
            }

            GossipMessage::Join { node } => {
                self.handle_join(node, src).await?;
            }

            GossipMessage::Leave {
                node_id,
                incarnation,
            } => {
                self.handle_leave(node_id, incarnation);
            }

            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                self.handle_suspect(node_id, incarnation).await?;
            }

            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.handle_alive(node_id, incarnation);
            }

            GossipMessage::MapUpdate { update } => {
                self.apply_map_update(update);
            }
        }

        Ok(())
    }

    async fn send_ack(&self, to: SocketAddr) -> Result<()> {
        let all_members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let my_incarnation = *self.incarnation.read().await;
        let datagrams = self.encode_acks(my_incarnation, all_members, self.map_snapshots())?;

        for datagram in datagrams {
            self.socket.send_to(&datagram, to).await?;
        }

        Ok(())
    }

    /// Encodes an ack carrying `members` and `maps`, split into as many
    /// datagrams as it takes to keep each one under `MAX_DATAGRAM_SIZE`.
    ///
    /// A single member or map entry that is too large on its own is still
    /// returned as one datagram.
    pub(crate) fn encode_acks(
        &self,
        incarnation: u64,
        members: Vec<Node>,
        maps: Vec<MapUpdate>,
    ) -> Result<Vec<Vec<u8>>> {
        let mut datagrams = Vec::new();
        let mut parts = vec![(members, maps)];

        while let Some((mut members, mut maps)) = parts.pop() {
            let encoded = self.encode(GossipMessage::Ack {
                from: self.local_node.id.clone(),
                incarnation,
                members: members.clone(),
                maps: maps.clone(),
            })?;

            if encoded.len() <= MAX_DATAGRAM_SIZE || members.len() + maps.len() <= 1 {
                datagrams.push(encoded);
                continue;
            }

            // Every split strictly shrinks both halves
            if members.len() > maps.len() {
                let rest = members.split_off(members.len() / 2);
                parts.push((rest, Vec::new()));
            } else {
                let rest = maps.split_off(maps.len() / 2);
                parts.push((Vec::new(), rest));
            }
            parts.push((members, maps));
        }

        Ok(datagrams)
    }

    /// Direct contact from `from`: refreshes its liveness and clears a
    /// suspicion. Returns its state afterwards, `None` when it is unknown.
    fn record_contact(&self, from: &NodeId, incarnation: u64) -> Option<NodeState> {
        let mut member = self.members.get_mut(from)?;
        member.last_seen = Some(Instant::now());

        if incarnation > member.incarnation {
            member.incarnation = incarnation;
        }

        if member.state == NodeState::Suspect {
            tracing::info!(
                "Node {:?} at {} answered, suspicion cleared",
                member.id,
                member.addr
            );
            member.state = NodeState::Alive;
        }

        Some(member.state)
    }

    async fn handle_ping(
        &self,
        from: NodeId,
        from_incarnation: u64,
        src: SocketAddr,
    ) -> Result<()> {
        tracing::trace!("Received ping from {:?}", from);

        match self.record_contact(&from, from_incarnation) {
            Some(NodeState::Dead) => {
                // Tell it, so it refutes with a higher incarnation
                tracing::debug!("Ping from {:?}, which we consider dead", from);
                let encoded = self.encode(GossipMessage::Suspect {
                    node_id: from.clone(),
                    incarnation: from_incarnation,
                })?;
                self.socket.send_to(&encoded, src).await?;
            }
            Some(_) => {}
            None => self.adopt_pinging_member(from.clone(), from_incarnation, src),
        }

        self.send_ack(src).await?;
        tracing::trace!("Sent ack to {:?} with {} members", from, self.members.len());

        Ok(())
    }

    fn adopt_pinging_member(&self, from: NodeId, from_incarnation: u64, src: SocketAddr) {
        tracing::info!("Discovered new member via ping: {:?} at {}", from, src);

        let new_node = Node {
            id: from.clone(),
            addr: src,
            state: NodeState::Alive,
            incarnation: from_incarnation,
            last_seen: Some(Instant::now()),
        };

        self.members.insert(from, new_node);
    }

    async fn handle_ack(
        &self,
        from: NodeId,
        from_incarnation: u64,
        members: Vec<Node>,
        maps: Vec<MapUpdate>,
    ) -> Result<()> {
        tracing::trace!(
            "Received ack from {:?} (inc={}) with {} members",
            from,
            from_incarnation,
            members.len()
        );

        self.record_contact(&from, from_incarnation);

        for member in members {
            self.merge_member(member);
        }

        for update in maps {
            self.apply_map_update(update);
        }

        Ok(())
    }

    fn merge_member(&self, new_member: Node) {
        if new_member.id == self.local_node.id {
            return;
        }

        match self.members.get_mut(&new_member.id) {
            Some(mut existing) => {
                if new_member.incarnation > existing.incarnation {
                    tracing::debug!(
                        "Updating {:?}: inc {} -> {}",
                        new_member.id,
                        existing.incarnation,
                        new_member.incarnation,
                    );

                    existing.state = new_member.state;
                    existing.incarnation = new_member.incarnation;
                    existing.last_seen = Some(Instant::now());
                } else if new_member.incarnation == existing.incarnation
                    && new_member.state == NodeState::Alive
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!("{:?} refuted suspicion", new_member.id);
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                if new_member.state == NodeState::Dead {
                    return;
                }

                tracing::info!(
                    "Discovered new member: {:?} at {}",
                    new_member.id,
                    new_member.addr
                );

                let mut member_with_timestamp = new_member;
                member_with_timestamp.last_seen = Some(Instant::now());

                self.members
                    .insert(member_with_timestamp.id.clone(), member_with_timestamp);
            }
        }
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) -> Result<()> {
        if node_id == self.local_node.id {
            let my_incarnation = {
                let mut inc = self.incarnation.write().await;
                if incarnation < *inc {
                    return Ok(());
                }
                *inc = incarnation + 1;
                *inc
            };

            tracing::info!("Refuting suspicion of local node (inc={})", my_incarnation);

            if let Some(mut local) = self.members.get_mut(&node_id) {
                local.incarnation = my_incarnation;
                local.state = NodeState::Alive;
                local.last_seen = Some(Instant::now());
            }

            self.broadcast_message(GossipMessage::Alive {
                node_id,
                incarnation: my_incarnation,
            })
            .await;

            return Ok(());
        }

        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation >= existing.incarnation && existing.state == NodeState::Alive {
                    tracing::info!("Node {:?} at {} suspected", existing.id, existing.addr);
                    existing.state = NodeState::Suspect;
                    existing.incarnation = incarnation;
                }
            }
            None => {
                tracing::debug!("Suspected node {:?} doesn't exist", node_id);
            }
        }

        Ok(())
    }

    fn handle_alive(&self, node_id: NodeId, incarnation: u64) {
        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation > existing.incarnation {
                    tracing::info!(
                        "Node {:?} at {} is now Alive (inc={})",
                        existing.id,
                        existing.addr,
                        incarnation
                    );
                    existing.state = NodeState::Alive;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                } else if incarnation == existing.incarnation
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!(
                        "Node {:?} at {} successfully refuted suspicion",
                        existing.id,
                        existing.addr,
                    );
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                tracing::debug!("Alive message for unknown node {:?}", node_id);
            }
        }
    }

    async fn handle_join(&self, mut node: Node, src: SocketAddr) -> Result<()> {
        tracing::info!("Node {:?} joining cluster at {}", node.id, src);

        node.addr = src;
        node.state = NodeState::Alive;
        node.last_seen = Some(Instant::now());

        self.members.insert(node.id.clone(), node);

        tracing::info!("Cluster size now: {}", self.members.len());

        // Bring the newcomer up to date right away
        self.send_ack(src).await
    }

    fn handle_leave(&self, node_id: NodeId, incarnation: u64) {
        if let Some(mut member) = self.members.get_mut(&node_id)
            && incarnation >= member.incarnation
        {
            tracing::info!("Node {:?} at {} left the cluster", member.id, member.addr);
            member.state = NodeState::Dead;
            member.incarnation = incarnation;
        }
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(FAILURE_DETECTION_INTERVAL);

        loop {
            interval.tick().await;
            let now = Instant::now();

            let mut messages_to_broadcast = Vec::new();
            let mut declared_dead = 0;

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();

                if member.id == self.local_node.id {
                    continue;
                }

                let Some(last_seen) = member.last_seen else {
                    member.last_seen = Some(now);
                    continue;
                };
                let elapsed = now.duration_since(last_seen);

                match member.state {
                    NodeState::Alive if elapsed > SUSPECT_TIMEOUT => {
                        tracing::warn!(
                            "Node {:?} suspected (no contact for {:?})",
                            member.id,
                            elapsed
                        );

                        member.state = NodeState::Suspect;
                        messages_to_broadcast.push(GossipMessage::Suspect {
                            node_id: member.id.clone(),
                            incarnation: member.incarnation,
                        });
                    }
                    NodeState::Suspect if elapsed > DEAD_TIMEOUT => {
                        tracing::warn!(
                            "Node {:?} declared DEAD (no contact for {:?})",
                            member.id,
                            elapsed
                        );
                        member.state = NodeState::Dead;
                        declared_dead += 1;
                    }
                    _ => {}
                }
            }

            if declared_dead > 0 {
                tracing::info!(
                    "Cluster size now: {} alive nodes",
                    self.get_alive_members().len()
                );
            }

            self.prune_departed(now);

            // Suspected members are broadcast targets too, so each one
            // hears about its own suspicion and can refute it.
            for msg in messages_to_broadcast {
                self.broadcast_message(msg).await;
            }
        }
    }

    /// Forgets members dead for longer than `DEAD_RETENTION` and drops every
    /// map entry, tombstones included, whose owner is no longer a member.
    pub(crate) fn prune_departed(&self, now: Instant) -> usize {
        let before = self.members.len();
        self.members.retain(|id, member| {
            *id == self.local_node.id
                || member.state != NodeState::Dead
                || member
                    .last_seen
                    .is_none_or(|last_seen| now.saturating_duration_since(last_seen) <= DEAD_RETENTION)
        });
        let pruned = before.saturating_sub(self.members.len());

        let maps: Vec<Arc<ReplicatedMap>> =
            self.maps.iter().map(|entry| entry.value().clone()).collect();
        for map in maps {
            map.retain_owners(|owner| self.members.contains_key(owner));
        }

        if pruned > 0 {
            tracing::info!("Forgot {} departed member(s)", pruned);
        }
        pruned
    }

    async fn broadcast_message(&self, msg: GossipMessage) {
        let encoded = match self.encode(msg) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("Failed to serialize broadcast: {}", e);
                return;
            }
        };

        let targets: Vec<Node> = self
            .members
            .iter()
            .filter(|entry| {
                entry.value().id != self.local_node.id && entry.value().state != NodeState::Dead
            })
            .map(|entry| entry.value().clone())
            .collect();

        for member in targets {
            if let Err(e) = self.socket.send_to(&encoded, member.addr).await {
                tracing::warn!("Failed to broadcast to {:?}: {}", member.id, e);
            }
        }
    }
}

#[async_trait]
impl ClusterClient for MembershipService {
    fn local_node_id(&self) -> NodeId {
        self.local_node.id.clone()
    }

    fn live_node_ids(&self) -> HashSet<NodeId> {
        self.get_alive_members()
            .into_iter()
            .map(|node| node.id)
            .collect()
    }

    fn replicated_map(&self, name: &str) -> Arc<ReplicatedMap> {
        self.maps
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ReplicatedMap::new(name, self.outbox.clone())))
            .value()
            .clone()
    }

    async fn disconnect(&self) {
        // The dissemination loop is about to be aborted, so push our own
        // entries (including fresh tombstones) directly.
        let own_entries: Vec<MapUpdate> = self
            .map_snapshots()
            .into_iter()
            .filter(|update| update.key == self.local_node.id)
            .collect();
        for update in own_entries {
            self.broadcast_message(GossipMessage::MapUpdate { update })
                .await;
        }

        let incarnation = *self.incarnation.read().await;
        self.broadcast_message(GossipMessage::Leave {
            node_id: self.local_node.id.clone(),
            incarnation,
        })
        .await;

        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            handle.abort();
        }

        tracing::info!("Disconnected from cluster '{}'", self.cluster_name);
    }
}
