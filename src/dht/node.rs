use super::error::DhtError;
use rand::Rng as _;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

pub const COMPACT_NODE_LEN: usize = 26;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        let id: [u8; 20] = bytes.try_into().map_err(|_| DhtError::InvalidNodeId)?;
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// XOR distance; comparing the arrays compares the distances as
    /// big-endian integers.
    pub fn distance(&self, other: &NodeId) -> [u8; 20] {
        let mut dist = [0u8; 20];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        dist
    }

    /// Length of the prefix shared with `other`, capped at 159.
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        let dist = self.distance(other);

        for (i, &byte) in dist.iter().enumerate() {
            if byte != 0 {
                let leading = byte.leading_zeros() as usize;
                return i * 8 + leading;
            }
        }

        159
    }

    /// A random id whose shared prefix with `self` is exactly `depth` bits.
    pub fn random_at_depth(&self, depth: usize) -> NodeId {
        if depth >= 160 {
            return NodeId::generate();
        }

        let mut id = NodeId::generate().0;
        let byte_idx = depth / 8;
        let bit = 0x80u8 >> (depth % 8);
        let keep_mask = !(bit | (bit - 1));

        id[..byte_idx].copy_from_slice(&self.0[..byte_idx]);
        id[byte_idx] = (self.0[byte_idx] & keep_mask)
            | (!self.0[byte_idx] & bit)
            | (id[byte_idx] & (bit - 1));

        NodeId(id)
    }

    /// First 15 bytes of `target`, last 5 of `self`.
    ///
    /// Presenting this id to a remote node makes us look like one of its
    /// closest neighbours.
    pub fn neighbor(&self, target: &NodeId) -> NodeId {
        let mut id = self.0;
        id[..15].copy_from_slice(&target.0[..15]);
        NodeId(id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A DHT contact.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    /// Last time any message arrived from this contact.
    pub last_seen: Instant,
    /// Last time it answered a query we sent; `None` until it does.
    pub last_verified: Option<Instant>,
    /// Consecutive queries that went unanswered.
    pub failures: u8,
}

impl Node {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            last_verified: None,
            failures: 0,
        }
    }

    pub fn verified(id: NodeId, addr: SocketAddr) -> Self {
        let mut node = Self::new(id, addr);
        node.verify();
        node
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn verify(&mut self) {
        let now = Instant::now();
        self.last_seen = now;
        self.last_verified = Some(now);
        self.failures = 0;
    }

    pub fn fail(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn is_verified(&self) -> bool {
        self.last_verified.is_some()
    }

    /// True when the contact has not answered us within `max_age`.
    pub fn is_questionable(&self, max_age: Duration) -> bool {
        match self.last_verified {
            Some(at) => at.elapsed() >= max_age,
            None => true,
        }
    }

    pub fn from_compact(data: &[u8]) -> Option<Self> {
        if data.len() != COMPACT_NODE_LEN {
            return None;
        }

        let id = NodeId::from_bytes(&data[..20]).ok()?;
        let ip = Ipv4Addr::new(data[20], data[21], data[22], data[23]);
        let port = u16::from_be_bytes([data[24], data[25]]);

        if port == 0 {
            return None;
        }

        Some(Self::new(id, SocketAddr::new(IpAddr::V4(ip), port)))
    }

    pub fn to_compact(&self) -> Option<[u8; COMPACT_NODE_LEN]> {
        let mut compact = [0u8; COMPACT_NODE_LEN];
        compact[..20].copy_from_slice(&self.id.0);

        match self.addr {
            SocketAddr::V4(v4) => {
                compact[20..24].copy_from_slice(&v4.ip().octets());
                compact[24..26].copy_from_slice(&v4.port().to_be_bytes());
                Some(compact)
            }
            SocketAddr::V6(_) => None,
        }
    }
}

/// Parses a `nodes` string; trailing partial entries are ignored.
pub fn decode_compact_nodes(data: &[u8]) -> Vec<Node> {
    data.chunks_exact(COMPACT_NODE_LEN)
        .filter_map(Node::from_compact)
        .collect()
}

/// Packs IPv4 contacts into a `nodes` string; IPv6 contacts are skipped.
pub fn encode_compact_nodes<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Vec<u8> {
    nodes
        .into_iter()
        .filter_map(Node::to_compact)
        .flatten()
        .collect()
}
