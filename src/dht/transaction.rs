use super::error::DhtError;
use super::message::{DhtResponse, TransactionId};
use super::node::NodeId;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

pub type ReplySender = oneshot::Sender<Result<DhtResponse, DhtError>>;

/// An outstanding query.
pub struct Pending {
    pub addr: SocketAddr,
    /// Id of the contact we expect to answer, when the query went to a
    /// routing table entry rather than a bare address.
    pub node_id: Option<NodeId>,
    pub method: &'static str,
    pub reply: Option<ReplySender>,
}

/// Outstanding queries keyed by transaction id.
///
/// Every query gets the same timeout, so deadlines expire in registration
/// order and a FIFO of `(deadline, id)` is enough to find them. Entries
/// resolved early stay in the FIFO until their deadline and are skipped.
pub struct Transactions {
    next: u32,
    timeout: Duration,
    max_pending: usize,
    pending: HashMap<TransactionId, Pending>,
    deadlines: VecDeque<(Instant, TransactionId)>,
}

impl Transactions {
    pub fn new(timeout: Duration, max_pending: usize) -> Self {
        Self {
            next: rand::random(),
            timeout,
            max_pending,
            pending: HashMap::new(),
            deadlines: VecDeque::new(),
        }
    }

    /// Registers a query and returns its transaction id. When too many
    /// queries are already in flight the entry is handed back.
    pub fn register(&mut self, pending: Pending) -> Result<TransactionId, Pending> {
        if self.pending.len() >= self.max_pending {
            return Err(pending);
        }

        let tid = loop {
            let candidate = Bytes::copy_from_slice(&self.next.to_be_bytes());
            self.next = self.next.wrapping_add(1);
            if !self.pending.contains_key(&candidate) {
                break candidate;
            }
        };

        self.deadlines
            .push_back((Instant::now() + self.timeout, tid.clone()));
        self.pending.insert(tid.clone(), pending);
        Ok(tid)
    }

    /// Takes the pending entry for a reply. Replies from an address other
    /// than the one queried are not matched.
    pub fn resolve(&mut self, tid: &[u8], from: SocketAddr) -> Option<Pending> {
        match self.pending.get(tid) {
            Some(p) if p.addr == from => self.pending.remove(tid),
            _ => None,
        }
    }

    /// Drops a registration whose datagram could not be sent.
    pub fn cancel(&mut self, tid: &[u8]) -> Option<Pending> {
        self.pending.remove(tid)
    }

    /// Removes and returns every query whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<Pending> {
        let mut expired = Vec::new();

        while let Some((deadline, _)) = self.deadlines.front() {
            if *deadline > now {
                break;
            }
            if let Some((_, tid)) = self.deadlines.pop_front() {
                if let Some(p) = self.pending.remove(&tid) {
                    expired.push(p);
                }
            }
        }

        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.front().map(|(d, _)| *d)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Pending {
    pub fn fail(self, err: DhtError) {
        if let Some(reply) = self.reply {
            let _ = reply.send(Err(err));
        }
    }
}
