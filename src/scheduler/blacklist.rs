use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Peers not worth dialing again for a while.
///
/// Bounded: past `capacity` the oldest entry is forgotten first.
pub struct Blacklist {
    ttl: Duration,
    capacity: usize,
    expires: HashMap<SocketAddr, Instant>,
    order: VecDeque<(SocketAddr, Instant)>,
}

impl Blacklist {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            expires: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, peer: SocketAddr, now: Instant) {
        if self.capacity == 0 {
            return;
        }

        let expiry = now + self.ttl;
        self.expires.insert(peer, expiry);
        self.order.push_back((peer, expiry));

        self.purge(now);
        while self.expires.len() > self.capacity {
            self.pop_oldest();
        }
    }

    pub fn contains(&mut self, peer: &SocketAddr, now: Instant) -> bool {
        match self.expires.get(peer) {
            Some(&expiry) if expiry > now => true,
            Some(_) => {
                self.expires.remove(peer);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.expires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expires.is_empty()
    }

    fn purge(&mut self, now: Instant) {
        while let Some(&(_, expiry)) = self.order.front() {
            if expiry > now {
                break;
            }
            self.pop_oldest();
        }
    }

    fn pop_oldest(&mut self) {
        if let Some((peer, expiry)) = self.order.pop_front() {
            // A re-inserted peer has a newer entry further back.
            if self.expires.get(&peer) == Some(&expiry) {
                self.expires.remove(&peer);
            }
        }
    }
}
