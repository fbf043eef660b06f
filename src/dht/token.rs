use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::net::IpAddr;

const TOKEN_LEN: usize = 8;

/// Rotating secrets behind `get_peers` / `announce_peer` tokens.
///
/// A token is the first 8 bytes of SHA-1(secret ‖ ip). Tokens minted under
/// the current or the previous secret are accepted, so a token stays valid
/// for one to two rotation periods.
pub struct TokenSecrets {
    current: [u8; 16],
    previous: [u8; 16],
}

impl TokenSecrets {
    pub fn new() -> Self {
        Self {
            current: rand::random(),
            previous: rand::random(),
        }
    }

    pub fn rotate(&mut self) {
        self.previous = self.current;
        self.current = rand::random();
    }

    pub fn issue(&self, ip: IpAddr) -> Bytes {
        token_for(&self.current, ip)
    }

    pub fn validate(&self, ip: IpAddr, token: &[u8]) -> bool {
        token_for(&self.current, ip) == token || token_for(&self.previous, ip) == token
    }
}

impl Default for TokenSecrets {
    fn default() -> Self {
        Self::new()
    }
}

fn token_for(secret: &[u8; 16], ip: IpAddr) -> Bytes {
    let mut hasher = Sha1::new();
    hasher.update(secret);
    match ip {
        IpAddr::V4(v4) => hasher.update(v4.octets()),
        IpAddr::V6(v6) => hasher.update(v6.octets()),
    }
    Bytes::copy_from_slice(&hasher.finalize()[..TOKEN_LEN])
}
