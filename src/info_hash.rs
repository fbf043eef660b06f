use serde::{Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;

/// A 20-byte SHA-1 torrent identifier.
///
/// Harvested hashes are opaque until a metadata dictionary is fetched, at
/// which point [`InfoHash::of`] recomputes the digest for validation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_bytes(&bytes)
    }

    /// SHA-1 of `data`.
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha1::digest(data);
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&digest);
        Self(arr)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let hash = InfoHash::of(b"d4:name5:a.txte");
        let parsed = InfoHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(parsed, hash);
        assert_eq!(hash.to_hex().len(), 40);
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            InfoHash::of(b"abc").to_hex(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(InfoHash::from_bytes(&[0u8; 19]).is_none());
        assert!(InfoHash::from_hex("abcd").is_none());
    }
}
