//! Metadata exchange extension (ut_metadata, BEP-9).
//!
//! Each message is a bencoded dictionary; a `data` message is followed by
//! the raw piece bytes, outside the dictionary.

use bytes::Bytes;

use super::error::PeerError;
use crate::bencode::{decode_prefix, encode, Value};

/// The size of a metadata piece (16 KB).
pub const METADATA_PIECE_SIZE: usize = 16384;

/// Message types for the ut_metadata extension (BEP-9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMessageType {
    /// Request a piece of metadata.
    Request = 0,
    /// Provide a piece of metadata.
    Data = 1,
    /// Reject a metadata request.
    Reject = 2,
}

impl MetadataMessageType {
    pub fn from_integer(v: i64) -> Option<Self> {
        match v {
            0 => Some(MetadataMessageType::Request),
            1 => Some(MetadataMessageType::Data),
            2 => Some(MetadataMessageType::Reject),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> i64 {
        *self as i64
    }
}

/// A metadata exchange message (ut_metadata, BEP-9).
#[derive(Debug, Clone)]
pub struct MetadataMessage {
    pub msg_type: MetadataMessageType,
    pub piece: u32,
    /// Size of the whole info dictionary; only in `data` messages.
    pub total_size: Option<i64>,
    /// Raw piece bytes following the dictionary; only in `data` messages.
    pub data: Option<Bytes>,
}

impl MetadataMessage {
    pub fn request(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Request,
            piece,
            total_size: None,
            data: None,
        }
    }

    pub fn data(piece: u32, total_size: i64, data: Bytes) -> Self {
        Self {
            msg_type: MetadataMessageType::Data,
            piece,
            total_size: Some(total_size),
            data: Some(data),
        }
    }

    pub fn reject(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Reject,
            piece,
            total_size: None,
            data: None,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut dict = vec![
            ("msg_type", Value::Integer(self.msg_type.as_integer())),
            ("piece", Value::Integer(self.piece as i64)),
        ];
        if let Some(total_size) = self.total_size {
            dict.push(("total_size", Value::Integer(total_size)));
        }

        let mut out = encode(&Value::dict(dict));
        if let Some(ref data) = self.data {
            out.extend_from_slice(data);
        }
        Bytes::from(out)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PeerError> {
        let (value, dict_end) = decode_prefix(payload)?;
        if value.as_dict().is_none() {
            return Err(PeerError::InvalidMessage(
                "ut_metadata message is not a dict".into(),
            ));
        }

        let msg_type = MetadataMessageType::from_integer(value.int_field("msg_type")?)
            .ok_or_else(|| PeerError::InvalidMessage("invalid msg_type".into()))?;

        let piece = u32::try_from(value.int_field("piece")?)
            .map_err(|_| PeerError::InvalidMessage("invalid piece index".into()))?;

        let total_size = value.get(b"total_size").and_then(|v| v.as_integer());

        let data = match msg_type {
            MetadataMessageType::Data => Some(Bytes::copy_from_slice(&payload[dict_end..])),
            _ => None,
        };

        Ok(Self {
            msg_type,
            piece,
            total_size,
            data,
        })
    }
}

pub fn metadata_piece_count(metadata_size: usize) -> usize {
    metadata_size.div_ceil(METADATA_PIECE_SIZE)
}

/// Expected length of piece `piece`; the last piece carries the remainder.
pub fn metadata_piece_size(piece: u32, total_size: usize) -> usize {
    let offset = piece as usize * METADATA_PIECE_SIZE;
    if offset >= total_size {
        0
    } else {
        (total_size - offset).min(METADATA_PIECE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encode_decode() {
        let encoded = MetadataMessage::request(5).encode();
        assert_eq!(&encoded[..], b"d8:msg_typei0e5:piecei5ee");

        let decoded = MetadataMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.msg_type, MetadataMessageType::Request);
        assert_eq!(decoded.piece, 5);
        assert!(decoded.total_size.is_none());
        assert!(decoded.data.is_none());
    }

    #[test]
    fn test_data_keeps_trailer() {
        let data = Bytes::from_static(b"d4:name1:xe");
        let encoded = MetadataMessage::data(2, 1000, data.clone()).encode();
        let decoded = MetadataMessage::decode(&encoded).unwrap();

        assert_eq!(decoded.msg_type, MetadataMessageType::Data);
        assert_eq!(decoded.piece, 2);
        assert_eq!(decoded.total_size, Some(1000));
        assert_eq!(decoded.data, Some(data));
    }

    #[test]
    fn test_reject_decode() {
        let decoded = MetadataMessage::decode(b"d8:msg_typei2e5:piecei10ee").unwrap();
        assert_eq!(decoded.msg_type, MetadataMessageType::Reject);
        assert_eq!(decoded.piece, 10);
    }

    #[test]
    fn test_decode_rejects_bad_fields() {
        assert!(MetadataMessage::decode(b"d8:msg_typei7e5:piecei0ee").is_err());
        assert!(MetadataMessage::decode(b"d8:msg_typei1e5:piecei-1ee").is_err());
        assert!(MetadataMessage::decode(b"d5:piecei0ee").is_err());
        assert!(MetadataMessage::decode(b"li1ee").is_err());
        assert!(MetadataMessage::decode(b"d8:msg_typei1e").is_err());
    }

    #[test]
    fn test_metadata_piece_count() {
        assert_eq!(metadata_piece_count(0), 0);
        assert_eq!(metadata_piece_count(1), 1);
        assert_eq!(metadata_piece_count(16384), 1);
        assert_eq!(metadata_piece_count(16385), 2);
        assert_eq!(metadata_piece_count(50000), 4);
    }

    #[test]
    fn test_metadata_piece_size() {
        assert_eq!(metadata_piece_size(0, 40000), 16384);
        assert_eq!(metadata_piece_size(2, 40000), 40000 - 2 * 16384);
        assert_eq!(metadata_piece_size(3, 40000), 0);
    }
}
