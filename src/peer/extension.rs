use super::error::PeerError;
use crate::bencode::{decode, encode, Value};
use bytes::Bytes;
use std::collections::BTreeMap;

pub const EXTENSION_HANDSHAKE_ID: u8 = 0;
pub const UT_METADATA: &str = "ut_metadata";

/// The BEP-10 extended handshake.
#[derive(Debug, Clone, Default)]
pub struct ExtensionHandshake {
    /// Extension name to the message id the sender wants it addressed to.
    pub extensions: BTreeMap<String, u8>,
    pub client: Option<String>,
    pub reqq: Option<i64>,
    pub metadata_size: Option<i64>,
}

impl ExtensionHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extensions(extensions: &[(&str, u8)]) -> Self {
        let mut hs = Self::new();
        for (name, id) in extensions {
            hs.extensions.insert((*name).to_string(), *id);
        }
        hs
    }

    pub fn encode(&self) -> Bytes {
        let m = self
            .extensions
            .iter()
            .map(|(name, id)| (name.as_str(), Value::Integer(*id as i64)));

        let mut dict = vec![("m", Value::dict(m))];

        if let Some(ref client) = self.client {
            dict.push(("v", Value::string(client)));
        }
        if let Some(reqq) = self.reqq {
            dict.push(("reqq", Value::Integer(reqq)));
        }
        if let Some(size) = self.metadata_size {
            dict.push(("metadata_size", Value::Integer(size)));
        }

        Bytes::from(encode(&Value::dict(dict)))
    }

    /// Parses a handshake payload. Extensions with id 0 are disabled by the
    /// sender and left out.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        let value = decode(data)?;
        if value.as_dict().is_none() {
            return Err(PeerError::InvalidMessage(
                "extension handshake is not a dict".into(),
            ));
        }

        let mut hs = Self::new();

        if let Some(m) = value.get(b"m").and_then(|v| v.as_dict()) {
            for (key, val) in m {
                let (Ok(name), Some(id)) = (std::str::from_utf8(key), val.as_integer()) else {
                    continue;
                };
                match u8::try_from(id) {
                    Ok(id) if id > 0 => {
                        hs.extensions.insert(name.to_string(), id);
                    }
                    _ => {}
                }
            }
        }

        hs.client = value.get(b"v").and_then(|v| v.as_str()).map(String::from);
        hs.reqq = value.get(b"reqq").and_then(|v| v.as_integer());
        hs.metadata_size = value.get(b"metadata_size").and_then(|v| v.as_integer());

        Ok(hs)
    }

    pub fn get_extension_id(&self, name: &str) -> Option<u8> {
        self.extensions.get(name).copied()
    }
}
