use super::error::DhtError;
use super::node::{decode_compact_nodes, encode_compact_nodes, Node, NodeId};
use crate::bencode::{decode, encode, Value};
use crate::info_hash::InfoHash;
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub type TransactionId = Bytes;

pub const ERROR_GENERIC: i64 = 201;
pub const ERROR_SERVER: i64 = 202;
pub const ERROR_PROTOCOL: i64 = 203;
pub const ERROR_METHOD_UNKNOWN: i64 = 204;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtQuery {
    Ping,
    FindNode {
        target: NodeId,
    },
    GetPeers {
        info_hash: InfoHash,
    },
    AnnouncePeer {
        info_hash: InfoHash,
        port: u16,
        token: Bytes,
        implied_port: bool,
    },
    Unknown {
        method: String,
    },
}

impl DhtQuery {
    pub fn method(&self) -> &str {
        match self {
            DhtQuery::Unknown { method } => method,
            known => known.known_method().unwrap_or_default(),
        }
    }

    /// The BEP-5 method name, or `None` for a method we do not speak.
    pub fn known_method(&self) -> Option<&'static str> {
        match self {
            DhtQuery::Ping => Some("ping"),
            DhtQuery::FindNode { .. } => Some("find_node"),
            DhtQuery::GetPeers { .. } => Some("get_peers"),
            DhtQuery::AnnouncePeer { .. } => Some("announce_peer"),
            DhtQuery::Unknown { .. } => None,
        }
    }
}

/// The `r` dictionary of a reply.
///
/// KRPC replies do not name the query they answer, so every optional field
/// is kept and the caller interprets them against what it asked.
#[derive(Debug, Clone)]
pub struct DhtResponse {
    pub id: NodeId,
    pub nodes: Option<Vec<Node>>,
    pub token: Option<Bytes>,
    pub values: Option<Vec<SocketAddr>>,
}

impl DhtResponse {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            nodes: None,
            token: None,
            values: None,
        }
    }

    pub fn with_nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    pub fn with_token(mut self, token: Bytes) -> Self {
        self.token = Some(token);
        self
    }
}

#[derive(Debug, Clone)]
pub enum DhtBody {
    Query {
        id: NodeId,
        query: DhtQuery,
    },
    Response(DhtResponse),
    Error {
        code: i64,
        message: String,
    },
    /// A query whose transaction id is readable but whose arguments are not.
    InvalidQuery {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct DhtMessage {
    pub transaction_id: TransactionId,
    pub body: DhtBody,
}

impl DhtMessage {
    pub fn query(transaction_id: TransactionId, id: NodeId, query: DhtQuery) -> Self {
        Self {
            transaction_id,
            body: DhtBody::Query { id, query },
        }
    }

    pub fn response(transaction_id: TransactionId, response: DhtResponse) -> Self {
        Self {
            transaction_id,
            body: DhtBody::Response(response),
        }
    }

    pub fn error(transaction_id: TransactionId, code: i64, message: &str) -> Self {
        Self {
            transaction_id,
            body: DhtBody::Error {
                code,
                message: message.to_string(),
            },
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, DhtError> {
        let value = decode(data)?;

        let transaction_id = value
            .bytes_field("t")
            .map_err(|_| DhtError::InvalidMessage("missing transaction id".into()))?
            .clone();

        let msg_type = value
            .get(b"y")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DhtError::InvalidMessage("missing message type".into()))?;

        let body = match msg_type {
            "q" => Self::parse_query(&value)?,
            "r" => Self::parse_response(&value)?,
            "e" => Self::parse_error(&value)?,
            _ => {
                return Err(DhtError::InvalidMessage(format!(
                    "unknown message type: {}",
                    msg_type
                )))
            }
        };

        Ok(Self {
            transaction_id,
            body,
        })
    }

    fn parse_query(value: &Value) -> Result<DhtBody, DhtError> {
        let method = value
            .get(b"q")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DhtError::InvalidMessage("missing query name".into()))?;

        let invalid = |reason: &str| DhtBody::InvalidQuery {
            reason: reason.to_string(),
        };

        let Ok(args) = value.dict_field("a") else {
            return Ok(invalid("missing query args"));
        };

        let Some(id) = args
            .get(b"id")
            .and_then(|v| v.as_bytes())
            .and_then(|b| NodeId::from_bytes(b).ok())
        else {
            return Ok(invalid("missing id"));
        };

        let info_hash = || {
            args.get(b"info_hash")
                .and_then(|v| v.as_bytes())
                .and_then(|b| InfoHash::from_bytes(b))
        };

        let query = match method {
            "ping" => DhtQuery::Ping,
            "find_node" => {
                let Some(target) = args
                    .get(b"target")
                    .and_then(|v| v.as_bytes())
                    .and_then(|b| NodeId::from_bytes(b).ok())
                else {
                    return Ok(invalid("missing target"));
                };
                DhtQuery::FindNode { target }
            }
            "get_peers" => {
                let Some(info_hash) = info_hash() else {
                    return Ok(invalid("missing info_hash"));
                };
                DhtQuery::GetPeers { info_hash }
            }
            "announce_peer" => {
                let Some(info_hash) = info_hash() else {
                    return Ok(invalid("missing info_hash"));
                };

                let implied_port = args
                    .get(b"implied_port")
                    .and_then(|v| v.as_integer())
                    .is_some_and(|v| v != 0);

                let port = match args.get(b"port").and_then(|v| v.as_integer()) {
                    Some(p) => match u16::try_from(p) {
                        Ok(p) => p,
                        Err(_) => return Ok(invalid("port out of range")),
                    },
                    None if implied_port => 0,
                    None => return Ok(invalid("missing port")),
                };

                let Some(token) = args.get(b"token").and_then(|v| v.as_bytes()).cloned() else {
                    return Ok(invalid("missing token"));
                };

                DhtQuery::AnnouncePeer {
                    info_hash,
                    port,
                    token,
                    implied_port,
                }
            }
            other => DhtQuery::Unknown {
                method: other.to_string(),
            },
        };

        Ok(DhtBody::Query { id, query })
    }

    fn parse_response(value: &Value) -> Result<DhtBody, DhtError> {
        let resp = value
            .dict_field("r")
            .map_err(|_| DhtError::InvalidMessage("missing response dict".into()))?;

        let id = resp
            .get(b"id")
            .and_then(|v| v.as_bytes())
            .and_then(|b| NodeId::from_bytes(b).ok())
            .ok_or_else(|| DhtError::InvalidMessage("missing id in response".into()))?;

        let nodes = resp
            .get(b"nodes")
            .and_then(|v| v.as_bytes())
            .map(|data| decode_compact_nodes(data));

        let values = resp.get(b"values").and_then(|v| v.as_list()).map(|list| {
            list.iter()
                .filter_map(|v| v.as_bytes())
                .filter_map(|b| decode_compact_peer(b))
                .collect()
        });

        let token = resp.get(b"token").and_then(|v| v.as_bytes()).cloned();

        Ok(DhtBody::Response(DhtResponse {
            id,
            nodes,
            token,
            values,
        }))
    }

    fn parse_error(value: &Value) -> Result<DhtBody, DhtError> {
        let error = value
            .list_field("e")
            .map_err(|_| DhtError::InvalidMessage("missing error list".into()))?;

        let code = error.first().and_then(|v| v.as_integer()).unwrap_or(0);

        let message = error
            .get(1)
            .and_then(|v| v.as_bytes())
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();

        Ok(DhtBody::Error { code, message })
    }

    pub fn encode(&self) -> Vec<u8> {
        let t = ("t", Value::Bytes(self.transaction_id.clone()));

        let value = match &self.body {
            DhtBody::Query { id, query } => {
                let mut args = vec![("id", Value::bytes(id.as_bytes()))];

                match query {
                    DhtQuery::Ping | DhtQuery::Unknown { .. } => {}
                    DhtQuery::FindNode { target } => {
                        args.push(("target", Value::bytes(target.as_bytes())));
                    }
                    DhtQuery::GetPeers { info_hash } => {
                        args.push(("info_hash", Value::bytes(info_hash.as_bytes())));
                    }
                    DhtQuery::AnnouncePeer {
                        info_hash,
                        port,
                        token,
                        implied_port,
                    } => {
                        args.push(("info_hash", Value::bytes(info_hash.as_bytes())));
                        args.push(("port", Value::Integer(*port as i64)));
                        args.push(("token", Value::Bytes(token.clone())));
                        if *implied_port {
                            args.push(("implied_port", Value::Integer(1)));
                        }
                    }
                }

                Value::dict([
                    t,
                    ("y", Value::string("q")),
                    ("q", Value::string(query.method())),
                    ("a", Value::dict(args)),
                ])
            }
            DhtBody::Response(response) => {
                let mut r = vec![("id", Value::bytes(response.id.as_bytes()))];

                if let Some(nodes) = &response.nodes {
                    r.push(("nodes", Value::bytes(encode_compact_nodes(nodes))));
                }
                if let Some(token) = &response.token {
                    r.push(("token", Value::Bytes(token.clone())));
                }
                if let Some(values) = &response.values {
                    let values = values
                        .iter()
                        .filter_map(encode_compact_peer)
                        .map(Value::bytes)
                        .collect();
                    r.push(("values", Value::List(values)));
                }

                Value::dict([t, ("y", Value::string("r")), ("r", Value::dict(r))])
            }
            DhtBody::Error { code, message } => Value::dict([
                t,
                ("y", Value::string("e")),
                (
                    "e",
                    Value::List(vec![Value::Integer(*code), Value::string(message)]),
                ),
            ]),
            DhtBody::InvalidQuery { reason } => Value::dict([
                t,
                ("y", Value::string("e")),
                (
                    "e",
                    Value::List(vec![Value::Integer(ERROR_PROTOCOL), Value::string(reason)]),
                ),
            ]),
        };

        encode(&value)
    }
}

pub fn decode_compact_peer(data: &[u8]) -> Option<SocketAddr> {
    if data.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
    let port = u16::from_be_bytes([data[4], data[5]]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

pub fn encode_compact_peer(addr: &SocketAddr) -> Option<[u8; 6]> {
    match addr {
        SocketAddr::V4(v4) => {
            let mut data = [0u8; 6];
            data[..4].copy_from_slice(&v4.ip().octets());
            data[4..].copy_from_slice(&v4.port().to_be_bytes());
            Some(data)
        }
        SocketAddr::V6(_) => None,
    }
}
