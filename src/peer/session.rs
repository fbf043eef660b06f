use super::error::PeerError;
use super::extension::{ExtensionHandshake, EXTENSION_HANDSHAKE_ID, UT_METADATA};
use super::message::{Handshake, Message};
use super::metadata::{
    metadata_piece_count, metadata_piece_size, MetadataMessage, MetadataMessageType,
};
use super::peer_id::PeerId;
use super::transport::PeerTransport;
use crate::bencode::{decode, Value};
use crate::info_hash::InfoHash;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// The id we ask peers to address ut_metadata messages to.
pub const OUR_UT_METADATA_ID: u8 = 1;
pub const CLIENT_VERSION: &str = concat!("dhtharvest ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// How long to wait for each requested metadata piece.
    pub piece_timeout: Duration,
    /// Largest `metadata_size` a peer may announce.
    pub max_metadata_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            piece_timeout: Duration::from_secs(10),
            max_metadata_size: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Dialing,
    Handshaking,
    ExtensionHandshake,
    RequestingPieces,
    Validating,
    Complete,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Dialing => "dialing",
            SessionState::Handshaking => "handshaking",
            SessionState::ExtensionHandshake => "exchanging extension handshakes",
            SessionState::RequestingPieces => "requesting pieces",
            SessionState::Validating => "validating",
            SessionState::Complete => "complete",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A verified info dictionary.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub info_hash: InfoHash,
    /// The decoded dictionary.
    pub info: Value,
    /// The bytes whose SHA-1 is `info_hash`.
    pub raw: Bytes,
}

/// Dials `addr` and downloads the info dictionary for `info_hash`.
///
/// ```no_run
/// use dhtharvest::info_hash::InfoHash;
/// use dhtharvest::peer::{fetch_metadata, PeerId, SessionConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let info_hash = InfoHash::from_hex("c12fe1c06bba254a9dc9f519b335aa7c1367a88a").unwrap();
/// let metadata = fetch_metadata(
///     "192.168.1.100:6881".parse()?,
///     info_hash,
///     PeerId::generate(),
///     &SessionConfig::default(),
/// )
/// .await?;
/// println!("{} bytes of metadata", metadata.raw.len());
/// # Ok(())
/// # }
/// ```
pub async fn fetch_metadata(
    addr: SocketAddr,
    info_hash: InfoHash,
    peer_id: PeerId,
    config: &SessionConfig,
) -> Result<Metadata, PeerError> {
    trace!(%info_hash, peer = %addr, "dialing");

    let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| PeerError::Timeout(SessionState::Dialing))?
        .map_err(PeerError::Dial)?;

    MetadataSession::new(stream, info_hash, peer_id, config.clone())
        .run()
        .await
}

/// One ut_metadata download over an established stream.
///
/// The session walks `Handshaking → ExtensionHandshake → RequestingPieces →
/// Validating` and ends in `Complete` or `Failed`. It keeps a single piece
/// request outstanding, never serves metadata and never retries.
pub struct MetadataSession<S = TcpStream> {
    transport: PeerTransport<S>,
    info_hash: InfoHash,
    peer_id: PeerId,
    config: SessionConfig,
    state: SessionState,
}

impl<S> MetadataSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, info_hash: InfoHash, peer_id: PeerId, config: SessionConfig) -> Self {
        Self {
            transport: PeerTransport::new(stream),
            info_hash,
            peer_id,
            config,
            state: SessionState::Dialing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn run(mut self) -> Result<Metadata, PeerError> {
        match self.drive().await {
            Ok(metadata) => {
                self.transition(SessionState::Complete);
                Ok(metadata)
            }
            Err(e) => {
                trace!(info_hash = %self.info_hash, state = %self.state, error = %e, "session failed");
                self.transition(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<Metadata, PeerError> {
        self.transition(SessionState::Handshaking);
        self.handshake().await?;

        self.transition(SessionState::ExtensionHandshake);
        let (ut_metadata, size) = self.extension_handshake().await?;

        self.transition(SessionState::RequestingPieces);
        let raw = self.request_pieces(ut_metadata, size).await?;

        self.transition(SessionState::Validating);
        validate_metadata(self.info_hash, raw)
    }

    fn transition(&mut self, next: SessionState) {
        trace!(info_hash = %self.info_hash, from = %self.state, to = %next, "session state");
        self.state = next;
    }

    async fn handshake(&mut self) -> Result<(), PeerError> {
        let ours = Handshake::new(self.info_hash, *self.peer_id.as_bytes());
        let limit = self.config.handshake_timeout;
        let transport = &mut self.transport;

        let theirs = within(limit, SessionState::Handshaking, async {
            transport.send_handshake(&ours).await?;
            transport.receive_handshake().await
        })
        .await?;

        if theirs.info_hash != self.info_hash {
            return Err(PeerError::InfoHashMismatch);
        }
        if !theirs.supports_extension_protocol() {
            return Err(PeerError::ExtensionUnsupported);
        }
        Ok(())
    }

    /// Returns the peer's ut_metadata id and the announced metadata size.
    async fn extension_handshake(&mut self) -> Result<(u8, usize), PeerError> {
        let ours = ExtensionHandshake {
            client: Some(CLIENT_VERSION.to_string()),
            reqq: Some(1),
            ..ExtensionHandshake::with_extensions(&[(UT_METADATA, OUR_UT_METADATA_ID)])
        };
        let limit = self.config.handshake_timeout;
        let transport = &mut self.transport;

        let theirs = within(limit, SessionState::ExtensionHandshake, async {
            transport
                .send_message(&Message::Extended {
                    id: EXTENSION_HANDSHAKE_ID,
                    payload: ours.encode(),
                })
                .await?;

            loop {
                match transport.receive_message().await? {
                    Message::Extended {
                        id: EXTENSION_HANDSHAKE_ID,
                        payload,
                    } => return ExtensionHandshake::decode(&payload),
                    other => trace!("skipping {:?} before extension handshake", other),
                }
            }
        })
        .await?;

        let ut_metadata = theirs
            .get_extension_id(UT_METADATA)
            .ok_or(PeerError::MetadataUnsupported)?;

        let size = theirs
            .metadata_size
            .and_then(|s| usize::try_from(s).ok())
            .filter(|s| (1..=self.config.max_metadata_size).contains(s))
            .ok_or(PeerError::InvalidMetadataSize(theirs.metadata_size))?;

        trace!(
            info_hash = %self.info_hash,
            client = ?theirs.client,
            size,
            "peer offers metadata"
        );
        Ok((ut_metadata, size))
    }

    async fn request_pieces(&mut self, ut_metadata: u8, size: usize) -> Result<Bytes, PeerError> {
        let count = metadata_piece_count(size) as u32;
        let mut raw = Vec::with_capacity(size);

        for index in 0..count {
            self.transport
                .send_message(&Message::Extended {
                    id: ut_metadata,
                    payload: MetadataMessage::request(index).encode(),
                })
                .await?;

            let limit = self.config.piece_timeout;
            let msg = within(
                limit,
                SessionState::RequestingPieces,
                next_metadata_message(&mut self.transport),
            )
            .await?;

            if msg.msg_type == MetadataMessageType::Reject {
                return Err(PeerError::PieceRejected(msg.piece));
            }
            if msg.piece != index || msg.piece >= count {
                return Err(PeerError::PieceOutOfRange {
                    got: msg.piece,
                    expected: index,
                });
            }
            if let Some(total) = msg.total_size {
                if total != size as i64 {
                    return Err(PeerError::TotalSizeMismatch {
                        got: total,
                        expected: size,
                    });
                }
            }

            let data = msg.data.unwrap_or_default();
            let expected = metadata_piece_size(index, size);
            if data.len() > expected {
                return Err(PeerError::OversizedPiece {
                    piece: index,
                    len: data.len(),
                    expected,
                });
            }
            if data.len() < expected {
                return Err(PeerError::UndersizedPiece {
                    piece: index,
                    len: data.len(),
                    expected,
                });
            }

            raw.extend_from_slice(&data);
        }

        Ok(Bytes::from(raw))
    }
}

/// Reads until a ut_metadata `data` or `reject` addressed to us arrives.
/// Requests sent to us and unrelated messages are skipped.
async fn next_metadata_message<S>(
    transport: &mut PeerTransport<S>,
) -> Result<MetadataMessage, PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match transport.receive_message().await? {
            Message::Extended {
                id: OUR_UT_METADATA_ID,
                payload,
            } => {
                let msg = MetadataMessage::decode(&payload)?;
                if msg.msg_type == MetadataMessageType::Request {
                    trace!("ignoring metadata request for piece {}", msg.piece);
                    continue;
                }
                return Ok(msg);
            }
            other => trace!("skipping {:?} while waiting for metadata", other),
        }
    }
}

/// Checks reassembled metadata against the info hash and decodes it.
pub fn validate_metadata(info_hash: InfoHash, raw: Bytes) -> Result<Metadata, PeerError> {
    if InfoHash::of(&raw) != info_hash {
        return Err(PeerError::HashMismatch);
    }

    let info = decode(&raw)?;
    if info.as_dict().is_none() {
        return Err(PeerError::NotADictionary);
    }

    Ok(Metadata {
        info_hash,
        info,
        raw,
    })
}

async fn within<T>(
    limit: Duration,
    state: SessionState,
    fut: impl Future<Output = Result<T, PeerError>>,
) -> Result<T, PeerError> {
    timeout(limit, fut)
        .await
        .map_err(|_| PeerError::Timeout(state))?
}
