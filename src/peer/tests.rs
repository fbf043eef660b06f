use super::*;
use crate::bencode::{encode, Value};
use crate::info_hash::InfoHash;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

const MOCK_UT_METADATA_ID: u8 = 3;
const OUTSTANDING_WINDOW: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Honest,
    Reject,
    Silent,
    Oversized,
    Undersized,
    WrongPiece,
    WrongTotalSize,
    NoExtensionBit,
    NoUtMetadata,
    HugeSize,
}

/// Serves `metadata` over ut_metadata, misbehaving as `mode` says.
async fn mock_peer(stream: DuplexStream, info_hash: InfoHash, metadata: Vec<u8>, mode: Mode) {
    let mut t = PeerTransport::new(stream);
    if t.receive_handshake().await.is_err() {
        return;
    }

    let mut hs = Handshake::new(info_hash, [9u8; 20]);
    if mode == Mode::NoExtensionBit {
        hs.reserved = [0u8; 8];
    }
    if t.send_handshake(&hs).await.is_err() {
        return;
    }

    // Standard messages ahead of the extension handshake must be skipped.
    let _ = t.send_message(&Message::Bitfield(Bytes::from_static(&[0xFF]))).await;
    let _ = t.send_message(&Message::KeepAlive).await;

    let mut ext = ExtensionHandshake::new();
    if mode != Mode::NoUtMetadata {
        ext.extensions
            .insert(UT_METADATA.to_string(), MOCK_UT_METADATA_ID);
    }
    ext.metadata_size = Some(if mode == Mode::HugeSize {
        1 << 40
    } else {
        metadata.len() as i64
    });
    let _ = t
        .send_message(&Message::Extended {
            id: EXTENSION_HANDSHAKE_ID,
            payload: ext.encode(),
        })
        .await;

    let mut next_piece = 0u32;
    while let Ok(msg) = t.receive_message().await {
        let Message::Extended {
            id: MOCK_UT_METADATA_ID,
            payload,
        } = msg
        else {
            continue;
        };
        let Ok(req) = MetadataMessage::decode(&payload) else {
            continue;
        };

        // One request outstanding at a time: anything arriving before the
        // reply ends the connection.
        if timeout(OUTSTANDING_WINDOW, t.receive_message()).await.is_ok() {
            return;
        }

        let piece = req.piece;
        if piece != next_piece {
            let _ = t
                .send_message(&Message::Extended {
                    id: OUR_UT_METADATA_ID,
                    payload: MetadataMessage::reject(piece).encode(),
                })
                .await;
            continue;
        }
        next_piece += 1;

        let total = metadata.len() as i64;
        let start = (piece as usize * METADATA_PIECE_SIZE).min(metadata.len());
        let end = (start + METADATA_PIECE_SIZE).min(metadata.len());
        let mut chunk = metadata[start..end].to_vec();

        let reply = match mode {
            Mode::Silent => continue,
            Mode::Reject => MetadataMessage::reject(piece),
            Mode::Oversized => {
                chunk.push(0);
                MetadataMessage::data(piece, total, Bytes::from(chunk))
            }
            Mode::Undersized => {
                chunk.pop();
                MetadataMessage::data(piece, total, Bytes::from(chunk))
            }
            Mode::WrongPiece => MetadataMessage::data(piece + 1, total, Bytes::from(chunk)),
            Mode::WrongTotalSize => MetadataMessage::data(piece, total + 1, Bytes::from(chunk)),
            _ => MetadataMessage::data(piece, total, Bytes::from(chunk)),
        };

        // A request addressed to us in between must be ignored.
        let _ = t
            .send_message(&Message::Extended {
                id: OUR_UT_METADATA_ID,
                payload: MetadataMessage::request(0).encode(),
            })
            .await;

        if t
            .send_message(&Message::Extended {
                id: OUR_UT_METADATA_ID,
                payload: reply.encode(),
            })
            .await
            .is_err()
        {
            break;
        }
    }
}

fn test_config() -> SessionConfig {
    SessionConfig {
        handshake_timeout: Duration::from_secs(2),
        piece_timeout: Duration::from_millis(300),
        ..SessionConfig::default()
    }
}

async fn fetch_from_mock(
    metadata: Vec<u8>,
    info_hash: InfoHash,
    mode: Mode,
) -> Result<Metadata, PeerError> {
    let (client, server) = duplex(64 * 1024);
    tokio::spawn(mock_peer(server, info_hash, metadata, mode));
    MetadataSession::new(client, info_hash, PeerId::generate(), test_config())
        .run()
        .await
}

fn single_file_info() -> Vec<u8> {
    encode(&Value::dict([
        ("length", Value::Integer(100)),
        ("name", Value::string("a.txt")),
    ]))
}

/// An info dictionary spanning three metadata pieces.
fn large_info() -> Vec<u8> {
    let info = encode(&Value::dict([
        ("length", Value::Integer(1 << 30)),
        ("name", Value::string("big.iso")),
        ("piece length", Value::Integer(1 << 18)),
        ("pieces", Value::bytes(vec![0xABu8; 40_000])),
    ]));
    assert_eq!(metadata_piece_count(info.len()), 3);
    info
}

#[test]
fn test_peer_id_generate() {
    let id1 = PeerId::generate();
    let id2 = PeerId::generate();
    assert_ne!(id1.0, id2.0);
    assert_eq!(&id1.0[..8], b"-DH0001-");
    assert_eq!(id1.client_id(), Some("DH0001"));
}

#[test]
fn test_handshake_encode_decode() {
    let info_hash = InfoHash([1u8; 20]);
    let peer_id = [2u8; 20];

    let encoded = Handshake::new(info_hash, peer_id).encode();
    assert_eq!(encoded.len(), HANDSHAKE_LEN);
    assert_eq!(encoded[0], 19);
    assert_eq!(&encoded[20..28], &[0, 0, 0, 0, 0, 0x10, 0, 0]);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded.info_hash, info_hash);
    assert_eq!(decoded.peer_id, peer_id);
    assert!(decoded.supports_extension_protocol());
}

#[test]
fn test_handshake_rejects_wrong_protocol() {
    let mut encoded = Handshake::new(InfoHash([1u8; 20]), [2u8; 20])
        .encode()
        .to_vec();
    encoded[5] = b'X';
    assert!(matches!(
        Handshake::decode(&encoded),
        Err(PeerError::InvalidHandshake)
    ));
    assert!(Handshake::decode(&encoded[..40]).is_err());
}

#[test]
fn test_message_encode_decode() {
    let messages = vec![
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have { piece: 42 },
    ];

    for msg in messages {
        let decoded = Message::decode(msg.encode()).unwrap();

        match (&msg, &decoded) {
            (Message::KeepAlive, Message::KeepAlive) => {}
            (Message::Choke, Message::Choke) => {}
            (Message::Unchoke, Message::Unchoke) => {}
            (Message::Interested, Message::Interested) => {}
            (Message::NotInterested, Message::NotInterested) => {}
            (Message::Have { piece: p1 }, Message::Have { piece: p2 }) => {
                assert_eq!(p1, p2);
            }
            _ => panic!("message mismatch"),
        }
    }
}

#[test]
fn test_unknown_message_id_is_kept() {
    // port message (id 9) carrying 6881
    let frame = Bytes::from_static(&[0, 0, 0, 3, 9, 0x1A, 0xE1]);
    match Message::decode(frame).unwrap() {
        Message::Other { id, payload } => {
            assert_eq!(id, 9);
            assert_eq!(&payload[..], &[0x1A, 0xE1]);
        }
        other => panic!("expected other, got {:?}", other),
    }
}

#[test]
fn test_extended_message_roundtrip() {
    let msg = Message::Extended {
        id: 3,
        payload: Bytes::from_static(b"d1:ai1ee"),
    };
    match Message::decode(msg.encode()).unwrap() {
        Message::Extended { id, payload } => {
            assert_eq!(id, 3);
            assert_eq!(&payload[..], b"d1:ai1ee");
        }
        other => panic!("expected extended, got {:?}", other),
    }

    assert!(Message::decode(Bytes::from_static(&[0, 0, 0, 1, 20])).is_err());
}

#[test]
fn test_extension_handshake() {
    let mut hs = ExtensionHandshake::new();
    hs.extensions.insert("ut_pex".to_string(), 1);
    hs.extensions.insert("ut_metadata".to_string(), 2);
    hs.client = Some(CLIENT_VERSION.to_string());
    hs.metadata_size = Some(31337);

    let decoded = ExtensionHandshake::decode(&hs.encode()).unwrap();

    assert_eq!(decoded.get_extension_id("ut_pex"), Some(1));
    assert_eq!(decoded.get_extension_id("ut_metadata"), Some(2));
    assert_eq!(decoded.client.as_deref(), Some(CLIENT_VERSION));
    assert_eq!(decoded.metadata_size, Some(31337));
}

#[test]
fn test_extension_handshake_drops_disabled() {
    let decoded =
        ExtensionHandshake::decode(b"d1:md11:ut_metadatai0e6:ut_pexi300eee").unwrap();
    assert_eq!(decoded.get_extension_id("ut_metadata"), None);
    assert_eq!(decoded.get_extension_id("ut_pex"), None);

    assert!(ExtensionHandshake::decode(b"li1ee").is_err());
}

#[tokio::test]
async fn test_transport_rejects_huge_frame() {
    let (mut a, b) = duplex(1024);
    a.write_all(&(2 * 1024 * 1024u32).to_be_bytes())
        .await
        .unwrap();

    let mut t = PeerTransport::new(b);
    assert!(matches!(
        t.receive_message().await,
        Err(PeerError::InvalidMessage(_))
    ));
}

#[tokio::test]
async fn test_transport_eof_is_connection_closed() {
    let (mut a, b) = duplex(1024);
    a.write_all(&[0, 0]).await.unwrap();
    drop(a);

    let mut t = PeerTransport::new(b);
    assert!(matches!(
        t.receive_message().await,
        Err(PeerError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_session_sends_expected_handshakes() {
    let info_hash = InfoHash([7u8; 20]);
    let (client, server) = duplex(64 * 1024);
    let session = tokio::spawn(
        MetadataSession::new(client, info_hash, PeerId::generate(), test_config()).run(),
    );

    let mut t = PeerTransport::new(server);
    let theirs = t.receive_handshake().await.unwrap();
    assert_eq!(theirs.info_hash, info_hash);
    assert_eq!(theirs.reserved, [0, 0, 0, 0, 0, 0x10, 0, 0]);
    assert_eq!(&theirs.peer_id[..8], b"-DH0001-");

    t.send_handshake(&Handshake::new(info_hash, [9u8; 20]))
        .await
        .unwrap();

    match t.receive_message().await.unwrap() {
        Message::Extended { id: 0, payload } => {
            let hs = ExtensionHandshake::decode(&payload).unwrap();
            assert_eq!(hs.get_extension_id(UT_METADATA), Some(OUR_UT_METADATA_ID));
            assert_eq!(hs.client.as_deref(), Some(CLIENT_VERSION));
            assert_eq!(hs.reqq, Some(1));
        }
        other => panic!("expected extension handshake, got {:?}", other),
    }

    drop(t);
    let result = session.await.unwrap();
    assert!(matches!(result, Err(PeerError::ConnectionClosed)));
}

#[tokio::test]
async fn test_fetch_single_piece() {
    let info = single_file_info();
    let info_hash = InfoHash::of(&info);

    let metadata = fetch_from_mock(info.clone(), info_hash, Mode::Honest)
        .await
        .unwrap();

    assert_eq!(metadata.info_hash, info_hash);
    assert_eq!(&metadata.raw[..], &info[..]);
    assert_eq!(metadata.info.int_field("length").unwrap(), 100);
}

#[tokio::test]
async fn test_fetch_reassembles_three_pieces() {
    let info = large_info();
    let info_hash = InfoHash::of(&info);

    let metadata = fetch_from_mock(info.clone(), info_hash, Mode::Honest)
        .await
        .unwrap();

    assert_eq!(metadata.raw.len(), info.len());
    assert_eq!(
        metadata.info.bytes_field("pieces").unwrap().len(),
        40_000
    );
}

/// Drives the mock peer by hand up to its extension handshake.
async fn raw_client(info: Vec<u8>) -> PeerTransport<DuplexStream> {
    let info_hash = InfoHash::of(&info);
    let (client, server) = duplex(64 * 1024);
    tokio::spawn(mock_peer(server, info_hash, info, Mode::Honest));

    let mut t = PeerTransport::new(client);
    t.send_handshake(&Handshake::new(info_hash, [1u8; 20]))
        .await
        .unwrap();
    t.receive_handshake().await.unwrap();
    loop {
        if let Message::Extended {
            id: EXTENSION_HANDSHAKE_ID,
            ..
        } = t.receive_message().await.unwrap()
        {
            return t;
        }
    }
}

async fn request(t: &mut PeerTransport<DuplexStream>, piece: u32) {
    t.send_message(&Message::Extended {
        id: MOCK_UT_METADATA_ID,
        payload: MetadataMessage::request(piece).encode(),
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_peer_enforces_sequential_requests() {
    // Out of order: rejected.
    let mut t = raw_client(large_info()).await;
    request(&mut t, 1).await;
    let reply = loop {
        if let Message::Extended { payload, .. } = t.receive_message().await.unwrap() {
            let msg = MetadataMessage::decode(&payload).unwrap();
            if msg.msg_type != MetadataMessageType::Request {
                break msg;
            }
        }
    };
    assert_eq!(reply.msg_type, MetadataMessageType::Reject);
    assert_eq!(reply.piece, 1);

    // Pipelined: the peer hangs up.
    let mut t = raw_client(large_info()).await;
    request(&mut t, 0).await;
    request(&mut t, 1).await;
    let closed = timeout(Duration::from_secs(2), async {
        loop {
            if t.receive_message().await.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn test_fetch_hash_mismatch() {
    let info = single_file_info();
    let wrong = InfoHash([0x42; 20]);

    let err = fetch_from_mock(info, wrong, Mode::Honest).await.unwrap_err();
    assert!(matches!(err, PeerError::HashMismatch));
    assert_eq!(err.kind(), FailureKind::Validation);
    assert!(err.blacklists_peer());
}

#[tokio::test]
async fn test_fetch_rejected() {
    let info = single_file_info();
    let err = fetch_from_mock(info.clone(), InfoHash::of(&info), Mode::Reject)
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::PieceRejected(0)));
}

#[tokio::test]
async fn test_fetch_piece_size_violations() {
    let info = large_info();
    let info_hash = InfoHash::of(&info);

    let err = fetch_from_mock(info.clone(), info_hash, Mode::Oversized)
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::OversizedPiece { piece: 0, .. }));

    let err = fetch_from_mock(info.clone(), info_hash, Mode::Undersized)
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::UndersizedPiece { piece: 0, .. }));

    let err = fetch_from_mock(info.clone(), info_hash, Mode::WrongPiece)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PeerError::PieceOutOfRange {
            got: 1,
            expected: 0
        }
    ));

    let err = fetch_from_mock(info, info_hash, Mode::WrongTotalSize)
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::TotalSizeMismatch { .. }));
}

#[tokio::test]
async fn test_fetch_capability_failures() {
    let info = single_file_info();
    let info_hash = InfoHash::of(&info);

    let err = fetch_from_mock(info.clone(), info_hash, Mode::NoExtensionBit)
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::ExtensionUnsupported));

    let err = fetch_from_mock(info.clone(), info_hash, Mode::NoUtMetadata)
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::MetadataUnsupported));

    let err = fetch_from_mock(info, info_hash, Mode::HugeSize)
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::InvalidMetadataSize(Some(_))));
    assert_eq!(err.kind(), FailureKind::Protocol);
}

#[tokio::test]
async fn test_fetch_info_hash_mismatch_in_handshake() {
    let info = single_file_info();
    let (client, server) = duplex(64 * 1024);
    tokio::spawn(mock_peer(server, InfoHash([1u8; 20]), info, Mode::Honest));

    let err = MetadataSession::new(client, InfoHash([2u8; 20]), PeerId::generate(), test_config())
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::InfoHashMismatch));
}

#[tokio::test]
async fn test_fetch_piece_timeout() {
    let info = single_file_info();
    let err = fetch_from_mock(info.clone(), InfoHash::of(&info), Mode::Silent)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PeerError::Timeout(SessionState::RequestingPieces)
    ));
    assert_eq!(err.kind(), FailureKind::Timeout);
    assert!(!err.blacklists_peer());
}

#[tokio::test]
async fn test_fetch_not_a_dictionary() {
    let info = b"li1ei2ee".to_vec();
    let err = fetch_from_mock(info.clone(), InfoHash::of(&info), Mode::Honest)
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::NotADictionary));
}

#[tokio::test]
async fn test_fetch_metadata_dial_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fetch_metadata(addr, InfoHash([1u8; 20]), PeerId::generate(), &test_config())
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::Dial(_)));
    assert!(err.blacklists_peer());
}

#[test]
fn test_validate_metadata() {
    let info = single_file_info();
    let metadata = validate_metadata(InfoHash::of(&info), Bytes::from(info.clone())).unwrap();
    assert_eq!(&metadata.info.bytes_field("name").unwrap()[..], b"a.txt");

    assert!(matches!(
        validate_metadata(InfoHash::of(b"x"), Bytes::from(info)),
        Err(PeerError::HashMismatch)
    ));

    let truncated = b"d4:name".to_vec();
    assert!(matches!(
        validate_metadata(InfoHash::of(&truncated), Bytes::from(truncated)),
        Err(PeerError::Bencode(_))
    ));
}
