use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest frame accepted from a peer. A ut_metadata piece is 16 KiB, so
/// anything near this is hostile or broken.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Framed reader/writer over a peer byte stream.
///
/// Timeouts are applied by the caller, which knows which stage of the
/// session it is waiting in.
pub struct PeerTransport<S = TcpStream> {
    stream: S,
    read_buf: BytesMut,
}

impl<S> PeerTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
        }
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        self.stream.write_all(&handshake.encode()).await?;
        Ok(())
    }

    pub async fn receive_handshake(&mut self) -> Result<Handshake, PeerError> {
        self.fill(HANDSHAKE_LEN).await?;
        let data = self.read_buf.split_to(HANDSHAKE_LEN);
        Handshake::decode(&data)
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        self.stream.write_all(&message.encode()).await?;
        Ok(())
    }

    pub async fn receive_message(&mut self) -> Result<Message, PeerError> {
        self.fill(4).await?;

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::InvalidMessage(format!(
                "message too large: {}",
                length
            )));
        }

        let total_len = 4 + length;
        self.fill(total_len).await?;

        let data = self.read_buf.split_to(total_len);
        Message::decode(data.freeze())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn fill(&mut self, want: usize) -> Result<(), PeerError> {
        while self.read_buf.len() < want {
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }
        Ok(())
    }
}
