//! Framed duplex transport shared by the transfer client and the relay.
//!
//! Frames are a u32 big-endian length prefix followed by that many bytes of
//! UTF-8 JSON. One frame carries exactly one [`Envelope`].

use std::io;
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time;

use crate::error::TransferError;
use crate::protocol::{Envelope, MessageType};
use crate::MAX_PAYLOAD_SIZE;

/// Upper bound on a single frame. Base64 inflates the payload by 4/3 and the
/// envelope adds a little framing on top, so this sits well above
/// [`MAX_PAYLOAD_SIZE`].
pub const MAX_FRAME_SIZE: usize = MAX_PAYLOAD_SIZE * 2;

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> io::Result<()> {
    writer.write_u32(text.len() as u32).await?;
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await
}

/// Reads one length-prefixed frame, rejecting oversized or non-UTF-8 frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<String> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes"),
        ));
    }
    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer).await?;
    String::from_utf8(buffer)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame is not valid UTF-8"))
}

/// A client connection to the relay. All receives are bounded by the same
/// deadline; the transfer aborts with `Timeout` when it elapses.
pub struct Connection {
    read: OwnedReadHalf,
    write: OwnedWriteHalf,
    deadline: Duration,
}

impl Connection {
    pub async fn dial(relay_addr: &str, deadline: Duration) -> Result<Self, TransferError> {
        debug!("dialing relay at {relay_addr}");
        let stream = time::timeout(deadline, TcpStream::connect(relay_addr))
            .await
            .map_err(|_| TransferError::Timeout)?
            .map_err(TransferError::Connect)?;
        let (read, write) = stream.into_split();
        Ok(Connection {
            read,
            write,
            deadline,
        })
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), TransferError> {
        let text = envelope.encode()?;
        debug!("sending {}", envelope.kind);
        write_frame(&mut self.write, &text).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Envelope, TransferError> {
        let frame = match time::timeout(self.deadline, read_frame(&mut self.read)).await {
            Err(_) => return Err(TransferError::Timeout),
            Ok(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(TransferError::ProtocolViolation(e.to_string()))
            }
            Ok(Err(e)) => return Err(TransferError::Io(e)),
            Ok(Ok(frame)) => frame,
        };
        let envelope = Envelope::decode(&frame)?;
        debug!("received {}", envelope.kind);
        Ok(envelope)
    }

    /// Best-effort goodbye: a CLOSE frame, then the write side shuts down.
    pub async fn close(mut self, room_id: &str) {
        let _ = self.send(&Envelope::bare(MessageType::Close, room_id)).await;
        let _ = self.write.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, r#"{"hello":"world"}"#).await.unwrap();
        let frame = read_frame(&mut b).await.unwrap();
        assert_eq!(frame, r#"{"hello":"world"}"#);
    }

    #[tokio::test]
    async fn test_frames_stay_ordered() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, "first").await.unwrap();
        write_frame(&mut a, "second").await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), "first");
        assert_eq!(read_frame(&mut b).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        // Hand-write a length prefix beyond the cap; no body needed.
        a.write_u32((MAX_FRAME_SIZE + 1) as u32).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_invalid_utf8_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(2).await.unwrap();
        a.write_all(&[0xFF, 0xFE]).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_eof_surfaces_as_error() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b).await.is_err());
    }
}
