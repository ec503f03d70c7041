//! Wire framing.
//!
//! One TCP stream per session carries every channel: frames are
//! length-prefixed, and the first payload byte selects the channel — JSON
//! control messages, binary delta frames, or binary leaderboard frames.
//! Serialization stays explicit and versionable; the JSON channel is only
//! for low-rate bootstrap/input traffic.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

const KIND_CONTROL: u8 = 0;
const KIND_DELTA: u8 = 1;
const KIND_LEADERBOARD: u8 = 2;

/// Frames larger than this are treated as protocol corruption.
const MAX_FRAME_LEN: usize = 1 << 24;

/// One framed payload on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum WirePacket {
    /// JSON control message ([`crate::msg`]).
    Control(Bytes),
    /// Per-tick binary delta frame ([`crate::protocol`]).
    Delta(Bytes),
    /// Periodic binary leaderboard frame.
    Leaderboard(Bytes),
}

impl WirePacket {
    /// Wraps a serializable control message.
    pub fn control<T: Serialize>(msg: &T) -> anyhow::Result<WirePacket> {
        let payload = serde_json::to_vec(msg).context("serialize control msg")?;
        Ok(WirePacket::Control(Bytes::from(payload)))
    }

    /// Parses this packet as a control message.
    pub fn parse_control<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        match self {
            WirePacket::Control(bytes) => {
                serde_json::from_slice(bytes).context("deserialize control msg")
            }
            other => anyhow::bail!("expected control packet, got {other:?}"),
        }
    }

    fn kind(&self) -> u8 {
        match self {
            WirePacket::Control(_) => KIND_CONTROL,
            WirePacket::Delta(_) => KIND_DELTA,
            WirePacket::Leaderboard(_) => KIND_LEADERBOARD,
        }
    }

    fn payload(&self) -> &Bytes {
        match self {
            WirePacket::Control(b) | WirePacket::Delta(b) | WirePacket::Leaderboard(b) => b,
        }
    }
}

async fn write_packet<W: AsyncWrite + Unpin>(w: &mut W, pkt: &WirePacket) -> anyhow::Result<()> {
    let payload = pkt.payload();
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u32(payload.len() as u32 + 1);
    buf.put_u8(pkt.kind());
    buf.extend_from_slice(payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

async fn read_packet<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<WirePacket> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        anyhow::bail!("bad frame length: {len}");
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await.context("tcp read payload")?;

    let kind = payload[0];
    let body = Bytes::from(payload).slice(1..);
    match kind {
        KIND_CONTROL => Ok(WirePacket::Control(body)),
        KIND_DELTA => Ok(WirePacket::Delta(body)),
        KIND_LEADERBOARD => Ok(WirePacket::Leaderboard(body)),
        other => anyhow::bail!("unknown frame kind: {other}"),
    }
}

/// Bidirectional framed connection.
#[derive(Debug)]
pub struct WireConn {
    stream: TcpStream,
}

impl WireConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, pkt: &WirePacket) -> anyhow::Result<()> {
        write_packet(&mut self.stream, pkt).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<WirePacket> {
        read_packet(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned read/write halves for task-per-side IO.
    pub fn into_split(self) -> (WireReader, WireWriter) {
        let (r, w) = self.stream.into_split();
        (WireReader { half: r }, WireWriter { half: w })
    }
}

/// Read half of a split connection.
#[derive(Debug)]
pub struct WireReader {
    half: OwnedReadHalf,
}

impl WireReader {
    pub async fn recv(&mut self) -> anyhow::Result<WirePacket> {
        read_packet(&mut self.half).await
    }
}

/// Write half of a split connection.
#[derive(Debug)]
pub struct WireWriter {
    half: OwnedWriteHalf,
}

impl WireWriter {
    pub async fn send(&mut self, pkt: &WirePacket) -> anyhow::Result<()> {
        write_packet(&mut self.half, pkt).await
    }
}

/// TCP server listener.
pub struct WireListener {
    listener: TcpListener,
}

impl WireListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(WireConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((WireConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{ClientMsg, Key};

    #[tokio::test]
    async fn packets_roundtrip_over_localhost() -> anyhow::Result<()> {
        let listener = WireListener::bind("127.0.0.1:0".parse()?).await?;
        let addr = listener.local_addr()?;

        let client = tokio::spawn(async move {
            let mut conn = WireConn::connect(addr).await?;
            conn.send(&WirePacket::control(&ClientMsg::Key {
                key: Key::Up,
                state: true,
            })?)
            .await?;
            conn.send(&WirePacket::Delta(Bytes::from_static(&[1, 2, 3])))
                .await?;
            Ok::<_, anyhow::Error>(())
        });

        let (mut conn, _) = listener.accept().await?;
        let first = conn.recv().await?;
        assert_eq!(
            first.parse_control::<ClientMsg>()?,
            ClientMsg::Key {
                key: Key::Up,
                state: true
            }
        );
        let second = conn.recv().await?;
        assert_eq!(second, WirePacket::Delta(Bytes::from_static(&[1, 2, 3])));

        client.await??;
        Ok(())
    }
}
