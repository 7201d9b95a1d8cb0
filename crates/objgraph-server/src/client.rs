//! Minimal protocol client.
//!
//! Sends messages and receives framed replies over any stream transport.
//! Used by the integration tests; also handy for poking a running daemon.

#[cfg(unix)]
use std::path::Path;

use objgraph_proto::{encode, FrameReader, Message};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::error::ClientError;

pub struct Client<S> {
    stream: S,
    frames: FrameReader,
}

#[cfg(unix)]
impl Client<UnixStream> {
    pub async fn connect_unix(path: &Path) -> Result<Self, ClientError> {
        Ok(Self::new(UnixStream::connect(path).await?))
    }
}

impl Client<TcpStream> {
    pub async fn connect_tcp(addr: &str) -> Result<Self, ClientError> {
        Ok(Self::new(TcpStream::connect(addr).await?))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    /// Wrap an already connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            frames: FrameReader::new(),
        }
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), ClientError> {
        let bytes = encode(msg)?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive the next message, reading from the transport as needed.
    pub async fn recv(&mut self) -> Result<Message, ClientError> {
        loop {
            if let Some(msg) = self.frames.next_message()? {
                return Ok(msg);
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.frames.feed(&chunk[..n]);
        }
    }
}
