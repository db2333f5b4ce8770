use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::pgrelay::{Error, Result};
use crate::pgrelay::pg::protocol::{Message, MessageParser};

/// Reads and writes protocol Messages over a transport.
///
/// Only used while the proxy is party to the conversation (the handshake);
/// the steady-state relay takes the transport back with into_parts and
/// copies opaque bytes.
pub struct MessageStream<S> {
    stream: S,
    parser: MessageParser,
}

impl<S: AsyncRead + AsyncWrite + Unpin> MessageStream<S> {
    /// A stream using tagged framing (the backend side).
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            parser: MessageParser::new(),
        }
    }

    /// A client-facing stream, starting in the untagged startup phase.
    pub fn new_startup(stream: S) -> Self {
        Self {
            stream,
            parser: MessageParser::new_startup(),
        }
    }

    pub fn leave_startup_phase(&mut self) {
        self.parser.leave_startup_phase();
    }

    /// Read the next complete Message. Returns Error::closed if the peer
    /// closes before one arrives.
    pub async fn next(&mut self) -> Result<Message> {
        loop {
            if let Some(result) = self.parser.next() {
                let msg = result?;
                trace!(?msg, "received message");
                return Ok(msg);
            }
            let n = self.stream.read_buf(self.parser.bytes_mut()).await?;
            if n == 0 {
                return Err(Error::closed());
            }
        }
    }

    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        trace!(?msg, "sending message");
        self.stream.write_all(msg.as_slice()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Write a raw byte, used for the single-byte SSLRequest replies.
    pub async fn send_byte(&mut self, b: u8) -> Result<()> {
        self.stream.write_all(&[b]).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consume the stream, returning the transport and any bytes buffered
    /// past the last returned Message.
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.stream, self.parser.into_residual())
    }
}
