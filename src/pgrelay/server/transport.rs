use std::convert::TryFrom;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::{ClientConfig, ServerConfig, ServerName};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::pgrelay::{Error, Result};

/// ServerTransport is an optionally TLS encrypted TCP session from a remote
/// client to our server. It starts out plaintext; the SSLRequest flow
/// upgrades it in place.
pub enum ServerTransport {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl ServerTransport {
    pub fn new(stream: TcpStream) -> Self {
        ServerTransport::Plain(stream)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, ServerTransport::Tls(_))
    }

    /// Perform the server side of the TLS handshake. The caller has already
    /// answered the SSLRequest; the next bytes on the wire are TLS records.
    pub async fn upgrade(self, config: Arc<ServerConfig>) -> Result<Self> {
        match self {
            ServerTransport::Plain(stream) => {
                let tls = TlsAcceptor::from(config).accept(stream).await?;
                Ok(ServerTransport::Tls(Box::new(tls)))
            }
            ServerTransport::Tls(_) => Err(Error::protocol_error("connection is already encrypted")),
        }
    }
}

impl AsyncRead for ServerTransport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ServerTransport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ServerTransport::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ServerTransport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ServerTransport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ServerTransport::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ServerTransport::Plain(s) => Pin::new(s).poll_flush(cx),
            ServerTransport::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ServerTransport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ServerTransport::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// ClientTransport is an optionally TLS encrypted TCP session from our
/// server to a backend database.
pub enum ClientTransport {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientTransport {
    pub fn new(stream: TcpStream) -> Self {
        ClientTransport::Plain(stream)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, ClientTransport::Tls(_))
    }

    /// Perform the client side of the TLS handshake, after the backend
    /// answered our SSLRequest with 'S'.
    pub async fn upgrade(self, config: Arc<ClientConfig>, hostname: &str) -> Result<Self> {
        match self {
            ClientTransport::Plain(stream) => {
                let server_name = ServerName::try_from(hostname)
                    .map_err(|_| Error::new(format!("invalid dns name {:?}", hostname)))?;
                let tls = TlsConnector::from(config).connect(server_name, stream).await?;
                Ok(ClientTransport::Tls(Box::new(tls)))
            }
            ClientTransport::Tls(_) => Err(Error::protocol_error("connection is already encrypted")),
        }
    }
}

impl AsyncRead for ClientTransport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientTransport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ClientTransport::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientTransport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ClientTransport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ClientTransport::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientTransport::Plain(s) => Pin::new(s).poll_flush(cx),
            ClientTransport::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientTransport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ClientTransport::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
