use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::debug;

use crate::pgrelay::config::LISTEN_BACKLOG;
use crate::pgrelay::{Error, Result};

pub const INITIAL_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
pub const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

pub struct Listener {
    pub address: String,
    listener: TcpListener,
}

impl Listener {
    pub fn new(address: String) -> Result<Self> {
        let addr: SocketAddr = address.parse()?;
        let sock = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        sock.bind(addr)?;
        let listener = sock.listen(LISTEN_BACKLOG)?;
        Ok(Self { address, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Error::from)
    }

    pub async fn accept(&self) -> io::Result<TcpStream> {
        let (sock, remote_addr) = self.listener.accept().await?;
        debug!(%remote_addr, server = %self.address.as_str(), "accept connection");
        Ok(sock)
    }
}

/// Whether an accept error is worth retrying. Temporary is a semantic
/// property of the underlying error, not a single code: a handful of
/// errnos mean the listener itself is still fine.
pub fn is_temporary(e: &io::Error) -> bool {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => return true,
        _ => {}
    }
    #[cfg(unix)]
    {
        matches!(
            e.raw_os_error().unwrap_or(0),
            libc::ECONNABORTED | // client gave up before we got to it
            libc::EMFILE | // process file-descriptor limit
            libc::ENFILE | // system wide file-descriptor limit
            libc::ENOBUFS | // out of memory
            libc::ENOMEM | // out of memory
            libc::EPROTO | // protocol error
            libc::EINTR // interrupt
        )
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// How long to sleep after the Nth consecutive temporary accept failure:
/// 5 ms doubling up to 1 s. The caller resets its counter on any
/// successful accept.
pub fn accept_backoff(consecutive_failures: u32) -> Duration {
    debug_assert!(consecutive_failures > 0);
    let exp = consecutive_failures.saturating_sub(1).min(8);
    let delay = INITIAL_ACCEPT_BACKOFF * (1u32 << exp);
    delay.min(MAX_ACCEPT_BACKOFF)
}
