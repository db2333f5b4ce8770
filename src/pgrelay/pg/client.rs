use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::debug;

use crate::pgrelay::{Error, Result};
use crate::pgrelay::pg::message_stream::MessageStream;
use crate::pgrelay::pg::protocol::{
    AuthType, Message, MessageBuilder, MessageReader, StartupParams, Tag, CANCEL_REQUEST,
    GSS_ENC_NOT_ALLOWED, GSS_ENC_REQUEST, PROTOCOL_VERSION, SSL_ALLOWED, SSL_NOT_ALLOWED,
    SSL_REQUEST,
};
use crate::pgrelay::server::ServerTransport;

pub struct ClientConfig {
    /// Offer TLS to the client (standard SSLRequest flow). None rejects
    /// SSLRequests with 'N' and carries on in plaintext.
    pub tls: Option<Arc<rustls::ServerConfig>>,
    /// Ask the client for a cleartext password after its startup message.
    /// The password is the routing token, not a database credential.
    pub want_password: bool,
}

/// The decoded startup message of a client session.
pub struct StartupData {
    pub params: StartupParams,
    pub password: String,
    /// The startup frame exactly as received.
    pub raw: Message,
}

impl StartupData {
    pub fn username(&self) -> &str {
        self.params.get("user").unwrap_or("")
    }

    pub fn database(&self) -> &str {
        self.params.get("database").unwrap_or("")
    }
}

/// An out-of-band cancel request. Arrives on a fresh connection carrying the
/// (pid, secret key) pair minted by the backend during some session's handshake.
pub struct CancelData {
    pub process_id: i32,
    pub secret_key: i32,
    /// The cancel frame exactly as received, forwarded verbatim.
    pub raw: Message,
}

/// What the client opened the connection for.
pub enum HelloOutcome {
    Startup(StartupData),
    Cancel(CancelData),
}

/// A client connection that has completed its side of the handshake.
/// No bytes beyond the hello (and password exchange, if any) are consumed.
pub struct ClientHandle {
    pub stream: MessageStream<ServerTransport>,
    pub hello: HelloOutcome,
}

/// Read the client's hello: either a startup message or a cancel request.
///
/// Handles the SSLRequest/GSSENCRequest preamble, negotiating TLS when
/// configured, and runs the cleartext password exchange when want_password
/// is set.
pub async fn setup_client(conn: TcpStream, cfg: &ClientConfig) -> Result<ClientHandle> {
    let mut stream = MessageStream::new_startup(ServerTransport::new(conn));
    loop {
        let msg = stream.next().await?;
        let mut r = MessageReader::new(&msg);
        let code = r.read_i32();
        r.error()?;
        match code {
            SSL_REQUEST => match &cfg.tls {
                Some(tls_config) => {
                    stream.send_byte(SSL_ALLOWED).await?;
                    let (transport, residual) = stream.into_parts();
                    if !residual.is_empty() {
                        return Err(Error::protocol_error("unexpected cleartext data after SSLRequest"));
                    }
                    debug!("client requested TLS, upgrading");
                    stream = MessageStream::new_startup(transport.upgrade(tls_config.clone()).await?);
                }
                None => {
                    stream.send_byte(SSL_NOT_ALLOWED).await?;
                }
            },
            GSS_ENC_REQUEST => {
                stream.send_byte(GSS_ENC_NOT_ALLOWED).await?;
            }
            CANCEL_REQUEST => {
                let process_id = r.read_i32();
                let secret_key = r.read_i32();
                r.error()?;
                return Ok(ClientHandle {
                    stream,
                    hello: HelloOutcome::Cancel(CancelData {
                        process_id,
                        secret_key,
                        raw: msg,
                    }),
                });
            }
            PROTOCOL_VERSION => {
                let params = StartupParams::from_startup_message(&msg)?;
                stream.leave_startup_phase();
                let password = if cfg.want_password {
                    read_password(&mut stream).await?
                } else {
                    String::new()
                };
                return Ok(ClientHandle {
                    stream,
                    hello: HelloOutcome::Startup(StartupData {
                        params,
                        password,
                        raw: msg,
                    }),
                });
            }
            _ => {
                return Err(Error::protocol_error(format!("unknown startup request code {}", code)));
            }
        }
    }
}

/// Challenge the client for a cleartext password and read its answer.
async fn read_password(stream: &mut MessageStream<ServerTransport>) -> Result<String> {
    let mut mb = MessageBuilder::new(Tag::AUTHENTICATION_OK);
    mb.write_i32(AuthType::ClearText.as_i32());
    stream.send(&mb.finish()).await?;

    let msg = stream.next().await?;
    if msg.tag() != Tag::PASSWORD_MESSAGE {
        return Err(Error::protocol_error(format!("expected PasswordMessage, got {:?}", msg)));
    }
    let mut r = MessageReader::new(&msg);
    Ok(r.read_str()?.to_string())
}
