use std::convert::TryFrom;
use std::sync::Arc;

use tokio::io::{copy_bidirectional, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::pgrelay::{Error, Result};
use crate::pgrelay::pg::client::StartupData;
use crate::pgrelay::pg::message_stream::MessageStream;
use crate::pgrelay::pg::protocol::{
    hash_md5_password, AuthType, Message, MessageBuilder, MessageReader, PostgresError,
    ScramSha256, Tag, PROTOCOL_VERSION, SCRAM_SHA_256, SSL_ALLOWED, SSL_REQUEST,
};
use crate::pgrelay::server::{ClientTransport, ServerTransport};

pub struct BackendConfig {
    /// Dial the backend over TLS. Kept as a policy hook; the proxy currently
    /// always dials local backends in plaintext.
    pub tls: Option<Arc<rustls::ClientConfig>>,
    /// Hostname for SNI and certificate validation when tls is set.
    pub tls_hostname: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            tls: None,
            tls_hostname: String::new(),
        }
    }
}

/// The (pid, secret key) pair the backend minted for this session.
/// Opaque to the proxy; it serves as the cancel token.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BackendKeyData {
    pub process_id: i32,
    pub secret_key: i32,
}

/// A backend connection that has completed its handshake. The frames the
/// backend sent between authentication and ReadyForQuery are retained
/// verbatim for replay to the client.
pub struct BackendHandle {
    pub stream: MessageStream<ClientTransport>,
    setup_frames: Vec<Message>,
    key_data: Option<BackendKeyData>,
}

/// Dial-side handshake: send the (rewritten) startup message and drive the
/// authentication dialogue until the backend reports ReadyForQuery.
///
/// The startup must already carry the admin credentials; the proxy answers
/// cleartext, MD5 and SCRAM-SHA-256 challenges with them.
pub async fn setup_server(
    conn: TcpStream,
    cfg: &BackendConfig,
    startup: &StartupData,
) -> Result<BackendHandle> {
    let mut transport = ClientTransport::new(conn);
    if let Some(tls_config) = &cfg.tls {
        transport = request_tls(transport, tls_config.clone(), &cfg.tls_hostname).await?;
    }

    let mut stream = MessageStream::new(transport);

    let mut mb = MessageBuilder::new(Tag::UNTAGGED);
    mb.write_i32(PROTOCOL_VERSION);
    mb.write_params(&startup.params);
    mb.write_byte(0);
    stream.send(&mb.finish()).await?;

    authenticate(&mut stream, startup).await?;

    // Absorb the session setup the backend reports, keeping the frames for
    // replay downstream.
    let mut setup_frames = Vec::new();
    let mut key_data = None;
    loop {
        let msg = stream.next().await?;
        match msg.tag() {
            Tag::PARAMETER_STATUS => setup_frames.push(msg),
            Tag::BACKEND_KEY_DATA => {
                let mut r = MessageReader::new(&msg);
                let process_id = r.read_i32();
                let secret_key = r.read_i32();
                r.error()?;
                key_data = Some(BackendKeyData {
                    process_id,
                    secret_key,
                });
                setup_frames.push(msg);
            }
            Tag::READY_FOR_QUERY => {
                setup_frames.push(msg);
                break;
            }
            Tag::ERROR_RESPONSE => {
                return Err(Error::new(PostgresError::parse(&msg)?.to_string()));
            }
            Tag::NOTICE_RESPONSE => {
                let notice = PostgresError::parse(&msg)?;
                debug!(%notice, "notice from backend during setup");
            }
            _ => {
                return Err(Error::protocol_error(format!("unexpected message during backend setup: {:?}", msg)));
            }
        }
    }

    Ok(BackendHandle {
        stream,
        setup_frames,
        key_data,
    })
}

/// SSLRequest flow, dial side. The backend must accept; refusal when TLS was
/// explicitly configured is an error.
async fn request_tls(
    mut transport: ClientTransport,
    tls_config: Arc<rustls::ClientConfig>,
    hostname: &str,
) -> Result<ClientTransport> {
    let mut mb = MessageBuilder::new(Tag::UNTAGGED);
    mb.write_i32(SSL_REQUEST);
    transport.write_all(mb.finish().as_slice()).await?;
    transport.flush().await?;

    let mut reply = [0u8; 1];
    tokio::io::AsyncReadExt::read_exact(&mut transport, &mut reply).await?;
    if reply[0] != SSL_ALLOWED {
        return Err(Error::new("backend refused TLS"));
    }
    transport.upgrade(tls_config, hostname).await
}

async fn authenticate(
    stream: &mut MessageStream<ClientTransport>,
    startup: &StartupData,
) -> Result<()> {
    let mut scram: Option<ScramSha256> = None;
    loop {
        let msg = stream.next().await?;
        match msg.tag() {
            Tag::AUTHENTICATION_OK => {
                let mut r = MessageReader::new(&msg);
                let auth_type = AuthType::try_from(r.read_i32())?;
                r.error()?;
                match auth_type {
                    AuthType::Ok => return Ok(()),
                    AuthType::ClearText => {
                        let mut mb = MessageBuilder::new(Tag::PASSWORD_MESSAGE);
                        mb.write_str(&startup.password);
                        stream.send(&mb.finish()).await?;
                    }
                    AuthType::MD5 => {
                        let salt = <&[u8; 4]>::try_from(r.read_bytes(4)?)?;
                        let hashed = hash_md5_password(startup.username(), &startup.password, salt);
                        let mut mb = MessageBuilder::new(Tag::PASSWORD_MESSAGE);
                        mb.write_str(&hashed);
                        stream.send(&mb.finish()).await?;
                    }
                    AuthType::SASL => {
                        // the advertised mechanisms are a NUL-terminated list
                        let mut has_scram = false;
                        while let Some(b) = r.peek() {
                            if b == 0 {
                                break;
                            }
                            has_scram |= r.read_str()? == SCRAM_SHA_256;
                        }
                        if !has_scram {
                            return Err(Error::new("backend supports no SASL mechanism we do"));
                        }
                        let s = ScramSha256::new(startup.username(), &startup.password)?;
                        let mut mb = MessageBuilder::new(Tag::PASSWORD_MESSAGE);
                        mb.write_str(SCRAM_SHA_256);
                        mb.write_i32(s.message().len() as i32);
                        mb.write_bytes(s.message());
                        stream.send(&mb.finish()).await?;
                        scram = Some(s);
                    }
                    AuthType::SASLContinue => {
                        let s = scram
                            .as_mut()
                            .ok_or_else(|| Error::protocol_error("SASLContinue without SASL"))?;
                        s.update(r.read_to_end())?;
                        let mut mb = MessageBuilder::new(Tag::PASSWORD_MESSAGE);
                        mb.write_bytes(s.message());
                        stream.send(&mb.finish()).await?;
                    }
                    AuthType::SASLFinal => {
                        let s = scram
                            .as_mut()
                            .ok_or_else(|| Error::protocol_error("SASLFinal without SASL"))?;
                        s.finish(r.read_to_end())?;
                    }
                    _ => {
                        return Err(Error::new(format!("unsupported authentication method {}", auth_type)));
                    }
                }
            }
            Tag::ERROR_RESPONSE => {
                return Err(Error::new(PostgresError::parse(&msg)?.to_string()));
            }
            Tag::NOTICE_RESPONSE => {
                let notice = PostgresError::parse(&msg)?;
                debug!(%notice, "notice from backend during auth");
            }
            _ => {
                return Err(Error::protocol_error(format!("unexpected message during backend auth: {:?}", msg)));
            }
        }
    }
}

/// Completes the client-facing side once the backend is ready: tell the
/// waiting client its authentication succeeded.
pub async fn authenticate_client(client: &mut MessageStream<ServerTransport>) -> Result<()> {
    let mut mb = MessageBuilder::new(Tag::AUTHENTICATION_OK);
    mb.write_i32(AuthType::Ok.as_i32());
    client.send(&mb.finish()).await
}

/// Replays the backend's setup frames (ParameterStatus, BackendKeyData,
/// ReadyForQuery) to the client verbatim and returns the recorded key data.
pub async fn finalize_initial_handshake(
    client: &mut MessageStream<ServerTransport>,
    backend: &mut BackendHandle,
) -> Result<Option<BackendKeyData>> {
    for msg in backend.setup_frames.drain(..) {
        client.stream_mut().write_all(msg.as_slice()).await?;
    }
    client.stream_mut().flush().await?;
    Ok(backend.key_data)
}

/// Splices both connections together until either side closes, then closes
/// the other. Bytes buffered during the handshake are flushed to the
/// opposite side before the relay starts, so the key-registry entry made by
/// the caller is in place before the first steady-state byte moves.
pub async fn copy_steady_state(
    client: MessageStream<ServerTransport>,
    backend: BackendHandle,
) -> Result<()> {
    let (mut client_stream, client_residual) = client.into_parts();
    let (mut backend_stream, backend_residual) = backend.stream.into_parts();

    if !backend_residual.is_empty() {
        client_stream.write_all(&backend_residual).await?;
    }
    if !client_residual.is_empty() {
        backend_stream.write_all(&client_residual).await?;
    }

    copy_bidirectional(&mut client_stream, &mut backend_stream).await?;
    Ok(())
}

/// Forward a cancel frame to the backend exactly as the client sent it.
pub async fn send_cancel_request(conn: &mut TcpStream, raw: &Message) -> Result<()> {
    conn.write_all(raw.as_slice()).await?;
    conn.flush().await?;
    Ok(())
}
