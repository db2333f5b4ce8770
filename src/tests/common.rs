use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::pgrelay::cluster::{
    Cluster, ConnectionInfo, Credential, Database, Directory, Role, Signal, Trigger,
};
use crate::pgrelay::pg::protocol::{
    AuthType, Message, MessageBuilder, MessageReader, PostgresError, Tag, CANCEL_REQUEST,
    PROTOCOL_VERSION,
};
use crate::pgrelay::pg::PgProxy;
use crate::pgrelay::server::{Listener, ProxyService, ServiceMode};
use crate::pgrelay::{Error, Result};

pub const TEST_DATABASE: &str = "shop";
pub const TEST_PASSWORD: &str = "pw-a";
pub const ADMIN_USER: &str = "cluster-admin";
pub const ADMIN_PASSWORD: &str = "admin-secret";

// ---- directory doubles -------------------------------------------------

pub struct TestDirectory {
    pub clusters: Vec<Arc<TestCluster>>,
}

impl Directory for TestDirectory {
    fn lookup_password(&self, password: &str) -> Option<Arc<dyn Cluster>> {
        self.clusters
            .iter()
            .find(|c| c.token == password)
            .map(|c| c.clone() as Arc<dyn Cluster>)
    }

    fn get(&self, id: &str) -> Option<Arc<dyn Cluster>> {
        self.clusters
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.clone() as Arc<dyn Cluster>)
    }
}

pub struct TestCluster {
    pub id: String,
    /// routing password clients present for this cluster
    pub token: String,
    pub host: String,
    ready: Signal,
    ready_trigger: Trigger,
    databases: Mutex<HashMap<String, Arc<TestDatabase>>>,
    pub info_calls: AtomicUsize,
    fail_info: std::sync::atomic::AtomicBool,
}

impl TestCluster {
    pub fn new(id: &str, token: &str, host: &str) -> Arc<Self> {
        let cluster = Self::new_pending_ready(id, token, host);
        cluster.ready_trigger.fire();
        cluster
    }

    /// A cluster that hasn't come online yet; fire cluster_ready_trigger
    /// from the test.
    pub fn new_pending_ready(id: &str, token: &str, host: &str) -> Arc<Self> {
        let (ready_trigger, ready) = Signal::new();
        Arc::new(TestCluster {
            id: id.to_string(),
            token: token.to_string(),
            host: host.to_string(),
            ready,
            ready_trigger,
            databases: Mutex::new(HashMap::new()),
            info_calls: AtomicUsize::new(0),
            fail_info: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Make info() fail, as when the cluster manager is unreachable.
    pub fn set_fail_info(&self) {
        self.fail_info.store(true, Relaxed);
    }

    pub fn add_db(&self, name: &str, db: Arc<TestDatabase>) {
        self.databases.lock().unwrap().insert(name.to_string(), db);
    }

    pub fn cluster_ready_trigger(&self) -> &Trigger {
        &self.ready_trigger
    }
}

#[async_trait]
impl Cluster for TestCluster {
    fn id(&self) -> &str {
        &self.id
    }

    fn ready(&self) -> Signal {
        self.ready.clone()
    }

    fn get_db(&self, name: &str) -> Option<Arc<dyn Database>> {
        self.databases
            .lock()
            .unwrap()
            .get(name)
            .map(|db| db.clone() as Arc<dyn Database>)
    }

    async fn info(&self) -> Result<ConnectionInfo> {
        self.info_calls.fetch_add(1, Relaxed);
        if self.fail_info.load(Relaxed) {
            return Err(Error::new("cluster manager is down"));
        }
        Ok(ConnectionInfo {
            host: self.host.clone(),
            credentials: vec![
                Credential {
                    username: "reader".to_string(),
                    password: "reader-pw".to_string(),
                    role: Role::ReadOnly,
                },
                Credential {
                    username: ADMIN_USER.to_string(),
                    password: ADMIN_PASSWORD.to_string(),
                    role: Role::Admin,
                },
            ],
        })
    }
}

pub struct TestDatabase {
    ready: Signal,
    ready_trigger: Trigger,
    done: Signal,
    done_trigger: Trigger,
}

impl TestDatabase {
    /// A database that finished its setup already.
    pub fn new_ready() -> Arc<Self> {
        let db = Self::new_pending();
        db.ready_trigger.fire();
        db
    }

    /// A database still being set up; fire the triggers from the test.
    pub fn new_pending() -> Arc<Self> {
        let (ready_trigger, ready) = Signal::new();
        let (done_trigger, done) = Signal::new();
        Arc::new(TestDatabase {
            ready,
            ready_trigger,
            done,
            done_trigger,
        })
    }

    pub fn fire_ready(&self) {
        self.ready_trigger.fire();
    }

    pub fn fire_done(&self) {
        self.done_trigger.fire();
    }
}

impl Database for TestDatabase {
    fn ready(&self) -> Signal {
        self.ready.clone()
    }

    fn done(&self) -> Signal {
        self.done.clone()
    }
}

// ---- fake backend ------------------------------------------------------

/// A minimal protocol-3.0 server: optionally demands a cleartext password,
/// reports key data and ReadyForQuery, then echoes every byte it reads.
/// Cancel-request connections record the raw frame and close.
pub struct FakeBackend {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
    pub startups: Arc<Mutex<Vec<Bytes>>>,
    pub cancels: Arc<Mutex<Vec<Bytes>>>,
}

impl FakeBackend {
    pub fn host(&self) -> String {
        self.addr.to_string()
    }
}

#[derive(Clone)]
pub struct BackendOptions {
    /// demand a cleartext password and require this value
    pub expect_password: Option<String>,
    pub process_id: i32,
    /// key for the first connection; subsequent ones count up from it
    pub first_secret_key: i32,
}

impl Default for BackendOptions {
    fn default() -> Self {
        BackendOptions {
            expect_password: Some(ADMIN_PASSWORD.to_string()),
            process_id: 1234,
            first_secret_key: 0x5eed,
        }
    }
}

pub async fn spawn_backend(options: BackendOptions) -> FakeBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = FakeBackend {
        addr: listener.local_addr().unwrap(),
        accepted: Arc::new(AtomicUsize::new(0)),
        startups: Arc::new(Mutex::new(Vec::new())),
        cancels: Arc::new(Mutex::new(Vec::new())),
    };

    let accepted = backend.accepted.clone();
    let startups = backend.startups.clone();
    let cancels = backend.cancels.clone();
    let next_key = Arc::new(AtomicI32::new(options.first_secret_key));
    tokio::spawn(async move {
        loop {
            let (sock, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            accepted.fetch_add(1, Relaxed);
            let options = options.clone();
            let startups = startups.clone();
            let cancels = cancels.clone();
            let secret_key = next_key.fetch_add(1, Relaxed);
            tokio::spawn(async move {
                let _ = serve_conn(sock, options, secret_key, startups, cancels).await;
            });
        }
    });
    backend
}

async fn serve_conn(
    mut sock: TcpStream,
    options: BackendOptions,
    secret_key: i32,
    startups: Arc<Mutex<Vec<Bytes>>>,
    cancels: Arc<Mutex<Vec<Bytes>>>,
) -> Result<()> {
    let frame = read_untagged_frame(&mut sock).await?;
    let code = i32::from_be_bytes(frame[4..8].as_ref().try_into().unwrap());
    if code == CANCEL_REQUEST {
        cancels.lock().unwrap().push(frame);
        return Ok(());
    }
    startups.lock().unwrap().push(frame.clone());

    if let Some(expected) = &options.expect_password {
        let mut mb = MessageBuilder::new(Tag::AUTHENTICATION_OK);
        mb.write_i32(AuthType::ClearText.as_i32());
        sock.write_all(mb.finish().as_slice()).await?;

        let msg = read_tagged_message(&mut sock).await?;
        assert_eq!(msg.tag(), Tag::PASSWORD_MESSAGE);
        let mut r = MessageReader::new(&msg);
        let password = r.read_str()?.to_string();
        if &password != expected {
            let mut mb = MessageBuilder::new(Tag::ERROR_RESPONSE);
            mb.write_byte(b'S');
            mb.write_str("FATAL");
            mb.write_byte(b'C');
            mb.write_str("28P01");
            mb.write_byte(b'M');
            mb.write_str("password authentication failed");
            mb.write_byte(0);
            sock.write_all(mb.finish().as_slice()).await?;
            return Ok(());
        }
    }

    let mut mb = MessageBuilder::new(Tag::AUTHENTICATION_OK);
    mb.write_i32(AuthType::Ok.as_i32());
    mb.add_new(Tag::PARAMETER_STATUS);
    mb.write_str("server_version");
    mb.write_str("13.3");
    mb.add_new(Tag::PARAMETER_STATUS);
    mb.write_str("client_encoding");
    mb.write_str("UTF8");
    mb.add_new(Tag::BACKEND_KEY_DATA);
    mb.write_i32(options.process_id);
    mb.write_i32(secret_key);
    mb.add_new(Tag::READY_FOR_QUERY);
    mb.write_byte(b'I');
    sock.write_all(mb.finish().as_slice()).await?;

    // steady state: echo
    let mut buf = [0u8; 4096];
    loop {
        let n = sock.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        sock.write_all(&buf[..n]).await?;
    }
}

async fn read_untagged_frame(sock: &mut TcpStream) -> Result<Bytes> {
    let mut len_buf = [0u8; 4];
    sock.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    assert!((8..=10000).contains(&len), "bad untagged frame length {}", len);
    let mut frame = vec![0u8; len];
    frame[..4].copy_from_slice(&len_buf);
    sock.read_exact(&mut frame[4..]).await?;
    Ok(Bytes::from(frame))
}

pub async fn read_tagged_message(sock: &mut TcpStream) -> Result<Message> {
    let mut header = [0u8; 5];
    sock.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header[1..5].try_into().unwrap()) as usize;
    let mut frame = vec![0u8; len + 1];
    frame[..5].copy_from_slice(&header);
    sock.read_exact(&mut frame[5..]).await?;
    Ok(Message::new(Bytes::from(frame)))
}

// ---- proxy harness -----------------------------------------------------

pub async fn spawn_proxy(directory: TestDirectory, wait_for_setup: bool) -> (SocketAddr, Arc<PgProxy>) {
    spawn_proxy_with_timeout(directory, wait_for_setup, Duration::from_secs(60)).await
}

pub async fn spawn_proxy_with_timeout(
    directory: TestDirectory,
    wait_for_setup: bool,
    setup_timeout: Duration,
) -> (SocketAddr, Arc<PgProxy>) {
    let mut proxy = PgProxy::new(Arc::new(directory), None);
    proxy.set_setup_timeout(setup_timeout);
    let proxy = Arc::new(proxy);

    let listener = Listener::new("127.0.0.1:0".to_string()).unwrap();
    let addr = listener.local_addr().unwrap();
    let service = ProxyService::new(
        listener,
        proxy.clone(),
        ServiceMode::Password { wait_for_setup },
    );
    tokio::spawn(async move {
        let _ = service.run().await;
    });
    (addr, proxy)
}

// ---- client side -------------------------------------------------------

pub struct TestClient {
    pub stream: TcpStream,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        TestClient {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    pub fn startup_frame(params: &[(&str, &str)]) -> Message {
        let mut mb = MessageBuilder::new(Tag::UNTAGGED);
        mb.write_i32(PROTOCOL_VERSION);
        for (k, v) in params {
            mb.write_str(k);
            mb.write_str(v);
        }
        mb.write_byte(0);
        mb.finish()
    }

    pub async fn send_startup(&mut self, params: &[(&str, &str)]) {
        let msg = Self::startup_frame(params);
        self.stream.write_all(msg.as_slice()).await.unwrap();
    }

    pub async fn send_password(&mut self, password: &str) {
        let mut mb = MessageBuilder::new(Tag::PASSWORD_MESSAGE);
        mb.write_str(password);
        self.stream.write_all(mb.finish().as_slice()).await.unwrap();
    }

    pub async fn send_cancel(&mut self, process_id: i32, secret_key: i32) {
        let mut mb = MessageBuilder::new(Tag::UNTAGGED);
        mb.write_i32(CANCEL_REQUEST);
        mb.write_i32(process_id);
        mb.write_i32(secret_key);
        self.stream.write_all(mb.finish().as_slice()).await.unwrap();
    }

    pub async fn read_message(&mut self) -> Message {
        read_tagged_message(&mut self.stream).await.unwrap()
    }

    /// Reads the cleartext password challenge the proxy sends after startup.
    pub async fn expect_password_challenge(&mut self) {
        let msg = self.read_message().await;
        assert_eq!(msg.tag(), Tag::AUTHENTICATION_OK);
        let mut r = MessageReader::new(&msg);
        assert_eq!(r.read_i32(), AuthType::ClearText.as_i32());
    }

    /// Reads AuthenticationOk and everything up to ReadyForQuery, returning
    /// the messages in between (ParameterStatus, BackendKeyData).
    pub async fn read_until_ready(&mut self) -> Vec<Message> {
        let msg = self.read_message().await;
        assert_eq!(msg.tag(), Tag::AUTHENTICATION_OK, "expected AuthenticationOk, got {:?}", msg);
        let mut r = MessageReader::new(&msg);
        assert_eq!(r.read_i32(), AuthType::Ok.as_i32());

        let mut setup = Vec::new();
        loop {
            let msg = self.read_message().await;
            if msg.tag() == Tag::READY_FOR_QUERY {
                return setup;
            }
            setup.push(msg);
        }
    }

    /// Run the whole password-mode handshake, returning the session's
    /// BackendKeyData as (process_id, secret_key).
    pub async fn handshake(
        addr: SocketAddr,
        user: &str,
        database: &str,
        password: &str,
    ) -> (Self, (i32, i32)) {
        let mut client = Self::connect(addr).await;
        client
            .send_startup(&[("user", user), ("database", database)])
            .await;
        client.expect_password_challenge().await;
        client.send_password(password).await;
        let setup = client.read_until_ready().await;
        let key_msg = setup
            .iter()
            .find(|m| m.tag() == Tag::BACKEND_KEY_DATA)
            .expect("no BackendKeyData before ReadyForQuery");
        let mut r = MessageReader::new(key_msg);
        let key = (r.read_i32(), r.read_i32());
        (client, key)
    }

    /// Asserts the next message is the FATAL 08006 ErrorResponse carrying
    /// exactly msg, and that the proxy then closes the connection.
    pub async fn expect_fatal(&mut self, msg: &str) {
        let frame = self.read_message().await;
        assert_eq!(frame.tag(), Tag::ERROR_RESPONSE);
        let err = PostgresError::parse(&frame).unwrap();
        assert_eq!(err.severity, "FATAL");
        assert_eq!(err.code, "08006");
        assert_eq!(err.message, msg);
        self.expect_eof().await;
    }

    pub async fn expect_eof(&mut self) {
        let mut buf = [0u8; 1];
        let n = self.stream.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0, "expected the proxy to close the connection");
    }
}

/// Poll until cond() holds, panicking after a couple of seconds. For
/// observing effects of the proxy's background session tasks.
pub async fn wait_until<F: Fn() -> bool>(cond: F, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting until {}", what);
}
