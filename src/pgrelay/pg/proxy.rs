use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::pgrelay::cluster::{Cluster, Directory, KeyRegistry, Role, Signal};
use crate::pgrelay::pg::backend::{
    authenticate_client, copy_steady_state, finalize_initial_handshake, send_cancel_request,
    setup_server, BackendConfig,
};
use crate::pgrelay::pg::client::{setup_client, CancelData, ClientConfig, ClientHandle, HelloOutcome, StartupData};
use crate::pgrelay::pg::message_stream::MessageStream;
use crate::pgrelay::pg::protocol::{error_codes, new_fatal_error};
use crate::pgrelay::server::ServerTransport;
use crate::pgrelay::Result;

pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(60);

/// The proxy core: authenticates and routes one client connection at a time
/// to the appropriate database cluster, keeping the cancel-key registry
/// consistent with the live sessions.
///
/// Clusters themselves are the directory's business; the proxy only ever
/// looks them up.
pub struct PgProxy {
    directory: Arc<dyn Directory>,
    registry: KeyRegistry,
    client_tls: Option<Arc<rustls::ServerConfig>>,
    backend_tls: Option<Arc<rustls::ClientConfig>>,
    setup_timeout: Duration,
}

impl PgProxy {
    pub fn new(directory: Arc<dyn Directory>, client_tls: Option<Arc<rustls::ServerConfig>>) -> Self {
        PgProxy {
            directory,
            registry: KeyRegistry::new(),
            client_tls,
            backend_tls: None,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }

    /// Shorten (or lengthen) the time a session waits for database setup.
    pub fn set_setup_timeout(&mut self, timeout: Duration) {
        self.setup_timeout = timeout;
    }

    /// Dial backends over TLS. Local clusters don't speak TLS, so nothing
    /// sets this today; it's kept as a policy hook.
    pub fn set_backend_tls(&mut self, tls: Option<Arc<rustls::ClientConfig>>) {
        self.backend_tls = tls;
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Authenticates and proxies a client connection to the appropriate
    /// database cluster and database, looked up by the password carried in
    /// the startup handshake.
    ///
    /// If wait_for_setup is true, waits for initial database setup to
    /// complete before connecting to the backend.
    pub async fn proxy_conn(&self, client: TcpStream, wait_for_setup: bool) -> Result<()> {
        let cl = setup_client(
            client,
            &ClientConfig {
                tls: self.client_tls.clone(),
                want_password: true,
            },
        )
        .await?;
        let ClientHandle { mut stream, hello } = cl;

        let startup = match hello {
            HelloOutcome::Cancel(cancel) => {
                self.cancel_request(&mut stream, &cancel).await;
                return Ok(());
            }
            HelloOutcome::Startup(startup) => startup,
        };

        let cluster = match self.directory.lookup_password(&startup.password) {
            Some(cluster) => cluster,
            None => {
                error!(
                    user = startup.username(),
                    database = startup.database(),
                    "could not find cluster for the presented password"
                );
                return self.send_fatal(&mut stream, "database cluster not running").await;
            }
        };

        let db = match cluster.get_db(startup.database()) {
            Some(db) => db,
            None => return self.send_fatal(&mut stream, "database not found").await,
        };

        let ready = if wait_for_setup {
            db.ready()
        } else {
            Signal::fired()
        };

        self.run_session(stream, startup, cluster, ready, db.done()).await
    }

    /// A pre-authenticated proxy connection directly to the given cluster.
    /// The caller has already established who the client is; the client
    /// handshake therefore runs with TLS offered and no password exchange.
    pub async fn preauth_proxy_conn(&self, client: TcpStream, cluster_id: &str) -> Result<()> {
        let cl = setup_client(
            client,
            &ClientConfig {
                tls: self.client_tls.clone(),
                want_password: false,
            },
        )
        .await?;
        let ClientHandle { mut stream, hello } = cl;

        let startup = match hello {
            HelloOutcome::Cancel(cancel) => {
                self.cancel_request(&mut stream, &cancel).await;
                return Ok(());
            }
            HelloOutcome::Startup(startup) => startup,
        };

        let cluster = match self.directory.get(cluster_id) {
            Some(cluster) => cluster,
            None => {
                error!(cluster = cluster_id, "could not find cluster");
                return self.send_fatal(&mut stream, "database cluster not running").await;
            }
        };

        let db = match cluster.get_db(startup.database()) {
            Some(db) => db,
            None => return self.send_fatal(&mut stream, "database not found").await,
        };

        // Pre-authenticated connections always wait, on cluster readiness.
        let ready = cluster.ready();
        self.run_session(stream, startup, cluster, ready, db.done()).await
    }

    /// The shared tail of both entry modes: wait for readiness, dial the
    /// backend as the admin role, mirror the handshake to the client, then
    /// relay opaque bytes until either side closes.
    async fn run_session(
        &self,
        mut client: MessageStream<ServerTransport>,
        mut startup: StartupData,
        cluster: Arc<dyn Cluster>,
        ready: Signal,
        done: Signal,
    ) -> Result<()> {
        // Wait for the cluster and database to come online.
        tokio::select! {
            biased;
            _ = done.wait() => {
                return self.send_fatal(&mut client, "db is shutting down").await;
            }
            _ = ready.wait() => {}
            _ = tokio::time::sleep(self.setup_timeout) => {
                error!(db = startup.database(), "timed out waiting for database to come online");
                return self.send_fatal(&mut client, "timed out waiting for db to complete setup").await;
            }
        }

        let info = match cluster.info().await {
            Ok(info) => info,
            Err(e) => {
                return self.send_fatal(&mut client, &format!("cluster not running: {}", e)).await;
            }
        };

        let server = match TcpStream::connect(&info.host).await {
            Ok(server) => server,
            Err(e) => {
                return self.send_fatal(&mut client, &format!("database not running: {}", e)).await;
            }
        };

        // Send a modified startup message to the backend: same parameters,
        // admin identity.
        let admin = match info.first(&[Role::Admin, Role::Superuser]) {
            Some(admin) => admin,
            None => {
                return self
                    .send_fatal(&mut client, "could not connect: no admin credential for cluster")
                    .await;
            }
        };
        startup.params.set("user", &admin.username);
        startup.password = admin.password.clone();

        let backend_config = BackendConfig {
            tls: self.backend_tls.clone(),
            tls_hostname: hostname_of(&info.host).to_string(),
        };
        let mut backend = match setup_server(server, &backend_config, &startup).await {
            Ok(backend) => backend,
            Err(e) => {
                return self.send_fatal(&mut client, &format!("could not connect: {}", e)).await;
            }
        };
        debug!("backend connection established, notifying client");

        authenticate_client(&mut client).await?;

        let key_data = match finalize_initial_handshake(&mut client, &mut backend).await {
            Ok(key_data) => key_data,
            Err(e) => {
                return self
                    .send_fatal(&mut client, &format!("could not establish connection: {}", e))
                    .await;
            }
        };
        debug!("connection handshake completed, proxying steady-state data");

        // Register the key data so we know where to route cancellation
        // requests; the guard removes it again when this session ends.
        let _registration = key_data.map(|key| self.registry.register(key.secret_key, cluster.clone()));

        copy_steady_state(client, backend).await
    }

    /// Handles a cancel request: look up the owning cluster by secret key
    /// and pass the frame along on a fresh backend connection. An unknown
    /// key is dropped without a reply.
    async fn cancel_request(&self, client: &mut MessageStream<ServerTransport>, cancel: &CancelData) {
        let cluster = match self.registry.get(cancel.secret_key) {
            Some(cluster) => cluster,
            None => return,
        };

        let info = match cluster.info().await {
            Ok(info) => info,
            Err(_) => {
                let _ = self.send_fatal(client, "database cluster not running").await;
                return;
            }
        };

        let mut backend = match TcpStream::connect(&info.host).await {
            Ok(backend) => backend,
            Err(_) => {
                let _ = self.send_fatal(client, "database cluster not running").await;
                return;
            }
        };
        let _ = send_cancel_request(&mut backend, &cancel.raw).await;
    }

    /// Reports an administrative failure to the client as a single FATAL
    /// ErrorResponse with SQLSTATE 08006 (connection_exception). The failure
    /// is handled here, so the session result is Ok; write errors are
    /// ignored since the connection is being torn down either way.
    async fn send_fatal(&self, client: &mut MessageStream<ServerTransport>, msg: &str) -> Result<()> {
        let frame = new_fatal_error(error_codes::CONNECTION_FAILURE, msg);
        let _ = client.send(&frame).await;
        Ok(())
    }
}

/// The host part of a host:port pair, for TLS certificate validation.
fn hostname_of(host_port: &str) -> &str {
    match host_port.rfind(':') {
        Some(i) => &host_port[..i],
        None => host_port,
    }
}
