use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::{Certificate, OwnedTrustAnchor, PrivateKey, RootCertStore};
use serde::Deserialize;
use tracing::info;

use crate::pgrelay::common::{Error, Result};
use crate::pgrelay::config::clusters::ClusterEntry;
use crate::pgrelay::config::enums::TlsMode;

pub const LISTEN_BACKLOG: u32 = 1024;

#[derive(Deserialize)]
pub struct Settings {
    /// config_path is the path of the loaded config file
    #[serde(skip_deserializing)]
    config_path: PathBuf,
    /// host to listen on, defaults to 127.0.0.1
    #[serde(default = "default_host")]
    pub host: String,
    /// port to listen on for password-routed PostgreSQL connections: default 5432
    #[serde(default = "default_port")]
    pub port: u16,
    /// wait_for_setup makes sessions wait for initial database setup to complete
    /// before connecting to the backend. Default true.
    #[serde(default = "default_wait_for_setup")]
    pub wait_for_setup: bool,
    /// setup_timeout_seconds bounds how long a session waits for the database to
    /// come online before giving up. Default 60.
    #[serde(default = "default_setup_timeout_seconds")]
    pub setup_timeout_seconds: u32,
    /// tls_cert is a PEM certificate chain; together with tls_key it enables TLS
    /// towards clients
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    /// tls_key is the PEM private key for tls_cert
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
    /// backend_tls is the TLS preference between the proxy and the database
    /// servers. Local backends don't speak TLS, so the default is disabled.
    #[serde(default)]
    pub backend_tls: TlsMode,
    /// clusters this proxy can route to
    #[serde(default)]
    pub clusters: Vec<ClusterEntry>,
}

fn default_host() -> String { "127.0.0.1".to_string() }
const fn default_port() -> u16 { 5432 }
const fn default_wait_for_setup() -> bool { true }
const fn default_setup_timeout_seconds() -> u32 { 60 }

impl Settings {
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_seconds as u64)
    }

    /// Build the rustls server config offered to clients, if TLS is configured.
    pub fn tls_server_config(&self) -> Result<Option<Arc<rustls::ServerConfig>>> {
        let (cert_path, key_path) = match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => (cert, key),
            (None, None) => return Ok(None),
            _ => return Err(Error::new("tls_cert and tls_key must be set together")),
        };

        let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))?
            .into_iter()
            .map(Certificate)
            .collect();
        let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(File::open(key_path)?))?;
        if keys.is_empty() {
            keys = rustls_pemfile::rsa_private_keys(&mut BufReader::new(File::open(key_path)?))?;
        }
        let key = keys
            .into_iter()
            .next()
            .ok_or_else(|| Error::new(format!("no private key found in {}", key_path.display())))?;

        let config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, PrivateKey(key))?;
        Ok(Some(Arc::new(config)))
    }

    /// Build the rustls client config for dialling backends over TLS.
    /// None unless backend_tls asks for it.
    pub fn backend_tls_config(&self) -> Result<Option<Arc<rustls::ClientConfig>>> {
        match self.backend_tls {
            TlsMode::Invalid | TlsMode::Disabled => Ok(None),
            TlsMode::Prefer | TlsMode::Required => {
                let mut roots = RootCertStore::empty();
                roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                    OwnedTrustAnchor::from_subject_spki_name_constraints(
                        ta.subject,
                        ta.spki,
                        ta.name_constraints,
                    )
                }));
                let config = rustls::ClientConfig::builder()
                    .with_safe_defaults()
                    .with_root_certificates(roots)
                    .with_no_client_auth();
                Ok(Some(Arc::new(config)))
            }
        }
    }

    fn load(&mut self, path: PathBuf) -> Result<()> {
        self.config_path = path;
        for cluster in &self.clusters {
            if cluster.host.find(':').is_none() {
                return Err(Error::new(format!(
                    "cluster {}: host must be a host:port pair, got {:?}",
                    cluster.id, cluster.host,
                )));
            }
        }
        Ok(())
    }
}

/// Load the configuration from the named yaml file, searched for in the
/// current directory and its parents. The settings live for the rest of
/// the process.
pub fn load_config(name: &str) -> Result<&'static Settings> {
    let config_path = find_config_file(name)?;
    info!(config_path = %config_path.to_string_lossy(), "found config file");
    let file = File::open(&config_path)?;

    let mut settings: Settings = serde_yaml::from_reader(file)?;
    settings.load(config_path)?;
    Ok(Box::leak(Box::new(settings)))
}

fn find_config_file(name: &str) -> Result<PathBuf> {
    let mut dir = env::current_dir()?;
    loop {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            return Err(Error::new(format!(
                "could not find {} in the working directory or any parent", name,
            )));
        }
    }
}
