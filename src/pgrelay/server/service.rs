use std::sync::Arc;

use tracing::{error, info, warn};

use crate::pgrelay::pg::PgProxy;
use crate::pgrelay::server::{accept_backoff, is_temporary, Listener};
use crate::pgrelay::{Error, Result};

/// What kind of sessions a front door serves.
#[derive(Clone)]
pub enum ServiceMode {
    /// Password-routed connections: the password in the startup handshake
    /// selects the cluster.
    Password { wait_for_setup: bool },
    /// Connections an outer layer has already authenticated against one
    /// specific cluster.
    Preauth { cluster_id: String },
}

/// One front door: an accept loop handing every connection to its own
/// session task. Temporary accept errors back off exponentially and the
/// loop keeps serving; anything else ends the loop with an error.
pub struct ProxyService {
    listener: Listener,
    proxy: Arc<PgProxy>,
    mode: ServiceMode,
}

impl ProxyService {
    pub fn new(listener: Listener, proxy: Arc<PgProxy>, mode: ServiceMode) -> Self {
        Self {
            listener,
            proxy,
            mode,
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!(address = %self.listener.address.as_str(), "starting proxy service");
        let mut consecutive_failures = 0u32;
        loop {
            match self.listener.accept().await {
                Ok(sock) => {
                    consecutive_failures = 0;
                    let proxy = self.proxy.clone();
                    let mode = self.mode.clone();
                    tokio::spawn(async move {
                        let result = match &mode {
                            ServiceMode::Password { wait_for_setup } => {
                                proxy.proxy_conn(sock, *wait_for_setup).await
                            }
                            ServiceMode::Preauth { cluster_id } => {
                                proxy.preauth_proxy_conn(sock, cluster_id).await
                            }
                        };
                        if let Err(e) = result {
                            if !e.is_closed() {
                                warn!(%e, "proxy session error");
                            }
                        }
                    });
                }
                Err(e) if is_temporary(&e) => {
                    consecutive_failures += 1;
                    let delay = accept_backoff(consecutive_failures);
                    error!(%e, ?delay, "accept error, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(Error::new(format!("could not accept: {}", e)));
                }
            }
        }
    }
}
