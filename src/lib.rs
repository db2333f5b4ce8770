pub mod pgrelay;
#[cfg(test)]
mod tests;

pub use crate::pgrelay::*;

use std::io;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::pgrelay::cluster::StaticDirectory;
use crate::pgrelay::common::Result;
use crate::pgrelay::config::{load_config, Settings};
use crate::pgrelay::pg::PgProxy;
use crate::pgrelay::server::{Listener, ProxyService, ServiceMode};

pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than max_level
        // will be written to stdout.
        .with_max_level(max_level)
        // completes the builder.
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");
}

/// Load the configuration settings from pgrelay.yaml
/// See pgrelay::config::load_config for more info.
pub fn init_settings() -> Result<&'static Settings> {
    load_config("pgrelay.yaml")
}

pub fn init_runtime() -> io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
}

/// Wire the configured clusters into a password-routed proxy service
/// listening on the configured address.
pub fn build_service(conf: &'static Settings) -> Result<ProxyService> {
    let directory = Arc::new(StaticDirectory::from_config(&conf.clusters));
    let mut proxy = PgProxy::new(directory, conf.tls_server_config()?);
    proxy.set_setup_timeout(conf.setup_timeout());
    proxy.set_backend_tls(conf.backend_tls_config()?);

    let listener = Listener::new(conf.listen_address())?;
    Ok(ProxyService::new(
        listener,
        Arc::new(proxy),
        ServiceMode::Password {
            wait_for_setup: conf.wait_for_setup,
        },
    ))
}
