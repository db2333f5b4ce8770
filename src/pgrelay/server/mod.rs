mod listener;
mod service;
mod transport;

pub use self::listener::{
    accept_backoff, is_temporary, Listener, INITIAL_ACCEPT_BACKOFF, MAX_ACCEPT_BACKOFF,
};
pub use self::service::{ProxyService, ServiceMode};
pub use self::transport::{ClientTransport, ServerTransport};
