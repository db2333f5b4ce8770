mod backend;
mod client;
mod message_stream;
pub mod protocol;
mod proxy;

pub use self::backend::{
    authenticate_client, copy_steady_state, finalize_initial_handshake, send_cancel_request,
    setup_server, BackendConfig, BackendHandle, BackendKeyData,
};
pub use self::client::{
    setup_client, CancelData, ClientConfig, ClientHandle, HelloOutcome, StartupData,
};
pub use self::message_stream::MessageStream;
pub use self::proxy::{PgProxy, DEFAULT_SETUP_TIMEOUT};
