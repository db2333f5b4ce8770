mod auth_md5;
mod auth_type;
pub mod error_codes;
mod errors;
mod message;
mod message_builder;
mod message_error_builder;
mod message_parser;
mod message_reader;
mod sasl;
mod startup_params;
mod tag;

pub use self::auth_md5::hash_md5_password;
pub use self::auth_type::AuthType;
pub use self::errors::{ErrorFieldTag, ErrorSeverity, PostgresError};
pub use self::message::Message;
pub use self::message_builder::MessageBuilder;
pub use self::message_error_builder::{new_fatal_error, MessageErrorBuilder};
pub use self::message_parser::{Header, MessageParser};
pub use self::message_reader::MessageReader;
pub use self::sasl::{ScramSha256, SCRAM_SHA_256};
pub use self::startup_params::StartupParams;
pub use self::tag::{
    Tag, CANCEL_REQUEST, GSS_ENC_NOT_ALLOWED, GSS_ENC_REQUEST, PROTOCOL_VERSION, SSL_ALLOWED,
    SSL_NOT_ALLOWED, SSL_REQUEST,
};
