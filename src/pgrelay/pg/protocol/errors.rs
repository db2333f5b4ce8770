use std::fmt;
use std::fmt::{Display, Formatter};

use strum::EnumString;

use crate::pgrelay::{Error, Result};
use crate::pgrelay::pg::protocol::{Message, MessageReader, Tag};

#[derive(EnumString, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum ErrorSeverity {
    Log,
    Info,
    Debug,
    Notice,
    Warning,
    Error,
    Panic,
    Fatal,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match *self {
            ErrorSeverity::Fatal => "FATAL",
            ErrorSeverity::Panic => "PANIC",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Notice => "NOTICE",
            ErrorSeverity::Debug => "DEBUG",
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Log => "LOG",
        }
    }
}

impl Display for ErrorSeverity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for ErrorSeverity {
    fn default() -> Self {
        ErrorSeverity::Log
    }
}

/// Field type bytes inside ErrorResponse and NoticeResponse messages
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct ErrorFieldTag(u8);

impl ErrorFieldTag {
    pub const NULL_TERMINATOR: ErrorFieldTag = ErrorFieldTag(0);
    pub const SEVERITY: ErrorFieldTag = ErrorFieldTag('S' as u8);
    // non-localized SEVERITY, identical except it's never translated
    pub const SEVERITY_NON_LOCALIZED: ErrorFieldTag = ErrorFieldTag('V' as u8);
    pub const CODE: ErrorFieldTag = ErrorFieldTag('C' as u8);
    pub const MESSAGE: ErrorFieldTag = ErrorFieldTag('M' as u8);
    pub const MESSAGE_DETAIL: ErrorFieldTag = ErrorFieldTag('D' as u8);
    pub const MESSAGE_HINT: ErrorFieldTag = ErrorFieldTag('H' as u8);

    pub fn new_unchecked(b: u8) -> Self {
        ErrorFieldTag(b)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

/// An error (or notice) reported by the backend, decoded from an
/// ErrorResponse frame. Only the fields the proxy cares about are kept.
#[derive(Debug, Default)]
pub struct PostgresError {
    pub severity: String,
    pub code: String,
    pub message: String,
}

impl PostgresError {
    pub fn parse(msg: &Message) -> Result<Self> {
        if msg.tag() != Tag::ERROR_RESPONSE && msg.tag() != Tag::NOTICE_RESPONSE {
            return Err(Error::protocol_error(format!("expected ErrorResponse, got {:?}", msg)));
        }

        let mut err = PostgresError::default();
        let mut r = MessageReader::new(msg);
        loop {
            let field = ErrorFieldTag::new_unchecked(r.read_byte());
            r.error()?;
            if field == ErrorFieldTag::NULL_TERMINATOR {
                return Ok(err);
            }
            let value = r.read_str()?;
            if field == ErrorFieldTag::SEVERITY {
                err.severity = value.to_string();
            } else if field == ErrorFieldTag::CODE {
                err.code = value.to_string();
            } else if field == ErrorFieldTag::MESSAGE {
                err.message = value.to_string();
            }
        }
    }
}

impl Display for PostgresError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}: {} ({})", self.severity, self.message, self.code))
    }
}
