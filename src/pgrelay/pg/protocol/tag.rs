use std::fmt::{Display, Formatter, Debug};

use crate::pgrelay::{Error, Result};

pub const SSL_ALLOWED: u8 = 'S' as u8;
pub const SSL_NOT_ALLOWED: u8 = 'N' as u8;
pub const GSS_ENC_NOT_ALLOWED: u8 = 'N' as u8;

/// Special "protocol version" codes carried in the first untagged frame.
pub const PROTOCOL_VERSION: i32 = 196608;
pub const CANCEL_REQUEST: i32 = 80877102;
pub const SSL_REQUEST: i32 = 80877103;
pub const GSS_ENC_REQUEST: i32 = 80877104;

// Tag defines the Postgres protocol message type tag bytes
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Tag(u8);

impl Tag {
    pub const UNTAGGED: Tag = Tag(0);
    // includes Startup, CancelRequest, SSLRequest, GSSENCRequest
    // Frontend
    pub const BIND: Tag = Tag::new_unchecked('B' as u8);
    pub const CLOSE: Tag = Tag::new_unchecked('C' as u8);
    // close prepared statement or portal
    pub const COPY_FAIL: Tag = Tag::new_unchecked('f' as u8);
    pub const DESCRIBE: Tag = Tag::new_unchecked('D' as u8);
    pub const EXECUTE: Tag = Tag::new_unchecked('E' as u8);
    pub const FLUSH: Tag = Tag::new_unchecked('H' as u8);
    pub const FUNCTION_CALL: Tag = Tag::new_unchecked('F' as u8);
    pub const PARSE: Tag = Tag::new_unchecked('P' as u8);
    pub const PASSWORD_MESSAGE: Tag = Tag::new_unchecked('p' as u8);
    // also used for GSSAPI, SSPI and SASL responses
    pub const QUERY: Tag = Tag::new_unchecked('Q' as u8);
    pub const SYNC: Tag = Tag::new_unchecked('S' as u8);
    pub const TERMINATE: Tag = Tag::new_unchecked('X' as u8);
    // Frontend + Backend
    pub const COPY_DATA: Tag = Tag::new_unchecked('d' as u8);
    pub const COPY_DONE: Tag = Tag::new_unchecked('c' as u8);
    // Backend
    pub const AUTHENTICATION_OK: Tag = Tag::new_unchecked('R' as u8);
    // one of AuthenticationCleartextPassword, AuthenticationMD5Password,
    // AuthenticationSASL, AuthenticationSASLContinue, AuthenticationSASLFinal, ...
    pub const BACKEND_KEY_DATA: Tag = Tag::new_unchecked('K' as u8);
    pub const BIND_COMPLETE: Tag = Tag::new_unchecked('2' as u8);
    pub const CLOSE_COMPLETE: Tag = Tag::new_unchecked('3' as u8);
    pub const COMMAND_COMPLETE: Tag = Tag::new_unchecked('C' as u8);
    pub const COPY_IN_RESPONSE: Tag = Tag::new_unchecked('G' as u8);
    pub const COPY_OUT_RESPONSE: Tag = Tag::new_unchecked('H' as u8);
    pub const COPY_BOTH_RESPONSE: Tag = Tag::new_unchecked('W' as u8);
    pub const DATA_ROW: Tag = Tag::new_unchecked('D' as u8);
    pub const EMPTY_QUERY: Tag = Tag::new_unchecked('I' as u8);
    pub const FUNCTION_CALL_RESPONSE: Tag = Tag::new_unchecked('V' as u8);
    pub const NEGOTIATE_PROTOCOL_VERSION: Tag = Tag::new_unchecked('v' as u8);
    pub const NO_DATA: Tag = Tag::new_unchecked('n' as u8);
    pub const PARAMETER_DESCRIPTION: Tag = Tag::new_unchecked('t' as u8);
    pub const PARSE_COMPLETE: Tag = Tag::new_unchecked('1' as u8);
    pub const PORTAL: Tag = Tag::new_unchecked('s' as u8);
    pub const READY_FOR_QUERY: Tag = Tag::new_unchecked('Z' as u8);
    pub const ROW_DESCRIPTION: Tag = Tag::new_unchecked('T' as u8);
    // Backend Async Messages (can also be synchronous, depending on context)
    pub const ERROR_RESPONSE: Tag = Tag::new_unchecked('E' as u8);
    // can be sent async e.g. if server is shutdown gracefully
    pub const PARAMETER_STATUS: Tag = Tag::new_unchecked('S' as u8);
    pub const NOTICE_RESPONSE: Tag = Tag::new_unchecked('N' as u8);
    pub const NOTIFICATION_RESPONSE: Tag = Tag::new_unchecked('A' as u8);

    pub fn new(b: u8) -> Result<Self> {
        let tag = Tag(b);
        if tag.name().is_empty() {
            return Err(Error::protocol_error(format!("unknown message tag '{}'", b as char)));
        }
        Ok(tag)
    }

    pub const fn new_unchecked(b: u8) -> Self {
        Tag(b)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// The name of the message type, as used in the protocol docs.
    /// Ambiguous tag bytes get the frontend or backend name more relevant to the proxy.
    pub fn name(&self) -> &'static str {
        match self.0 as char {
            '\0' => "Untagged",
            '1' => "ParseComplete",
            '2' => "BindComplete",
            '3' => "CloseComplete",
            'A' => "NotificationResponse",
            'B' => "Bind",
            'C' => "CommandComplete",
            'D' => "DataRow",
            'E' => "ErrorResponse",
            'F' => "FunctionCall",
            'G' => "CopyInResponse",
            'H' => "CopyOutResponse",
            'I' => "EmptyQuery",
            'K' => "BackendKeyData",
            'N' => "NoticeResponse",
            'P' => "Parse",
            'Q' => "Query",
            'R' => "AuthenticationRequest",
            'S' => "ParameterStatus",
            'T' => "RowDescription",
            'V' => "FunctionCallResponse",
            'W' => "CopyBothResponse",
            'X' => "Terminate",
            'Z' => "ReadyForQuery",
            'c' => "CopyDone",
            'd' => "CopyData",
            'f' => "CopyFail",
            'n' => "NoData",
            'p' => "PasswordMessage",
            's' => "Portal",
            't' => "ParameterDescription",
            'v' => "NegotiateProtocolVersion",
            _ => "",
        }
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = self.name();
        if !name.is_empty() {
            return f.write_str(name);
        }
        f.write_fmt(format_args!("unknown message tag '{}'", self.0 as char))
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
