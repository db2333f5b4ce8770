use std::convert::TryFrom;

use strum::Display;

use crate::pgrelay::Error;

/// The subcode of an AuthenticationRequest ('R') message
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq)]
#[non_exhaustive]
#[repr(u8)]
pub enum AuthType {
    Ok          = 0,
    KerberosV5  = 2,
    ClearText   = 3,
    MD5         = 5,
    SCM         = 6,
    GSS         = 7,
    GSSContinue = 8,
    SSPI        = 9,
    SASL        = 10,
    SASLContinue = 11,
    SASLFinal   = 12,
}

impl AuthType {
    pub fn as_i32(&self) -> i32 {
        *self as u8 as i32
    }
}

impl TryFrom<i32> for AuthType {
    type Error = Error;

    fn try_from(i: i32) -> Result<Self, Error> {
        Ok(match i {
            0 => AuthType::Ok,
            2 => AuthType::KerberosV5,
            3 => AuthType::ClearText,
            5 => AuthType::MD5,
            6 => AuthType::SCM,
            7 => AuthType::GSS,
            8 => AuthType::GSSContinue,
            9 => AuthType::SSPI,
            10 => AuthType::SASL,
            11 => AuthType::SASLContinue,
            12 => AuthType::SASLFinal,
            _ => return Err(Error::protocol_error(format!("unknown auth type {}", i))),
        })
    }
}

impl Default for AuthType {
    fn default() -> Self {
        AuthType::Ok
    }
}
