use std::convert::TryInto;
use std::num::NonZeroU32;

use bytes::{Buf, BytesMut};

use crate::pgrelay::{Error, Result};
use crate::pgrelay::pg::protocol::{Message, Tag};

pub const MIN_MESSAGE_LEN: u32 = 5;

// Bounds on the first (untagged) frame, from the Postgres source
pub const MIN_STARTUP_LEN: u32 = 8;
pub const MAX_STARTUP_LEN: u32 = 10000;

const RECV_BUFFER_SIZE: usize = 8 * 1024;

pub struct Header {
    pub tag: Tag,
    pub length: NonZeroU32,
}

impl Header {
    pub fn parse(bytes: &[u8]) -> Result<Option<Self>> {
        if (bytes.len() as u32) < MIN_MESSAGE_LEN {
            return Ok(None);
        }
        let tag = Tag::new(bytes[0])?;
        let len = u32::from_be_bytes((&bytes[1..5]).try_into().unwrap());
        if len < 4 {
            return Err(Error::protocol_error("length of message frame cannot be less than 4"));
        }
        Ok(Some(Header {
            tag,
            length: NonZeroU32::new(len).unwrap(),
        }))
    }

    /// len returns the total size of the frame, including the tag byte
    pub fn len(&self) -> u32 {
        self.length.get() + 1
    }
}

/// An incremental decoder turning a byte stream into Messages.
///
/// Starts out (on the frontend side) in the startup phase, where frames
/// carry no tag byte and the length includes itself. Once the caller has
/// seen the startup message proper it switches the parser to tagged
/// framing with leave_startup_phase.
pub struct MessageParser {
    data: BytesMut,
    startup_phase: bool,
}

impl MessageParser {
    /// A parser for a stream using tagged framing (everything after startup,
    /// and every message the backend sends).
    pub fn new() -> Self {
        Self {
            data: BytesMut::with_capacity(RECV_BUFFER_SIZE),
            startup_phase: false,
        }
    }

    /// A parser for the front-end startup phase.
    pub fn new_startup() -> Self {
        Self {
            data: BytesMut::with_capacity(RECV_BUFFER_SIZE),
            startup_phase: true,
        }
    }

    pub fn leave_startup_phase(&mut self) {
        self.startup_phase = false;
    }

    pub fn next(&mut self) -> Option<Result<Message>> {
        if self.startup_phase {
            return self.next_startup();
        }
        match Header::parse(self.data.chunk()) {
            Err(e) => Some(Err(e)),
            Ok(None) => None,
            Ok(Some(hdr)) => {
                let msg_len = hdr.len();
                if msg_len <= self.data.len() as u32 {
                    // We have the full message, split it off and return it
                    let msg = Message::new(self.data.split_to(msg_len as usize).freeze());
                    Some(Ok(msg))
                } else {
                    // We don't have the message, make sure buffer is large enough for it
                    self.data.reserve(msg_len as usize - self.data.len());
                    None
                }
            }
        }
    }

    fn next_startup(&mut self) -> Option<Result<Message>> {
        if self.data.len() < 4 {
            return None;
        }
        let len = u32::from_be_bytes((&self.data.chunk()[..4]).try_into().unwrap());
        if len < MIN_STARTUP_LEN || len > MAX_STARTUP_LEN {
            return Some(Err(Error::protocol_error(format!(
                "invalid startup frame length {}", len,
            ))));
        }
        if len <= self.data.len() as u32 {
            let msg = Message::new(self.data.split_to(len as usize).freeze());
            Some(Ok(msg))
        } else {
            self.data.reserve(len as usize - self.data.len());
            None
        }
    }

    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }

    /// Consumes the parser and returns any bytes buffered past the last
    /// returned Message. The relay replays these before splicing.
    pub fn into_residual(self) -> BytesMut {
        self.data
    }
}
