use std::fmt;
use std::fmt::{Debug, Formatter};

use bytes::{Buf, Bytes};

use crate::pgrelay::pg::protocol::Tag;

/// A single decoded protocol frame backed by a shared buffer.
///
/// During the startup phase frames have no tag byte and the 4-byte length
/// includes itself. A startup-phase frame always starts with the high byte
/// of its length, which is 0 for any frame the protocol permits, so tag()
/// reports Tag::UNTAGGED for those without tracking extra state.
#[derive(Clone)]
pub struct Message(Bytes);

impl Message {
    pub fn new(buf: Bytes) -> Self {
        Message(buf)
    }

    /// tag returns the message Tag or panics if self.is_empty()
    pub fn tag(&self) -> Tag {
        Tag::new_unchecked(*self.0.get(0).expect("empty Message"))
    }

    /// is_empty returns true if Message was initialized with an empty buffer
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// len returns the length of the Message including the tag byte (if any) and length frame
    pub fn len(&self) -> u32 {
        self.0.len() as u32
    }

    /// body_start returns the offset of the first byte past the tag and length frame
    pub fn body_start(&self) -> u32 {
        if self.tag() == Tag::UNTAGGED {
            4
        } else {
            5
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.0.chunk()
    }

}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("Message{empty}");
        }
        f.write_fmt(format_args!("Message{{tag: {}, len: {}}}", self.tag(), self.len()))
    }
}
