use bytes::{BufMut, BytesMut};

use crate::pgrelay::pg::protocol::{Message, StartupParams, Tag};

/// Builds protocol frames with bit-exact framing. The length word is
/// patched in when the message is completed, so writes append in order.
pub struct MessageBuilder {
    data: BytesMut,
    start: usize, // start position of current Message being built
}

impl MessageBuilder {
    pub fn new(tag: Tag) -> Self {
        let mut builder = MessageBuilder {
            data: BytesMut::with_capacity(256), // typically we build short messages
            start: 0,
        };
        builder.add_new(tag);
        builder
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn finish(mut self) -> Message {
        self.complete_message();
        Message::new(self.data.freeze())
    }

    /// Completes the current message and starts a new one in the same buffer.
    pub fn add_new(&mut self, tag: Tag) {
        let len = self.len();
        if len != 0 {
            self.complete_message();
            self.start = len;
        }
        if tag != Tag::UNTAGGED {
            self.data.put_u8(tag.as_u8());
        }
        self.data.put_i32(0); // length word, patched by complete_message
    }

    fn complete_message(&mut self) {
        let mut len = self.len() - self.start;
        // An UNTAGGED message has no tag byte, and its length includes the length word.
        // Tag bytes are printable ASCII, so a zero first byte identifies UNTAGGED.
        let mut pos = self.start;
        if self.data[self.start] != Tag::UNTAGGED.as_u8() {
            pos += 1;
            len -= 1;
        }
        if len < 4 {
            // Possible by calling finish() on an UNTAGGED message without
            // writing any data first. That's not a valid use case.
            panic!("message too short");
        }
        self.data[pos..pos + 4].copy_from_slice(&(len as i32).to_be_bytes());
    }

    pub fn write_byte(&mut self, b: u8) {
        self.data.put_u8(b);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.write_byte(0);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_i16(&mut self, i: i16) {
        self.data.put_i16(i);
    }

    pub fn write_i32(&mut self, i: i32) {
        self.data.put_i32(i);
    }

    pub fn write_params(&mut self, params: &StartupParams) {
        for (k, v) in params.iter() {
            self.write_str(k);
            self.write_str(v);
        }
    }
}
