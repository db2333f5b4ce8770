use crate::pgrelay::{Error, Result};
use crate::pgrelay::pg::protocol::{Message, MessageReader, Tag, PROTOCOL_VERSION};

/// The key-value parameters of a startup message, in wire order.
///
/// Order is preserved so a startup rewritten for the backend is
/// byte-identical apart from the replaced values.
#[derive(Clone, Default, Debug)]
pub struct StartupParams {
    params: Vec<(String, String)>,
}

impl StartupParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the parameter list of a startup message. The protocol version
    /// must already have been checked by the caller.
    pub fn from_startup_message(msg: &Message) -> Result<Self> {
        if msg.tag() != Tag::UNTAGGED {
            return Err(Error::protocol_error(format!("expected startup message, got {:?}", msg)));
        }
        let mut r = MessageReader::new(msg);
        let version = r.read_i32();
        if version != PROTOCOL_VERSION {
            return Err(Error::protocol_error(format!("unsupported protocol {}", version)));
        }

        let mut params = StartupParams::new();
        loop {
            r.error()?;
            if let Some(0) = r.peek() {
                break; // trailing NUL ends the list
            }
            let key = r.read_str()?;
            let value = r.read_str()?;
            params.add(key, value);
        }
        Ok(params)
    }

    pub fn get(&self, k: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == k)
            .map(|(_, value)| value.as_str())
    }

    /// Appends a parameter without looking for an existing one.
    pub fn add(&mut self, k: &str, v: &str) {
        self.params.push((k.to_string(), v.to_string()));
    }

    /// Replaces the value of k in place, preserving its position.
    /// Appends if not present.
    pub fn set(&mut self, k: &str, v: &str) {
        for (key, value) in self.params.iter_mut() {
            if key == k {
                *value = v.to_string();
                return;
            }
        }
        self.add(k, v);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
