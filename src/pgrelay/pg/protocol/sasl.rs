use crypto::digest::Digest;
use crypto::hmac::Hmac;
use crypto::mac::Mac;
use crypto::pbkdf2::pbkdf2;
use crypto::sha2::Sha256;
use crypto::util::fixed_time_eq;
use rand::Rng;

use crate::pgrelay::{Error, Result};

pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

// No channel binding: the proxy dials backends without TLS.
const GS2_HEADER: &str = "n,,";
const CHANNEL_BINDING: &str = "c=biws"; // base64("n,,")

const NONCE_LENGTH: usize = 24;
const SHA256_OUTPUT_LENGTH: usize = 32;

fn hmac_sha256(key: &[u8], input: &[u8]) -> [u8; SHA256_OUTPUT_LENGTH] {
    let mut mac = Hmac::new(Sha256::new(), key);
    mac.input(input);
    let mut out = [0u8; SHA256_OUTPUT_LENGTH];
    out.copy_from_slice(mac.result().code());
    out
}

fn sha256(input: &[u8]) -> [u8; SHA256_OUTPUT_LENGTH] {
    let mut hasher = Sha256::new();
    hasher.input(input);
    let mut out = [0u8; SHA256_OUTPUT_LENGTH];
    hasher.result(&mut out);
    out
}

// SaltedPassword := Hi(Normalize(password), salt, i)
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> [u8; SHA256_OUTPUT_LENGTH] {
    let mut mac = Hmac::new(Sha256::new(), password);
    let mut out = [0u8; SHA256_OUTPUT_LENGTH];
    pbkdf2(&mut mac, salt, iterations, &mut out);
    out
}

// nonce = printable ASCII except ','
fn gen_nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..NONCE_LENGTH)
        .map(|_| {
            let mut b: u8 = rng.gen_range(0x21..0x7f);
            while b == 0x2c {
                b = rng.gen_range(0x21..0x7f);
            }
            b as char
        })
        .collect()
}

fn parse_attr<'a>(part: Option<&'a str>, attr: char) -> Result<&'a str> {
    match part {
        Some(part) if part.len() >= 2 && part.starts_with(attr) && part.as_bytes()[1] == b'=' => {
            Ok(&part[2..])
        }
        _ => Err(Error::protocol_error(format!("malformed SCRAM attribute, expected '{}='", attr))),
    }
}

enum State {
    Update { nonce: String, password: Vec<u8> },
    Finish { server_signature: [u8; SHA256_OUTPUT_LENGTH] },
    Done,
}

/// Client side of a SCRAM-SHA-256 authentication exchange (RFC 5802/7677).
///
/// The caller drives it: message() is the payload to send, update() consumes
/// the server-first message and produces the client-final message, finish()
/// verifies the server signature from the server-final message.
pub struct ScramSha256 {
    message: String,
    state: State,
}

impl ScramSha256 {
    pub fn new(user: &str, password: &str) -> Result<Self> {
        Self::new_with_nonce(user, password, gen_nonce())
    }

    fn new_with_nonce(user: &str, password: &str, nonce: String) -> Result<Self> {
        // Postgres takes the username from the startup message and ignores
        // the SASL one, but send it anyway per the RFC.
        let password = stringprep::saslprep(password)
            .map_err(|_| Error::new("password rejected by saslprep"))?
            .into_owned()
            .into_bytes();
        let message = format!("{}n={},r={}", GS2_HEADER, user, nonce);
        Ok(ScramSha256 {
            message,
            state: State::Update { nonce, password },
        })
    }

    /// The payload to send to the server for the current phase.
    pub fn message(&self) -> &[u8] {
        self.message.as_bytes()
    }

    /// Consume the server-first message, leaving the client-final message in message().
    pub fn update(&mut self, server_first: &[u8]) -> Result<()> {
        let (client_nonce, password) = match std::mem::replace(&mut self.state, State::Done) {
            State::Update { nonce, password } => (nonce, password),
            _ => return Err(Error::protocol_error("unexpected SCRAM server-first message")),
        };

        let server_first = std::str::from_utf8(server_first)?;
        let mut parts = server_first.split(',');
        let combined_nonce = parse_attr(parts.next(), 'r')?;
        let salt = base64::decode(parse_attr(parts.next(), 's')?)
            .map_err(|_| Error::protocol_error("invalid base64 SCRAM salt"))?;
        let iterations: u32 = parse_attr(parts.next(), 'i')?
            .parse()
            .map_err(|_| Error::protocol_error("invalid SCRAM iteration count"))?;

        if !combined_nonce.starts_with(&client_nonce) {
            return Err(Error::protocol_error("SCRAM nonce does not extend the one we sent"));
        }

        let salted_password = hi(&password, &salt, iterations);

        // ClientKey := HMAC(SaltedPassword, "Client Key")
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        // StoredKey := H(ClientKey)
        let stored_key = sha256(&client_key);

        let client_final_without_proof = format!("{},r={}", CHANNEL_BINDING, combined_nonce);

        // AuthMessage := client-first-message-bare + "," + server-first-message
        //               + "," + client-final-message-without-proof
        let client_first_bare = &self.message[GS2_HEADER.len()..];
        let auth_message = format!("{},{},{}", client_first_bare, server_first, client_final_without_proof);

        // ClientProof := ClientKey XOR HMAC(StoredKey, AuthMessage)
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature.iter()) {
            *p ^= s;
        }

        // ServerSignature := HMAC(HMAC(SaltedPassword, "Server Key"), AuthMessage)
        let server_key = hmac_sha256(&salted_password, b"Server Key");
        let server_signature = hmac_sha256(&server_key, auth_message.as_bytes());

        self.message = format!("{},p={}", client_final_without_proof, base64::encode(&proof));
        self.state = State::Finish { server_signature };
        Ok(())
    }

    /// Verify the server-final message against the expected server signature.
    pub fn finish(&mut self, server_final: &[u8]) -> Result<()> {
        let expected = match std::mem::replace(&mut self.state, State::Done) {
            State::Finish { server_signature } => server_signature,
            _ => return Err(Error::protocol_error("unexpected SCRAM server-final message")),
        };

        let server_final = std::str::from_utf8(server_final)?;
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(Error::new(format!("SCRAM authentication failed: {}", err)));
        }
        let verifier = base64::decode(parse_attr(server_final.split(',').next(), 'v')?)
            .map_err(|_| Error::protocol_error("invalid base64 SCRAM verifier"))?;

        if !fixed_time_eq(&verifier[..], &expected[..]) {
            return Err(Error::protocol_error("SCRAM server signature mismatch"));
        }
        Ok(())
    }
}
