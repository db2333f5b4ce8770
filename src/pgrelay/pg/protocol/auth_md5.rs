use crypto::digest::Digest;
use crypto::md5::Md5;

fn md5_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.input(part);
    }
    let mut digest = [0; 16];
    hasher.result(&mut digest);
    hex::encode(&digest[..])
}

/// Construct the "md5" + hex digest answer to an MD5 password challenge,
/// according to the PostgreSQL auth algorithm: md5(md5(password + user) + salt).
pub fn hash_md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner = md5_hex(&[password.as_bytes(), user.as_bytes()]);
    let mut result = String::with_capacity(32 + 3);
    result.push_str("md5");
    result.push_str(&md5_hex(&[inner.as_bytes(), &salt[..]]));
    result
}
