//! Credential values that never print.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const REDACTED: &str = "********";

/// A credential. `Debug` and `Display` redact; use [`Secret::expose`] at the
/// single point where the value is written or passed to a command.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Bytes of a v4 UUID that carry no version or variant bits.
const RANDOM_UUID_BYTES: [usize; 14] = [0, 1, 2, 3, 4, 5, 7, 9, 10, 11, 12, 13, 14, 15];

fn random_bytes(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let uuid = uuid::Uuid::new_v4();
        let bytes = uuid.as_bytes();
        out.extend(RANDOM_UUID_BYTES.iter().map(|&i| bytes[i]));
    }
    out.truncate(len);
    out
}

const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

/// Map bytes onto the alphabet, dropping bytes from the incomplete last
/// block of 256 so every character is equally likely.
fn password_chars(bytes: impl IntoIterator<Item = u8>, len: usize, out: &mut String) {
    let n = PASSWORD_ALPHABET.len();
    let limit = 256 - 256 % n;
    for b in bytes {
        if out.len() == len {
            break;
        }
        if (b as usize) < limit {
            out.push(PASSWORD_ALPHABET[b as usize % n] as char);
        }
    }
}

/// Alphanumeric database password. Avoids characters that need quoting in
/// SQL, shell or `.env` values.
pub fn generate_password(len: usize) -> Secret {
    let mut value = String::with_capacity(len);
    while value.len() < len {
        password_chars(random_bytes(len), len, &mut value);
    }
    Secret(value)
}

/// Laravel application key: `base64:` followed by 32 random bytes.
pub fn generate_app_key() -> Secret {
    Secret(format!("base64:{}", STANDARD.encode(random_bytes(32))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_redact_in_debug_and_display() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "********");
        assert_eq!(format!("{}", secret), "********");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn generated_passwords_are_alphanumeric_and_distinct() {
        let a = generate_password(24);
        let b = generate_password(24);
        assert_eq!(a.expose().len(), 24);
        assert!(a.expose().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn password_sampling_skips_bytes_past_the_last_full_block() {
        let mut out = String::new();
        password_chars([228, 255, 0, 56, 57, 227], 4, &mut out);
        assert_eq!(out, "A9A9");

        let mut short = String::new();
        password_chars([230, 1], 4, &mut short);
        assert_eq!(short, "B");
    }

    #[test]
    fn app_key_decodes_to_32_bytes() {
        let key = generate_app_key();
        let encoded = key.expose().strip_prefix("base64:").unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap().len(), 32);
    }
}
