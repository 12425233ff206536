//! Bootstrap tokens and certificate keys.

use std::fs::File;
use std::io::{self, Read};
use thiserror::Error;

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_ID_LEN: usize = 6;
const TOKEN_SECRET_LEN: usize = 16;
/// Bytes of entropy behind a certificate key (AES-256).
pub const CERTIFICATE_KEY_BYTES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("the bootstrap token {0:?} was not of the form \"[a-z0-9]{{6}}.[a-z0-9]{{16}}\"")]
pub struct InvalidToken(pub String);

fn random_bytes(n: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    File::open("/dev/urandom")?.read_exact(&mut buf)?;
    Ok(buf)
}

fn random_string(len: usize) -> io::Result<String> {
    // Bytes at or above the largest multiple of the alphabet size are dropped.
    let limit = (u8::MAX as usize / TOKEN_ALPHABET.len()) * TOKEN_ALPHABET.len();
    let mut out = String::with_capacity(len);
    while out.len() < len {
        for byte in random_bytes(len * 2)? {
            if (byte as usize) < limit && out.len() < len {
                out.push(TOKEN_ALPHABET[byte as usize % TOKEN_ALPHABET.len()] as char);
            }
        }
    }
    Ok(out)
}

/// New random token `[a-z0-9]{6}.[a-z0-9]{16}`.
pub fn generate_token() -> io::Result<String> {
    Ok(format!(
        "{}.{}",
        random_string(TOKEN_ID_LEN)?,
        random_string(TOKEN_SECRET_LEN)?
    ))
}

pub fn validate_token(token: &str) -> Result<(), InvalidToken> {
    let valid_part = |part: &str, len: usize| {
        part.len() == len
            && part
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    };
    match token.split_once('.') {
        Some((id, secret)) if valid_part(id, TOKEN_ID_LEN) && valid_part(secret, TOKEN_SECRET_LEN) => {
            Ok(())
        }
        _ => Err(InvalidToken(token.to_string())),
    }
}

/// Public token id, the part before the dot.
pub fn token_id(token: &str) -> &str {
    token.split('.').next().unwrap_or_default()
}

/// Hex encoded random key for encrypting uploaded certificates.
pub fn generate_certificate_key() -> io::Result<String> {
    Ok(hex::encode(random_bytes(CERTIFICATE_KEY_BYTES)?))
}

pub fn validate_certificate_key(key: &str) -> Result<(), String> {
    let bytes = hex::decode(key).map_err(|e| format!("invalid certificate key: {}", e))?;
    if bytes.len() != CERTIFICATE_KEY_BYTES {
        return Err(format!(
            "invalid certificate key: expected {} bytes, got {}",
            CERTIFICATE_KEY_BYTES,
            bytes.len()
        ));
    }
    Ok(())
}
