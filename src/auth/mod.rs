//! Card authentication.
//!
//! A card proves knowledge of its upload key by presenting an MD5 credential
//! over its own address, a nonce and the key. Each value is hex on the wire
//! and is decoded to bytes before hashing.
//!
//! At session start the server answers with the credential computed over the
//! card's nonce:
//!
//! ``` ignore
//! md5(mac || cnonce || upload_key)
//! ```
//!
//! and on subsequent calls expects the card to present the credential
//! computed over the server's nonce:
//!
//! ``` ignore
//! md5(mac || upload_key || snonce)
//! ```
use std::fmt;

use md5::{Md5, Digest};
use log::debug;

use crate::error::{
    ErrorKind,
    ServiceError,
    ServiceResult,
};

/// Server nonce generation.
pub mod nonce;

pub use nonce::Nonce;

pub const CREDENTIAL_LEN: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Credential {
    v: [u8; CREDENTIAL_LEN],
}

fn hex_field(name: &str, s: &str) -> ServiceResult<Vec<u8>> {
    hex::decode(s).map_err(|e| ServiceError::protocol(format!("{} '{}' is not hex: {}", name, s, e)))
}

impl Credential {
    fn digest(parts: &[&[u8]]) -> Credential {
        let mut h = Md5::new();
        for p in parts {
            h.update(p);
        }
        let mut v = [0u8; CREDENTIAL_LEN];
        v.copy_from_slice(&h.finalize());
        Credential{
            v,
        }
    }

    /// Credential returned to the card in answer to its session start.
    pub fn initial(mac: &str, cnonce: &str, key: &[u8]) -> ServiceResult<Credential> {
        let mac_b = hex_field("card address", mac)?;
        let cnonce_b = hex_field("client nonce", cnonce)?;
        Ok(Credential::digest(&[mac_b.as_slice(), cnonce_b.as_slice(), key]))
    }

    /// Credential the card must present while the session with `snonce` lasts.
    pub fn expected(mac: &str, key: &[u8], snonce: &Nonce) -> ServiceResult<Credential> {
        let mac_b = hex_field("card address", mac)?;
        Ok(Credential::digest(&[mac_b.as_slice(), key, snonce.as_bytes()]))
    }

    /// Check a credential presented by the card. Anything but an exact match
    /// of all 16 bytes is an authentication failure.
    pub fn verify(&self, presented: &str) -> ServiceResult<()> {
        debug!("computed credential {}", self);
        match hex::decode(presented.trim()) {
            Ok(v) if v.as_slice() == self.v.as_slice() => Ok(()),
            _ => Err(ServiceError::new(ErrorKind::Authentication, "card authentication failed")),
        }
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&hex::encode(self.v))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "Credential({})", self)
    }
}
