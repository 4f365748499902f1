use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;

pub const NONCE_LEN: usize = 16;

/// Server nonce binding a card's session.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Nonce {
    v: [u8; NONCE_LEN],
}

impl Nonce {
    /// Draw a fresh nonce from the operating system's random source.
    pub fn generate() -> Nonce {
        let mut v = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut v);
        Nonce{
            v,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.v
    }
}

impl From<[u8; NONCE_LEN]> for Nonce {
    fn from(v: [u8; NONCE_LEN]) -> Nonce {
        Nonce{
            v,
        }
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&hex::encode(self.v))
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "Nonce({})", self)
    }
}
