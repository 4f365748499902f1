//! Integrity digest over an uploaded archive.
//!
//! The card firmware splits the archive into 512 byte blocks and computes the
//! 16-bit one's complement (TCP style) checksum of each, reading the block as
//! little-endian words. The digest is the MD5 of the concatenated checksums,
//! each stored little-endian, followed by the card's upload key.
//!
//! Tar streams from the card are always a whole number of blocks, so the
//! treatment of a trailing partial block is never observed on the wire. It is
//! assumed here to be zero padded to a full block.
use md5::{Md5, Digest};

pub const BLOCK_SIZE: usize = 512;

fn block_checksum(block: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for w in block.chunks(2) {
        let lo = w[0] as u32;
        let hi = if w.len() > 1 { w[1] as u32 } else { 0 };
        sum += lo | (hi << 8);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Compute the integrity digest of `data` keyed with `key`.
pub fn integrity_digest(data: &[u8], key: &[u8]) -> Vec<u8> {
    let mut h = Md5::new();
    for block in data.chunks(BLOCK_SIZE) {
        h.update(block_checksum(block).to_le_bytes());
    }
    h.update(key);
    h.finalize().to_vec()
}
