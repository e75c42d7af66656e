//! Deterministic keccak hashing over 32-byte ABI slots.
//!
//! Channel IDs, LVCI IDs and state hashes are keccak256 over the ABI slot
//! encoding of their fields. The encoding is a pure function of the value: no
//! randomness, no time, so identical values always hash identically and the
//! hashes are portable across processes.

use sha3::{Digest, Keccak256};

use crate::types::{Address, Hash, U256};

/// Streams 32-byte slots into a keccak hasher.
pub struct SlotWriter {
    hasher: Keccak256,
}

impl Default for SlotWriter {
    fn default() -> Self {
        Self {
            hasher: Keccak256::new(),
        }
    }
}

impl SlotWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_address(&mut self, addr: &Address) {
        // Addresses are right aligned (like uints), not left aligned like
        // bytesN.
        let mut slot = [0u8; 32];
        slot[32 - 20..].copy_from_slice(&addr.0);
        self.hasher.update(slot);
    }

    pub fn write_u64(&mut self, value: u64) {
        let mut slot = [0u8; 32];
        slot[32 - 8..].copy_from_slice(&value.to_be_bytes());
        self.hasher.update(slot);
    }

    pub fn write_u256(&mut self, value: &U256) {
        let mut slot = [0u8; 32];
        value.to_big_endian(&mut slot);
        self.hasher.update(slot);
    }

    pub fn write_hash(&mut self, hash: &Hash) {
        self.hasher.update(hash.0);
    }

    /// Dynamic bytes: a length slot followed by the data padded to a slot
    /// boundary.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.write_u64(data.len() as u64);
        self.hasher.update(data);
        let rem = data.len() % 32;
        if rem != 0 {
            self.hasher.update(&[0u8; 32][..32 - rem]);
        }
    }

    pub fn finish(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

/// Types with a canonical slot encoding, and therefore a canonical hash.
pub trait AbiEncode {
    fn encode(&self, w: &mut SlotWriter);
}

pub fn to_hash<T: AbiEncode>(value: &T) -> Hash {
    let mut w = SlotWriter::new();
    value.encode(&mut w);
    w.finish()
}

/// Plain keccak256 of a byte string, without slot padding.
pub fn keccak(data: &[u8]) -> Hash {
    Hash(Keccak256::digest(data).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair(Address, U256);

    impl AbiEncode for Pair {
        fn encode(&self, w: &mut SlotWriter) {
            w.write_address(&self.0);
            w.write_u256(&self.1);
        }
    }

    #[test]
    fn hashing_is_deterministic() {
        let addr: Address = "0x5b38da6a701c568545dcfcb03fcb875f56beddc4".parse().unwrap();
        let a = to_hash(&Pair(addr, U256::from(7)));
        let b = to_hash(&Pair(addr, U256::from(7)));
        assert_eq!(a, b);
    }

    #[test]
    fn field_change_changes_hash() {
        let addr: Address = "0x5b38da6a701c568545dcfcb03fcb875f56beddc4".parse().unwrap();
        let a = to_hash(&Pair(addr, U256::from(7)));
        let b = to_hash(&Pair(addr, U256::from(8)));
        assert_ne!(a, b);
    }

    #[test]
    fn bytes_padding_distinguishes_lengths() {
        let mut w = SlotWriter::new();
        w.write_bytes(&[1, 2, 3]);
        let short = w.finish();

        let mut w = SlotWriter::new();
        w.write_bytes(&[1, 2, 3, 0]);
        let padded = w.finish();

        assert_ne!(short, padded);
    }
}
