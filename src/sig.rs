//! Creation and verification of Ethereum signatures.
//!
//! Verification always goes through address recovery: a signature is valid
//! for an address only if the recovered signer equals that address. Malformed
//! signatures make [verify] return `false`, never panic or error.

use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as K256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha3::{Digest, Keccak256};

use crate::abi;
use crate::types::{Address, Hash, Signature};

pub use k256::ecdsa::Error;

/// Add the `\x19Ethereum Signed Message\n<length>` prefix to hash.
///
/// This is the format expected by the Solidity contracts.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the slot writer
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.0);
    Hash(hasher.finalize().into())
}

impl From<VerifyingKey> for Address {
    fn from(key: VerifyingKey) -> Self {
        // Convert the key into an EncodedPoint (on the curve), which has the
        // data we need in bytes [1..]. This panics only if the bytes
        // representation of EncodedPoint stops being 65 bytes, which would be
        // a much bigger breaking change in the dependency.
        let pk_bytes: [u8; 65] = key.to_encoded_point(false).as_bytes().try_into().unwrap();

        // Throw away the first byte, which is not part of the public key. It
        // is added by the uncompressed SEC1 encoding.
        let hash: [u8; 32] = Keccak256::digest(&pk_bytes[1..]).into();

        let mut addr = Address([0; 20]);
        addr.0.copy_from_slice(&hash[32 - 20..]);
        addr
    }
}

#[derive(Debug)]
pub struct Signer {
    key: SigningKey,
    addr: Address,
}

impl Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        let key = SigningKey::random(rng);
        let addr = key.verifying_key().into();
        Self { key, addr }
    }

    pub fn from_bytes(private_key: &[u8; 32]) -> Result<Self, Error> {
        let key = SigningKey::from_bytes(private_key)?;
        let addr = key.verifying_key().into();
        Ok(Self { key, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn sign_eth(&self, msg: Hash) -> Signature {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self.key.sign_prehash(&hash.0).unwrap();

        // The recoverable signature is already 65 bytes of r, s, v in this
        // order, but v must be offset by 27 to be valid in the EVM.
        let mut sig_bytes: [u8; 65] = sig.as_bytes().try_into().expect(
            "Unreachable: Signature size doesn't match, something big must have changed in the dependency",
        );
        debug_assert!(sig_bytes[32] & 0x80 == 0);
        sig_bytes[64] += 27;

        Signature(sig_bytes)
    }

    pub fn recover_signer(&self, msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
        recover(msg, eth_sig)
    }
}

/// Recover the address that produced `eth_sig` over `msg`.
pub fn recover(msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
    let hash = hash_to_eth_signed_msg_hash(msg);

    // Undo adding the 27, to go back to the recovery id
    let mut sig_bytes: [u8; 65] = eth_sig.0;
    if sig_bytes[64] < 27 {
        return Err(Error::new());
    }
    sig_bytes[64] -= 27;

    let sig = recoverable::Signature::from_bytes(&sig_bytes)?;
    let verifying_key = sig.recover_verifying_key_from_digest_bytes(&hash.0.into())?;
    Ok(verifying_key.into())
}

/// True iff `eth_sig` was produced over `msg` by `expected`.
pub fn verify(msg: Hash, eth_sig: Signature, expected: Address) -> bool {
    match recover(msg, eth_sig) {
        Ok(addr) => addr == expected,
        Err(_) => false,
    }
}

/// A substitutable signing strategy over byte payloads.
///
/// The plain strategy hashes the payload directly; the state and typed
/// strategies mix protocol context into the hash. `sign` and `verify` of one
/// strategy mirror each other; signatures are not portable across strategies.
pub trait PayloadSigner: Send + Sync {
    fn sign(&self, payload: &[u8]) -> Signature;
    fn verify(&self, payload: &[u8], sig: Signature, expected: Address) -> bool;
    fn address(&self) -> Address;
}

impl PayloadSigner for Signer {
    fn sign(&self, payload: &[u8]) -> Signature {
        self.sign_eth(abi::keccak(payload))
    }

    fn verify(&self, payload: &[u8], sig: Signature, expected: Address) -> bool {
        verify(abi::keccak(payload), sig, expected)
    }

    fn address(&self) -> Address {
        self.addr
    }
}
