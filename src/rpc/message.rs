//! Construction and signing of protocol envelopes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::abi::{self, SlotWriter};
use crate::channel::Allocation;
use crate::error::Result;
use crate::rpc::Method;
use crate::sig::{self, PayloadSigner, Signer};
use crate::types::{Address, Hash, Signature};
use crate::wire::{Envelope, ErrorBody, Notification, Request, Response};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Monotonic-ish unique request id: current time in ms with a rolling
/// per-process counter folded into the low digits.
pub fn next_request_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let c = COUNTER.fetch_add(1, Ordering::Relaxed);
    now_ms() * 1000 + (c % 1000)
}

/// Factory for canonical envelopes.
///
/// Id and timestamp default to the generators above when omitted, but are
/// always explicit deterministic inputs when provided, so historical messages
/// can be replayed byte for byte in tests.
pub struct NitroliteRpc;

impl NitroliteRpc {
    pub fn request(
        method: Method,
        params: Vec<Value>,
        id: Option<u64>,
        timestamp: Option<u64>,
    ) -> Envelope {
        Envelope::request(Request {
            id: id.unwrap_or_else(next_request_id),
            method: method.as_str().to_string(),
            params,
            timestamp: timestamp.unwrap_or_else(now_ms),
        })
    }

    pub fn response(
        id: u64,
        method: Method,
        result: Vec<Value>,
        timestamp: Option<u64>,
    ) -> Envelope {
        Envelope::response(Response {
            id,
            method: method.as_str().to_string(),
            result,
            timestamp: timestamp.unwrap_or_else(now_ms),
        })
    }

    pub fn error(id: u64, code: i32, message: &str, timestamp: Option<u64>) -> Envelope {
        Envelope::error(ErrorBody {
            id,
            code,
            message: message.to_string(),
            timestamp: timestamp.unwrap_or_else(now_ms),
        })
    }

    pub fn notification(kind: &str, data: Vec<Value>, timestamp: Option<u64>) -> Envelope {
        Envelope::notification(Notification {
            kind: kind.to_string(),
            data,
            timestamp: timestamp.unwrap_or_else(now_ms),
        })
    }

    /// Sign the envelope's inner tuple with the given strategy, replacing any
    /// existing signatures.
    pub fn sign(envelope: &mut Envelope, signer: &dyn PayloadSigner) -> Result<()> {
        let payload = envelope.payload_bytes()?;
        envelope.sig = vec![signer.sign(&payload)];
        Ok(())
    }

    /// Verify the envelope's first signature against `expected` using the
    /// plain payload strategy. No signature present means `false`, not an
    /// error.
    pub fn verify(envelope: &Envelope, expected: Address) -> bool {
        let sig = match envelope.sig.first() {
            Some(sig) => *sig,
            None => return false,
        };
        let payload = match envelope.payload_bytes() {
            Ok(p) => p,
            Err(_) => return false,
        };
        sig::verify(abi::keccak(&payload), sig, expected)
    }
}

/// Which side of a request/response exchange a state signature covers.
///
/// Host and guest play asymmetric roles (one proposes, one counter-signs),
/// so the two layouts hash differently on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRole {
    Request,
    Response,
}

impl StateRole {
    fn tag(self) -> u64 {
        match self {
            StateRole::Request => 1,
            StateRole::Response => 2,
        }
    }
}

/// Protocol hash binding a message payload to a channel and its allocations.
pub fn state_payload_hash(
    role: StateRole,
    channel_id: Hash,
    allocations: &[Allocation],
    payload: &[u8],
) -> Hash {
    let mut w = SlotWriter::new();
    w.write_u64(role.tag());
    w.write_hash(&channel_id);
    for alloc in allocations {
        w.write_address(&alloc.destination);
        w.write_address(&alloc.token);
        w.write_u256(&alloc.amount);
    }
    w.write_hash(&abi::keccak(payload));
    w.finish()
}

/// Signing strategy that binds envelope payloads to a channel's funds.
pub struct StateSigner<'a> {
    signer: &'a Signer,
    role: StateRole,
    channel_id: Hash,
    allocations: Vec<Allocation>,
}

impl<'a> StateSigner<'a> {
    pub fn new(
        signer: &'a Signer,
        role: StateRole,
        channel_id: Hash,
        allocations: Vec<Allocation>,
    ) -> Self {
        StateSigner {
            signer,
            role,
            channel_id,
            allocations,
        }
    }
}

impl PayloadSigner for StateSigner<'_> {
    fn sign(&self, payload: &[u8]) -> Signature {
        let hash = state_payload_hash(self.role, self.channel_id, &self.allocations, payload);
        self.signer.sign_eth(hash)
    }

    fn verify(&self, payload: &[u8], sig: Signature, expected: Address) -> bool {
        let hash = state_payload_hash(self.role, self.channel_id, &self.allocations, payload);
        sig::verify(hash, sig, expected)
    }

    fn address(&self) -> Address {
        self.signer.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::U256;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn explicit_id_and_timestamp_are_reproducible() {
        let a = NitroliteRpc::request(Method::Ping, vec![], Some(42), Some(1000));
        let b = NitroliteRpc::request(Method::Ping, vec![], Some(42), Some(1000));
        assert_eq!(a.payload_bytes().unwrap(), b.payload_bytes().unwrap());
    }

    #[test]
    fn verify_without_signature_is_false() {
        let mut rng = StdRng::seed_from_u64(0);
        let signer = Signer::new(&mut rng);
        let env = NitroliteRpc::request(Method::Ping, vec![], Some(1), Some(1));
        assert!(!NitroliteRpc::verify(&env, signer.address()));
    }

    #[test]
    fn sign_then_verify() {
        let mut rng = StdRng::seed_from_u64(0);
        let signer = Signer::new(&mut rng);
        let mut env = NitroliteRpc::request(Method::Ping, vec![], Some(1), Some(1));
        NitroliteRpc::sign(&mut env, &signer).unwrap();
        assert!(NitroliteRpc::verify(&env, signer.address()));

        let mut rng = StdRng::seed_from_u64(1);
        let other = Signer::new(&mut rng);
        assert!(!NitroliteRpc::verify(&env, other.address()));
    }

    #[test]
    fn request_and_response_state_hashes_differ() {
        let mut rng = StdRng::seed_from_u64(0);
        let channel_id: Hash = rng.gen();
        let allocations = [
            Allocation {
                destination: rng.gen(),
                token: rng.gen(),
                amount: U256::from(100),
            },
            Allocation {
                destination: rng.gen(),
                token: rng.gen(),
                amount: U256::from(50),
            },
        ];
        let payload = br#"[1,"state_update",[],1]"#;
        let req = state_payload_hash(StateRole::Request, channel_id, &allocations, payload);
        let res = state_payload_hash(StateRole::Response, channel_id, &allocations, payload);
        assert_ne!(req, res);
    }

    #[test]
    fn state_signer_mirrors() {
        let mut rng = StdRng::seed_from_u64(0);
        let signer = Signer::new(&mut rng);
        let channel_id: Hash = rng.gen();
        let strategy = StateSigner::new(&signer, StateRole::Request, channel_id, vec![]);

        let payload = b"payload";
        let sig = strategy.sign(payload);
        assert!(strategy.verify(payload, sig, signer.address()));
        // A plain-strategy verification of the same bytes must fail: the
        // state hash mixes in the channel id.
        assert!(!PayloadSigner::verify(&signer, payload, sig, signer.address()));
    }
}
