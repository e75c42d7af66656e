//! Channel data model and per-channel machinery.
//!
//! [Channel] and [State] are value objects: every mutation produces a new
//! [State] rather than editing in place, and a channel's identity is the
//! keccak hash of its immutable parameters.

mod context;
mod lvci;
mod manager;

pub use context::{AppLogic, ChannelContext, Phase};
pub use lvci::{next_relay_hop, Lvci};
pub use manager::{ChannelManager, ChannelRecord};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::abi::{self, AbiEncode, SlotWriter};
use crate::error::{Error, Result};
use crate::types::{hex_bytes, Address, Hash, Signature, U256};

pub const PARTICIPANTS: usize = 2;

/// Immutable channel parameters. The nonce exists precisely to allow
/// distinct channels between the same participants and adjudicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub participants: [Address; PARTICIPANTS],
    pub adjudicator: Address,
    /// Challenge duration in seconds.
    pub challenge: u64,
    pub nonce: U256,
}

impl AbiEncode for Channel {
    fn encode(&self, w: &mut SlotWriter) {
        for participant in &self.participants {
            w.write_address(participant);
        }
        w.write_address(&self.adjudicator);
        w.write_u64(self.challenge);
        w.write_u256(&self.nonce);
    }
}

impl Channel {
    /// Deterministic channel id: equal fields always yield equal ids,
    /// changing any field changes the id.
    pub fn id(&self) -> Hash {
        abi::to_hash(self)
    }

    /// The participant that is not `me`, if `me` is in the channel at all.
    pub fn counterparty_of(&self, me: Address) -> Option<Address> {
        if self.participants[0] == me {
            Some(self.participants[1])
        } else if self.participants[1] == me {
            Some(self.participants[0])
        } else {
            None
        }
    }
}

/// Binds a destination and token to an amount within a [State].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub destination: Address,
    pub token: Address,
    pub amount: U256,
}

/// A snapshot of a channel's application data and fund allocation,
/// accumulating participant signatures as they co-sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Opaque application payload, interpreted by the adjudicator.
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub allocations: [Allocation; PARTICIPANTS],
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sigs: Vec<Signature>,
}

impl State {
    pub fn new(data: Vec<u8>, allocations: [Allocation; PARTICIPANTS]) -> Self {
        State {
            data,
            allocations,
            sigs: Vec::new(),
        }
    }

    /// Hash signed by participants when co-signing this state.
    pub fn hash(&self, channel_id: Hash) -> Hash {
        let mut w = SlotWriter::new();
        w.write_hash(&channel_id);
        w.write_bytes(&self.data);
        for alloc in &self.allocations {
            w.write_address(&alloc.destination);
            w.write_address(&alloc.token);
            w.write_u256(&alloc.amount);
        }
        w.finish()
    }

    fn totals_per_token(&self) -> BTreeMap<Address, U256> {
        let mut totals = BTreeMap::new();
        for alloc in &self.allocations {
            let entry = totals.entry(alloc.token).or_insert_with(U256::zero);
            *entry = entry.overflowing_add(alloc.amount).0;
        }
        totals
    }

    /// Ordinary updates redistribute value, never create or destroy it.
    /// Resize and deposit operations are the designated exceptions and skip
    /// this check.
    pub fn conserves_value(&self, prev: &State) -> bool {
        self.totals_per_token() == prev.totals_per_token()
    }

    pub fn with_signature(mut self, sig: Signature) -> Self {
        self.sigs.push(sig);
        self
    }

    /// Fully signed once every participant has co-signed.
    pub fn is_fully_signed(&self) -> bool {
        self.sigs.len() >= PARTICIPANTS
    }
}

/// Multi-party channel definition for application sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSessionDefinition {
    pub protocol: String,
    pub participants: Vec<Address>,
    pub weights: Vec<u64>,
    pub quorum: u64,
    pub challenge: u64,
    pub nonce: u64,
}

impl AppSessionDefinition {
    pub fn validate(&self) -> Result<()> {
        if self.participants.is_empty() {
            return Err(Error::validation("app session has no participants"));
        }
        if self.participants.len() != self.weights.len() {
            return Err(Error::validation(format!(
                "participants and weights length mismatch: {} vs {}",
                self.participants.len(),
                self.weights.len()
            )));
        }
        let total: u64 = self.weights.iter().sum();
        if self.quorum > total {
            return Err(Error::validation(format!(
                "quorum {} exceeds total weight {}",
                self.quorum, total
            )));
        }
        Ok(())
    }

    /// True when the cumulative weight of `signers` reaches the quorum.
    pub fn quorum_met(&self, signers: &[Address]) -> bool {
        let weight: u64 = self
            .participants
            .iter()
            .zip(&self.weights)
            .filter(|(participant, _)| signers.contains(participant))
            .map(|(_, weight)| weight)
            .sum();
        weight >= self.quorum
    }
}
