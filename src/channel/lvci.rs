//! Light Virtual Channel Identifiers and multi-hop relay routing.
//!
//! A virtual channel is not anchored on-chain between its endpoints;
//! intermediaries relay state along the path `[origin, intermediaries...,
//! destination]`. State updates travel the full path in both directions:
//! the origin relays forward, the destination relays backward, so every
//! member eventually observes the latest state.

use serde::{Deserialize, Serialize};

use crate::abi::{self, AbiEncode, SlotWriter};
use crate::types::{Address, Hash, U256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lvci {
    pub origin: Address,
    pub destination: Address,
    pub intermediaries: Vec<Address>,
    pub nonce: U256,
}

impl AbiEncode for Lvci {
    fn encode(&self, w: &mut SlotWriter) {
        w.write_address(&self.origin);
        w.write_address(&self.destination);
        w.write_u64(self.intermediaries.len() as u64);
        for hop in &self.intermediaries {
            w.write_address(hop);
        }
        w.write_u256(&self.nonce);
    }
}

impl Lvci {
    pub fn new(origin: Address, destination: Address, intermediaries: Vec<Address>) -> Self {
        Lvci {
            origin,
            destination,
            intermediaries,
            nonce: U256::zero(),
        }
    }

    pub fn with_nonce(mut self, nonce: U256) -> Self {
        self.nonce = nonce;
        self
    }

    /// Deterministic routing identifier over all fields.
    pub fn id(&self) -> Hash {
        abi::to_hash(self)
    }

    /// `[origin, intermediaries..., destination]`.
    pub fn path(&self) -> Vec<Address> {
        let mut path = Vec::with_capacity(self.intermediaries.len() + 2);
        path.push(self.origin);
        path.extend_from_slice(&self.intermediaries);
        path.push(self.destination);
        path
    }

    /// 0-based index of `addr` in the path; `None` for non-members.
    pub fn position(&self, addr: Address) -> Option<usize> {
        self.path().iter().position(|&hop| hop == addr)
    }

    pub fn is_participant(&self, addr: Address) -> bool {
        self.position(addr).is_some()
    }

    /// The path element immediately after (forward) or before (backward)
    /// `from`; `None` if `from` is absent or at the relevant end.
    pub fn next_hop(&self, from: Address, forward: bool) -> Option<Address> {
        let path = self.path();
        let idx = path.iter().position(|&hop| hop == from)?;
        if forward {
            path.get(idx + 1).copied()
        } else {
            idx.checked_sub(1).and_then(|i| path.get(i).copied())
        }
    }

    /// A sub-channel spanning `from` to `to`, keeping only the participants
    /// strictly between them as intermediaries. `None` unless both endpoints
    /// are members and `from` strictly precedes `to`.
    pub fn sub_path(&self, from: Address, to: Address) -> Option<Lvci> {
        let path = self.path();
        let from_idx = path.iter().position(|&hop| hop == from)?;
        let to_idx = path.iter().position(|&hop| hop == to)?;
        if from_idx >= to_idx {
            return None;
        }
        Some(Lvci {
            origin: from,
            destination: to,
            intermediaries: path[from_idx + 1..to_idx].to_vec(),
            nonce: self.nonce,
        })
    }
}

/// Where `me` must relay a state update next.
///
/// The origin always relays forward, the destination always backward.
/// Intermediaries infer direction from the update's own `is_inbound` flag
/// (`true` means toward the origin), defaulting to forward when absent.
pub fn next_relay_hop(lvci: &Lvci, me: Address, is_inbound: Option<bool>) -> Option<Address> {
    if !lvci.is_participant(me) {
        return None;
    }
    let forward = if me == lvci.origin {
        true
    } else if me == lvci.destination {
        false
    } else {
        !is_inbound.unwrap_or(false)
    };
    lvci.next_hop(me, forward)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    fn three_hop() -> Lvci {
        // origin=A, destination=C, intermediaries=[B]
        Lvci::new(addr(0xa), addr(0xc), vec![addr(0xb)])
    }

    #[test]
    fn path_and_positions() {
        let lvci = three_hop();
        assert_eq!(lvci.path(), vec![addr(0xa), addr(0xb), addr(0xc)]);
        assert_eq!(lvci.position(addr(0xb)), Some(1));
        assert_eq!(lvci.position(addr(0xd)), None);
        assert!(lvci.is_participant(addr(0xa)));
        assert!(!lvci.is_participant(addr(0xd)));
    }

    #[test]
    fn next_hop_at_ends() {
        let lvci = three_hop();
        assert_eq!(lvci.next_hop(addr(0xa), true), Some(addr(0xb)));
        assert_eq!(lvci.next_hop(addr(0xc), true), None);
        assert_eq!(lvci.next_hop(addr(0xa), false), None);
        assert_eq!(lvci.next_hop(addr(0xc), false), Some(addr(0xb)));
        assert_eq!(lvci.next_hop(addr(0xd), true), None);
    }

    #[test]
    fn id_is_deterministic_and_field_sensitive() {
        let a = three_hop();
        let b = three_hop();
        assert_eq!(a.id(), b.id());

        let nonced = three_hop().with_nonce(U256::from(7));
        assert_ne!(a.id(), nonced.id());

        let reversed = Lvci::new(addr(0xc), addr(0xa), vec![addr(0xb)]);
        assert_ne!(a.id(), reversed.id());

        let longer = Lvci::new(addr(0xa), addr(0xc), vec![addr(0xb), addr(0xd)]);
        assert_ne!(a.id(), longer.id());
    }

    #[test]
    fn relay_directions() {
        let lvci = three_hop();
        // Origin relays forward regardless of the flag.
        assert_eq!(next_relay_hop(&lvci, addr(0xa), Some(true)), Some(addr(0xb)));
        // Destination relays backward regardless of the flag.
        assert_eq!(next_relay_hop(&lvci, addr(0xc), Some(false)), Some(addr(0xb)));
        // Intermediary follows the flag, forward when absent.
        assert_eq!(next_relay_hop(&lvci, addr(0xb), None), Some(addr(0xc)));
        assert_eq!(next_relay_hop(&lvci, addr(0xb), Some(false)), Some(addr(0xc)));
        assert_eq!(next_relay_hop(&lvci, addr(0xb), Some(true)), Some(addr(0xa)));
        // Non-members relay nowhere.
        assert_eq!(next_relay_hop(&lvci, addr(0xd), None), None);
    }

    #[test]
    fn sub_path_extraction() {
        let lvci = Lvci::new(addr(1), addr(5), vec![addr(2), addr(3), addr(4)]);

        let sub = lvci.sub_path(addr(2), addr(5)).unwrap();
        assert_eq!(sub.origin, addr(2));
        assert_eq!(sub.destination, addr(5));
        assert_eq!(sub.intermediaries, vec![addr(3), addr(4)]);

        // from must strictly precede to, and both must be members.
        assert!(lvci.sub_path(addr(4), addr(2)).is_none());
        assert!(lvci.sub_path(addr(3), addr(3)).is_none());
        assert!(lvci.sub_path(addr(9), addr(5)).is_none());
        assert!(lvci.sub_path(addr(1), addr(9)).is_none());
    }
}
