//! Tracks every channel a participant is involved in and gates incoming
//! channel operations on counterparty authorization.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::{Channel, State};
use crate::error::{Error, Result};
use crate::sig::Signer;
use crate::types::{Address, Hash, Signature};

#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub channel: Channel,
    pub current_state: Option<State>,
    pub counterparty: Address,
}

/// Routes incoming channel operations to the right [ChannelRecord], holding
/// the participant's signing key for co-sign requests.
pub struct ChannelManager {
    address: Address,
    signer: Signer,
    channels: HashMap<Hash, ChannelRecord>,
}

impl ChannelManager {
    pub fn new(signer: Signer) -> Self {
        ChannelManager {
            address: signer.address(),
            signer,
            channels: HashMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = &Hash> {
        self.channels.keys()
    }

    pub fn get(&self, channel_id: &Hash) -> Option<&ChannelRecord> {
        self.channels.get(channel_id)
    }

    /// Start tracking a channel we participate in.
    pub fn register(&mut self, channel: Channel, initial: Option<State>) -> Result<Hash> {
        let counterparty = channel
            .counterparty_of(self.address)
            .ok_or_else(|| Error::state(format!("{} is not a participant", self.address)))?;
        let id = channel.id();
        self.channels.insert(
            id,
            ChannelRecord {
                channel,
                current_state: initial,
                counterparty,
            },
        );
        Ok(id)
    }

    pub fn unregister(&mut self, channel_id: &Hash) -> Option<ChannelRecord> {
        self.channels.remove(channel_id)
    }

    /// Accept a state update from `from`. Only the channel's counterparty may
    /// update, and ordinary updates must conserve value per token. Returns
    /// whether the update was applied; rejected updates never touch the
    /// tracked state.
    pub fn handle_state_update(&mut self, channel_id: Hash, from: Address, state: State) -> bool {
        let record = match self.channels.get_mut(&channel_id) {
            Some(record) => record,
            None => {
                warn!(channel = %channel_id, "state update for unknown channel");
                return false;
            }
        };
        if from != record.counterparty {
            debug!(channel = %channel_id, %from, "state update from unauthorized sender");
            return false;
        }
        if let Some(current) = &record.current_state {
            if !state.conserves_value(current) {
                debug!(channel = %channel_id, "state update does not conserve value");
                return false;
            }
        }
        record.current_state = Some(state);
        true
    }

    /// Co-sign a state at the counterparty's request. The signature covers
    /// the state hash bound to the channel id.
    pub fn handle_sign_request(
        &self,
        channel_id: Hash,
        from: Address,
        state: &State,
    ) -> Result<Signature> {
        let record = self.require_authorized(channel_id, from)?;
        if let Some(current) = &record.current_state {
            if !state.conserves_value(current) {
                return Err(Error::state("refusing to sign a state that creates value"));
            }
        }
        Ok(self.signer.sign_eth(state.hash(channel_id)))
    }

    /// Drop a channel on the counterparty's close notification, returning
    /// its final record.
    pub fn handle_close(&mut self, channel_id: Hash, from: Address) -> Result<ChannelRecord> {
        self.require_authorized(channel_id, from)?;
        self.channels
            .remove(&channel_id)
            .ok_or_else(|| Error::state("channel disappeared"))
    }

    /// Note an on-chain challenge against a tracked channel. Returns the
    /// latest state known locally, which callers submit as a counter-proof.
    pub fn handle_challenge(&self, channel_id: Hash, from: Address) -> Result<Option<State>> {
        let record = self.require_authorized(channel_id, from)?;
        Ok(record.current_state.clone())
    }

    fn require_authorized(&self, channel_id: Hash, from: Address) -> Result<&ChannelRecord> {
        let record = self
            .channels
            .get(&channel_id)
            .ok_or_else(|| Error::state(format!("unknown channel {}", channel_id)))?;
        if from != record.counterparty {
            return Err(Error::authentication(format!(
                "{} is not the counterparty of channel {}",
                from, channel_id
            )));
        }
        Ok(record)
    }
}
