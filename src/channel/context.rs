//! Per-channel state machine.
//!
//! A [ChannelContext] tracks one channel's current signed state and the
//! application-level sub-state it encodes. On-chain effects go through the
//! injected [ChainInterface]; peers exchange states through the RPC layer and
//! feed them in via [ChannelContext::process_received_state].

use std::sync::Arc;

use tracing::debug;

use super::{Allocation, Channel, State, PARTICIPANTS};
use crate::chain::ChainInterface;
use crate::error::{Error, Result};
use crate::types::{Address, Hash, U256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Open,
    Challenged,
    Closing,
    Closed,
}

/// Application logic plugged into a channel.
///
/// The default transition validator accepts everything (no validator
/// defined); the default finality predicate reports `false`, so a channel
/// without one is never considered final.
pub trait AppLogic: Send + Sync {
    type Data: Clone + Send + Sync;

    fn encode(&self, data: &Self::Data) -> Vec<u8>;
    fn decode(&self, raw: &[u8]) -> Option<Self::Data>;

    fn validate_transition(&self, _prev: &Self::Data, _next: &Self::Data, _signer: Address) -> bool {
        true
    }

    fn is_final(&self, _data: &Self::Data) -> bool {
        false
    }
}

pub struct ChannelContext<A: AppLogic, C: ChainInterface> {
    channel: Channel,
    me: Address,
    counterparty: Address,
    app: A,
    chain: Arc<C>,
    phase: Phase,
    current: Option<State>,
    app_state: Option<A::Data>,
}

impl<A: AppLogic, C: ChainInterface> ChannelContext<A, C> {
    pub fn new(channel: Channel, me: Address, app: A, chain: Arc<C>) -> Result<Self> {
        let counterparty = channel
            .counterparty_of(me)
            .ok_or_else(|| Error::state(format!("{} is not a participant of the channel", me)))?;
        Ok(ChannelContext {
            channel,
            me,
            counterparty,
            app,
            chain,
            phase: Phase::Uninitialized,
            current: None,
            app_state: None,
        })
    }

    pub fn channel_id(&self) -> Hash {
        self.channel.id()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_state(&self) -> Option<&State> {
        self.current.as_ref()
    }

    pub fn app_state(&self) -> Option<&A::Data> {
        self.app_state.as_ref()
    }

    /// Seed the application state before opening.
    pub fn initialize(&mut self, data: A::Data) -> Result<()> {
        if self.phase != Phase::Uninitialized {
            return Err(Error::state("channel is already open"));
        }
        self.app_state = Some(data);
        Ok(())
    }

    /// Build the initial state from the seeded app state, anchor it on
    /// chain, and move to `Open`.
    pub async fn open(&mut self, token: Address, amounts: [U256; PARTICIPANTS]) -> Result<Hash> {
        if self.phase != Phase::Uninitialized {
            return Err(Error::state("channel is already open"));
        }
        let data = match &self.app_state {
            Some(data) => self.app.encode(data),
            None => return Err(Error::state("application state not initialized")),
        };
        let allocations = [
            Allocation {
                destination: self.channel.participants[0],
                token,
                amount: amounts[0],
            },
            Allocation {
                destination: self.channel.participants[1],
                token,
                amount: amounts[1],
            },
        ];
        let state = State::new(data, allocations);

        let id = self.chain.open_channel(&self.channel, &state).await?;
        self.current = Some(state);
        self.phase = Phase::Open;
        Ok(id)
    }

    /// Apply a local application-level move. Allocations are preserved: an
    /// app-only move redistributes nothing. Rejected transitions leave the
    /// tracked state untouched.
    pub fn update_app_state(&mut self, next: A::Data) -> Result<State> {
        if self.phase != Phase::Open {
            return Err(Error::state("channel is not open"));
        }
        let prev = self
            .app_state
            .as_ref()
            .ok_or_else(|| Error::state("no application state to transition from"))?;
        if !self.app.validate_transition(prev, &next, self.me) {
            return Err(Error::state("transition rejected by application validator"));
        }
        let current = self
            .current
            .as_ref()
            .ok_or_else(|| Error::state("no current state"))?;

        let state = State::new(self.app.encode(&next), current.allocations);
        self.app_state = Some(next);
        self.current = Some(state.clone());
        Ok(state)
    }

    /// Feed in a state received from the counterparty. The first state ever
    /// seen is accepted unconditionally (bootstrap); afterwards the state
    /// must conserve value per token and pass the app validator, with the
    /// counterparty as the signing actor. Returns whether the state was
    /// accepted; a rejection never mutates the tracked state.
    pub fn process_received_state(&mut self, incoming: State) -> bool {
        let current = match &self.current {
            Some(current) => current,
            None => {
                self.app_state = self.app.decode(&incoming.data);
                self.current = Some(incoming);
                if self.phase == Phase::Uninitialized {
                    self.phase = Phase::Open;
                }
                return true;
            }
        };

        if !incoming.conserves_value(current) {
            debug!(channel = %self.channel_id(), "received state does not conserve value");
            return false;
        }

        let next = match self.app.decode(&incoming.data) {
            Some(next) => next,
            None => {
                debug!(channel = %self.channel_id(), "received state with undecodable app data");
                return false;
            }
        };
        if let Some(prev) = &self.app_state {
            if !self.app.validate_transition(prev, &next, self.counterparty) {
                debug!(channel = %self.channel_id(), "received state rejected by app validator");
                return false;
            }
        }

        self.app_state = Some(next);
        self.current = Some(incoming);
        true
    }

    /// Cooperative close with the current state plus historical proofs.
    pub async fn close(&mut self, proofs: &[State]) -> Result<()> {
        let state = self.require_current()?.clone();
        self.phase = Phase::Closing;
        self.chain
            .close_channel(self.channel_id(), &state, proofs)
            .await?;
        self.phase = Phase::Closed;
        Ok(())
    }

    /// Start an on-chain dispute. The challenge resolves back to `Closed`
    /// through counterparty cooperation or challenge-period expiry, both
    /// outside this component's control.
    pub async fn challenge(&mut self, proofs: &[State]) -> Result<()> {
        let state = self.require_current()?.clone();
        self.chain
            .challenge_channel(self.channel_id(), &state, proofs)
            .await?;
        self.phase = Phase::Challenged;
        Ok(())
    }

    /// Record the current state on-chain without closing.
    pub async fn checkpoint(&mut self, proofs: &[State]) -> Result<()> {
        let state = self.require_current()?.clone();
        self.chain
            .checkpoint_channel(self.channel_id(), &state, proofs)
            .await
    }

    /// Whether the app considers the current state final. Without a finality
    /// predicate this is `false`, not an error.
    pub fn is_final(&self) -> bool {
        match &self.app_state {
            Some(data) => self.app.is_final(data),
            None => false,
        }
    }

    fn require_current(&self) -> Result<&State> {
        self.current
            .as_ref()
            .ok_or_else(|| Error::state("channel has no current state"))
    }
}
