//! Seam to the on-chain custody contract.
//!
//! The SDK never talks to a blockchain itself; it hands candidate states and
//! proofs to whatever implements [ChainInterface] and treats the calls as
//! fallible async operations. Failures should be categorized with
//! [crate::Error::from_chain_message] so callers get actionable errors.

use async_trait::async_trait;

use crate::channel::{Channel, State};
use crate::error::Result;
use crate::types::{Address, Hash, U256};

#[async_trait]
pub trait ChainInterface: Send + Sync + 'static {
    /// Fund and anchor a channel with its initial state, returning the
    /// on-chain channel id.
    async fn open_channel(&self, channel: &Channel, initial: &State) -> Result<Hash>;

    /// Submit a final state for cooperative close.
    async fn close_channel(&self, channel_id: Hash, state: &State, proofs: &[State])
        -> Result<()>;

    /// Start an on-chain dispute with the given candidate state.
    async fn challenge_channel(
        &self,
        channel_id: Hash,
        state: &State,
        proofs: &[State],
    ) -> Result<()>;

    /// Record a state on-chain without closing, cutting off older
    /// challenges.
    async fn checkpoint_channel(
        &self,
        channel_id: Hash,
        state: &State,
        proofs: &[State],
    ) -> Result<()>;

    /// Reclaim funds after a challenge period expired.
    async fn reclaim_channel(&self, channel_id: Hash) -> Result<()>;

    async fn token_allowance(&self, token: Address, owner: Address) -> Result<U256>;
    async fn approve_tokens(&self, token: Address, amount: U256) -> Result<()>;
    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256>;
}
