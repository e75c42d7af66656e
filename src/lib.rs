//! Off-chain state channel SDK speaking the NitroliteRPC protocol.
//!
//! The layers, bottom up:
//! - [types], [abi], [sig]: wire primitives, deterministic keccak hashing and
//!   recoverable Ethereum signatures.
//! - [wire], [rpc]: the JSON envelope codec, the message factory, typed
//!   response parsing and the correlating [rpc::RpcClient] over a pluggable
//!   [rpc::Transport].
//! - [channel]: channel identity and state, the per-channel
//!   [channel::ChannelContext] phase machine, the multi-channel
//!   [channel::ChannelManager] and virtual-channel routing via
//!   [channel::Lvci].
//! - [auth]: the challenge handshake authorizing a session key under a
//!   wallet policy.
//!
//! On-chain effects are delegated to an injected [chain::ChainInterface];
//! this crate never talks to a blockchain directly.

pub mod abi;
pub mod auth;
pub mod chain;
pub mod channel;
pub mod error;
pub mod rpc;
pub mod sig;
pub mod types;
pub mod wire;

pub use error::{Error, ErrorKind, Result};
pub use types::{Address, Hash, Signature, U256};
