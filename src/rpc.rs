//! The NitroliteRPC protocol layer: message factory, method surface, typed
//! response parsing, the correlating client and an in-memory broker.

pub mod broker;
pub mod client;
pub mod message;
mod method;
pub mod parse;

pub use broker::{Broker, BrokerTransport};
pub use client::{ClientConfig, Inbound, RpcClient, Transport};
pub use message::{NitroliteRpc, StateRole, StateSigner};
pub use method::Method;
pub use parse::ParsedResponse;
