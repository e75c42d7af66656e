//! In-memory message broker keyed by address.
//!
//! An explicit, constructible stand-in for a real network: tests and demos
//! create one broker per fixture and register endpoints on it, instead of
//! sharing a process-wide registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::rpc::client::{Inbound, Transport};
use crate::types::Address;
use crate::wire::Envelope;

type Registry = Arc<Mutex<HashMap<Address, mpsc::UnboundedSender<(Address, Envelope)>>>>;

#[derive(Clone, Default)]
pub struct Broker {
    registry: Registry,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address` on the broker and return its transport plus the
    /// inbound stream of envelopes addressed to it.
    pub fn endpoint(&self, address: Address) -> (BrokerTransport, Inbound) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry
            .lock()
            .expect("broker registry poisoned")
            .insert(address, tx);
        (
            BrokerTransport {
                address,
                registry: self.registry.clone(),
            },
            rx,
        )
    }
}

pub struct BrokerTransport {
    address: Address,
    registry: Registry,
}

#[async_trait]
impl Transport for BrokerTransport {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.registry
            .lock()
            .expect("broker registry poisoned")
            .remove(&self.address);
        Ok(())
    }

    async fn send(&self, recipient: Address, envelope: Envelope) -> Result<()> {
        let tx = self
            .registry
            .lock()
            .expect("broker registry poisoned")
            .get(&recipient)
            .cloned();
        match tx {
            Some(tx) => tx
                .send((self.address, envelope))
                .map_err(|_| Error::connection(format!("recipient {} hung up", recipient))),
            None => Err(Error::connection(format!("unknown recipient {}", recipient))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::message::NitroliteRpc;
    use crate::rpc::Method;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[tokio::test]
    async fn delivers_between_endpoints() {
        let broker = Broker::new();
        let mut rng = StdRng::seed_from_u64(0);
        let a: Address = rng.gen();
        let b: Address = rng.gen();
        let (ta, _ra) = broker.endpoint(a);
        let (_tb, mut rb) = broker.endpoint(b);

        let envelope = NitroliteRpc::request(Method::Ping, vec![], Some(1), Some(1));
        ta.send(b, envelope.clone()).await.unwrap();

        let (from, received) = rb.recv().await.unwrap();
        assert_eq!(from, a);
        assert_eq!(received, envelope);
    }

    #[tokio::test]
    async fn unknown_recipient_is_a_connection_error() {
        let broker = Broker::new();
        let mut rng = StdRng::seed_from_u64(0);
        let a: Address = rng.gen();
        let (ta, _ra) = broker.endpoint(a);

        let envelope = NitroliteRpc::request(Method::Ping, vec![], Some(1), Some(1));
        assert!(ta.send(rng.gen(), envelope).await.is_err());
    }

    #[tokio::test]
    async fn disconnect_unregisters() {
        let broker = Broker::new();
        let mut rng = StdRng::seed_from_u64(0);
        let a: Address = rng.gen();
        let b: Address = rng.gen();
        let (ta, _ra) = broker.endpoint(a);
        let (tb, _rb) = broker.endpoint(b);

        tb.disconnect().await.unwrap();
        let envelope = NitroliteRpc::request(Method::Ping, vec![], Some(1), Some(1));
        assert!(ta.send(b, envelope).await.is_err());
    }
}
