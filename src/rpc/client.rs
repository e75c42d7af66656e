//! Transport abstraction, request correlation and retry.
//!
//! One [RpcClient] owns its pending-request table and handler registry for
//! its lifetime. Correctness never depends on response ordering, only on
//! request-id correlation: each caller of [RpcClient::send_request] is woken
//! by exactly the response or error carrying its own request id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{codes, Error, ErrorKind, Result};
use crate::rpc::message::NitroliteRpc;
use crate::rpc::parse::{self, ParsedResponse};
use crate::rpc::Method;
use crate::sig::PayloadSigner;
use crate::types::Address;
use crate::wire::{Envelope, Response};

/// Pluggable message transport.
///
/// Anything that can move envelopes between addresses satisfies the client:
/// a WebSocket connection, an in-memory broker, HTTP long-polling. Inbound
/// traffic arrives as `(sender, envelope)` pairs on the channel handed to
/// [RpcClient::spawn_dispatch].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn send(&self, recipient: Address, envelope: Envelope) -> Result<()>;
}

pub type Inbound = mpsc::UnboundedReceiver<(Address, Envelope)>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Our own address, announced to the transport.
    pub address: Address,
    /// Fixed timeout per attempt; no backoff at this layer.
    pub request_timeout: Duration,
    /// Additional attempts after the first before giving up.
    pub max_retries: u32,
}

impl ClientConfig {
    pub fn new(address: Address) -> Self {
        ClientConfig {
            address,
            request_timeout: Duration::from_secs(10),
            max_retries: 2,
        }
    }
}

struct Pending {
    tx: oneshot::Sender<Result<Response>>,
}

type HandlerFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Vec<Value>>> + Send + Sync>;
type ListenerFn = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

pub struct RpcClient<T: Transport> {
    transport: Arc<T>,
    signer: Arc<dyn PayloadSigner>,
    config: ClientConfig,
    pending: Arc<Mutex<HashMap<u64, Pending>>>,
    handlers: Arc<Mutex<HashMap<Method, HandlerFn>>>,
    listeners: Arc<Mutex<HashMap<String, Vec<ListenerFn>>>>,
}

impl<T: Transport> Clone for RpcClient<T> {
    fn clone(&self) -> Self {
        RpcClient {
            transport: self.transport.clone(),
            signer: self.signer.clone(),
            config: self.config.clone(),
            pending: self.pending.clone(),
            handlers: self.handlers.clone(),
            listeners: self.listeners.clone(),
        }
    }
}

impl<T: Transport> RpcClient<T> {
    pub fn new(transport: T, signer: impl PayloadSigner + 'static, config: ClientConfig) -> Self {
        RpcClient {
            transport: Arc::new(transport),
            signer: Arc::new(signer),
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn address(&self) -> Address {
        self.config.address
    }

    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await
    }

    /// Tear down the transport and reject every pending request with a
    /// connection-closed error, so no caller is left waiting forever.
    pub async fn disconnect(&self) -> Result<()> {
        let result = self.transport.disconnect().await;
        let mut pending = self.pending.lock().await;
        for (_, entry) in pending.drain() {
            let _ = entry.tx.send(Err(Error::connection("connection closed")));
        }
        result
    }

    /// Spawn the inbound dispatch loop. Each envelope is handled on its own
    /// task, so a slow handler never blocks correlation of unrelated
    /// responses.
    pub fn spawn_dispatch(&self, mut inbound: Inbound) -> tokio::task::JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            while let Some((from, envelope)) = inbound.recv().await {
                let client = client.clone();
                tokio::spawn(async move {
                    client.handle_envelope(from, envelope).await;
                });
            }
        })
    }

    /// Send a signed request and suspend until the matching response, error,
    /// timeout exhaustion or disconnect. A request whose replies never arrive
    /// is rejected after exactly `max_retries + 1` attempts; each retry is a
    /// freshly signed request under the same id, so a late reply to an
    /// earlier attempt still resolves the call.
    pub async fn send_request(
        &self,
        recipient: Address,
        method: Method,
        params: Vec<Value>,
    ) -> Result<Response> {
        self.send_request_with(recipient, method, params, true).await
    }

    /// Same as [RpcClient::send_request] but with an unsigned envelope. Used
    /// by the auth handshake, whose opening message carries no signature.
    pub async fn send_request_unsigned(
        &self,
        recipient: Address,
        method: Method,
        params: Vec<Value>,
    ) -> Result<Response> {
        self.send_request_with(recipient, method, params, false).await
    }

    async fn send_request_with(
        &self,
        recipient: Address,
        method: Method,
        params: Vec<Value>,
        sign: bool,
    ) -> Result<Response> {
        let id = super::message::next_request_id();
        let attempts = self.config.max_retries + 1;

        for attempt in 0..attempts {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().await.insert(id, Pending { tx });

            let mut envelope = NitroliteRpc::request(method.clone(), params.clone(), Some(id), None);
            if sign {
                NitroliteRpc::sign(&mut envelope, self.signer.as_ref())?;
            }
            if let Err(e) = self.transport.send(recipient, envelope).await {
                self.pending.lock().await.remove(&id);
                return Err(e);
            }

            match tokio::time::timeout(self.config.request_timeout, rx).await {
                Ok(Ok(outcome)) => return outcome,
                // The pending entry was dropped without a reply; only
                // disconnect does that.
                Ok(Err(_)) => return Err(Error::connection("connection closed")),
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    debug!(request_id = id, attempt, "request attempt timed out");
                }
            }
        }

        Err(Error::timeout(attempts))
    }

    /// Send a request and run the typed parser over the result.
    pub async fn call(
        &self,
        recipient: Address,
        method: Method,
        params: Vec<Value>,
    ) -> Result<ParsedResponse> {
        let response = self.send_request(recipient, method, params).await?;
        let response_method = Method::from(response.method.as_str());
        parse::parse_response(&response_method, &response.result)
    }

    /// Fire-and-forget signed notification.
    pub async fn notify(&self, recipient: Address, kind: &str, data: Vec<Value>) -> Result<()> {
        let mut envelope = NitroliteRpc::notification(kind, data, None);
        NitroliteRpc::sign(&mut envelope, self.signer.as_ref())?;
        self.transport.send(recipient, envelope).await
    }

    /// Register the handler invoked for inbound requests of `method`,
    /// replacing any previous one.
    pub async fn register_handler<F, Fut>(&self, method: Method, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Value>>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |params| Box::pin(handler(params)));
        self.handlers.lock().await.insert(method, handler);
    }

    /// Subscribe to inbound notifications of `kind`.
    pub async fn on_notification<F>(&self, kind: &str, listener: F)
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .await
            .entry(kind.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Route one inbound envelope. Malformed envelopes are logged and
    /// dropped; they must never take down the dispatch loop.
    pub async fn handle_envelope(&self, from: Address, envelope: Envelope) {
        if envelope.correlation_id().is_some() {
            self.resolve_reply(from, envelope).await;
        } else if envelope.req.is_some() {
            self.handle_request(from, envelope).await;
        } else if envelope.ntf.is_some() {
            self.handle_notification(from, envelope).await;
        } else {
            warn!(sender = %from, "dropping envelope with no body");
        }
    }

    async fn resolve_reply(&self, from: Address, envelope: Envelope) {
        let id = match envelope.correlation_id() {
            Some(id) => id,
            None => return,
        };
        let entry = self.pending.lock().await.remove(&id);
        let entry = match entry {
            Some(entry) => entry,
            None => {
                // Expected under retry duplicate delivery or very late
                // replies.
                debug!(request_id = id, "no pending request for reply, dropping");
                return;
            }
        };

        let signed = !envelope.sig.is_empty();
        if signed && !self.verify_envelope(&envelope, from) {
            let _ = entry.tx.send(Err(Error::invalid_signature()));
            return;
        }

        let outcome = if let Some(res) = envelope.res {
            Ok(res)
        } else if let Some(err) = envelope.err {
            Err(Error::rpc(err.code, err.message))
        } else {
            return;
        };
        let _ = entry.tx.send(outcome);
    }

    async fn handle_request(&self, from: Address, envelope: Envelope) {
        let req = match &envelope.req {
            Some(req) => req.clone(),
            None => return,
        };

        if !envelope.sig.is_empty() && !self.verify_envelope(&envelope, from) {
            self.send_error(from, req.id, codes::INVALID_SIGNATURE, "invalid signature")
                .await;
            return;
        }

        let method = Method::from(req.method.as_str());
        let handler = self.handlers.lock().await.get(&method).cloned();
        let handler = match handler {
            Some(handler) => handler,
            None => {
                self.send_error(
                    from,
                    req.id,
                    codes::METHOD_NOT_FOUND,
                    &format!("method not found: {}", req.method),
                )
                .await;
                return;
            }
        };

        match handler(req.params).await {
            Ok(result) => {
                let mut reply = NitroliteRpc::response(req.id, method, result, None);
                if let Err(e) = NitroliteRpc::sign(&mut reply, self.signer.as_ref()) {
                    warn!(request_id = req.id, error = %e, "failed to sign response");
                    return;
                }
                if let Err(e) = self.transport.send(from, reply).await {
                    // No correlated caller to notify on this side.
                    warn!(request_id = req.id, error = %e, "failed to send response");
                }
            }
            Err(e) => {
                let code = match e.kind {
                    ErrorKind::Validation => codes::INVALID_PARAMS,
                    ErrorKind::Authentication => codes::UNAUTHORIZED,
                    ErrorKind::Rpc => e.code,
                    _ => codes::INTERNAL_ERROR,
                };
                self.send_error(from, req.id, code, &e.message).await;
            }
        }
    }

    async fn handle_notification(&self, from: Address, envelope: Envelope) {
        let ntf = match &envelope.ntf {
            Some(ntf) => ntf.clone(),
            None => return,
        };

        // Notifications have no reply channel to report the error on, so a
        // bad signature just drops the message.
        if !envelope.sig.is_empty() && !self.verify_envelope(&envelope, from) {
            debug!(kind = %ntf.kind, sender = %from, "dropping notification with bad signature");
            return;
        }

        let listeners = self
            .listeners
            .lock()
            .await
            .get(&ntf.kind)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener(ntf.data.clone());
        }
    }

    fn verify_envelope(&self, envelope: &Envelope, from: Address) -> bool {
        let sig = match envelope.sig.first() {
            Some(sig) => *sig,
            None => return false,
        };
        let payload = match envelope.payload_bytes() {
            Ok(p) => p,
            Err(_) => return false,
        };
        self.signer.verify(&payload, sig, from)
    }

    async fn send_error(&self, recipient: Address, id: u64, code: i32, message: &str) {
        let mut reply = NitroliteRpc::error(id, code, message, None);
        if NitroliteRpc::sign(&mut reply, self.signer.as_ref()).is_err() {
            return;
        }
        if let Err(e) = self.transport.send(recipient, reply).await {
            warn!(request_id = id, error = %e, "failed to send error response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::broker::Broker;
    use crate::sig::Signer;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(address: Address) -> ClientConfig {
        ClientConfig {
            address,
            request_timeout: Duration::from_millis(200),
            max_retries: 2,
        }
    }

    fn make_client(
        broker: &Broker,
        seed: u64,
        config: impl Fn(Address) -> ClientConfig,
    ) -> RpcClient<crate::rpc::broker::BrokerTransport> {
        let mut rng = StdRng::seed_from_u64(seed);
        let signer = Signer::new(&mut rng);
        let address = signer.address();
        let (transport, inbound) = broker.endpoint(address);
        let client = RpcClient::new(transport, signer, config(address));
        client.spawn_dispatch(inbound);
        client
    }

    #[tokio::test]
    async fn doubling_request_roundtrip() {
        let broker = Broker::new();
        let a = make_client(&broker, 1, fast_config);
        let b = make_client(&broker, 2, fast_config);

        b.register_handler(Method::Custom("test_method".into()), |params| async move {
            let n = params[0].as_u64().ok_or_else(|| Error::validation("expected number"))?;
            Ok(vec![json!(n * 2)])
        })
        .await;

        let response = a
            .send_request(b.address(), Method::Custom("test_method".into()), vec![json!(42)])
            .await
            .unwrap();
        assert_eq!(response.result, vec![json!(84)]);
    }

    #[tokio::test]
    async fn unknown_method_rejects_instead_of_hanging() {
        let broker = Broker::new();
        let a = make_client(&broker, 1, fast_config);
        let b = make_client(&broker, 2, fast_config);

        let err = a
            .send_request(b.address(), Method::Custom("nope".into()), vec![])
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
        assert!(err.message.contains("method not found"));
    }

    #[tokio::test]
    async fn concurrent_requests_correlate_correctly() {
        let broker = Broker::new();
        let a = make_client(&broker, 1, fast_config);
        let b = make_client(&broker, 2, fast_config);

        b.register_handler(Method::Custom("echo".into()), |params| async move {
            // Unordered arrival: later requests may finish first.
            let delay = 50 - params[0].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(params)
        })
        .await;

        let mut handles = Vec::new();
        for i in 0u64..8 {
            let a = a.clone();
            let to = b.address();
            handles.push(tokio::spawn(async move {
                let res = a
                    .send_request(to, Method::Custom("echo".into()), vec![json!(i)])
                    .await
                    .unwrap();
                (i, res.result)
            }));
        }
        for handle in handles {
            let (i, result) = handle.await.unwrap();
            assert_eq!(result, vec![json!(i)]);
        }
    }

    /// Transport that counts sends and never delivers anything.
    struct Blackhole(AtomicU32);

    #[async_trait]
    impl Transport for Arc<Blackhole> {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn send(&self, _recipient: Address, _envelope: Envelope) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn timeout_after_exactly_max_retries_plus_one_attempts() {
        let counter = Arc::new(Blackhole(AtomicU32::new(0)));
        let mut rng = StdRng::seed_from_u64(1);
        let signer = Signer::new(&mut rng);
        let address = signer.address();
        let client = RpcClient::new(
            counter.clone(),
            signer,
            ClientConfig {
                address,
                request_timeout: Duration::from_millis(20),
                max_retries: 2,
            },
        );

        let err = client
            .send_request(Address::default(), Method::Ping, vec![])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.details.get("attempts").map(String::as_str), Some("3"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn disconnect_rejects_all_pending_requests() {
        let counter = Arc::new(Blackhole(AtomicU32::new(0)));
        let mut rng = StdRng::seed_from_u64(1);
        let signer = Signer::new(&mut rng);
        let address = signer.address();
        let client = RpcClient::new(
            counter,
            signer,
            ClientConfig {
                address,
                request_timeout: Duration::from_secs(60),
                max_retries: 0,
            },
        );

        let mut handles = Vec::new();
        for _ in 0..3 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.send_request(Address::default(), Method::Ping, vec![]).await
            }));
        }
        // Let all three requests register before tearing down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.disconnect().await.unwrap();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.kind, ErrorKind::Connection);
        }
    }

    #[tokio::test]
    async fn forged_request_signature_gets_error_response() {
        let broker = Broker::new();
        let b = make_client(&broker, 2, fast_config);
        b.register_handler(Method::Ping, |_| async { Ok(vec![]) }).await;

        // A raw endpoint lets the test inspect what comes back.
        let mut rng = StdRng::seed_from_u64(3);
        let honest = Signer::new(&mut rng);
        let forger = Signer::new(&mut rng);
        let (transport, mut inbound) = broker.endpoint(honest.address());

        let mut envelope = NitroliteRpc::request(Method::Ping, vec![], Some(77), None);
        NitroliteRpc::sign(&mut envelope, &forger).unwrap();
        transport.send(b.address(), envelope).await.unwrap();

        let (_, reply) = inbound.recv().await.unwrap();
        let err = reply.err.expect("expected error envelope");
        assert_eq!(err.id, 77);
        assert_eq!(err.code, codes::INVALID_SIGNATURE);
    }

    #[tokio::test]
    async fn notifications_dispatch_to_listeners() {
        let broker = Broker::new();
        let a = make_client(&broker, 1, fast_config);
        let b = make_client(&broker, 2, fast_config);

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.on_notification("balance_update", move |data| {
            let _ = tx.send(data);
        })
        .await;

        a.notify(b.address(), "balance_update", vec![json!({"amount": "5"})])
            .await
            .unwrap();

        let data = rx.recv().await.unwrap();
        assert_eq!(data, vec![json!({"amount": "5"})]);
    }

    #[tokio::test]
    async fn bad_notification_signature_is_silently_dropped() {
        let broker = Broker::new();
        let b = make_client(&broker, 2, fast_config);

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Value>>();
        b.on_notification("balance_update", move |data| {
            let _ = tx.send(data);
        })
        .await;

        let mut rng = StdRng::seed_from_u64(4);
        let sender: Address = rng.gen();
        let forger = Signer::new(&mut rng);
        let (transport, _inbound) = broker.endpoint(sender);

        let mut envelope = NitroliteRpc::notification("balance_update", vec![json!(1)], None);
        NitroliteRpc::sign(&mut envelope, &forger).unwrap();
        transport.send(b.address(), envelope).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
