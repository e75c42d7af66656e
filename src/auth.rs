//! The auth_request → auth_challenge → auth_verify handshake.
//!
//! The opening request is unsigned; authenticity is established by signing
//! the broker's challenge with the primary wallet key, bound to the requested
//! policy through a typed structured hash. A previously issued JWT short cuts
//! the handshake; a stale one is discarded and the full flow retried exactly
//! once.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::debug;

use crate::abi::{self, SlotWriter};
use crate::error::{Error, Result};
use crate::rpc::{Method, ParsedResponse, RpcClient, Transport};
use crate::sig::{self, PayloadSigner, Signer};
use crate::types::{Address, Hash, Signature, U256};

/// Opaque key-value storage for session material (JWT tokens, session keys).
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
    fn remove(&mut self, key: &str);
}

#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowance {
    pub asset: String,
    pub amount: U256,
}

/// The policy the wallet grants to a session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthParams {
    /// Primary wallet address; the challenge is signed with its key.
    pub wallet: Address,
    /// Session (participant) address authorized to sign on its behalf.
    pub participant: Address,
    pub scope: String,
    pub application: Address,
    /// Expiry as a Unix timestamp in seconds.
    pub expire: u64,
    pub allowances: Vec<Allowance>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub address: Address,
    pub session_key: Option<Address>,
    pub jwt_token: Option<String>,
}

const POLICY_TYPE: &[u8] = b"Policy(string challenge,string scope,address wallet,\
address application,address participant,uint64 expire,Allowance[] allowances)\
Allowance(string asset,uint256 amount)";
const ALLOWANCE_TYPE: &[u8] = b"Allowance(string asset,uint256 amount)";

/// Typed structured hash binding the challenge to the requested policy.
///
/// The field layout is fixed; both sides must produce identical hashes or
/// verification fails, which is the point: a challenge signature is only
/// valid for exactly this scope, application, participant, expiry and
/// allowance set.
pub fn challenge_hash(challenge: &str, params: &AuthParams) -> Hash {
    let mut w = SlotWriter::new();
    w.write_hash(&abi::keccak(POLICY_TYPE));
    w.write_hash(&abi::keccak(challenge.as_bytes()));
    w.write_hash(&abi::keccak(params.scope.as_bytes()));
    w.write_address(&params.wallet);
    w.write_address(&params.application);
    w.write_address(&params.participant);
    w.write_u64(params.expire);
    let mut allowances = SlotWriter::new();
    for allowance in &params.allowances {
        allowances.write_hash(&abi::keccak(ALLOWANCE_TYPE));
        allowances.write_hash(&abi::keccak(allowance.asset.as_bytes()));
        allowances.write_u256(&allowance.amount);
    }
    w.write_hash(&allowances.finish());
    w.finish()
}

/// Signing strategy for the handshake: the payload is the challenge message,
/// the signed hash is the typed policy hash built from it.
pub struct TypedChallengeSigner<'a> {
    signer: &'a Signer,
    params: &'a AuthParams,
}

impl<'a> TypedChallengeSigner<'a> {
    pub fn new(signer: &'a Signer, params: &'a AuthParams) -> Self {
        TypedChallengeSigner { signer, params }
    }
}

impl PayloadSigner for TypedChallengeSigner<'_> {
    fn sign(&self, payload: &[u8]) -> Signature {
        let challenge = String::from_utf8_lossy(payload);
        self.signer.sign_eth(challenge_hash(&challenge, self.params))
    }

    fn verify(&self, payload: &[u8], sig: Signature, expected: Address) -> bool {
        let challenge = String::from_utf8_lossy(payload);
        sig::verify(challenge_hash(&challenge, self.params), sig, expected)
    }

    fn address(&self) -> Address {
        self.signer.address()
    }
}

fn jwt_key(wallet: Address) -> String {
    format!("jwt:{}", wallet)
}

/// Run the handshake against `broker`, preferring a cached JWT.
///
/// `wallet` holds the primary key, distinct from the session key inside
/// `client`. On success any freshly issued JWT is stored for the next run.
pub async fn authenticate<T: Transport>(
    client: &RpcClient<T>,
    broker: Address,
    wallet: &Signer,
    params: &AuthParams,
    store: &mut dyn SessionStore,
) -> Result<AuthResult> {
    let key = jwt_key(params.wallet);
    if let Some(jwt) = store.get(&key) {
        match verify_with_jwt(client, broker, &jwt).await {
            Ok(result) => {
                if let Some(fresh) = &result.jwt_token {
                    store.set(&key, fresh.clone());
                }
                return Ok(result);
            }
            Err(e) if e.is_jwt_related() => {
                debug!(wallet = %params.wallet, "cached jwt rejected, falling back to challenge flow");
                store.remove(&key);
            }
            Err(e) => return Err(e),
        }
    }

    let result = challenge_flow(client, broker, wallet, params).await?;
    if let Some(jwt) = &result.jwt_token {
        store.set(&key, jwt.clone());
    }
    Ok(result)
}

async fn verify_with_jwt<T: Transport>(
    client: &RpcClient<T>,
    broker: Address,
    jwt: &str,
) -> Result<AuthResult> {
    let params = vec![json!({ "jwt": jwt })];
    let parsed = client.call(broker, Method::AuthVerify, params).await?;
    into_auth_result(parsed)
}

async fn challenge_flow<T: Transport>(
    client: &RpcClient<T>,
    broker: Address,
    wallet: &Signer,
    params: &AuthParams,
) -> Result<AuthResult> {
    let request = vec![json!({
        "address": params.wallet,
        "session_key": params.participant,
        "application": params.application,
        "scope": params.scope,
        "expire": params.expire,
        "allowances": params
            .allowances
            .iter()
            .map(|a| json!({ "asset": a.asset, "amount": a.amount }))
            .collect::<Vec<Value>>(),
    })];
    let response = client
        .send_request_unsigned(broker, Method::AuthRequest, request)
        .await?;

    let method = Method::from(response.method.as_str());
    let challenge = match crate::rpc::parse::parse_response(&method, &response.result)? {
        ParsedResponse::AuthChallenge(c) => c.challenge_message,
        other => {
            return Err(Error::authentication(format!(
                "expected an auth challenge, got {:?}",
                other
            )))
        }
    };

    let typed = TypedChallengeSigner::new(wallet, params);
    let signature = typed.sign(challenge.as_bytes());

    let verify = vec![json!({
        "challenge": challenge,
        "signature": signature,
    })];
    let parsed = client.call(broker, Method::AuthVerify, verify).await?;
    into_auth_result(parsed)
}

fn into_auth_result(parsed: ParsedResponse) -> Result<AuthResult> {
    match parsed {
        ParsedResponse::AuthVerify(v) if v.success => Ok(AuthResult {
            address: v.address,
            session_key: v.session_key,
            jwt_token: v.jwt_token,
        }),
        ParsedResponse::AuthVerify(_) => Err(Error::authentication("authentication rejected")),
        other => Err(Error::authentication(format!(
            "expected an auth_verify result, got {:?}",
            other
        ))),
    }
}
