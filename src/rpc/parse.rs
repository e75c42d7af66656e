//! Per-method response parsing.
//!
//! The last line of defense against a malformed or malicious counterparty:
//! every supported method has exactly one parser that checks arity and shape
//! and produces a typed domain object. Amounts arrive as decimal strings and
//! are converted to [U256] exactly, never through floating point. An unknown
//! method is an explicit failure, not a default success.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::channel::{Allocation, AppSessionDefinition};
use crate::error::{Error, Result};
use crate::rpc::Method;
use crate::types::{Address, Hash, Signature, U256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub challenge_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthVerifyResult {
    pub address: Address,
    pub session_key: Option<Address>,
    pub jwt_token: Option<String>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: String,
    pub chain_id: u64,
    pub custody_address: Address,
    pub adjudicator_address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub broker_address: Address,
    pub networks: Vec<NetworkInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerBalance {
    pub asset: String,
    pub amount: U256,
}

/// Broker-side lifecycle of a tracked channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Open,
    Joining,
    Resizing,
    Closing,
    Closed,
    Challenged,
}

impl ChannelStatus {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(ChannelStatus::Open),
            "joining" => Ok(ChannelStatus::Joining),
            "resizing" => Ok(ChannelStatus::Resizing),
            "closing" => Ok(ChannelStatus::Closing),
            "closed" => Ok(ChannelStatus::Closed),
            "challenged" => Ok(ChannelStatus::Challenged),
            other => Err(Error::validation(format!("unknown channel status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel_id: Hash,
    pub participant: Address,
    pub status: ChannelStatus,
    pub token: Address,
    pub amount: U256,
    pub chain_id: u64,
    pub adjudicator: Address,
    pub challenge: u64,
    pub nonce: u64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSessionInfo {
    pub app_session_id: Hash,
    pub status: String,
}

/// Result of a resize or close request: the broker-proposed state the
/// participant must counter-sign and submit on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOperation {
    pub channel_id: Hash,
    pub version: u64,
    pub state_data: Vec<u8>,
    pub allocations: Vec<Allocation>,
    pub server_signature: Option<Signature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub channel_id: Hash,
    pub version: u64,
    pub data: Vec<u8>,
    pub allocations: Vec<Allocation>,
    /// Relay direction hint for intermediaries on a virtual channel path;
    /// `true` means the update travels toward the origin.
    pub is_inbound: Option<bool>,
    pub sigs: Vec<Signature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignState {
    pub channel_id: Hash,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    AuthChallenge(AuthChallenge),
    AuthVerify(AuthVerifyResult),
    Config(BrokerConfig),
    LedgerBalances(Vec<LedgerBalance>),
    Channels(Vec<ChannelInfo>),
    AppDefinition(AppSessionDefinition),
    AppSession(AppSessionInfo),
    ChannelOperation(ChannelOperation),
    StateUpdate(StateUpdate),
    SignState(SignState),
    Pong,
    Message(Vec<Value>),
}

/// Parse a response's result array for `method` into a typed value.
pub fn parse_response(method: &Method, result: &[Value]) -> Result<ParsedResponse> {
    match method {
        Method::AuthRequest | Method::AuthChallenge => {
            let obj = single_object(result)?;
            Ok(ParsedResponse::AuthChallenge(AuthChallenge {
                challenge_message: req_str(obj, "challenge_message")?,
            }))
        }
        Method::AuthVerify => {
            let obj = single_object(result)?;
            Ok(ParsedResponse::AuthVerify(AuthVerifyResult {
                address: req_address(obj, "address")?,
                session_key: opt_address(obj, "session_key")?,
                jwt_token: opt_str(obj, "jwt_token"),
                success: obj.get("success").and_then(Value::as_bool).unwrap_or(true),
            }))
        }
        Method::GetConfig => {
            let obj = single_object(result)?;
            let networks = req_array(obj, "networks")?
                .iter()
                .map(|v| {
                    let net = as_object(v)?;
                    Ok(NetworkInfo {
                        name: req_str(net, "name")?,
                        chain_id: req_u64(net, "chain_id")?,
                        custody_address: req_address(net, "custody_address")?,
                        adjudicator_address: req_address(net, "adjudicator_address")?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ParsedResponse::Config(BrokerConfig {
                broker_address: req_address(obj, "broker_address")?,
                networks,
            }))
        }
        Method::GetLedgerBalances => {
            let list = single_array(result)?;
            let balances = list
                .iter()
                .map(|v| {
                    let obj = as_object(v)?;
                    Ok(LedgerBalance {
                        asset: req_str(obj, "asset")?,
                        amount: req_amount(obj, "amount")?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ParsedResponse::LedgerBalances(balances))
        }
        Method::GetChannels => {
            let list = single_array(result)?;
            let channels = list
                .iter()
                .map(|v| {
                    let obj = as_object(v)?;
                    Ok(ChannelInfo {
                        channel_id: req_hash(obj, "channel_id")?,
                        participant: req_address(obj, "participant")?,
                        status: ChannelStatus::parse(&req_str(obj, "status")?)?,
                        token: req_address(obj, "token")?,
                        amount: req_amount(obj, "amount")?,
                        chain_id: req_u64(obj, "chain_id")?,
                        adjudicator: req_address(obj, "adjudicator")?,
                        challenge: req_u64(obj, "challenge")?,
                        nonce: req_u64(obj, "nonce")?,
                        version: req_u64(obj, "version")?,
                        created_at: req_datetime(obj, "created_at")?,
                        updated_at: req_datetime(obj, "updated_at")?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ParsedResponse::Channels(channels))
        }
        Method::GetAppDefinition => {
            let obj = single_object(result)?;
            let participants = req_array(obj, "participants")?
                .iter()
                .map(|v| parse_address(v))
                .collect::<Result<Vec<_>>>()?;
            let weights = req_array(obj, "weights")?
                .iter()
                .map(|v| {
                    v.as_u64()
                        .ok_or_else(|| Error::validation("weight is not an unsigned integer"))
                })
                .collect::<Result<Vec<_>>>()?;
            let def = AppSessionDefinition {
                protocol: req_str(obj, "protocol")?,
                participants,
                weights,
                quorum: req_u64(obj, "quorum")?,
                challenge: req_u64(obj, "challenge")?,
                nonce: req_u64(obj, "nonce")?,
            };
            def.validate()?;
            Ok(ParsedResponse::AppDefinition(def))
        }
        Method::CreateAppSession | Method::CloseAppSession => {
            let obj = single_object(result)?;
            Ok(ParsedResponse::AppSession(AppSessionInfo {
                app_session_id: req_hash(obj, "app_session_id")?,
                status: req_str(obj, "status")?,
            }))
        }
        Method::ResizeChannel | Method::CloseChannel => {
            let obj = single_object(result)?;
            Ok(ParsedResponse::ChannelOperation(ChannelOperation {
                channel_id: req_hash(obj, "channel_id")?,
                version: req_u64(obj, "version")?,
                state_data: req_hex_bytes(obj, "state_data")?,
                allocations: parse_allocations(req_array(obj, "allocations")?)?,
                server_signature: opt_signature(obj, "server_signature")?,
            }))
        }
        Method::StateUpdate => {
            let obj = single_object(result)?;
            let sigs = match obj.get("sigs") {
                Some(Value::Array(raw)) => raw
                    .iter()
                    .map(parse_signature)
                    .collect::<Result<Vec<_>>>()?,
                Some(_) => return Err(Error::validation("sigs is not an array")),
                None => Vec::new(),
            };
            Ok(ParsedResponse::StateUpdate(StateUpdate {
                channel_id: req_hash(obj, "channel_id")?,
                version: req_u64(obj, "version")?,
                data: req_hex_bytes(obj, "data")?,
                allocations: parse_allocations(req_array(obj, "allocations")?)?,
                is_inbound: obj.get("is_inbound").and_then(Value::as_bool),
                sigs,
            }))
        }
        Method::SignState => {
            let obj = single_object(result)?;
            let sig = obj
                .get("signature")
                .ok_or_else(|| Error::validation("missing field: signature"))?;
            Ok(ParsedResponse::SignState(SignState {
                channel_id: req_hash(obj, "channel_id")?,
                signature: parse_signature(sig)?,
            }))
        }
        Method::Ping | Method::Pong => Ok(ParsedResponse::Pong),
        Method::Message => Ok(ParsedResponse::Message(result.to_vec())),
        Method::Challenge | Method::Error | Method::Custom(_) => Err(Error::validation(format!(
            "no parser registered for method: {}",
            method
        ))),
    }
}

fn single_object(result: &[Value]) -> Result<&Map<String, Value>> {
    if result.len() != 1 {
        return Err(Error::validation(format!(
            "expected exactly one result element, got {}",
            result.len()
        )));
    }
    as_object(&result[0])
}

fn single_array(result: &[Value]) -> Result<&Vec<Value>> {
    if result.len() != 1 {
        return Err(Error::validation(format!(
            "expected exactly one result element, got {}",
            result.len()
        )));
    }
    result[0]
        .as_array()
        .ok_or_else(|| Error::validation("result element is not an array"))
}

fn as_object(v: &Value) -> Result<&Map<String, Value>> {
    v.as_object()
        .ok_or_else(|| Error::validation("expected a JSON object"))
}

fn req_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a Value> {
    obj.get(key)
        .ok_or_else(|| Error::validation(format!("missing field: {}", key)))
}

fn req_str(obj: &Map<String, Value>, key: &str) -> Result<String> {
    req_field(obj, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::validation(format!("field {} is not a string", key)))
}

fn opt_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn req_u64(obj: &Map<String, Value>, key: &str) -> Result<u64> {
    let v = req_field(obj, key)?;
    // Some brokers emit numeric fields as strings.
    if let Some(n) = v.as_u64() {
        return Ok(n);
    }
    v.as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::validation(format!("field {} is not an unsigned integer", key)))
}

/// Decimal-string token amount; JSON numbers are rejected to avoid any
/// float path.
fn req_amount(obj: &Map<String, Value>, key: &str) -> Result<U256> {
    let s = req_field(obj, key)?
        .as_str()
        .ok_or_else(|| Error::validation(format!("amount {} must be a decimal string", key)))?;
    U256::from_dec_str(s)
        .map_err(|_| Error::validation(format!("amount {} is not a decimal string", key)))
}

fn parse_address(v: &Value) -> Result<Address> {
    v.as_str()
        .ok_or_else(|| Error::validation("address is not a string"))?
        .parse()
}

fn req_address(obj: &Map<String, Value>, key: &str) -> Result<Address> {
    parse_address(req_field(obj, key)?)
}

fn opt_address(obj: &Map<String, Value>, key: &str) -> Result<Option<Address>> {
    match obj.get(key) {
        Some(Value::Null) | None => Ok(None),
        Some(v) => parse_address(v).map(Some),
    }
}

fn req_hash(obj: &Map<String, Value>, key: &str) -> Result<Hash> {
    req_field(obj, key)?
        .as_str()
        .ok_or_else(|| Error::validation(format!("field {} is not a string", key)))?
        .parse()
}

fn parse_signature(v: &Value) -> Result<Signature> {
    v.as_str()
        .ok_or_else(|| Error::validation("signature is not a string"))?
        .parse()
}

fn opt_signature(obj: &Map<String, Value>, key: &str) -> Result<Option<Signature>> {
    match obj.get(key) {
        Some(Value::Null) | None => Ok(None),
        Some(v) => parse_signature(v).map(Some),
    }
}

fn req_hex_bytes(obj: &Map<String, Value>, key: &str) -> Result<Vec<u8>> {
    let s = req_field(obj, key)?
        .as_str()
        .ok_or_else(|| Error::validation(format!("field {} is not a string", key)))?;
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| Error::validation(format!("field {} is missing the 0x prefix", key)))?;
    hex::decode(digits).map_err(|_| Error::validation(format!("field {} is not valid hex", key)))
}

fn req_array<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a Vec<Value>> {
    req_field(obj, key)?
        .as_array()
        .ok_or_else(|| Error::validation(format!("field {} is not an array", key)))
}

fn req_datetime(obj: &Map<String, Value>, key: &str) -> Result<DateTime<Utc>> {
    let s = req_field(obj, key)?
        .as_str()
        .ok_or_else(|| Error::validation(format!("field {} is not a string", key)))?;
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::validation(format!("field {} is not an RFC 3339 date: {}", key, e)))
}

fn parse_allocations(raw: &[Value]) -> Result<Vec<Allocation>> {
    raw.iter()
        .map(|v| {
            let obj = as_object(v)?;
            Ok(Allocation {
                destination: req_address(obj, "destination")?,
                token: req_address(obj, "token")?,
                amount: req_amount(obj, "amount")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_challenge_round_trip() {
        let result = vec![json!({"challenge_message": "sign me"})];
        match parse_response(&Method::AuthChallenge, &result).unwrap() {
            ParsedResponse::AuthChallenge(c) => assert_eq!(c.challenge_message, "sign me"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn auth_verify_with_and_without_jwt() {
        let addr = "0x00000000000000000000000000000000000000aa";
        let result = vec![json!({"address": addr, "jwt_token": "ey.x.y", "success": true})];
        match parse_response(&Method::AuthVerify, &result).unwrap() {
            ParsedResponse::AuthVerify(v) => {
                assert_eq!(v.jwt_token.as_deref(), Some("ey.x.y"));
                assert!(v.success);
                assert!(v.session_key.is_none());
            }
            other => panic!("unexpected: {:?}", other),
        }

        let result = vec![json!({"address": addr})];
        match parse_response(&Method::AuthVerify, &result).unwrap() {
            ParsedResponse::AuthVerify(v) => {
                assert!(v.jwt_token.is_none());
                assert!(v.success);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn ledger_balances_require_decimal_strings() {
        let result = vec![json!([{"asset": "usdc", "amount": "100000000000000000000"}])];
        match parse_response(&Method::GetLedgerBalances, &result).unwrap() {
            ParsedResponse::LedgerBalances(balances) => {
                assert_eq!(balances.len(), 1);
                assert_eq!(
                    balances[0].amount,
                    U256::from_dec_str("100000000000000000000").unwrap()
                );
            }
            other => panic!("unexpected: {:?}", other),
        }

        // A JSON number would take the float path; rejected outright.
        let result = vec![json!([{"asset": "usdc", "amount": 100}])];
        assert!(parse_response(&Method::GetLedgerBalances, &result).is_err());
    }

    #[test]
    fn channels_reject_unknown_status() {
        let channel = json!({
            "channel_id": format!("0x{}", "11".repeat(32)),
            "participant": "0x00000000000000000000000000000000000000aa",
            "status": "levitating",
            "token": "0x00000000000000000000000000000000000000cc",
            "amount": "5",
            "chain_id": 137,
            "adjudicator": "0x00000000000000000000000000000000000000dd",
            "challenge": 86400,
            "nonce": 1,
            "version": 2,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z",
        });
        let result = vec![json!([channel.clone()])];
        let err = parse_response(&Method::GetChannels, &result).unwrap_err();
        assert!(err.message.contains("unknown channel status"));

        let mut fixed = channel;
        fixed["status"] = json!("open");
        let result = vec![json!([fixed])];
        match parse_response(&Method::GetChannels, &result).unwrap() {
            ParsedResponse::Channels(channels) => {
                assert_eq!(channels[0].status, ChannelStatus::Open);
                assert_eq!(channels[0].chain_id, 137);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn app_definition_validates_parallel_arrays() {
        let result = vec![json!({
            "protocol": "nitroliterpc",
            "participants": [
                "0x00000000000000000000000000000000000000aa",
                "0x00000000000000000000000000000000000000bb",
            ],
            "weights": [1],
            "quorum": 1,
            "challenge": 86400,
            "nonce": 7,
        })];
        assert!(parse_response(&Method::GetAppDefinition, &result).is_err());
    }

    #[test]
    fn resize_result_carries_proposed_state() {
        let result = vec![json!({
            "channel_id": format!("0x{}", "22".repeat(32)),
            "version": 5,
            "state_data": "0x0001",
            "allocations": [{
                "destination": "0x00000000000000000000000000000000000000aa",
                "token": "0x00000000000000000000000000000000000000cc",
                "amount": "10",
            }],
            "server_signature": format!("0x{}", "33".repeat(65)),
        })];
        match parse_response(&Method::ResizeChannel, &result).unwrap() {
            ParsedResponse::ChannelOperation(op) => {
                assert_eq!(op.version, 5);
                assert_eq!(op.state_data, vec![0, 1]);
                assert_eq!(op.allocations.len(), 1);
                assert!(op.server_signature.is_some());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn state_update_direction_flag_is_optional() {
        let body = json!({
            "channel_id": format!("0x{}", "44".repeat(32)),
            "version": 3,
            "data": "0xff",
            "allocations": [],
        });
        match parse_response(&Method::StateUpdate, &[body.clone()]).unwrap() {
            ParsedResponse::StateUpdate(u) => {
                assert_eq!(u.is_inbound, None);
                assert!(u.sigs.is_empty());
            }
            other => panic!("unexpected: {:?}", other),
        }

        let mut inbound = body;
        inbound["is_inbound"] = json!(true);
        match parse_response(&Method::StateUpdate, &[inbound]).unwrap() {
            ParsedResponse::StateUpdate(u) => assert_eq!(u.is_inbound, Some(true)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn single_object_requires_exactly_one_element() {
        assert!(parse_response(&Method::AuthChallenge, &[]).is_err());
        let two = vec![json!({"challenge_message": "a"}), json!({"challenge_message": "b"})];
        assert!(parse_response(&Method::AuthChallenge, &two).is_err());
    }

    #[test]
    fn unknown_method_is_an_explicit_failure() {
        let err = parse_response(&Method::Custom("whatever".into()), &[]).unwrap_err();
        assert!(err.message.contains("no parser registered"));
    }

    #[test]
    fn bad_hex_is_rejected() {
        let result = vec![json!({
            "channel_id": "0x1234", // too short
            "version": 1,
            "data": "0x00",
            "allocations": [],
        })];
        assert!(parse_response(&Method::StateUpdate, &result).is_err());
    }
}
