//! The RPC method surface.

use core::fmt;
use core::str::FromStr;

/// All protocol methods, plus an escape hatch for application-registered
/// ones.
///
/// Keeping the protocol surface as enum variants means response parsing and
/// handler registration are checked per variant at the match site; only
/// methods the protocol does not know about fall into [Method::Custom].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    AuthRequest,
    AuthChallenge,
    AuthVerify,
    Ping,
    Pong,
    GetConfig,
    GetLedgerBalances,
    GetChannels,
    GetAppDefinition,
    CreateAppSession,
    CloseAppSession,
    ResizeChannel,
    CloseChannel,
    StateUpdate,
    SignState,
    Challenge,
    Message,
    Error,
    Custom(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::AuthRequest => "auth_request",
            Method::AuthChallenge => "auth_challenge",
            Method::AuthVerify => "auth_verify",
            Method::Ping => "ping",
            Method::Pong => "pong",
            Method::GetConfig => "get_config",
            Method::GetLedgerBalances => "get_ledger_balances",
            Method::GetChannels => "get_channels",
            Method::GetAppDefinition => "get_app_definition",
            Method::CreateAppSession => "create_app_session",
            Method::CloseAppSession => "close_app_session",
            Method::ResizeChannel => "resize_channel",
            Method::CloseChannel => "close_channel",
            Method::StateUpdate => "state_update",
            Method::SignState => "sign_state",
            Method::Challenge => "challenge",
            Method::Message => "message",
            Method::Error => "error",
            Method::Custom(name) => name,
        }
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "auth_request" => Method::AuthRequest,
            "auth_challenge" => Method::AuthChallenge,
            "auth_verify" => Method::AuthVerify,
            "ping" => Method::Ping,
            "pong" => Method::Pong,
            "get_config" => Method::GetConfig,
            "get_ledger_balances" => Method::GetLedgerBalances,
            "get_channels" => Method::GetChannels,
            "get_app_definition" => Method::GetAppDefinition,
            "create_app_session" => Method::CreateAppSession,
            "close_app_session" => Method::CloseAppSession,
            "resize_channel" => Method::ResizeChannel,
            "close_channel" => Method::CloseChannel,
            "state_update" => Method::StateUpdate,
            "sign_state" => Method::SignState,
            "challenge" => Method::Challenge,
            "message" => Method::Message,
            "error" => Method::Error,
            other => Method::Custom(other.to_string()),
        }
    }
}

impl FromStr for Method {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Method::from(s))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_str_and_from_are_inverse() {
        let methods = [
            Method::AuthRequest,
            Method::AuthChallenge,
            Method::AuthVerify,
            Method::Ping,
            Method::Pong,
            Method::GetConfig,
            Method::GetLedgerBalances,
            Method::GetChannels,
            Method::GetAppDefinition,
            Method::CreateAppSession,
            Method::CloseAppSession,
            Method::ResizeChannel,
            Method::CloseChannel,
            Method::StateUpdate,
            Method::SignState,
            Method::Challenge,
            Method::Message,
            Method::Error,
            Method::Custom("test_method".into()),
        ];
        for m in methods {
            assert_eq!(Method::from(m.as_str()), m);
        }
    }
}
