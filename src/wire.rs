//! The canonical wire envelope and its four message bodies.
//!
//! An envelope is JSON `{"req"|"res"|"err"|"ntf": [...], "sig": [...]}` with
//! exactly one body populated. Bodies are array tuples, not objects:
//!
//! - request:      `[requestId, method, params, timestamp]`
//! - response:     `[requestId, method, result, timestamp]`
//! - error:        `[requestId, code, message, timestamp]`
//! - notification: `[type, data, timestamp]`
//!
//! The signing payload is the canonical JSON of the inner tuple only, never
//! the outer envelope. This keeps signatures valid when an envelope is
//! re-wrapped with routing metadata.

use serde::{de::Deserializer, ser::Serializer, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{codes, Error, Result};
use crate::types::Signature;

macro_rules! tuple_body {
    ($T:ident, ($($field:ident: $ty:ty),+)) => {
        impl Serialize for $T {
            fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
                ($(&self.$field),+).serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $T {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
                let ($($field),+) = <($($ty),+)>::deserialize(deserializer)?;
                Ok($T { $($field),+ })
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
    pub timestamp: u64,
}
tuple_body!(Request, (id: u64, method: String, params: Vec<Value>, timestamp: u64));

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub method: String,
    pub result: Vec<Value>,
    pub timestamp: u64,
}
tuple_body!(Response, (id: u64, method: String, result: Vec<Value>, timestamp: u64));

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub id: u64,
    pub code: i32,
    pub message: String,
    pub timestamp: u64,
}
tuple_body!(ErrorBody, (id: u64, code: i32, message: String, timestamp: u64));

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: String,
    pub data: Vec<Value>,
    pub timestamp: u64,
}
tuple_body!(Notification, (kind: String, data: Vec<Value>, timestamp: u64));

/// The signed wire wrapper. A well-formed envelope has exactly one body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req: Option<Request>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub res: Option<Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntf: Option<Notification>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sig: Vec<Signature>,
}

impl Envelope {
    pub fn request(req: Request) -> Self {
        Envelope {
            req: Some(req),
            ..Default::default()
        }
    }

    pub fn response(res: Response) -> Self {
        Envelope {
            res: Some(res),
            ..Default::default()
        }
    }

    pub fn error(err: ErrorBody) -> Self {
        Envelope {
            err: Some(err),
            ..Default::default()
        }
    }

    pub fn notification(ntf: Notification) -> Self {
        Envelope {
            ntf: Some(ntf),
            ..Default::default()
        }
    }

    fn body_count(&self) -> usize {
        self.req.is_some() as usize
            + self.res.is_some() as usize
            + self.err.is_some() as usize
            + self.ntf.is_some() as usize
    }

    pub fn validate(&self) -> Result<()> {
        match self.body_count() {
            1 => Ok(()),
            0 => Err(Error::validation("envelope has no body")),
            n => Err(Error::validation(format!("envelope has {} bodies", n))),
        }
    }

    /// The request id a response or error correlates to, if any.
    pub fn correlation_id(&self) -> Option<u64> {
        match (&self.res, &self.err) {
            (Some(res), _) => Some(res.id),
            (_, Some(err)) => Some(err.id),
            _ => None,
        }
    }

    /// Canonical byte payload used for signing: the JSON encoding of the
    /// inner tuple. Pure and deterministic for a given body.
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let bytes = if let Some(req) = &self.req {
            serde_json::to_vec(req)
        } else if let Some(res) = &self.res {
            serde_json::to_vec(res)
        } else if let Some(err) = &self.err {
            serde_json::to_vec(err)
        } else if let Some(ntf) = &self.ntf {
            serde_json::to_vec(ntf)
        } else {
            unreachable!("validate checked one body is present")
        };
        bytes.map_err(|e| Error::internal(format!("payload encoding failed: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        self.validate()?;
        serde_json::to_string(self)
            .map_err(|e| Error::internal(format!("envelope encoding failed: {}", e)))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let env: Envelope = serde_json::from_str(raw).map_err(|e| {
            let mut err = Error::validation(format!("malformed envelope: {}", e));
            err.code = codes::PARSE_ERROR;
            err
        })?;
        env.validate()?;
        Ok(env)
    }
}
