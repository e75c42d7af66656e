//! Core wire types: addresses, hashes, signatures and 256-bit amounts.
//!
//! On the JSON wire these are strings: addresses are `0x` + 40 hex digits
//! (parsed case-insensitively, emitted lowercase), hashes `0x` + 64, raw
//! signatures `0x` + 130, and amounts decimal strings. Amounts are never JSON
//! numbers, so arbitrary precision survives the trip.

use core::fmt::{self, Debug, Display};
use core::str::FromStr;

use rand::{distributions::Standard, prelude::Distribution};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uint::construct_uint;

use crate::error::Error;

macro_rules! impl_hex_display {
    ($T:ident) => {
        impl Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }

        impl Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                Display::fmt(self, f)
            }
        }
    };
}

macro_rules! bytes_n {
    ( $T:ident, $N:literal ) => {
        #[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
        pub struct $T(pub [u8; $N]);

        impl_hex_display!($T);

        impl Default for $T {
            fn default() -> Self {
                Self([0; $N])
            }
        }

        impl FromStr for $T {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let hex_part = s.strip_prefix("0x").ok_or_else(|| {
                    Error::validation(format!("expected 0x-prefixed hex string, got {:?}", s))
                })?;
                if hex_part.len() != $N * 2 {
                    return Err(Error::validation(format!(
                        "expected {} hex digits, got {}",
                        $N * 2,
                        hex_part.len()
                    )));
                }
                let raw = hex::decode(hex_part)
                    .map_err(|e| Error::validation(format!("invalid hex string: {}", e)))?;
                let mut out = [0u8; $N];
                out.copy_from_slice(&raw);
                Ok(Self(out))
            }
        }

        impl Serialize for $T {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $T {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }

        impl Distribution<$T> for Standard {
            fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> $T {
                let mut out = [0u8; $N];
                rng.fill_bytes(&mut out);
                $T(out)
            }
        }
    };
}

bytes_n!(Address, 20);
bytes_n!(Hash, 32);
bytes_n!(Signature, 65);

impl Signature {
    pub fn new(rs: &[u8; 64], v: u8) -> Self {
        let mut sig = Signature([0; 65]);
        sig.0[..64].copy_from_slice(rs);
        sig.0[64] = v;
        sig
    }
}

// primitive_types::U256 would work as well but serde-serializes to a hex
// string; the wire wants decimal strings, so we construct our own like the
// payment-channel types do and attach the serde impls we need.
construct_uint! {
    pub struct U256(4);
}

impl Serialize for U256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for U256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(de::Error::custom)
    }
}

impl Distribution<U256> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> U256 {
        let mut buf = [0u8; 32];
        rng.fill_bytes(&mut buf);
        U256::from_big_endian(&buf)
    }
}

/// Serde adapter for opaque byte payloads carried as `0x` hex strings.
pub mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let hex_part = s
            .strip_prefix("0x")
            .ok_or_else(|| de::Error::custom("expected 0x-prefixed hex string"))?;
        hex::decode(hex_part).map_err(de::Error::custom)
    }
}
