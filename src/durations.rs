//! Serde adapters for `Duration` fields stored as plain numbers.
//!
//! Plans and station configuration come from JSON written by configuration tools
//! that store timeouts in milliseconds and polling intervals in (fractional) seconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// `Duration` <-> integer milliseconds.
pub(crate) mod millis {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let ms = d.as_millis().min(u128::from(u64::MAX)) as u64;
        s.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// `Duration` <-> fractional seconds.
pub(crate) mod secs {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let v = f64::deserialize(d)?;
        if !v.is_finite() || v < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "invalid interval {v}; expected non-negative seconds"
            )));
        }
        Duration::try_from_secs_f64(v).map_err(serde::de::Error::custom)
    }
}
