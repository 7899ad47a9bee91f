//! Time helpers for encounter durations.
//!
//! Simulation time is a [`Duration`] since encounter start. Configuration
//! files express durations as fractional seconds.

use std::time::Duration;

/// Build a duration from whole milliseconds.
#[must_use]
pub const fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Scale a duration by a non-negative factor, flooring at zero.
///
/// Rounds to the nearest nanosecond; a factor of exactly one returns the
/// input untouched.
#[must_use]
#[allow(
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn scale(duration: Duration, factor: f64) -> Duration {
    if factor == 1.0 {
        return duration;
    }
    if !factor.is_finite() || factor <= 0.0 {
        return Duration::ZERO;
    }
    let nanos = (duration.as_nanos() as f64 * factor).round();
    if nanos >= u64::MAX as f64 {
        return Duration::MAX;
    }
    Duration::from_nanos(nanos as u64)
}

/// Serde support for durations written as fractional seconds.
pub mod secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    /// Serialize a duration as seconds.
    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64())
    }

    /// Deserialize a duration from seconds.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// Serde support for `Option<Duration>` written as fractional seconds.
pub mod option_secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    /// Serialize an optional duration as seconds.
    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_some(&v.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional duration from seconds.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_identity_is_exact() {
        assert_eq!(scale(ms(1000), 1.0), ms(1000));
    }

    #[test]
    fn test_scale_by_haste() {
        let scaled = scale(ms(3000), 1.0 / 1.5);
        assert!((scaled.as_secs_f64() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_scale_floors_at_zero() {
        assert_eq!(scale(ms(2500), -0.5), Duration::ZERO);
        assert_eq!(scale(ms(2500), f64::NAN), Duration::ZERO);
    }
}
