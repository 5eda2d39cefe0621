//! Config - 並行度の指定
//!
//! 整数の directive（n > 0 / n == 0 / n < 0）を型にしたもの。
//! serde では元の整数表現のまま読み書きする。

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WeftError;

/// How many execution contexts a dispatcher runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Concurrency {
    /// Exactly `n` long-lived workers pulling from the source.
    Bounded(NonZeroUsize),
    /// One new context per task, no upper bound.
    #[default]
    Unbounded,
    /// Start nothing. Reserved; not an error.
    Disabled,
}

impl Concurrency {
    /// Pool of `n` workers. `n == 0` is the zero directive, so it falls
    /// back to `Unbounded`.
    pub fn from_workers(n: usize) -> Self {
        match NonZeroUsize::new(n) {
            Some(n) => Self::Bounded(n),
            None => Self::Unbounded,
        }
    }

    /// The signed integer form: `n`, `0` or `-1`.
    pub fn directive(&self) -> i64 {
        match self {
            Self::Bounded(n) => i64::try_from(n.get()).unwrap_or(i64::MAX),
            Self::Unbounded => 0,
            Self::Disabled => -1,
        }
    }
}

impl From<i64> for Concurrency {
    fn from(n: i64) -> Self {
        match n {
            0 => Self::Unbounded,
            n if n < 0 => Self::Disabled,
            n => Self::from_workers(usize::try_from(n).unwrap_or(usize::MAX)),
        }
    }
}

impl From<isize> for Concurrency {
    fn from(n: isize) -> Self {
        Self::from(n as i64)
    }
}

impl From<Concurrency> for i64 {
    fn from(c: Concurrency) -> Self {
        c.directive()
    }
}

impl FromStr for Concurrency {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self::from)
            .map_err(|_| WeftError::InvalidConcurrency {
                value: s.to_string(),
            })
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(n) => write!(f, "bounded({n})"),
            Self::Unbounded => write!(f, "unbounded"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Dispatcher settings loaded from config.
///
/// ```ignore
/// let config = DispatchConfig::from_json(r#"{ "concurrency": 8 }"#)?;
/// dispatcher.start_with(source, config.concurrency);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub concurrency: Concurrency,
}

impl DispatchConfig {
    pub fn from_json(s: &str) -> Result<Self, WeftError> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::bounded(4, Concurrency::from_workers(4))]
    #[case::one(1, Concurrency::from_workers(1))]
    #[case::unbounded(0, Concurrency::Unbounded)]
    #[case::disabled(-1, Concurrency::Disabled)]
    #[case::very_negative(-42, Concurrency::Disabled)]
    fn directive_maps_to_policy(#[case] n: i64, #[case] expected: Concurrency) {
        assert_eq!(Concurrency::from(n), expected);
    }

    #[test]
    fn zero_workers_is_unbounded() {
        assert_eq!(Concurrency::from_workers(0), Concurrency::Unbounded);
    }

    #[test]
    fn parses_from_str() {
        assert_eq!(" 8 ".parse::<Concurrency>().unwrap(), Concurrency::from_workers(8));
        assert_eq!("-3".parse::<Concurrency>().unwrap(), Concurrency::Disabled);

        let err = "many".parse::<Concurrency>().unwrap_err();
        assert!(matches!(err, WeftError::InvalidConcurrency { value } if value == "many"));
    }

    #[test]
    fn config_reads_integer_directive() {
        let config = DispatchConfig::from_json(r#"{ "concurrency": 10 }"#).unwrap();
        assert_eq!(config.concurrency, Concurrency::from_workers(10));

        let config = DispatchConfig::from_json(r#"{ "concurrency": -1 }"#).unwrap();
        assert_eq!(config.concurrency, Concurrency::Disabled);
    }

    #[test]
    fn config_defaults_to_unbounded() {
        let config = DispatchConfig::from_json("{}").unwrap();
        assert_eq!(config, DispatchConfig::default());
        assert_eq!(config.concurrency, Concurrency::Unbounded);
    }

    #[test]
    fn config_serializes_directive() {
        let config = DispatchConfig {
            concurrency: Concurrency::from_workers(3),
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json, serde_json::json!({ "concurrency": 3 }));
    }

    #[test]
    fn invalid_config_is_reported() {
        let err = DispatchConfig::from_json(r#"{ "concurrency": "lots" }"#).unwrap_err();
        assert!(matches!(err, WeftError::InvalidConfig(_)));
    }
}
