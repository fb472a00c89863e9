//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable read by [`EngineConfig::from_env`].
pub const MAX_FIRINGS_ENV: &str = "CONFLUENCE_MAX_FIRINGS";

/// Tunables for the propagation engine.
///
/// Install with [`Transaction::configure`](crate::Transaction::configure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on node firings in a single transaction. A transaction that
    /// exceeds it is aborted with [`Error::RunawayPropagation`]; this is what
    /// catches a listener that keeps re-sending into its own source.
    pub max_firings_per_transaction: usize,
}

impl EngineConfig {
    /// Firing limit used when nothing overrides it.
    pub const DEFAULT_MAX_FIRINGS: usize = 100_000;

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(MAX_FIRINGS_ENV) {
            config.max_firings_per_transaction = parse_limit(MAX_FIRINGS_ENV, &raw)?;
        }
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_firings_per_transaction: Self::DEFAULT_MAX_FIRINGS,
        }
    }
}

fn parse_limit(key: &'static str, raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(Error::InvalidConfig {
            key,
            value: raw.to_string(),
        }),
        Ok(limit) => Ok(limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limit() {
        assert_eq!(
            EngineConfig::default().max_firings_per_transaction,
            EngineConfig::DEFAULT_MAX_FIRINGS
        );
    }

    #[test]
    fn parses_positive_limits() {
        assert_eq!(parse_limit(MAX_FIRINGS_ENV, " 250 ").unwrap(), 250);
    }

    // The only test touching the variable, so it cannot race another.
    #[test]
    fn from_env_reads_the_limit() {
        std::env::remove_var(MAX_FIRINGS_ENV);
        assert_eq!(EngineConfig::from_env().unwrap(), EngineConfig::default());

        std::env::set_var(MAX_FIRINGS_ENV, "64");
        assert_eq!(
            EngineConfig::from_env().unwrap().max_firings_per_transaction,
            64
        );

        std::env::set_var(MAX_FIRINGS_ENV, "0");
        assert!(matches!(
            EngineConfig::from_env(),
            Err(Error::InvalidConfig { key: MAX_FIRINGS_ENV, .. })
        ));

        std::env::set_var(MAX_FIRINGS_ENV, "plenty");
        assert_eq!(
            EngineConfig::from_env(),
            Err(Error::InvalidConfig {
                key: MAX_FIRINGS_ENV,
                value: "plenty".to_string()
            })
        );

        std::env::remove_var(MAX_FIRINGS_ENV);
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert!(matches!(
            parse_limit(MAX_FIRINGS_ENV, "0"),
            Err(Error::InvalidConfig { .. })
        ));
        let err = parse_limit(MAX_FIRINGS_ENV, "lots").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration value for CONFLUENCE_MAX_FIRINGS: \"lots\""
        );
    }
}
