//! Typed configuration from environment variables.
//!
//! Loaded once, fails fast on values it does not understand.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

pub const ROOT_VAR: &str = "SPOOL_ROOT";
pub const CLAIM_ORDER_VAR: &str = "SPOOL_CLAIM_ORDER";
pub const RECOVERY_VAR: &str = "SPOOL_RECOVERY";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} (expected one of: {expected})")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Which timestamp decides who is claimed first among Waiting entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimOrder {
    /// Original creation time; a requeued entry keeps its place.
    #[default]
    Created,

    /// Last modification; a requeued entry goes to the back.
    Modified,
}

impl FromStr for ClaimOrder {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(ClaimOrder::Created),
            "modified" => Ok(ClaimOrder::Modified),
            _ => Err(()),
        }
    }
}

/// What to do at load with entries still marked Processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPolicy {
    /// Nothing can still be running after a restart: put them back to
    /// Waiting.
    #[default]
    ResetToWaiting,

    /// Leave them Processing; the application reconciles them itself.
    Keep,
}

impl FromStr for RecoveryPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reset" => Ok(RecoveryPolicy::ResetToWaiting),
            "keep" => Ok(RecoveryPolicy::Keep),
            _ => Err(()),
        }
    }
}

/// Per-queue behaviour knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueConfig {
    pub claim_order: ClaimOrder,
    pub recovery: RecoveryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Storage root of the default manager.
    pub root: PathBuf,
    pub queue: QueueConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let root = lookup(ROOT_VAR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_root);

        let claim_order = parse_var(&lookup, CLAIM_ORDER_VAR, "created, modified")?;
        let recovery = parse_var(&lookup, RECOVERY_VAR, "reset, keep")?;

        Ok(Self {
            root,
            queue: QueueConfig {
                claim_order,
                recovery,
            },
        })
    }

    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("spool")
    }
}

fn parse_var<T: FromStr + Default>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(T::default()),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            var,
            value,
            expected,
        }),
    }
}
