// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transaction core configuration.

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TxError},
    factory::VariantFamily,
};

// Environment variable names for configuration.

/// Enable deadlock detection environment variable.
pub const ENV_DEADLOCK_DETECTION: &str = "GRID_TX_DEADLOCK_DETECTION";
/// Enable transaction recovery environment variable.
pub const ENV_RECOVERY: &str = "GRID_TX_RECOVERY";
/// Use synchronization (single-phase) commit environment variable.
pub const ENV_USE_SYNCHRONIZATION: &str = "GRID_TX_USE_SYNCHRONIZATION";
/// Clustered cache mode environment variable.
pub const ENV_CLUSTERED: &str = "GRID_TX_CLUSTERED";

/// Capabilities that select the transaction variant family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxConfig {
    /// Attach coin tosses for deadlock victim selection.
    #[serde(default)]
    pub deadlock_detection: bool,

    /// Track in-doubt transactions for crash recovery. Requires two-phase commit.
    #[serde(default)]
    pub recovery_enabled: bool,

    /// Enlist as a synchronization instead of an XA resource.
    #[serde(default)]
    pub use_synchronization: bool,

    /// Whether the cache is clustered; local caches never coordinate ids.
    #[serde(default)]
    pub clustered: bool,
}

impl TxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection = enabled;
        self
    }

    pub fn with_recovery(mut self, enabled: bool) -> Self {
        self.recovery_enabled = enabled;
        self
    }

    pub fn with_synchronization(mut self, enabled: bool) -> Self {
        self.use_synchronization = enabled;
        self
    }

    pub fn with_clustered(mut self, clustered: bool) -> Self {
        self.clustered = clustered;
        self
    }

    /// XA-style prepare/commit, as opposed to synchronization.
    pub fn two_phase_commit(&self) -> bool {
        !self.use_synchronization
    }

    /// Resolve the variant family, failing on unsupported combinations.
    pub fn variant_family(&self) -> Result<VariantFamily> {
        VariantFamily::resolve(
            self.deadlock_detection,
            self.recovery_enabled,
            self.two_phase_commit(),
        )
    }

    /// Load configuration from environment variables.
    ///
    /// Reads:
    /// - `GRID_TX_DEADLOCK_DETECTION` - Enable deadlock detection
    /// - `GRID_TX_RECOVERY` - Enable transaction recovery
    /// - `GRID_TX_USE_SYNCHRONIZATION` - Single-phase commit via synchronization
    /// - `GRID_TX_CLUSTERED` - Clustered cache mode
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an explicit variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(result) = env_parse::parse_bool(&lookup, ENV_DEADLOCK_DETECTION) {
            config.deadlock_detection = result?;
        }
        if let Some(result) = env_parse::parse_bool(&lookup, ENV_RECOVERY) {
            config.recovery_enabled = result?;
        }
        if let Some(result) = env_parse::parse_bool(&lookup, ENV_USE_SYNCHRONIZATION) {
            config.use_synchronization = result?;
        }
        if let Some(result) = env_parse::parse_bool(&lookup, ENV_CLUSTERED) {
            config.clustered = result?;
        }

        Ok(config)
    }
}

mod env_parse {
    use super::{Result, TxError};

    /// Parse a boolean variable.
    /// Accepts "true", "1", "yes", "on" as true (case-insensitive).
    /// Accepts "false", "0", "no", "off" as false (case-insensitive).
    pub fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Result<bool>> {
        lookup(key).map(|val| match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(TxError::Config(format!(
                "invalid {key}: expected boolean (true/false/1/0/yes/no/on/off)"
            ))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TxConfig::default();
        assert!(!config.deadlock_detection);
        assert!(!config.recovery_enabled);
        assert!(config.two_phase_commit());
        assert!(!config.clustered);
        assert_eq!(
            config.variant_family().unwrap(),
            VariantFamily::NoDldNoRecoveryXa
        );
    }

    #[test]
    fn test_builder() {
        let config = TxConfig::new()
            .with_deadlock_detection(true)
            .with_recovery(true)
            .with_clustered(true);
        assert_eq!(
            config.variant_family().unwrap(),
            VariantFamily::DldRecoveryXa
        );

        let sync = config.with_synchronization(true);
        assert!(!sync.two_phase_commit());
        assert!(matches!(
            sync.variant_family(),
            Err(TxError::UnsupportedCombination { .. })
        ));
    }

    #[test]
    fn test_from_vars() {
        let config = TxConfig::from_vars(vars(&[
            (ENV_DEADLOCK_DETECTION, "yes"),
            (ENV_USE_SYNCHRONIZATION, "ON"),
            (ENV_CLUSTERED, "1"),
        ]))
        .unwrap();
        assert!(config.deadlock_detection);
        assert!(!config.recovery_enabled);
        assert!(config.use_synchronization);
        assert!(config.clustered);
    }

    #[test]
    fn test_from_vars_empty() {
        let config = TxConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config, TxConfig::default());
    }

    #[test]
    fn test_from_vars_invalid_bool() {
        let err = TxConfig::from_vars(vars(&[(ENV_RECOVERY, "maybe")])).unwrap_err();
        assert!(matches!(err, TxError::Config(_)));
        assert!(err.to_string().contains(ENV_RECOVERY));
    }

    #[test]
    fn test_serde_defaults() {
        let config: TxConfig = serde_json::from_str(r#"{"recovery_enabled": true}"#).unwrap();
        assert!(config.recovery_enabled);
        assert!(!config.deadlock_detection);
        assert!(!config.use_synchronization);
    }
}
