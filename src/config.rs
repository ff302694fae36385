//! Tree bootstrap configuration

use serde::{Deserialize, Serialize};

use crate::crypto::X25519;
use crate::error::{TreeError, TreeResult};

/// Upper bound on the members created at bootstrap
pub const MAX_INITIAL_MEMBERS: usize = 1 << 16;

/// How to build the initial group
///
/// Loaded from TOML; every field is optional:
///
/// ```toml
/// initial_members = 8
/// reset_metrics_after_bootstrap = true
/// seed = 42
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TreeConfig {
    /// Members added before the tree is handed to the caller
    pub initial_members: usize,
    /// Zero the DH and broadcast counters once the initial members are in
    pub reset_metrics_after_bootstrap: bool,
    /// Seed for a reproducible X25519 primitive; OS entropy when absent
    pub seed: Option<u64>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            initial_members: 0,
            reset_metrics_after_bootstrap: true,
            seed: None,
        }
    }
}

impl TreeConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(input: &str) -> TreeResult<Self> {
        let config: TreeConfig =
            toml::from_str(input).map_err(|e| TreeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TreeResult<()> {
        if self.initial_members > MAX_INITIAL_MEMBERS {
            return Err(TreeError::Config(format!(
                "initial_members {} exceeds {}",
                self.initial_members, MAX_INITIAL_MEMBERS
            )));
        }
        Ok(())
    }

    /// The X25519 primitive this configuration asks for
    pub fn primitive(&self) -> X25519 {
        match self.seed {
            Some(seed) => X25519::seeded(seed),
            None => X25519::new(),
        }
    }
}
