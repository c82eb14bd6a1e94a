//! Runtime Configuration
//!
//! Policies that govern how strictly the runtime polices reads and writes,
//! plus the scheduler's runaway ceiling. Configuration is per thread: every
//! thread owns its own runtime and therefore its own `Config`.
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::config::{configure, Config, EnforceActions};
//!
//! let config = Config::from_json(r#"{ "enforce_actions": "observed" }"#)?;
//! assert_eq!(config.enforce_actions, EnforceActions::Observed);
//! configure(config)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};
use crate::reactive::runtime::with_state;

/// Default number of drain rounds before the scheduler gives up.
pub const DEFAULT_MAX_REACTION_ITERATIONS: usize = 100;

/// When observable writes must happen inside an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforceActions {
    /// Writes are allowed anywhere.
    #[default]
    Never,

    /// Writes to observables that currently have observers must happen
    /// inside an action.
    Observed,

    /// Every write must happen inside an action.
    Always,
}

/// Runtime policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Action enforcement policy for observable writes.
    pub enforce_actions: EnforceActions,

    /// Warn when a computed value is read outside a reactive context.
    pub computed_requires_reaction: bool,

    /// Warn when a derivation finishes tracking without any dependency.
    pub reaction_requires_observable: bool,

    /// Warn when an observable is read outside a reactive context.
    pub observable_requires_reaction: bool,

    /// Drain rounds after which the scheduler reports a reaction loop.
    pub max_reaction_iterations: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enforce_actions: EnforceActions::Never,
            computed_requires_reaction: false,
            reaction_requires_observable: false,
            observable_requires_reaction: false,
            max_reaction_iterations: DEFAULT_MAX_REACTION_ITERATIONS,
        }
    }
}

impl Config {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_reaction_iterations == 0 {
            return Err(ReactiveError::Config(
                "max_reaction_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Install `config` on the current thread's runtime.
pub fn configure(config: Config) -> Result<()> {
    config.validate()?;
    tracing::debug!(?config, "configuring reactive runtime");
    with_state(|state| {
        state.allow_state_changes = config.enforce_actions == EnforceActions::Never;
        state.allow_state_reads = !config.observable_requires_reaction;
        state.config = config;
    });
    Ok(())
}
