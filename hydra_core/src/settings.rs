// hydra_core/src/settings.rs

//! Top-level construction settings. Collapses the teacher's sprawling
//! `Settings`/`StrategySettings` JSON schema (threads, optimizer type,
//! position sizers, margin, commission plans) down to the two fields
//! spec.md §6 actually defines for `Hydra` construction — the rest of
//! that schema belongs to the optimizer and CLI, both out of scope.

use serde::{Deserialize, Serialize};

use crate::error::{HydraError, HydraResult};

/// `logging_level` gates `Hydra`'s textual log output (spec.md §6):
/// `0` is silent, `1` logs major events (fills, expiries, resets),
/// `2` logs every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HydraConfig {
    pub logging_level: u8,
    pub starting_cash: f64,
}

impl HydraConfig {
    pub fn new(logging_level: u8, starting_cash: f64) -> HydraResult<Self> {
        if logging_level > 2 {
            return Err(HydraError::configuration(format!("logging_level must be 0, 1 or 2, got {logging_level}")));
        }
        if !starting_cash.is_finite() {
            return Err(HydraError::configuration("starting_cash must be finite"));
        }
        Ok(Self { logging_level, starting_cash })
    }
}

impl Default for HydraConfig {
    fn default() -> Self {
        Self { logging_level: 0, starting_cash: 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_logging_level() {
        assert!(HydraConfig::new(3, 100.0).is_err());
        assert!(HydraConfig::new(2, 100.0).is_ok());
    }
}
