//! Requirement curves for the rank-up ladder.
//!
//! Wallet hold grows linearly with level; vault stake grows quadratically.
//! The stake scale is derived exactly once from configuration so that the
//! curve lands on `target_max_vault_stake` at `max_level`. Both curves are
//! monotonically non-decreasing in level.

use serde::{Deserialize, Serialize};

use crate::config::CurveConfig;
use crate::{ProgressionError, Result};

/// Thresholds required to attempt a given level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelRequirement {
    /// The level these thresholds apply to
    pub level: u32,
    /// HIVE that must be held in the user's own wallet
    pub wallet_hold: f64,
    /// HIVE that must be staked in the custodial vault
    pub vault_stake: f64,
}

/// Resolved, immutable curve parameters.
///
/// Built once from [`CurveConfig`] at process start; every call after that is
/// a pure function of `(params, level)`, so client preview and server
/// authority always agree.
#[derive(Debug, Clone, Copy)]
pub struct CurveParams {
    base_hold: f64,
    hold_scale: f64,
    base_stake: f64,
    stake_scale: f64,
    max_level: u32,
}

impl CurveConfig {
    /// Resolve the configuration into immutable curve parameters.
    ///
    /// Derives `stake_scale = (target_max_vault_stake - base_stake) / max_level^2`
    /// so the quadratic curve hits the target exactly at the top of the ladder.
    pub fn resolve(&self) -> Result<CurveParams> {
        if self.max_level < 1 {
            return Err(ProgressionError::InvalidConfig(format!(
                "max_level must be at least 1, got {}",
                self.max_level
            )));
        }
        if self.target_max_vault_stake < self.base_stake {
            return Err(ProgressionError::InvalidConfig(format!(
                "target_max_vault_stake {} is below base_stake {}",
                self.target_max_vault_stake, self.base_stake
            )));
        }
        if self.hold_scale < 0.0 {
            return Err(ProgressionError::InvalidConfig(format!(
                "hold_scale must be non-negative, got {}",
                self.hold_scale
            )));
        }

        let max = f64::from(self.max_level);
        Ok(CurveParams {
            base_hold: self.base_hold,
            hold_scale: self.hold_scale,
            base_stake: self.base_stake,
            stake_scale: (self.target_max_vault_stake - self.base_stake) / (max * max),
            max_level: self.max_level,
        })
    }
}

impl CurveParams {
    /// Highest attainable level.
    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Wallet hold required to attempt `level` (linear curve).
    pub fn required_wallet_hold(&self, level: u32) -> Result<f64> {
        if level < 1 {
            return Err(ProgressionError::InvalidLevel(level));
        }
        Ok(self.base_hold + f64::from(level) * self.hold_scale)
    }

    /// Vault stake required to attempt `level` (quadratic curve).
    pub fn required_vault_stake(&self, level: u32) -> Result<f64> {
        if level < 1 {
            return Err(ProgressionError::InvalidLevel(level));
        }
        let l = f64::from(level);
        Ok(self.base_stake + l * l * self.stake_scale)
    }

    /// Both thresholds for `level`, rounded half-up at the cent.
    ///
    /// This is the only externally exposed entry point; previewing clients and
    /// the authoritative server must both go through it.
    pub fn requirements(&self, level: u32) -> Result<LevelRequirement> {
        Ok(LevelRequirement {
            level,
            wallet_hold: round_cents(self.required_wallet_hold(level)?),
            vault_stake: round_cents(self.required_vault_stake(level)?),
        })
    }
}

/// Round to 2 decimal places, half away from zero at the cent unit.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CurveParams {
        CurveConfig::default().resolve().unwrap()
    }

    #[test]
    fn test_level_one_thresholds() {
        let curve = params();
        assert_eq!(curve.required_wallet_hold(1).unwrap(), 55.0);
        let stake = curve.required_vault_stake(1).unwrap();
        assert!((stake - 50.995).abs() < 1e-9);
    }

    #[test]
    fn test_target_hit_exactly_at_max_level() {
        let curve = params();
        let top = curve.required_vault_stake(curve.max_level()).unwrap();
        assert!((top - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_curves_monotonic() {
        let curve = params();
        let mut prev_hold = f64::MIN;
        let mut prev_stake = f64::MIN;
        for level in 1..=curve.max_level() {
            let hold = curve.required_wallet_hold(level).unwrap();
            let stake = curve.required_vault_stake(level).unwrap();
            assert!(hold >= prev_hold, "wallet hold dipped at level {}", level);
            assert!(stake >= prev_stake, "vault stake dipped at level {}", level);
            prev_hold = hold;
            prev_stake = stake;
        }
    }

    #[test]
    fn test_level_zero_rejected() {
        let curve = params();
        assert!(matches!(
            curve.required_wallet_hold(0),
            Err(ProgressionError::InvalidLevel(0))
        ));
        assert!(matches!(
            curve.required_vault_stake(0),
            Err(ProgressionError::InvalidLevel(0))
        ));
        assert!(curve.requirements(0).is_err());
    }

    #[test]
    fn test_requirements_rounded_to_cents() {
        let curve = params();
        let req = curve.requirements(2).unwrap();
        assert_eq!(req.level, 2);
        assert_eq!(req.wallet_hold, 60.0);
        // 50 + 4 * 0.995 = 53.98
        assert_eq!(req.vault_stake, 53.98);
    }

    #[test]
    fn test_round_cents_half_up() {
        assert_eq!(round_cents(0.125), 0.13);
        assert_eq!(round_cents(1.234), 1.23);
        assert_eq!(round_cents(-0.125), -0.13);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CurveConfig {
            max_level: 0,
            ..CurveConfig::default()
        };
        assert!(config.resolve().is_err());

        let config = CurveConfig {
            target_max_vault_stake: 10.0,
            base_stake: 50.0,
            ..CurveConfig::default()
        };
        assert!(config.resolve().is_err());
    }
}
