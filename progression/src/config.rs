//! Process-wide configuration for the progression engine.
//!
//! Loaded once at startup and treated as read-only thereafter. Trial policy
//! values are snapshotted onto each trial at creation so mid-trial config
//! changes never affect an attempt already in flight.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the progression and trial economy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProgressionConfig {
    /// Requirement curve parameters
    pub curve: CurveConfig,
    /// Fee and settlement parameters
    pub economy: EconomyConfig,
    /// Rank-up trial policy
    pub policy: TrialPolicyConfig,
}

impl ProgressionConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Requirement curve configuration.
///
/// The stake curve scale is not configured directly; it is derived once at
/// resolve time so that the quadratic curve lands exactly on
/// `target_max_vault_stake` at `max_level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveConfig {
    /// Base wallet hold at level 0 of the linear curve
    pub base_hold: f64,
    /// Wallet hold added per level
    pub hold_scale: f64,
    /// Base vault stake of the quadratic curve
    pub base_stake: f64,
    /// Vault stake required at the top of the ladder
    pub target_max_vault_stake: f64,
    /// Highest attainable level
    pub max_level: u32,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            base_hold: 50.0,
            hold_scale: 5.0,
            base_stake: 50.0,
            target_max_vault_stake: 10_000.0,
            max_level: 100,
        }
    }
}

/// Fee and settlement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    /// Flat HIVE fee reserved for every trial session
    pub base_fee_hive: f64,
    /// Score at/above which the session fee is refunded
    pub pass_threshold: f64,
    /// Per-tier fee surcharges
    pub fees: FeeSchedule,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            base_fee_hive: 5.0,
            pass_threshold: 0.8,
            fees: FeeSchedule::default(),
        }
    }
}

/// HIVE surcharge per difficulty tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Surcharge for low-tier sessions
    pub low: f64,
    /// Surcharge for medium-tier sessions
    pub medium: f64,
    /// Surcharge for high-tier sessions
    pub high: f64,
    /// Surcharge for extreme-tier sessions
    pub extreme: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            low: 5.0,
            medium: 10.0,
            high: 20.0,
            extreme: 40.0,
        }
    }
}

/// Rank-up trial policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialPolicyConfig {
    /// Questions issued per trial
    pub question_count: usize,
    /// Minimum accuracy to pass
    pub min_accuracy: f64,
    /// Minimum average difficulty of the issued set
    pub min_avg_difficulty: f64,
    /// Consecutive failures on one transition before rollback
    pub rollback_threshold: u32,
    /// Cooldown after a failed trial before the same transition may be retried (seconds)
    pub fail_cooldown_secs: u64,
    /// Stake lock after a pass, in cycles
    pub stake_lock_cycles: u32,
    /// Length of one lock cycle (seconds)
    pub cycle_secs: u64,
}

impl Default for TrialPolicyConfig {
    fn default() -> Self {
        Self {
            question_count: 5,
            min_accuracy: 0.8,
            min_avg_difficulty: 2.5,
            rollback_threshold: 3,
            fail_cooldown_secs: 3600,
            stake_lock_cycles: 3,
            cycle_secs: 86_400,
        }
    }
}

impl TrialPolicyConfig {
    /// Post-pass stake lock duration in seconds.
    pub fn stake_lock_secs(&self) -> u64 {
        u64::from(self.stake_lock_cycles) * self.cycle_secs
    }
}
