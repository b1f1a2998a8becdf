//! Fee and settlement math for trial sessions.
//!
//! A session reserves `fee_hive` up front. At settlement the fee splits into
//! `cost_hive` (retained by the system) and `refund_hive` (returned to the
//! stake), and the split always accounts for the whole fee:
//! `cost_hive + refund_hive == fee_hive`, never lost or duplicated.

use serde::{Deserialize, Serialize};

use crate::config::EconomyConfig;

/// Difficulty tier of a trial session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyTier {
    /// Average difficulty below 2
    Low,
    /// Average difficulty below 3
    Medium,
    /// Average difficulty below 4
    High,
    /// Average difficulty 4 and up
    Extreme,
}

impl DifficultyTier {
    /// Map a 1-5 average difficulty to a tier.
    pub fn from_difficulty(avg_difficulty: f64) -> Self {
        if avg_difficulty < 2.0 {
            Self::Low
        } else if avg_difficulty < 3.0 {
            Self::Medium
        } else if avg_difficulty < 4.0 {
            Self::High
        } else {
            Self::Extreme
        }
    }

    /// String representation for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Extreme => "extreme",
        }
    }
}

impl EconomyConfig {
    /// Total HIVE fee reserved at session start for a tier.
    pub fn trial_fee(&self, tier: DifficultyTier) -> f64 {
        let surcharge = match tier {
            DifficultyTier::Low => self.fees.low,
            DifficultyTier::Medium => self.fees.medium,
            DifficultyTier::High => self.fees.high,
            DifficultyTier::Extreme => self.fees.extreme,
        };
        self.base_fee_hive + surcharge
    }
}

/// Terminal accounting for one session's reserved fee.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Fee reserved at session start
    pub fee_hive: f64,
    /// Amount retained by the system
    pub cost_hive: f64,
    /// Amount returned to the user's stake
    pub refund_hive: f64,
}

impl Settlement {
    /// Settle a session from a terminal score.
    ///
    /// A score at or above the pass threshold refunds the whole fee; below it
    /// the whole fee is retained.
    pub fn settle(fee_hive: f64, score: f64, pass_threshold: f64) -> Self {
        Self::for_outcome(fee_hive, score >= pass_threshold)
    }

    /// Settle a session from a pass/fail outcome.
    pub fn for_outcome(fee_hive: f64, passed: bool) -> Self {
        if passed {
            Self {
                fee_hive,
                cost_hive: 0.0,
                refund_hive: fee_hive,
            }
        } else {
            Self {
                fee_hive,
                cost_hive: fee_hive,
                refund_hive: 0.0,
            }
        }
    }

    /// Stake after settlement: the fee was deducted at reservation time and
    /// the refund is credited back now.
    pub fn stake_after(&self, stake_before: f64) -> f64 {
        stake_before - self.fee_hive + self.refund_hive
    }
}
