//! Progression math for the HiveGate rank-up ladder.
//!
//! Pure, side-effect-free building blocks shared by the trial engine and any
//! previewing client:
//!
//! - **Requirement curves**: wallet-hold and vault-stake thresholds per level
//! - **Answer grading**: MCQ index equality and tolerance-aware numeric
//!   comparison with fraction parsing
//! - **Economy settlement**: difficulty-tiered fees and the
//!   cost + refund == fee accounting invariant
//!
//! Everything here is deterministic over an immutable [`ProgressionConfig`]
//! loaded once at process start, so a client preview and the authoritative
//! server can never diverge.

pub mod config;
pub mod curve;
pub mod economy;
pub mod grading;

// Re-export main types
pub use config::{CurveConfig, EconomyConfig, FeeSchedule, ProgressionConfig, TrialPolicyConfig};
pub use curve::{CurveParams, LevelRequirement};
pub use economy::{DifficultyTier, Settlement};
pub use grading::{grade_mcq, grade_numeric, parse_numeric, GradeError, NumericGrade};

/// Error types for progression math.
#[derive(Debug, thiserror::Error)]
pub enum ProgressionError {
    /// Level below the ladder floor was passed to a curve function
    #[error("invalid level {0}: levels start at 1")]
    InvalidLevel(u32),

    /// Curve configuration cannot be resolved
    #[error("invalid curve configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ProgressionError>;
