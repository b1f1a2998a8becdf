//! Core types for the trial engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use progression::{DifficultyTier, ProgressionError};

/// Lifecycle state of a rank-up trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Questions issued, awaiting completion
    Active,
    /// Passed; level advanced
    Passed,
    /// Failed; escrow slashed
    Failed,
}

/// A single rank-up attempt.
///
/// Policy fields (`question_count`, `min_accuracy`, `min_avg_difficulty`,
/// `fee_hive`) are snapshots frozen at creation; global policy changes never
/// affect a trial already in flight. Terminal once `status` leaves `Active`.
///
/// Issued questions are stored next to the trial, not inside it, so a `Trial`
/// value is always safe to hand to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    /// Unique trial ID
    pub id: String,
    /// Owner attempting the rank-up
    pub owner_id: String,
    /// Level the owner currently holds
    pub from_level: u32,
    /// Level the trial advances to on pass
    pub to_level: u32,
    /// Number of questions issued
    pub question_count: usize,
    /// Minimum accuracy to pass (snapshot)
    pub min_accuracy: f64,
    /// Minimum average difficulty of the issued set (snapshot)
    pub min_avg_difficulty: f64,
    /// HIVE fee escrowed for this attempt
    pub fee_hive: f64,
    /// Difficulty tier the fee was derived from
    pub tier: DifficultyTier,
    /// Lifecycle state
    pub status: TrialStatus,
    /// Whether a fail-streak rollback was applied at completion
    pub rollback_applied: bool,
    /// When the trial was started
    pub started_at: DateTime<Utc>,
    /// When the trial reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Graded answers, written once at completion
    pub answers: Vec<AnswerRecord>,
}

impl Trial {
    /// Whether the trial is still awaiting completion.
    pub fn is_active(&self) -> bool {
        self.status == TrialStatus::Active
    }
}

/// A question issued in a trial. Immutable once issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Unique question ID
    pub id: String,
    /// Question text
    pub text: String,
    /// Difficulty, 1 (easiest) to 5 (hardest)
    pub difficulty: u8,
    /// Question kind and canonical answer data
    pub kind: QuestionKind,
}

/// Kind-specific question data, including the canonical answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    /// Multiple choice
    Mcq {
        /// Answer choices in display order
        choices: Vec<String>,
        /// Index of the correct choice
        correct_index: usize,
    },
    /// Free-form numeric answer
    Numeric {
        /// Canonical answer expression
        canonical_answer: String,
        /// Acceptable absolute deviation, if any
        tolerance: Option<f64>,
        /// Display unit, if any
        unit: Option<String>,
    },
}

impl Question {
    /// Client-safe view with all answer data stripped.
    pub fn redacted(&self) -> RedactedQuestion {
        RedactedQuestion {
            id: self.id.clone(),
            text: self.text.clone(),
            difficulty: self.difficulty,
            kind: match &self.kind {
                QuestionKind::Mcq { choices, .. } => RedactedKind::Mcq {
                    choices: choices.clone(),
                },
                QuestionKind::Numeric { unit, .. } => RedactedKind::Numeric { unit: unit.clone() },
            },
        }
    }
}

/// A question as transmitted to the client: no canonical answer, no correct
/// index, no tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactedQuestion {
    /// Question ID to submit the answer against
    pub id: String,
    /// Question text
    pub text: String,
    /// Difficulty, 1 to 5
    pub difficulty: u8,
    /// Kind-specific display data
    pub kind: RedactedKind,
}

/// Kind-specific data safe for client transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RedactedKind {
    /// Multiple choice: choices only
    Mcq {
        /// Answer choices in display order
        choices: Vec<String>,
    },
    /// Numeric: display unit only
    Numeric {
        /// Display unit, if any
        unit: Option<String>,
    },
}

/// A submitted answer value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerValue {
    /// Selected MCQ choice index
    Choice(usize),
    /// Free-form numeric expression
    Numeric(String),
}

/// One answer submitted against an issued question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSubmission {
    /// ID of the question being answered
    pub question_id: String,
    /// Submitted value
    pub value: AnswerValue,
}

/// A graded answer. Created at submission time, never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Question the answer was graded against
    pub question_id: String,
    /// What the user submitted
    pub submitted: AnswerValue,
    /// Whether the answer was correct
    pub correct: bool,
    /// When grading happened
    pub graded_at: DateTime<Utc>,
}

/// Terminal outcome of a completed trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialResult {
    /// Thresholds met; level advanced
    Passed,
    /// Thresholds missed; escrow slashed
    Failed,
}

/// Everything a caller learns from completing a trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialReport {
    /// Pass/fail outcome
    pub result: TrialResult,
    /// Correctly answered questions
    pub correct_count: usize,
    /// Total issued questions
    pub total_count: usize,
    /// `correct_count / total_count`
    pub accuracy: f64,
    /// Mean difficulty of the issued set
    pub avg_difficulty: f64,
    /// Level held after this trial, when it changed
    pub new_level: Option<u32>,
    /// Human-readable failure reason
    pub failed_reason: Option<String>,
    /// When the same transition may be attempted again
    pub cooldown_until: Option<DateTime<Utc>>,
    /// HIVE forfeited on failure
    pub slashed_amount: Option<f64>,
    /// HIVE returned to stake on pass
    pub refunded_amount: Option<f64>,
    /// Whether a 3-strike rollback was applied
    pub rollback_applied: bool,
}

/// Error types for the trial engine.
#[derive(Debug, thiserror::Error)]
pub enum TrialError {
    /// Level outside the ladder passed to a curve function
    #[error(transparent)]
    InvalidLevel(#[from] ProgressionError),

    /// Trial must advance exactly one level upward
    #[error("invalid transition {from_level} -> {to_level}: a trial advances exactly one level")]
    InvalidTransition { from_level: u32, to_level: u32 },

    /// Owner already has a trial in flight
    #[error("trial {trial_id} is already active for this owner")]
    TrialAlreadyActive { trial_id: String },

    /// No trial with that ID
    #[error("trial {trial_id} not found")]
    TrialNotFound { trial_id: String },

    /// Trial already reached a terminal state
    #[error("trial {trial_id} is no longer active")]
    TrialNotActive { trial_id: String },

    /// A prior failure's cooldown has not elapsed
    #[error("cooldown active until {until} for this transition")]
    CooldownActive { until: DateTime<Utc> },

    /// Wallet hold below the requirement curve
    #[error("insufficient wallet hold: required {required}, available {available}")]
    InsufficientWalletHold { required: f64, available: f64 },

    /// Vault stake below the requirement curve, or escrow exceeds balance
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: f64, available: f64 },

    /// Answer set does not match the issued question set
    #[error("incomplete submission: {detail}")]
    IncompleteSubmission { detail: String },

    /// Question bank could not supply a valid pool
    #[error("question bank error: {0}")]
    QuestionBank(String),

    /// Persistence failure
    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, TrialError>;
