//! HiveGate trial engine - the Progression & Rank-Up Trial Economy core.
//!
//! Gates access to the shared hive model behind a staked progression ladder:
//!
//! - **Trial state machine**: `none -> active -> {passed, failed}` with
//!   fail-streak tracking and 3-strike level rollback
//! - **Stake ledger**: atomic, idempotent escrow / release / slash with a
//!   pending-slash pool for off-engine settlement
//! - **Trait seams**: trial store, question bank, and wallet oracle are
//!   external collaborators behind async traits
//!
//! # Architecture
//!
//! ```text
//! start ──▶ Requirement Curve ──▶ Stake Ledger (escrow)
//!                                      │
//!          issue questions ◀───────────┘
//!                │
//! complete ──▶ Answer Grader ──▶ pass / fail
//!                                      │
//!              Stake Ledger (release / slash) ──▶ TrialReport
//! ```
//!
//! Curve, grading, and settlement math live in the pure [`progression`] crate
//! so a previewing client and this authoritative engine can never diverge.

pub mod bank;
pub mod engine;
pub mod ledger;
pub mod store;
pub mod types;

// Re-export main types
pub use bank::{MemoryQuestionBank, QuestionBank};
pub use engine::{EngineConfig, TrialEngine};
pub use ledger::{PendingSlash, StakeAccount, StakeLedger};
pub use store::{MemoryTrialStore, MemoryWalletOracle, TrialStore, WalletOracle};
pub use types::*;

// Grading is part of the exposed surface; clients preview with the same code
pub use progression::{grade_numeric, parse_numeric, NumericGrade};
