//! TrialEngine - lifecycle orchestration for rank-up trials.
//!
//! Owns the `none -> active -> {passed, failed}` state machine and wires the
//! requirement curves, grader, economy calculator, and stake ledger together.
//! Every Start/Complete call for an owner runs under that owner's async mutex,
//! which enforces the one-active-trial invariant and keeps ledger settlement
//! race-free; curve math and grading are pure and run freely in parallel
//! across independent owners.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use progression::{
    grade_mcq, grade_numeric, CurveParams, DifficultyTier, EconomyConfig, LevelRequirement,
    ProgressionConfig, Settlement, TrialPolicyConfig,
};

use crate::bank::QuestionBank;
use crate::ledger::StakeLedger;
use crate::store::{TrialStore, WalletOracle};
use crate::types::{
    AnswerRecord, AnswerSubmission, AnswerValue, Question, QuestionKind, RedactedQuestion, Result,
    Trial, TrialError, TrialReport, TrialResult, TrialStatus,
};

/// Resolved engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Resolved requirement curves
    pub curve: CurveParams,
    /// Fee and settlement parameters
    pub economy: EconomyConfig,
    /// Trial policy, snapshotted onto each trial at creation
    pub policy: TrialPolicyConfig,
}

impl EngineConfig {
    /// Resolve a loaded [`ProgressionConfig`] into engine parameters.
    pub fn from_progression(config: &ProgressionConfig) -> Result<Self> {
        Ok(Self {
            curve: config.curve.resolve()?,
            economy: config.economy.clone(),
            policy: config.policy.clone(),
        })
    }
}

/// The rank-up trial engine.
pub struct TrialEngine {
    /// Resolved configuration
    config: EngineConfig,
    /// Trial persistence
    store: Arc<dyn TrialStore>,
    /// Question supply
    bank: Arc<dyn QuestionBank>,
    /// Authoritative stake balances
    ledger: Arc<StakeLedger>,
    /// External wallet balance oracle
    wallet: Arc<dyn WalletOracle>,
    /// Per-owner mutual exclusion for Start/Complete
    owner_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TrialEngine {
    /// Create an engine over the given collaborators.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn TrialStore>,
        bank: Arc<dyn QuestionBank>,
        ledger: Arc<StakeLedger>,
        wallet: Arc<dyn WalletOracle>,
    ) -> Self {
        Self {
            config,
            store,
            bank,
            ledger,
            wallet,
            owner_locks: DashMap::new(),
        }
    }

    /// The stake ledger this engine settles against.
    pub fn ledger(&self) -> &Arc<StakeLedger> {
        &self.ledger
    }

    /// Thresholds required to attempt `level`, rounded to the cent.
    ///
    /// The one entry point for both client preview and server authority.
    pub fn requirements(&self, level: u32) -> Result<LevelRequirement> {
        Ok(self.config.curve.requirements(level)?)
    }

    /// The owner's active trial, if any.
    pub async fn get_active_trial(&self, owner_id: &str) -> Result<Option<Trial>> {
        self.store.active_for_owner(owner_id).await
    }

    /// The issued question set for a trial, answers redacted.
    ///
    /// Idempotent: the set is fixed at creation and re-requesting never
    /// re-rolls it, so a user cannot fish for an easier draw mid-attempt.
    pub async fn get_trial_questions(&self, trial_id: &str) -> Result<Vec<RedactedQuestion>> {
        let questions = self.store.questions(trial_id).await?;
        Ok(questions.iter().map(Question::redacted).collect())
    }

    /// Start a rank-up trial for `owner_id` advancing `from_level -> to_level`.
    ///
    /// Preconditions, checked under the owner lock: a rising one-level
    /// transition, no active trial, no live retry cooldown, wallet hold and
    /// vault stake at or above the requirement curves. On success the session
    /// fee is escrowed and the question set drawn and persisted atomically
    /// with the trial.
    pub async fn start_trial(&self, owner_id: &str, from_level: u32, to_level: u32) -> Result<Trial> {
        let lock = self.owner_lock(owner_id);
        let _guard = lock.lock().await;

        if to_level != from_level + 1 {
            return Err(TrialError::InvalidTransition {
                from_level,
                to_level,
            });
        }

        if let Some(existing) = self.store.active_for_owner(owner_id).await? {
            return Err(TrialError::TrialAlreadyActive {
                trial_id: existing.id,
            });
        }

        let now = Utc::now();
        if let Some(until) = self.ledger.cooldown_until(owner_id, from_level, to_level).await {
            if until > now {
                return Err(TrialError::CooldownActive { until });
            }
        }

        let required = self.requirements(to_level)?;

        let wallet_hold = self.wallet.wallet_hold(owner_id).await?;
        if wallet_hold < required.wallet_hold {
            return Err(TrialError::InsufficientWalletHold {
                required: required.wallet_hold,
                available: wallet_hold,
            });
        }

        let vault_stake = self.ledger.balance(owner_id).await;
        if vault_stake < required.vault_stake {
            return Err(TrialError::InsufficientBalance {
                required: required.vault_stake,
                available: vault_stake,
            });
        }

        let policy = &self.config.policy;
        let tier = DifficultyTier::from_difficulty(policy.min_avg_difficulty);
        let fee = self.config.economy.trial_fee(tier);

        let pool = self.bank.pool_for_level(to_level).await?;
        if pool.len() < policy.question_count {
            return Err(TrialError::QuestionBank(format!(
                "pool for level {} has {} questions, trial needs {}",
                to_level,
                pool.len(),
                policy.question_count
            )));
        }

        let trial_id = uuid::Uuid::new_v4().to_string();
        let questions = select_questions(&trial_id, pool, policy.question_count);

        self.ledger.escrow(owner_id, &trial_id, fee).await?;

        let trial = Trial {
            id: trial_id.clone(),
            owner_id: owner_id.to_string(),
            from_level,
            to_level,
            question_count: policy.question_count,
            min_accuracy: policy.min_accuracy,
            min_avg_difficulty: policy.min_avg_difficulty,
            fee_hive: fee,
            tier,
            status: TrialStatus::Active,
            rollback_applied: false,
            started_at: now,
            completed_at: None,
            answers: vec![],
        };

        // Escrow and trial creation must land together; undo the hold if
        // persistence fails so neither side survives alone
        if let Err(e) = self.store.insert(trial.clone(), questions).await {
            warn!(
                owner_id = %owner_id,
                trial_id = %trial_id,
                error = %e,
                "Trial persistence failed, cancelling escrow"
            );
            self.ledger.cancel(&trial_id).await;
            return Err(e);
        }

        info!(
            owner_id = %owner_id,
            trial_id = %trial_id,
            from_level = from_level,
            to_level = to_level,
            fee_hive = fee,
            tier = tier.as_str(),
            "Trial started"
        );
        Ok(trial)
    }

    /// Complete an active trial with one answer per issued question.
    ///
    /// The answer set is validated wholesale: a count mismatch, duplicate, or
    /// unrecognized question id rejects the whole submission with no partial
    /// credit. Per-question numeric format problems only mark that answer
    /// incorrect.
    pub async fn complete_trial(
        &self,
        trial_id: &str,
        answers: Vec<AnswerSubmission>,
    ) -> Result<TrialReport> {
        // Resolve the owner first so the work happens under the owner lock
        let owner_id = match self.store.get(trial_id).await? {
            Some(trial) => trial.owner_id,
            None => {
                return Err(TrialError::TrialNotFound {
                    trial_id: trial_id.to_string(),
                })
            }
        };

        let lock = self.owner_lock(&owner_id);
        let _guard = lock.lock().await;

        let mut trial = self
            .store
            .get(trial_id)
            .await?
            .ok_or_else(|| TrialError::TrialNotFound {
                trial_id: trial_id.to_string(),
            })?;
        if !trial.is_active() {
            return Err(TrialError::TrialNotActive {
                trial_id: trial_id.to_string(),
            });
        }

        let questions = self.store.questions(trial_id).await?;
        let submitted = index_submission(&questions, answers)?;

        let now = Utc::now();
        let mut records = Vec::with_capacity(questions.len());
        let mut correct_count = 0;
        for question in &questions {
            let value = &submitted[&question.id];
            let correct = grade_answer(question, value);
            if correct {
                correct_count += 1;
            }
            records.push(AnswerRecord {
                question_id: question.id.clone(),
                submitted: value.clone(),
                correct,
                graded_at: now,
            });
        }

        let total_count = questions.len();
        let accuracy = correct_count as f64 / total_count as f64;
        let avg_difficulty = questions
            .iter()
            .map(|q| f64::from(q.difficulty))
            .sum::<f64>()
            / total_count as f64;

        let passed = accuracy >= trial.min_accuracy && avg_difficulty >= trial.min_avg_difficulty;
        let settlement = Settlement::for_outcome(trial.fee_hive, passed);
        debug!(
            trial_id = %trial_id,
            accuracy = accuracy,
            avg_difficulty = avg_difficulty,
            passed = passed,
            "Trial graded"
        );

        trial.completed_at = Some(now);
        trial.answers = records;

        if passed {
            trial.status = TrialStatus::Passed;
            self.store.update(trial.clone()).await?;

            let refunded = self.ledger.release(trial_id).await;
            self.ledger
                .reset_streak(&owner_id, trial.from_level, trial.to_level)
                .await;
            let lock_until = now + Duration::seconds(self.config.policy.stake_lock_secs() as i64);
            self.ledger.lock_stake(&owner_id, lock_until).await;

            info!(
                owner_id = %owner_id,
                trial_id = %trial_id,
                new_level = trial.to_level,
                refunded = refunded,
                "Trial passed"
            );
            debug_assert_eq!(settlement.cost_hive + settlement.refund_hive, settlement.fee_hive);

            return Ok(TrialReport {
                result: TrialResult::Passed,
                correct_count,
                total_count,
                accuracy,
                avg_difficulty,
                new_level: Some(trial.to_level),
                failed_reason: None,
                cooldown_until: None,
                slashed_amount: None,
                refunded_amount: Some(refunded),
                rollback_applied: false,
            });
        }

        // Fail path: the terminal trial is persisted before the ledger counts
        // the strike, so an aborted store write leaves the streak untouched
        // and a retry cannot double-count the failure. The prospective streak
        // decides rollback so the persisted record carries rollback_applied.
        let streak = self
            .ledger
            .fail_streak(&owner_id, trial.from_level, trial.to_level)
            .await
            + 1;
        let rollback = streak >= self.config.policy.rollback_threshold;

        trial.status = TrialStatus::Failed;
        trial.rollback_applied = rollback;
        self.store.update(trial.clone()).await?;

        self.ledger
            .record_failure(&owner_id, trial.from_level, trial.to_level)
            .await;
        let slashed = self.ledger.slash(trial_id).await;
        let cooldown_until = now + Duration::seconds(self.config.policy.fail_cooldown_secs as i64);
        self.ledger
            .set_cooldown(&owner_id, trial.from_level, trial.to_level, cooldown_until)
            .await;

        let new_level = if rollback {
            self.ledger
                .reset_streak(&owner_id, trial.from_level, trial.to_level)
                .await;
            Some(trial.from_level.saturating_sub(1))
        } else {
            None
        };

        let failed_reason = if accuracy < trial.min_accuracy {
            format!(
                "accuracy {:.2} below minimum {:.2}",
                accuracy, trial.min_accuracy
            )
        } else {
            format!(
                "average difficulty {:.2} below minimum {:.2}",
                avg_difficulty, trial.min_avg_difficulty
            )
        };

        info!(
            owner_id = %owner_id,
            trial_id = %trial_id,
            slashed = slashed,
            fail_streak = streak,
            rollback = rollback,
            reason = %failed_reason,
            "Trial failed"
        );
        debug_assert_eq!(settlement.cost_hive + settlement.refund_hive, settlement.fee_hive);

        Ok(TrialReport {
            result: TrialResult::Failed,
            correct_count,
            total_count,
            accuracy,
            avg_difficulty,
            new_level,
            failed_reason: Some(failed_reason),
            cooldown_until: Some(cooldown_until),
            slashed_amount: Some(slashed),
            refunded_amount: None,
            rollback_applied: rollback,
        })
    }

    /// The mutex serializing Start/Complete for one owner.
    fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        self.owner_locks
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Draw `count` questions without replacement in a stable order.
///
/// Ordering is keyed by `sha256(trial_id || question_id)`: deterministic for a
/// given trial (re-reads never re-roll the set) yet unpredictable before the
/// trial id exists, so the draw cannot be gamed.
fn select_questions(trial_id: &str, mut pool: Vec<Question>, count: usize) -> Vec<Question> {
    pool.sort_by_cached_key(|q| {
        let mut hasher = Sha256::new();
        hasher.update(trial_id.as_bytes());
        hasher.update(q.id.as_bytes());
        hex::encode(hasher.finalize())
    });
    pool.truncate(count);
    pool
}

/// Validate a submission against the issued set and index it by question id.
fn index_submission(
    questions: &[Question],
    answers: Vec<AnswerSubmission>,
) -> Result<HashMap<String, AnswerValue>> {
    if answers.len() != questions.len() {
        return Err(TrialError::IncompleteSubmission {
            detail: format!("expected {} answers, got {}", questions.len(), answers.len()),
        });
    }

    let mut submitted = HashMap::with_capacity(answers.len());
    for answer in answers {
        if !questions.iter().any(|q| q.id == answer.question_id) {
            return Err(TrialError::IncompleteSubmission {
                detail: format!("unrecognized question {}", answer.question_id),
            });
        }
        if submitted.insert(answer.question_id.clone(), answer.value).is_some() {
            return Err(TrialError::IncompleteSubmission {
                detail: format!("duplicate answer for question {}", answer.question_id),
            });
        }
    }

    Ok(submitted)
}

/// Grade one answer against its question. A kind mismatch (a choice submitted
/// for a numeric question, or vice versa) is simply incorrect.
fn grade_answer(question: &Question, value: &AnswerValue) -> bool {
    match (&question.kind, value) {
        (QuestionKind::Mcq { correct_index, .. }, AnswerValue::Choice(submitted)) => {
            grade_mcq(*submitted, *correct_index)
        }
        (
            QuestionKind::Numeric {
                canonical_answer,
                tolerance,
                ..
            },
            AnswerValue::Numeric(submitted),
        ) => grade_numeric(Some(submitted), Some(canonical_answer), *tolerance).correct,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::MemoryQuestionBank;
    use crate::store::{MemoryTrialStore, MemoryWalletOracle};
    use crate::types::RedactedKind;

    struct Harness {
        engine: Arc<TrialEngine>,
        ledger: Arc<StakeLedger>,
        wallet: Arc<MemoryWalletOracle>,
        bank: Arc<MemoryQuestionBank>,
    }

    fn numeric_question(id: &str, answer: &str, difficulty: u8) -> Question {
        Question {
            id: id.to_string(),
            text: format!("question {}", id),
            difficulty,
            kind: QuestionKind::Numeric {
                canonical_answer: answer.to_string(),
                tolerance: None,
                unit: None,
            },
        }
    }

    fn mcq_question(id: &str, correct_index: usize, difficulty: u8) -> Question {
        Question {
            id: id.to_string(),
            text: format!("question {}", id),
            difficulty,
            kind: QuestionKind::Mcq {
                choices: vec!["a".to_string(), "b".to_string(), "c".to_string()],
                correct_index,
            },
        }
    }

    fn test_config() -> ProgressionConfig {
        let mut config = ProgressionConfig::default();
        config.policy.question_count = 2;
        config
    }

    async fn harness_with(config: ProgressionConfig) -> Harness {
        let ledger = Arc::new(StakeLedger::new());
        let wallet = Arc::new(MemoryWalletOracle::new());
        let bank = Arc::new(MemoryQuestionBank::new());
        let store = Arc::new(MemoryTrialStore::new());

        // Enough questions at every tested target level
        for level in 1..=3 {
            bank.add_questions(
                level,
                (0..4).map(|i| numeric_question(&format!("l{}-q{}", level, i), "4", 3)),
            )
            .await;
        }

        let engine = Arc::new(TrialEngine::new(
            EngineConfig::from_progression(&config).unwrap(),
            store,
            bank.clone(),
            ledger.clone(),
            wallet.clone(),
        ));
        Harness {
            engine,
            ledger,
            wallet,
            bank,
        }
    }

    async fn funded_harness() -> Harness {
        let h = harness_with(test_config()).await;
        h.wallet.set_hold("alice", 100.0).await;
        h.ledger.credit("alice", 100.0).await;
        h
    }

    fn answers_for(questions: &[RedactedQuestion], value: &str) -> Vec<AnswerSubmission> {
        questions
            .iter()
            .map(|q| AnswerSubmission {
                question_id: q.id.clone(),
                value: AnswerValue::Numeric(value.to_string()),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_start_escrows_fee() {
        let h = funded_harness().await;

        let trial = h.engine.start_trial("alice", 1, 2).await.unwrap();
        assert_eq!(trial.status, TrialStatus::Active);
        assert_eq!(trial.question_count, 2);
        // Medium tier: base 5 + surcharge 10
        assert_eq!(trial.fee_hive, 15.0);
        assert_eq!(h.ledger.balance("alice").await, 85.0);
    }

    #[tokio::test]
    async fn test_second_start_rejected_with_existing_id() {
        let h = funded_harness().await;
        let trial = h.engine.start_trial("alice", 1, 2).await.unwrap();

        let err = h.engine.start_trial("alice", 1, 2).await.unwrap_err();
        match err {
            TrialError::TrialAlreadyActive { trial_id } => assert_eq!(trial_id, trial.id),
            other => panic!("expected TrialAlreadyActive, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_rejects_bad_transition() {
        let h = funded_harness().await;
        assert!(matches!(
            h.engine.start_trial("alice", 1, 3).await.unwrap_err(),
            TrialError::InvalidTransition { .. }
        ));
        assert!(matches!(
            h.engine.start_trial("alice", 2, 1).await.unwrap_err(),
            TrialError::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn test_start_checks_wallet_and_vault() {
        let h = harness_with(test_config()).await;

        // requirements(2): wallet 60.0, vault 53.98
        h.wallet.set_hold("alice", 59.0).await;
        h.ledger.credit("alice", 100.0).await;
        assert!(matches!(
            h.engine.start_trial("alice", 1, 2).await.unwrap_err(),
            TrialError::InsufficientWalletHold { .. }
        ));

        let h2 = harness_with(test_config()).await;
        h2.wallet.set_hold("bob", 100.0).await;
        h2.ledger.credit("bob", 53.0).await;
        assert!(matches!(
            h2.engine.start_trial("bob", 1, 2).await.unwrap_err(),
            TrialError::InsufficientBalance { .. }
        ));
    }

    #[tokio::test]
    async fn test_questions_stable_and_redacted() {
        let h = funded_harness().await;
        let trial = h.engine.start_trial("alice", 1, 2).await.unwrap();

        let first = h.engine.get_trial_questions(&trial.id).await.unwrap();
        let second = h.engine.get_trial_questions(&trial.id).await.unwrap();
        assert_eq!(first.len(), 2);
        let first_ids: Vec<_> = first.iter().map(|q| q.id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|q| q.id.clone()).collect();
        assert_eq!(first_ids, second_ids);

        for question in &first {
            match &question.kind {
                RedactedKind::Numeric { unit } => assert!(unit.is_none()),
                RedactedKind::Mcq { .. } => panic!("expected numeric questions"),
            }
        }

        // Nothing answer-shaped survives serialization to the client
        let wire = serde_json::to_string(&first).unwrap();
        assert!(!wire.contains("canonical_answer"));
        assert!(!wire.contains("correct_index"));
        assert!(!wire.contains("tolerance"));
    }

    #[tokio::test]
    async fn test_pass_flow() {
        let h = funded_harness().await;
        let trial = h.engine.start_trial("alice", 1, 2).await.unwrap();
        let questions = h.engine.get_trial_questions(&trial.id).await.unwrap();

        let report = h
            .engine
            .complete_trial(&trial.id, answers_for(&questions, "4"))
            .await
            .unwrap();

        assert_eq!(report.result, TrialResult::Passed);
        assert_eq!(report.correct_count, 2);
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.new_level, Some(2));
        assert_eq!(report.refunded_amount, Some(15.0));
        assert!(!report.rollback_applied);

        // Escrow released, streak clear, stake locked
        assert_eq!(h.ledger.balance("alice").await, 100.0);
        assert_eq!(h.ledger.fail_streak("alice", 1, 2).await, 0);
        assert!(h.ledger.account("alice").await.unwrap().locked_until.is_some());
        assert!(h.engine.get_active_trial("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_slashes_full_escrow() {
        let h = funded_harness().await;
        let trial = h.engine.start_trial("alice", 1, 2).await.unwrap();
        let questions = h.engine.get_trial_questions(&trial.id).await.unwrap();

        let report = h
            .engine
            .complete_trial(&trial.id, answers_for(&questions, "5"))
            .await
            .unwrap();

        assert_eq!(report.result, TrialResult::Failed);
        assert_eq!(report.slashed_amount, Some(15.0));
        assert!(report.cooldown_until.is_some());
        assert!(report.failed_reason.unwrap().contains("accuracy"));

        assert_eq!(h.ledger.balance("alice").await, 85.0);
        assert_eq!(h.ledger.fail_streak("alice", 1, 2).await, 1);
        assert_eq!(h.ledger.pending_slashes().await.len(), 1);
    }

    /// Store wrapper that fails the next `update` call, then recovers.
    struct OutageTrialStore {
        inner: MemoryTrialStore,
        fail_next_update: std::sync::atomic::AtomicBool,
    }

    impl OutageTrialStore {
        fn new() -> Self {
            Self {
                inner: MemoryTrialStore::new(),
                fail_next_update: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn fail_next_update(&self) {
            self.fail_next_update
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl TrialStore for OutageTrialStore {
        async fn insert(&self, trial: Trial, questions: Vec<Question>) -> Result<()> {
            self.inner.insert(trial, questions).await
        }

        async fn get(&self, trial_id: &str) -> Result<Option<Trial>> {
            self.inner.get(trial_id).await
        }

        async fn questions(&self, trial_id: &str) -> Result<Vec<Question>> {
            self.inner.questions(trial_id).await
        }

        async fn active_for_owner(&self, owner_id: &str) -> Result<Option<Trial>> {
            self.inner.active_for_owner(owner_id).await
        }

        async fn update(&self, trial: Trial) -> Result<()> {
            if self
                .fail_next_update
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(TrialError::Store("storage outage".to_string()));
            }
            self.inner.update(trial).await
        }
    }

    #[tokio::test]
    async fn test_failed_persistence_leaves_streak_untouched() {
        let ledger = Arc::new(StakeLedger::new());
        let wallet = Arc::new(MemoryWalletOracle::new());
        let bank = Arc::new(MemoryQuestionBank::new());
        let store = Arc::new(OutageTrialStore::new());
        bank.add_questions(2, (0..4).map(|i| numeric_question(&format!("q{}", i), "4", 3)))
            .await;
        let engine = TrialEngine::new(
            EngineConfig::from_progression(&test_config()).unwrap(),
            store.clone(),
            bank,
            ledger.clone(),
            wallet.clone(),
        );
        wallet.set_hold("alice", 100.0).await;
        ledger.credit("alice", 100.0).await;

        let trial = engine.start_trial("alice", 1, 2).await.unwrap();
        let questions = engine.get_trial_questions(&trial.id).await.unwrap();
        let answers = answers_for(&questions, "5");

        // The failed write aborts the whole completion: no strike counted,
        // no settlement, trial still active
        store.fail_next_update();
        assert!(matches!(
            engine
                .complete_trial(&trial.id, answers.clone())
                .await
                .unwrap_err(),
            TrialError::Store(_)
        ));
        assert_eq!(ledger.fail_streak("alice", 1, 2).await, 0);
        assert_eq!(ledger.balance("alice").await, 85.0);
        assert!(engine.get_active_trial("alice").await.unwrap().is_some());

        // The retry counts the one real failure exactly once
        let report = engine.complete_trial(&trial.id, answers).await.unwrap();
        assert_eq!(report.result, TrialResult::Failed);
        assert_eq!(ledger.fail_streak("alice", 1, 2).await, 1);
        assert_eq!(ledger.pending_slashes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_easy_pool_fails_on_difficulty() {
        let h = harness_with(test_config()).await;
        h.bank
            .add_questions(4, (0..4).map(|i| numeric_question(&format!("easy-{}", i), "4", 2)))
            .await;
        h.wallet.set_hold("erin", 200.0).await;
        h.ledger.credit("erin", 200.0).await;

        let trial = h.engine.start_trial("erin", 3, 4).await.unwrap();
        let questions = h.engine.get_trial_questions(&trial.id).await.unwrap();

        // Every answer correct, but the draw averages difficulty 2.0 against
        // the 2.5 minimum
        let report = h
            .engine
            .complete_trial(&trial.id, answers_for(&questions, "4"))
            .await
            .unwrap();

        assert_eq!(report.result, TrialResult::Failed);
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.avg_difficulty, 2.0);
        assert!(report.failed_reason.unwrap().contains("average difficulty"));
        assert_eq!(report.slashed_amount, Some(15.0));
    }

    #[tokio::test]
    async fn test_cooldown_blocks_restart() {
        let h = funded_harness().await;
        let trial = h.engine.start_trial("alice", 1, 2).await.unwrap();
        let questions = h.engine.get_trial_questions(&trial.id).await.unwrap();
        h.engine
            .complete_trial(&trial.id, answers_for(&questions, "5"))
            .await
            .unwrap();

        assert!(matches!(
            h.engine.start_trial("alice", 1, 2).await.unwrap_err(),
            TrialError::CooldownActive { .. }
        ));
    }

    #[tokio::test]
    async fn test_three_failures_roll_back_one_level() {
        let mut config = test_config();
        config.policy.fail_cooldown_secs = 0;
        let h = harness_with(config).await;
        h.wallet.set_hold("alice", 100.0).await;
        h.ledger.credit("alice", 200.0).await;

        for attempt in 1..=3u32 {
            let trial = h.engine.start_trial("alice", 1, 2).await.unwrap();
            let questions = h.engine.get_trial_questions(&trial.id).await.unwrap();
            let report = h
                .engine
                .complete_trial(&trial.id, answers_for(&questions, "5"))
                .await
                .unwrap();

            if attempt < 3 {
                assert!(!report.rollback_applied);
                assert_eq!(h.ledger.fail_streak("alice", 1, 2).await, attempt);
            } else {
                assert!(report.rollback_applied);
                assert_eq!(report.new_level, Some(0));
                // Streak resets immediately after the rollback
                assert_eq!(h.ledger.fail_streak("alice", 1, 2).await, 0);
            }
        }
    }

    #[tokio::test]
    async fn test_incomplete_submissions_rejected_wholesale() {
        let h = funded_harness().await;
        let trial = h.engine.start_trial("alice", 1, 2).await.unwrap();
        let questions = h.engine.get_trial_questions(&trial.id).await.unwrap();

        // Too few answers
        let short = vec![AnswerSubmission {
            question_id: questions[0].id.clone(),
            value: AnswerValue::Numeric("4".to_string()),
        }];
        assert!(matches!(
            h.engine.complete_trial(&trial.id, short).await.unwrap_err(),
            TrialError::IncompleteSubmission { .. }
        ));

        // Unknown question id
        let mut unknown = answers_for(&questions, "4");
        unknown[1].question_id = "ghost".to_string();
        assert!(matches!(
            h.engine.complete_trial(&trial.id, unknown).await.unwrap_err(),
            TrialError::IncompleteSubmission { .. }
        ));

        // Duplicate answer for one question
        let mut duplicate = answers_for(&questions, "4");
        duplicate[1].question_id = questions[0].id.clone();
        assert!(matches!(
            h.engine.complete_trial(&trial.id, duplicate).await.unwrap_err(),
            TrialError::IncompleteSubmission { .. }
        ));

        // Nothing was graded or settled
        let active = h.engine.get_active_trial("alice").await.unwrap().unwrap();
        assert_eq!(active.id, trial.id);
        assert_eq!(h.ledger.balance("alice").await, 85.0);
    }

    #[tokio::test]
    async fn test_terminal_trial_settles_once() {
        let h = funded_harness().await;
        let trial = h.engine.start_trial("alice", 1, 2).await.unwrap();
        let questions = h.engine.get_trial_questions(&trial.id).await.unwrap();
        let answers = answers_for(&questions, "5");

        h.engine
            .complete_trial(&trial.id, answers.clone())
            .await
            .unwrap();
        let balance_after = h.ledger.balance("alice").await;

        assert!(matches!(
            h.engine.complete_trial(&trial.id, answers).await.unwrap_err(),
            TrialError::TrialNotActive { .. }
        ));
        assert_eq!(h.ledger.balance("alice").await, balance_after);
        assert_eq!(h.ledger.pending_slashes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_starts_yield_one_trial() {
        let h = funded_harness().await;

        let attempts = (0..8).map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.start_trial("alice", 1, 2).await })
        });
        let outcomes = futures::future::join_all(attempts).await;

        let successes = outcomes
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(successes, 1);

        // Exactly one escrow was taken
        assert_eq!(h.ledger.balance("alice").await, 85.0);
    }

    #[tokio::test]
    async fn test_mixed_question_kinds_grade() {
        let h = funded_harness().await;
        h.bank
            .add_questions(3, vec![mcq_question("m1", 1, 4), numeric_question("n1", "3/4", 4)])
            .await;

        // Fresh owner targeting level 3 where the mixed pool lives
        h.wallet.set_hold("carol", 100.0).await;
        h.ledger.credit("carol", 200.0).await;

        let trial = h.engine.start_trial("carol", 2, 3).await.unwrap();
        let questions = h.engine.get_trial_questions(&trial.id).await.unwrap();

        let answers: Vec<AnswerSubmission> = questions
            .iter()
            .map(|q| AnswerSubmission {
                question_id: q.id.clone(),
                value: match &q.kind {
                    RedactedKind::Mcq { .. } => AnswerValue::Choice(1),
                    RedactedKind::Numeric { .. } => AnswerValue::Numeric("0.75".to_string()),
                },
            })
            .collect();

        let report = h.engine.complete_trial(&trial.id, answers).await.unwrap();
        // "0.75" grades equal to "3/4" and either matches "4" or not; the mcq
        // answer is correct whenever m1 is drawn
        assert_eq!(report.total_count, 2);
    }

    #[tokio::test]
    async fn test_level_one_scenario_end_to_end() {
        let h = funded_harness().await;

        let req = h.engine.requirements(1).unwrap();
        assert_eq!(req.wallet_hold, 55.0);
        assert!((req.vault_stake - 50.995).abs() < 0.01);

        // Newcomer at the ladder floor attempting level 1
        h.wallet.set_hold("dave", 55.0).await;
        h.ledger.credit("dave", 51.0).await;

        let trial = h.engine.start_trial("dave", 0, 1).await.unwrap();
        let questions = h.engine.get_trial_questions(&trial.id).await.unwrap();

        // One right, one wrong: accuracy 0.5 below the 0.8 minimum
        let answers = vec![
            AnswerSubmission {
                question_id: questions[0].id.clone(),
                value: AnswerValue::Numeric("4".to_string()),
            },
            AnswerSubmission {
                question_id: questions[1].id.clone(),
                value: AnswerValue::Numeric("7".to_string()),
            },
        ];
        let report = h.engine.complete_trial(&trial.id, answers).await.unwrap();

        assert_eq!(report.result, TrialResult::Failed);
        assert_eq!(report.accuracy, 0.5);
        assert_eq!(report.slashed_amount, Some(15.0));
        assert_eq!(h.ledger.balance("dave").await, 36.0);
        assert_eq!(h.ledger.fail_streak("dave", 0, 1).await, 1);
    }
}
