//! Persistence seams for trials and external collaborators.
//!
//! The engine talks to durable storage and the wallet oracle through traits
//! only; the in-memory implementations here back tests and single-process
//! deployments. A durable store must provide per-owner atomic updates at
//! read-committed isolation or better.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{Question, Result, Trial, TrialError};

/// Durable storage for trials and their issued question sets.
#[async_trait]
pub trait TrialStore: Send + Sync {
    /// Persist a new trial together with its issued questions.
    ///
    /// Must be atomic: a trial without its questions (or vice versa) is an
    /// inconsistent state.
    async fn insert(&self, trial: Trial, questions: Vec<Question>) -> Result<()>;

    /// Fetch a trial by ID.
    async fn get(&self, trial_id: &str) -> Result<Option<Trial>>;

    /// Fetch the issued question set for a trial, in issue order.
    async fn questions(&self, trial_id: &str) -> Result<Vec<Question>>;

    /// Fetch the owner's active trial, if any.
    async fn active_for_owner(&self, owner_id: &str) -> Result<Option<Trial>>;

    /// Overwrite a trial record.
    async fn update(&self, trial: Trial) -> Result<()>;
}

/// In-memory trial store.
pub struct MemoryTrialStore {
    trials: Arc<RwLock<HashMap<String, Trial>>>,
    questions: Arc<RwLock<HashMap<String, Vec<Question>>>>,
}

impl MemoryTrialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            trials: Arc::new(RwLock::new(HashMap::new())),
            questions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryTrialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrialStore for MemoryTrialStore {
    async fn insert(&self, trial: Trial, questions: Vec<Question>) -> Result<()> {
        let mut trials = self.trials.write().await;
        let mut question_sets = self.questions.write().await;
        question_sets.insert(trial.id.clone(), questions);
        trials.insert(trial.id.clone(), trial);
        Ok(())
    }

    async fn get(&self, trial_id: &str) -> Result<Option<Trial>> {
        let trials = self.trials.read().await;
        Ok(trials.get(trial_id).cloned())
    }

    async fn questions(&self, trial_id: &str) -> Result<Vec<Question>> {
        let question_sets = self.questions.read().await;
        question_sets
            .get(trial_id)
            .cloned()
            .ok_or_else(|| TrialError::TrialNotFound {
                trial_id: trial_id.to_string(),
            })
    }

    async fn active_for_owner(&self, owner_id: &str) -> Result<Option<Trial>> {
        let trials = self.trials.read().await;
        Ok(trials
            .values()
            .find(|t| t.owner_id == owner_id && t.is_active())
            .cloned())
    }

    async fn update(&self, trial: Trial) -> Result<()> {
        let mut trials = self.trials.write().await;
        if !trials.contains_key(&trial.id) {
            return Err(TrialError::TrialNotFound {
                trial_id: trial.id.clone(),
            });
        }
        trials.insert(trial.id.clone(), trial);
        Ok(())
    }
}

/// Read-only view of the user's own wallet balance.
///
/// The wallet is external to this engine; holds are required but never
/// escrowed here.
#[async_trait]
pub trait WalletOracle: Send + Sync {
    /// Current HIVE held in the owner's wallet.
    async fn wallet_hold(&self, owner_id: &str) -> Result<f64>;
}

/// In-memory wallet oracle for tests and local deployments.
pub struct MemoryWalletOracle {
    holds: Arc<RwLock<HashMap<String, f64>>>,
}

impl MemoryWalletOracle {
    /// Create an oracle with no balances.
    pub fn new() -> Self {
        Self {
            holds: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Set an owner's wallet balance.
    pub async fn set_hold(&self, owner_id: &str, amount: f64) {
        let mut holds = self.holds.write().await;
        holds.insert(owner_id.to_string(), amount);
    }
}

impl Default for MemoryWalletOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletOracle for MemoryWalletOracle {
    async fn wallet_hold(&self, owner_id: &str) -> Result<f64> {
        let holds = self.holds.read().await;
        Ok(holds.get(owner_id).copied().unwrap_or(0.0))
    }
}
