//! Stake ledger - the authoritative vault-stake balance store.
//!
//! All balance movement goes through the atomic escrow/release/slash
//! operations; nothing else mutates an account's balance. Settlement is
//! idempotent per trial: an escrow is terminal once released or slashed, so
//! retrying a settlement is a no-op rather than a double-charge. Balances can
//! never go negative.
//!
//! Slashed amounts are not transferred on-chain here; they accumulate in a
//! pending pool that an off-engine reconciliation job drains via
//! [`StakeLedger::take_pending_slashes`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::types::{Result, TrialError};

/// A user's vault stake aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeAccount {
    /// Account owner
    pub owner_id: String,
    /// Authoritative vault stake, never negative
    pub balance: f64,
    /// Stake lock expiry after a pass, if any
    pub locked_until: Option<DateTime<Utc>>,
    /// Consecutive failed attempts, keyed by level transition
    pub fail_streaks: HashMap<String, u32>,
    /// Retry cooldown expiries, keyed by level transition
    pub cooldowns: HashMap<String, DateTime<Utc>>,
}

impl StakeAccount {
    fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            balance: 0.0,
            locked_until: None,
            fail_streaks: HashMap::new(),
            cooldowns: HashMap::new(),
        }
    }
}

/// Settlement state of an escrow. Terminal once it leaves `Held`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum EscrowState {
    Held,
    Released,
    Slashed,
    Cancelled,
}

/// A hold placed against a trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Escrow {
    trial_id: String,
    owner_id: String,
    amount: f64,
    state: EscrowState,
    created_at: DateTime<Utc>,
}

/// A slashed amount awaiting off-engine settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSlash {
    /// Unique record ID
    pub id: String,
    /// Trial whose escrow was slashed
    pub trial_id: String,
    /// Owner the stake was forfeited from
    pub owner_id: String,
    /// Forfeited HIVE
    pub amount: f64,
    /// When the slash was recorded
    pub slashed_at: DateTime<Utc>,
}

/// Key for per-transition bookkeeping (`fail_streaks`, `cooldowns`).
fn transition_key(from_level: u32, to_level: u32) -> String {
    format!("{}->{}", from_level, to_level)
}

/// The authoritative stake balance store.
pub struct StakeLedger {
    /// Accounts by owner
    accounts: Arc<RwLock<HashMap<String, StakeAccount>>>,
    /// Escrows by trial ID
    escrows: Arc<RwLock<HashMap<String, Escrow>>>,
    /// Slashes awaiting on-chain transfer
    pending_slashes: Arc<RwLock<Vec<PendingSlash>>>,
}

impl StakeLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
            escrows: Arc::new(RwLock::new(HashMap::new())),
            pending_slashes: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Deposit HIVE into an owner's vault stake, creating the account if needed.
    pub async fn credit(&self, owner_id: &str, amount: f64) {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .entry(owner_id.to_string())
            .or_insert_with(|| StakeAccount::new(owner_id));
        account.balance += amount;

        debug!(owner_id = %owner_id, amount = amount, balance = account.balance, "Stake credited");
    }

    /// Current vault stake for an owner (0 for unknown owners).
    pub async fn balance(&self, owner_id: &str) -> f64 {
        let accounts = self.accounts.read().await;
        accounts.get(owner_id).map(|a| a.balance).unwrap_or(0.0)
    }

    /// Snapshot of an owner's account.
    pub async fn account(&self, owner_id: &str) -> Option<StakeAccount> {
        let accounts = self.accounts.read().await;
        accounts.get(owner_id).cloned()
    }

    /// Hold `amount` against `trial_id`, debiting the owner's balance.
    ///
    /// Fails with `InsufficientBalance` when the balance cannot cover the
    /// hold. Retrying for a trial that already holds an escrow is a no-op.
    pub async fn escrow(&self, owner_id: &str, trial_id: &str, amount: f64) -> Result<()> {
        let mut escrows = self.escrows.write().await;
        if escrows.contains_key(trial_id) {
            return Ok(());
        }

        let mut accounts = self.accounts.write().await;
        let account = accounts
            .entry(owner_id.to_string())
            .or_insert_with(|| StakeAccount::new(owner_id));

        if account.balance < amount {
            return Err(TrialError::InsufficientBalance {
                required: amount,
                available: account.balance,
            });
        }

        account.balance -= amount;
        escrows.insert(
            trial_id.to_string(),
            Escrow {
                trial_id: trial_id.to_string(),
                owner_id: owner_id.to_string(),
                amount,
                state: EscrowState::Held,
                created_at: Utc::now(),
            },
        );

        info!(
            owner_id = %owner_id,
            trial_id = %trial_id,
            amount = amount,
            balance = account.balance,
            "Escrow held"
        );
        Ok(())
    }

    /// Undo a held escrow after trial creation failed. Returns the amount
    /// re-credited, or 0 if the escrow was already settled.
    pub async fn cancel(&self, trial_id: &str) -> f64 {
        self.settle(trial_id, EscrowState::Cancelled, true).await
    }

    /// Release a held escrow back to the owner's balance on pass.
    /// Idempotent: settling an already-settled trial returns 0.
    pub async fn release(&self, trial_id: &str) -> f64 {
        self.settle(trial_id, EscrowState::Released, true).await
    }

    /// Permanently forfeit a held escrow on fail, recording it in the
    /// pending-transfer pool. Idempotent: settling an already-settled trial
    /// returns 0.
    pub async fn slash(&self, trial_id: &str) -> f64 {
        let amount = self.settle(trial_id, EscrowState::Slashed, false).await;
        if amount > 0.0 {
            let escrows = self.escrows.read().await;
            // The escrow is guaranteed present: settle() just transitioned it
            if let Some(escrow) = escrows.get(trial_id) {
                let mut pending = self.pending_slashes.write().await;
                pending.push(PendingSlash {
                    id: uuid::Uuid::new_v4().to_string(),
                    trial_id: trial_id.to_string(),
                    owner_id: escrow.owner_id.clone(),
                    amount,
                    slashed_at: Utc::now(),
                });
            }
        }
        amount
    }

    /// Transition a held escrow to a terminal state, optionally crediting the
    /// amount back to the owner. Returns 0 when the escrow is missing or
    /// already terminal.
    async fn settle(&self, trial_id: &str, to: EscrowState, credit_back: bool) -> f64 {
        let mut escrows = self.escrows.write().await;

        let escrow = match escrows.get_mut(trial_id) {
            Some(e) => e,
            None => {
                warn!(trial_id = %trial_id, "Settlement requested for unknown escrow");
                return 0.0;
            }
        };
        if escrow.state != EscrowState::Held {
            debug!(
                trial_id = %trial_id,
                state = ?escrow.state,
                "Escrow already settled, settlement is a no-op"
            );
            return 0.0;
        }

        escrow.state = to;
        let amount = escrow.amount;
        let owner_id = escrow.owner_id.clone();

        if credit_back {
            let mut accounts = self.accounts.write().await;
            if let Some(account) = accounts.get_mut(&owner_id) {
                account.balance += amount;
            }
        }

        info!(
            owner_id = %owner_id,
            trial_id = %trial_id,
            amount = amount,
            outcome = ?to,
            "Escrow settled"
        );
        amount
    }

    /// Record a failed attempt for a transition; returns the new streak.
    pub async fn record_failure(&self, owner_id: &str, from_level: u32, to_level: u32) -> u32 {
        let key = transition_key(from_level, to_level);
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .entry(owner_id.to_string())
            .or_insert_with(|| StakeAccount::new(owner_id));
        let streak = account.fail_streaks.entry(key).or_insert(0);
        *streak += 1;
        *streak
    }

    /// Reset the fail streak for a transition (on pass or after rollback).
    pub async fn reset_streak(&self, owner_id: &str, from_level: u32, to_level: u32) {
        let key = transition_key(from_level, to_level);
        let mut accounts = self.accounts.write().await;
        if let Some(account) = accounts.get_mut(owner_id) {
            account.fail_streaks.insert(key, 0);
        }
    }

    /// Current fail streak for a transition.
    pub async fn fail_streak(&self, owner_id: &str, from_level: u32, to_level: u32) -> u32 {
        let key = transition_key(from_level, to_level);
        let accounts = self.accounts.read().await;
        accounts
            .get(owner_id)
            .and_then(|a| a.fail_streaks.get(&key).copied())
            .unwrap_or(0)
    }

    /// Set the retry cooldown for a transition after a failure.
    pub async fn set_cooldown(
        &self,
        owner_id: &str,
        from_level: u32,
        to_level: u32,
        until: DateTime<Utc>,
    ) {
        let key = transition_key(from_level, to_level);
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .entry(owner_id.to_string())
            .or_insert_with(|| StakeAccount::new(owner_id));
        account.cooldowns.insert(key, until);
    }

    /// Cooldown expiry for a transition, if one is set.
    pub async fn cooldown_until(
        &self,
        owner_id: &str,
        from_level: u32,
        to_level: u32,
    ) -> Option<DateTime<Utc>> {
        let key = transition_key(from_level, to_level);
        let accounts = self.accounts.read().await;
        accounts
            .get(owner_id)
            .and_then(|a| a.cooldowns.get(&key).copied())
    }

    /// Lock the owner's stake until `until` (post-pass re-staking cooldown).
    pub async fn lock_stake(&self, owner_id: &str, until: DateTime<Utc>) {
        let mut accounts = self.accounts.write().await;
        if let Some(account) = accounts.get_mut(owner_id) {
            account.locked_until = Some(until);
        }
    }

    /// Slashes recorded but not yet transferred on-chain.
    pub async fn pending_slashes(&self) -> Vec<PendingSlash> {
        let pending = self.pending_slashes.read().await;
        pending.clone()
    }

    /// Drain the pending-slash pool for off-engine settlement.
    ///
    /// The reconciliation job calls this, submits the transfers, and re-credits
    /// nothing on failure: escrow state stays `Slashed` either way, so a crashed
    /// job can only delay settlement, never duplicate it within the ledger.
    pub async fn take_pending_slashes(&self) -> Vec<PendingSlash> {
        let mut pending = self.pending_slashes.write().await;
        std::mem::take(&mut *pending)
    }
}

impl Default for StakeLedger {
    fn default() -> Self {
        Self::new()
    }
}
