//! Question bank seam.
//!
//! The bank supplies the question pool per level; the engine only selects and
//! orders from it. Canonical answers live server-side only and are redacted
//! before transport.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{Question, Result};

/// Supplies the pool of questions available for a level's rank-up trial.
#[async_trait]
pub trait QuestionBank: Send + Sync {
    /// Full question pool for trials advancing to `level`.
    async fn pool_for_level(&self, level: u32) -> Result<Vec<Question>>;
}

/// In-memory question bank.
pub struct MemoryQuestionBank {
    by_level: Arc<RwLock<HashMap<u32, Vec<Question>>>>,
}

impl MemoryQuestionBank {
    /// Create an empty bank.
    pub fn new() -> Self {
        Self {
            by_level: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a question to a level's pool.
    pub async fn add_question(&self, level: u32, question: Question) {
        let mut by_level = self.by_level.write().await;
        by_level.entry(level).or_insert_with(Vec::new).push(question);
    }

    /// Add a batch of questions to a level's pool.
    pub async fn add_questions(&self, level: u32, questions: impl IntoIterator<Item = Question>) {
        let mut by_level = self.by_level.write().await;
        by_level
            .entry(level)
            .or_insert_with(Vec::new)
            .extend(questions);
    }

    /// Pool size for a level.
    pub async fn pool_size(&self, level: u32) -> usize {
        let by_level = self.by_level.read().await;
        by_level.get(&level).map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for MemoryQuestionBank {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuestionBank for MemoryQuestionBank {
    async fn pool_for_level(&self, level: u32) -> Result<Vec<Question>> {
        let by_level = self.by_level.read().await;
        Ok(by_level.get(&level).cloned().unwrap_or_default())
    }
}
