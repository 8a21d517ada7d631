use std::{collections::HashMap, future::Future};

use uuid::Uuid;

use super::connection::Connection;
use crate::{config::CounterPolicy, error::StoreError};

/// Durable per-user record of answered questions and lifetime counters.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProgress {
    pub user_id: i64,
    /// Answered question ids mapped to whether the first answer was correct.
    pub answered: HashMap<Uuid, bool>,
    pub correct: u32,
    pub total: u32,
}

impl UserProgress {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            answered: HashMap::new(),
            correct: 0,
            total: 0,
        }
    }

    pub fn has_answered(&self, question_id: &Uuid) -> bool {
        self.answered.contains_key(question_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Outcome of one run through a topic.
#[derive(Debug, Clone)]
pub struct QuizResult {
    pub user_id: i64,
    pub subject: String,
    pub topic: String,
    pub score: u32,
    pub total_questions: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserStats {
    pub total_quizzes: u32,
    /// Mean percentage over completed runs.
    pub average_score: f64,
    pub answered: u32,
    pub correct: u32,
    pub total: u32,
}

pub trait ProgressStore: Send + Sync {
    /// Returns the user's progress, creating an empty record on first contact.
    fn get(&self, user_id: i64) -> impl Future<Output = Result<UserProgress, StoreError>> + Send;

    /// Adds `question_id` to the answered set. Returns `false` when it was already there,
    /// in which case the set is left untouched.
    fn record_answer(
        &self,
        user_id: i64,
        question_id: Uuid,
        was_correct: bool,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Forgets the given answered questions so that a topic can be taken again.
    fn reset(
        &self,
        user_id: i64,
        question_ids: &[Uuid],
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    fn touch_user(
        &self,
        profile: UserProfile,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn save_result(
        &self,
        result: QuizResult,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn stats(&self, user_id: i64) -> impl Future<Output = Result<UserStats, StoreError>> + Send;
}

#[derive(sqlx::FromRow)]
struct CountersRow {
    correct_count: u32,
    total_count: u32,
}

#[derive(sqlx::FromRow)]
struct AnswerRow {
    question_id: Uuid,
    was_correct: bool,
}

#[derive(sqlx::FromRow)]
struct ResultsRow {
    total_quizzes: i64,
    average_score: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ProgressDb {
    connection: Connection,
    policy: CounterPolicy,
}

impl ProgressDb {
    pub fn new(connection: Connection, policy: CounterPolicy) -> Self {
        Self { connection, policy }
    }
}

impl ProgressStore for ProgressDb {
    async fn get(&self, user_id: i64) -> Result<UserProgress, StoreError> {
        let mut tx = self.connection.pool().begin().await?;

        sqlx::query("INSERT OR IGNORE INTO users (user_id) VALUES (?)")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let counters: CountersRow =
            sqlx::query_as("SELECT correct_count, total_count FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        let answers: Vec<AnswerRow> =
            sqlx::query_as("SELECT question_id, was_correct FROM answers WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(UserProgress {
            user_id,
            answered: answers
                .into_iter()
                .map(|row| (row.question_id, row.was_correct))
                .collect(),
            correct: counters.correct_count,
            total: counters.total_count,
        })
    }

    async fn record_answer(
        &self,
        user_id: i64,
        question_id: Uuid,
        was_correct: bool,
    ) -> Result<bool, StoreError> {
        // Opening with a write takes SQLite's writer lock up front, which serializes
        // concurrent answers of the same user.
        let mut tx = self.connection.pool().begin().await?;

        sqlx::query("INSERT OR IGNORE INTO users (user_id) VALUES (?)")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO answers (user_id, question_id, was_correct) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(question_id)
        .bind(was_correct)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted || self.policy == CounterPolicy::EveryAttempt {
            sqlx::query(
                "UPDATE users SET total_count = total_count + 1, \
                 correct_count = correct_count + ? WHERE user_id = ?",
            )
            .bind(i64::from(was_correct))
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        log::debug!(
            "Recorded answer of {} to {} (correct: {}, first: {})",
            user_id,
            question_id,
            was_correct,
            inserted
        );
        Ok(inserted)
    }

    async fn reset(&self, user_id: i64, question_ids: &[Uuid]) -> Result<u64, StoreError> {
        let mut tx = self.connection.pool().begin().await?;

        let mut removed = 0;
        for question_id in question_ids {
            removed += sqlx::query("DELETE FROM answers WHERE user_id = ? AND question_id = ?")
                .bind(user_id)
                .bind(*question_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn touch_user(&self, profile: UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (user_id, username, first_name, last_name) VALUES (?, ?, ?, ?) \
             ON CONFLICT (user_id) DO UPDATE SET \
             username = excluded.username, first_name = excluded.first_name, \
             last_name = excluded.last_name",
        )
        .bind(profile.user_id)
        .bind(profile.username)
        .bind(profile.first_name)
        .bind(profile.last_name)
        .execute(self.connection.pool())
        .await?;

        Ok(())
    }

    async fn save_result(&self, result: QuizResult) -> Result<(), StoreError> {
        let mut tx = self.connection.pool().begin().await?;

        sqlx::query("INSERT OR IGNORE INTO users (user_id) VALUES (?)")
            .bind(result.user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO quiz_results (user_id, subject, topic, score, total_questions) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(result.user_id)
        .bind(&result.subject)
        .bind(&result.topic)
        .bind(result.score)
        .bind(result.total_questions)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        log::info!(
            "Saved result for {} in {}/{}: {}/{}",
            result.user_id,
            result.subject,
            result.topic,
            result.score,
            result.total_questions
        );
        Ok(())
    }

    async fn stats(&self, user_id: i64) -> Result<UserStats, StoreError> {
        let progress = self.get(user_id).await?;

        let results: ResultsRow = sqlx::query_as(
            "SELECT COUNT(*) AS total_quizzes, \
             AVG(score * 100.0 / total_questions) AS average_score \
             FROM quiz_results WHERE user_id = ? AND total_questions > 0",
        )
        .bind(user_id)
        .fetch_one(self.connection.pool())
        .await?;

        Ok(UserStats {
            total_quizzes: u32::try_from(results.total_quizzes).unwrap_or(u32::MAX),
            average_score: results.average_score.unwrap_or_default(),
            answered: u32::try_from(progress.answered.len()).unwrap_or(u32::MAX),
            correct: progress.correct,
            total: progress.total,
        })
    }
}
