//! Question selection and answer correlation.
//!
//! A session is created for a user whenever a question is sent and consumed by the first
//! matching answer. It remembers how the choices were shuffled so that the position the
//! user picked can be mapped back onto the question's original choices.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use rand::{seq::SliceRandom, Rng};
use uuid::Uuid;

use crate::{
    database::{
        progress::{ProgressStore, UserProgress},
        quiz::Question,
    },
    error::{SessionError, StoreError},
    loader::QuestionStore,
};

/// Choices in the order they are shown, with the way back to the original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffledChoices {
    choices: Vec<String>,
    /// `order[position]` is the original index of the choice shown at `position`.
    order: Vec<usize>,
    correct_index: usize,
}

impl ShuffledChoices {
    pub fn choices(&self) -> &[String] {
        &self.choices
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    pub fn original_index(&self, position: usize) -> Option<usize> {
        self.order.get(position).copied()
    }

    pub fn is_correct(&self, position: usize) -> Option<bool> {
        self.original_index(position)
            .map(|original| original == self.correct_index)
    }

    pub fn correct_position(&self) -> Option<usize> {
        self.order.iter().position(|&i| i == self.correct_index)
    }
}

/// Shuffles the choices of `question` with a uniformly random permutation.
pub fn present_choices<R: Rng + ?Sized>(question: &Question, rng: &mut R) -> ShuffledChoices {
    let mut order: Vec<usize> = (0..question.choices().len()).collect();
    order.shuffle(rng);

    ShuffledChoices {
        choices: order
            .iter()
            .map(|&i| question.choices()[i].clone())
            .collect(),
        order,
        correct_index: question.correct_index(),
    }
}

#[derive(Debug)]
struct Session {
    question_id: Uuid,
    choices: ShuffledChoices,
    issued_at: Instant,
}

/// A question ready to be sent, with its choices already shuffled.
#[derive(Debug, Clone)]
pub struct PresentedQuestion {
    pub question_id: Uuid,
    pub prompt: String,
    pub choices: Vec<String>,
    /// 1-based position of this question within the current pass through the topic.
    pub number: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub question_id: Uuid,
    pub correct: bool,
    pub correct_choice: String,
    /// `false` when the question was already in the answered set.
    pub first_attempt: bool,
}

pub struct SessionManager<P> {
    questions: Arc<QuestionStore>,
    progress: Arc<P>,
    sessions: Mutex<HashMap<i64, Session>>,
    session_ttl: Option<Duration>,
}

impl<P: ProgressStore> SessionManager<P> {
    pub fn new(questions: Arc<QuestionStore>, progress: Arc<P>) -> Self {
        Self {
            questions,
            progress,
            sessions: Mutex::new(HashMap::new()),
            session_ttl: None,
        }
    }

    /// Pending questions older than `ttl` can no longer be answered.
    pub fn with_session_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn questions(&self) -> &QuestionStore {
        &self.questions
    }

    pub fn progress(&self) -> &P {
        &self.progress
    }

    /// The first question of the topic, in file order, that the user has not answered yet.
    /// `None` means the topic is complete.
    pub async fn next_question(
        &self,
        user_id: i64,
        subject: &str,
        topic: &str,
    ) -> Result<Option<Question>, StoreError> {
        let progress = self.progress.get(user_id).await?;
        Ok(self
            .unanswered(&progress, subject, topic)
            .into_iter()
            .next()
            .cloned())
    }

    /// Picks the next question, shuffles it and registers it as the user's pending session,
    /// replacing any session the user still had.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn ask(
        &self,
        user_id: i64,
        subject: &str,
        topic: &str,
    ) -> Result<Option<PresentedQuestion>, StoreError> {
        let progress = self.progress.get(user_id).await?;
        let total = self.questions.questions_for(subject, topic).len();
        let unanswered = self.unanswered(&progress, subject, topic);

        let Some(question) = unanswered.first() else {
            self.discard(user_id);
            return Ok(None);
        };

        let choices = present_choices(question, &mut rand::thread_rng());
        let presented = PresentedQuestion {
            question_id: question.id(),
            prompt: question.prompt().to_owned(),
            choices: choices.choices().to_vec(),
            number: total - unanswered.len() + 1,
            total,
        };

        self.lock().insert(
            user_id,
            Session {
                question_id: question.id(),
                choices,
                issued_at: Instant::now(),
            },
        );

        Ok(Some(presented))
    }

    /// Resolves an answer against the user's pending session. The session is consumed even
    /// when the answer is wrong, so a second submission for the same question is stale.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn submit_answer(
        &self,
        user_id: i64,
        question_id: Uuid,
        chosen_index: usize,
    ) -> Result<AnswerOutcome, SessionError> {
        let session = self.take_session(user_id, question_id, chosen_index)?;

        let correct = session.choices.is_correct(chosen_index).unwrap_or(false);
        let correct_choice = session
            .choices
            .correct_position()
            .and_then(|position| session.choices.choices().get(position))
            .cloned()
            .unwrap_or_default();

        match self.progress.record_answer(user_id, question_id, correct).await {
            Ok(first_attempt) => Ok(AnswerOutcome {
                question_id,
                correct,
                correct_choice,
                first_attempt,
            }),
            Err(e) => {
                // Let the user retry the same question.
                self.lock().entry(user_id).or_insert(session);
                Err(e.into())
            }
        }
    }

    /// Drops the user's pending session. Returns whether there was one.
    pub fn discard(&self, user_id: i64) -> bool {
        self.lock().remove(&user_id).is_some()
    }

    pub fn pending_question(&self, user_id: i64) -> Option<Uuid> {
        self.lock().get(&user_id).map(|session| session.question_id)
    }

    /// Starts a new pass through the topic by forgetting which of its questions were answered.
    pub async fn reset_topic(
        &self,
        user_id: i64,
        subject: &str,
        topic: &str,
    ) -> Result<u64, StoreError> {
        self.discard(user_id);
        let ids: Vec<Uuid> = self
            .questions
            .questions_for(subject, topic)
            .iter()
            .map(|question| question.id())
            .collect();
        self.progress.reset(user_id, &ids).await
    }

    /// Answered and total question counts of a topic.
    pub async fn topic_progress(
        &self,
        user_id: i64,
        subject: &str,
        topic: &str,
    ) -> Result<(usize, usize), StoreError> {
        let progress = self.progress.get(user_id).await?;
        let questions = self.questions.questions_for(subject, topic);
        let answered = questions
            .iter()
            .filter(|question| progress.has_answered(&question.id()))
            .count();
        Ok((answered, questions.len()))
    }

    fn unanswered(&self, progress: &UserProgress, subject: &str, topic: &str) -> Vec<&Question> {
        self.questions
            .questions_for(subject, topic)
            .into_iter()
            .filter(|question| !progress.has_answered(&question.id()))
            .collect()
    }

    fn take_session(
        &self,
        user_id: i64,
        question_id: Uuid,
        chosen_index: usize,
    ) -> Result<Session, SessionError> {
        let mut sessions = self.lock();
        let stale = SessionError::Stale { question_id };

        let Some(session) = sessions.get(&user_id) else {
            return Err(stale);
        };
        if session.question_id != question_id {
            return Err(stale);
        }
        if self
            .session_ttl
            .is_some_and(|ttl| session.issued_at.elapsed() >= ttl)
        {
            sessions.remove(&user_id);
            return Err(stale);
        }
        if chosen_index >= session.choices.len() {
            return Err(SessionError::InvalidChoice {
                chosen: chosen_index,
                choices: session.choices.len(),
            });
        }

        sessions.remove(&user_id).ok_or(stale)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{
        config::CounterPolicy,
        database::{
            connection::Connection,
            progress::{ProgressDb, QuizResult, UserProfile, UserStats},
        },
    };

    const ALGEBRA: &str = "subject,topic,prompt,choice_1,choice_2,choice_3,correct_choice_index\n\
                           Math,Algebra,2+2?,3,4,5,1\n";

    fn topic_csv(questions: usize) -> String {
        let mut csv =
            String::from("subject,topic,prompt,choice_1,choice_2,choice_3,choice_4,correct\n");
        for i in 0..questions {
            let choices = [2 * i, i, 2 * i + 1, 3 * i + 7];
            csv.push_str(&format!(
                "Math,Algebra,{i}+{i}?,{},{},{},{},{}\n",
                choices[0],
                choices[1],
                choices[2],
                choices[3],
                i % 4
            ));
        }
        csv
    }

    async fn manager(csv: &str) -> SessionManager<ProgressDb> {
        let questions = QuestionStore::from_reader(csv.as_bytes()).unwrap();
        let connection = Connection::connect("sqlite::memory:", 1).await.unwrap();
        connection.run_migrations().await.unwrap();
        SessionManager::new(
            Arc::new(questions),
            Arc::new(ProgressDb::new(connection, CounterPolicy::FirstAttempt)),
        )
    }

    fn position_of(presented: &PresentedQuestion, choice: &str) -> usize {
        presented.choices.iter().position(|c| c == choice).unwrap()
    }

    #[tokio::test]
    async fn picking_the_shuffled_four_is_correct() {
        let manager = manager(ALGEBRA).await;

        let next = manager.next_question(1, "Math", "Algebra").await.unwrap().unwrap();
        assert_eq!(next.prompt(), "2+2?");

        let presented = manager.ask(1, "Math", "Algebra").await.unwrap().unwrap();
        assert_eq!(presented.question_id, next.id());
        assert_eq!((presented.number, presented.total), (1, 1));

        let outcome = manager
            .submit_answer(1, presented.question_id, position_of(&presented, "4"))
            .await
            .unwrap();
        assert!(outcome.correct);
        assert!(outcome.first_attempt);
        assert_eq!(outcome.correct_choice, "4");

        assert!(manager.next_question(1, "Math", "Algebra").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_choice_is_recorded_as_incorrect() {
        let manager = manager(ALGEBRA).await;
        let presented = manager.ask(1, "Math", "Algebra").await.unwrap().unwrap();

        let outcome = manager
            .submit_answer(1, presented.question_id, position_of(&presented, "5"))
            .await
            .unwrap();
        assert!(!outcome.correct);
        assert_eq!(outcome.correct_choice, "4");

        let progress = manager.progress().get(1).await.unwrap();
        assert_eq!(progress.answered.get(&presented.question_id), Some(&false));
        assert_eq!((progress.correct, progress.total), (0, 1));
    }

    #[tokio::test]
    async fn duplicate_submission_is_stale() {
        let manager = manager(ALGEBRA).await;
        let presented = manager.ask(1, "Math", "Algebra").await.unwrap().unwrap();

        manager.submit_answer(1, presented.question_id, 0).await.unwrap();
        let err = manager
            .submit_answer(1, presented.question_id, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Stale { .. }));
    }

    #[tokio::test]
    async fn answering_every_question_finishes_the_topic() {
        let manager = manager(&topic_csv(6)).await;
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = HashSet::new();

        while let Some(presented) = manager.ask(3, "Math", "Algebra").await.unwrap() {
            assert!(seen.insert(presented.question_id), "question sent twice");
            assert_eq!(presented.number, seen.len());

            let answered = manager.progress().get(3).await.unwrap();
            assert!(!answered.has_answered(&presented.question_id));

            let choice = rng.gen_range(0..presented.choices.len());
            manager
                .submit_answer(3, presented.question_id, choice)
                .await
                .unwrap();
        }

        assert_eq!(seen.len(), 6);
        assert!(manager.next_question(3, "Math", "Algebra").await.unwrap().is_none());
        assert_eq!(manager.pending_question(3), None);
        assert_eq!(manager.topic_progress(3, "Math", "Algebra").await.unwrap(), (6, 6));
    }

    #[test]
    fn shuffle_maps_back_to_original_correctness() {
        let question = Question::new(
            "Math".into(),
            "Algebra".into(),
            "Pick B".into(),
            vec!["A".into(), "B".into(), "C".into(), "D".into(), "E".into()],
            1,
        );

        for seed in 0..200 {
            let shuffled = present_choices(&question, &mut StdRng::seed_from_u64(seed));
            assert_eq!(shuffled.len(), 5);

            let mut originals: Vec<usize> =
                (0..5).filter_map(|p| shuffled.original_index(p)).collect();
            for position in 0..shuffled.len() {
                let original = shuffled.original_index(position).unwrap();
                assert_eq!(shuffled.choices()[position], question.choices()[original]);
                assert_eq!(
                    shuffled.is_correct(position),
                    Some(question.choices()[original] == question.correct_choice())
                );
            }
            originals.sort_unstable();
            assert_eq!(originals, [0, 1, 2, 3, 4]);
            assert_eq!(shuffled.original_index(5), None);
            assert_eq!(shuffled.is_correct(5), None);
        }
    }

    #[test]
    fn shuffle_moves_the_correct_choice_around() {
        let question = Question::new(
            "S".into(),
            "T".into(),
            "Q".into(),
            vec!["x".into(), "y".into(), "z".into()],
            0,
        );
        let mut rng = StdRng::seed_from_u64(42);
        let mut hits = [0usize; 3];
        for _ in 0..600 {
            let position = present_choices(&question, &mut rng).correct_position().unwrap();
            hits[position] += 1;
        }
        assert!(hits.iter().all(|&n| n > 120), "{hits:?}");
    }

    #[tokio::test]
    async fn answer_for_another_question_keeps_the_session() {
        let manager = manager(ALGEBRA).await;
        let presented = manager.ask(1, "Math", "Algebra").await.unwrap().unwrap();

        let err = manager.submit_answer(1, Uuid::new_v4(), 0).await.unwrap_err();
        assert!(matches!(err, SessionError::Stale { .. }));
        assert_eq!(manager.pending_question(1), Some(presented.question_id));

        assert!(manager.submit_answer(1, presented.question_id, 0).await.is_ok());
    }

    #[tokio::test]
    async fn out_of_range_choice_keeps_the_session() {
        let manager = manager(ALGEBRA).await;
        let presented = manager.ask(1, "Math", "Algebra").await.unwrap().unwrap();

        let err = manager
            .submit_answer(1, presented.question_id, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidChoice { chosen: 3, choices: 3 }));
        assert!(manager.submit_answer(1, presented.question_id, 2).await.is_ok());
    }

    #[tokio::test]
    async fn answer_without_session_is_stale() {
        let manager = manager(ALGEBRA).await;
        let question_id = manager.questions().questions_for("Math", "Algebra")[0].id();

        let err = manager.submit_answer(1, question_id, 0).await.unwrap_err();
        assert!(matches!(err, SessionError::Stale { .. }));
        assert!(manager.progress().get(1).await.unwrap().answered.is_empty());
    }

    #[tokio::test]
    async fn expired_session_is_stale() {
        let manager = manager(ALGEBRA)
            .await
            .with_session_ttl(Some(Duration::ZERO));
        let presented = manager.ask(1, "Math", "Algebra").await.unwrap().unwrap();

        let err = manager
            .submit_answer(1, presented.question_id, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Stale { .. }));
        assert_eq!(manager.pending_question(1), None);
    }

    #[tokio::test]
    async fn discarded_session_cannot_be_answered() {
        let manager = manager(ALGEBRA).await;
        let presented = manager.ask(1, "Math", "Algebra").await.unwrap().unwrap();

        assert!(manager.discard(1));
        assert!(!manager.discard(1));
        assert!(manager
            .submit_answer(1, presented.question_id, 0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn sessions_are_per_user() {
        let manager = manager(ALGEBRA).await;
        let first = manager.ask(1, "Math", "Algebra").await.unwrap().unwrap();
        let second = manager.ask(2, "Math", "Algebra").await.unwrap().unwrap();

        manager
            .submit_answer(2, second.question_id, position_of(&second, "4"))
            .await
            .unwrap();
        assert_eq!(manager.pending_question(1), Some(first.question_id));
    }

    #[tokio::test]
    async fn reset_starts_a_new_pass() {
        let manager = manager(ALGEBRA).await;
        let presented = manager.ask(1, "Math", "Algebra").await.unwrap().unwrap();
        manager.submit_answer(1, presented.question_id, 0).await.unwrap();
        assert!(manager.ask(1, "Math", "Algebra").await.unwrap().is_none());

        assert_eq!(manager.reset_topic(1, "Math", "Algebra").await.unwrap(), 1);
        let again = manager.ask(1, "Math", "Algebra").await.unwrap().unwrap();
        assert_eq!(again.question_id, presented.question_id);
    }

    #[tokio::test]
    async fn unknown_topic_has_nothing_to_ask() {
        let manager = manager(ALGEBRA).await;
        assert!(manager.ask(1, "Math", "Calculus").await.unwrap().is_none());
        assert_eq!(manager.topic_progress(1, "Math", "Calculus").await.unwrap(), (0, 0));
    }

    /// Accepts reads, refuses every answer.
    struct BrokenStore;

    impl ProgressStore for BrokenStore {
        async fn get(&self, user_id: i64) -> Result<UserProgress, StoreError> {
            Ok(UserProgress::new(user_id))
        }

        async fn record_answer(&self, _: i64, _: Uuid, _: bool) -> Result<bool, StoreError> {
            Err(StoreError::Sqlx(sqlx::Error::PoolTimedOut))
        }

        async fn reset(&self, _: i64, _: &[Uuid]) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn touch_user(&self, _: UserProfile) -> Result<(), StoreError> {
            Ok(())
        }

        async fn save_result(&self, _: QuizResult) -> Result<(), StoreError> {
            Ok(())
        }

        async fn stats(&self, _: i64) -> Result<UserStats, StoreError> {
            Ok(UserStats::default())
        }
    }

    #[tokio::test]
    async fn failed_write_leaves_the_question_answerable() {
        let questions = QuestionStore::from_reader(ALGEBRA.as_bytes()).unwrap();
        let manager = SessionManager::new(Arc::new(questions), Arc::new(BrokenStore));
        let presented = manager.ask(1, "Math", "Algebra").await.unwrap().unwrap();

        let err = manager
            .submit_answer(1, presented.question_id, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Store(_)));
        assert_eq!(manager.pending_question(1), Some(presented.question_id));
    }
}
