use std::sync::Arc;

use teloxide::{
    dispatching::dialogue::GetChatId,
    payloads::{AnswerCallbackQuerySetters, EditMessageTextSetters, SendMessageSetters},
    prelude::Requester,
    types::{CallbackQuery, ChatId, InlineKeyboardMarkup},
    Bot,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    config::Config,
    database::progress::{ProgressStore, QuizResult},
    error::{SessionError, StoreError},
    keyboard::{
        choices_keyboard, display_name, finished_keyboard, subjects_keyboard, topics_keyboard,
    },
    session::{AnswerOutcome, PresentedQuestion},
    state::{QuizState, Run},
    HandlerResult, QuizService, UserDialogue,
};

const STALE_ANSWER: &str = "This question is no longer active.";

/// What follows a topic start or an answer.
#[derive(Debug)]
pub(crate) enum Step {
    Ask(PresentedQuestion),
    /// The run reached the per-run question cap. Progress is kept for the next run.
    Capped,
    /// No unanswered question is left in the topic.
    Complete,
}

/// Sends the next question of `run` unless the run is over, and registers its session.
pub(crate) async fn advance(
    quiz: &QuizService,
    user_id: i64,
    run: &Run,
    max_questions: u32,
) -> Result<Step, StoreError> {
    if run.asked >= max_questions {
        quiz.discard(user_id);
        return Ok(Step::Capped);
    }
    Ok(match quiz.ask(user_id, &run.subject, &run.topic).await? {
        Some(presented) => Step::Ask(presented),
        None => Step::Complete,
    })
}

pub(crate) fn state_after(step: &Step, run: Run) -> QuizState {
    match step {
        Step::Ask(_) => QuizState::QuestionSent(run),
        Step::Capped => QuizState::Idle,
        Step::Complete => QuizState::Finished {
            subject: run.subject,
            topic: run.topic,
        },
    }
}

/// Closing message of a run. `None` while the run goes on.
pub(crate) fn summary(step: &Step, run: &Run) -> Option<String> {
    let heading = match step {
        Step::Ask(_) => return None,
        Step::Complete if run.asked == 0 => {
            return Some(format!(
                "You have already answered every question in {}.\nStart over to take it again.",
                display_name(&run.topic)
            ));
        }
        Step::Complete => "Quiz completed!",
        Step::Capped => "That's all for this run! Your progress is saved.",
    };

    Some(format!(
        "🎉 {}\n\n{}\n\nFinal score: {}/{} ({:.1}%)\nSubject: {}\nTopic: {}",
        heading,
        performance(run.percentage()),
        run.score,
        run.asked,
        run.percentage(),
        display_name(&run.subject),
        display_name(&run.topic)
    ))
}

/// Short popup for the pressed button, and the full verdict appended to the question.
/// Telegram caps callback notices at 200 characters, so the correct choice only goes
/// into the message.
pub(crate) fn feedback(outcome: &AnswerOutcome) -> (&'static str, String) {
    if outcome.correct {
        ("✅ Correct!", "✅ Correct!".to_owned())
    } else {
        (
            "❌ Incorrect",
            format!("❌ Incorrect. The correct answer was: {}", outcome.correct_choice),
        )
    }
}

fn performance(percentage: f64) -> &'static str {
    if percentage >= 90.0 {
        "🌟 Outstanding! You're a master of this topic!"
    } else if percentage >= 75.0 {
        "🎉 Great job! You have a solid understanding!"
    } else if percentage >= 60.0 {
        "👍 Good work! Keep practicing!"
    } else {
        "📚 Keep studying! You'll get better!"
    }
}

fn user_id(q: &CallbackQuery) -> i64 {
    q.from.id.0 as i64
}

fn chat_id(q: &CallbackQuery) -> ChatId {
    q.chat_id().unwrap_or_else(|| q.from.id.into())
}

/// Replaces the message the button belongs to, or sends a new one when it is gone.
async fn replace_message(
    bot: &Bot,
    q: &CallbackQuery,
    text: String,
    keyboard: InlineKeyboardMarkup,
) -> HandlerResult {
    match &q.message {
        Some(message) => {
            bot.edit_message_text(chat_id(q), message.id(), text)
                .reply_markup(keyboard)
                .await?;
        }
        None => {
            bot.send_message(chat_id(q), text)
                .reply_markup(keyboard)
                .await?;
        }
    }
    Ok(())
}

pub(crate) async fn show_menu(bot: Bot, q: CallbackQuery, quiz: Arc<QuizService>) -> HandlerResult {
    bot.answer_callback_query(&q.id).await?;
    let subjects = quiz.questions().subjects();
    replace_message(
        &bot,
        &q,
        "Choose a subject:".to_owned(),
        subjects_keyboard(&subjects),
    )
    .await
}

pub(crate) async fn select_subject(
    bot: Bot,
    q: CallbackQuery,
    subject: usize,
    quiz: Arc<QuizService>,
) -> HandlerResult {
    let Some(name) = quiz.questions().subject_at(subject) else {
        bot.answer_callback_query(&q.id)
            .text("This subject is no longer available.")
            .await?;
        return Ok(());
    };

    bot.answer_callback_query(&q.id).await?;
    let topics = quiz.questions().topics(name);
    replace_message(
        &bot,
        &q,
        format!("{}\n\nChoose a topic:", display_name(name)),
        topics_keyboard(subject, &topics),
    )
    .await
}

#[instrument(level = "info", skip(bot, q, dialogue, quiz, config), fields(user = q.from.id.0))]
pub(crate) async fn start_topic(
    bot: Bot,
    q: CallbackQuery,
    dialogue: UserDialogue,
    (subject, topic): (usize, usize),
    quiz: Arc<QuizService>,
    config: Arc<Config>,
) -> HandlerResult {
    let Some((subject, topic)) = quiz.questions().topic_at(subject, topic) else {
        bot.answer_callback_query(&q.id)
            .text("This topic is no longer available.")
            .await?;
        return Ok(());
    };
    let run = Run::new(subject, topic);

    bot.answer_callback_query(&q.id).await?;
    let (answered, total) = quiz
        .topic_progress(user_id(&q), &run.subject, &run.topic)
        .await?;
    log::info!(
        "{} starts '{}/{}' with {}/{} answered",
        user_id(&q),
        run.subject,
        run.topic,
        answered,
        total
    );

    if let Some(message) = &q.message {
        bot.edit_message_text(
            chat_id(&q),
            message.id(),
            format!(
                "Starting quiz: {}\nSubject: {}\nProgress: {}/{} answered",
                display_name(&run.topic),
                display_name(&run.subject),
                answered,
                total
            ),
        )
        .await?;
    }

    ask_next(&bot, &q, &dialogue, run, &quiz, &config).await
}

pub(crate) async fn restart_topic(
    bot: Bot,
    q: CallbackQuery,
    dialogue: UserDialogue,
    (subject, topic): (usize, usize),
    quiz: Arc<QuizService>,
    config: Arc<Config>,
) -> HandlerResult {
    if let Some((subject_name, topic_name)) = quiz.questions().topic_at(subject, topic) {
        let removed = quiz
            .reset_topic(user_id(&q), subject_name, topic_name)
            .await?;
        log::info!(
            "{} restarts '{}/{}', {} answers forgotten",
            user_id(&q),
            subject_name,
            topic_name,
            removed
        );
    }
    start_topic(bot, q, dialogue, (subject, topic), quiz, config).await
}

#[instrument(level = "info", skip(bot, q, dialogue, quiz, config), fields(user = q.from.id.0))]
pub(crate) async fn take_answer(
    bot: Bot,
    q: CallbackQuery,
    dialogue: UserDialogue,
    (question_id, choice): (Uuid, usize),
    run: Run,
    quiz: Arc<QuizService>,
    config: Arc<Config>,
) -> HandlerResult {
    let outcome = match quiz.submit_answer(user_id(&q), question_id, choice).await {
        Ok(outcome) => outcome,
        Err(SessionError::Store(e)) => {
            log::error!("Failed to record answer of {}: {}", user_id(&q), e);
            bot.answer_callback_query(&q.id)
                .text("Could not save your answer. Please try again.")
                .show_alert(true)
                .await?;
            return Ok(());
        }
        Err(e) => {
            log::info!("{} sent an inactive answer: {}", user_id(&q), e);
            bot.answer_callback_query(&q.id).text(STALE_ANSWER).await?;
            return Ok(());
        }
    };

    log::info!(
        "{} answered {} in '{}/{}'. Correctness: {}",
        user_id(&q),
        question_id,
        run.subject,
        run.topic,
        outcome.correct
    );

    // The answer is saved at this point, so Telegram failures below must not end the run.
    let (notice, verdict) = feedback(&outcome);
    if let Err(e) = bot.answer_callback_query(&q.id).text(notice).await {
        log::warn!("Failed to answer callback of {}: {}", user_id(&q), e);
    }

    if let Some(message) = &q.message {
        let prompt = message
            .regular_message()
            .and_then(|message| message.text())
            .unwrap_or_default();
        if let Err(e) = bot
            .edit_message_text(chat_id(&q), message.id(), format!("{}\n\n{}", prompt, verdict))
            .await
        {
            log::warn!("Failed to show feedback to {}: {}", user_id(&q), e);
        }
    }

    tokio::time::sleep(config.question_delay).await;

    ask_next(&bot, &q, &dialogue, run.answered(outcome.correct), &quiz, &config).await
}

/// Answer buttons pressed while no question is pending for this chat.
pub(crate) async fn stale_answer(bot: Bot, q: CallbackQuery) -> HandlerResult {
    log::info!("{} pressed an answer outside of a quiz", user_id(&q));
    bot.answer_callback_query(&q.id).text(STALE_ANSWER).await?;
    Ok(())
}

pub(crate) async fn unknown_callback(bot: Bot, q: CallbackQuery) -> HandlerResult {
    log::warn!("Unknown callback data {:?} from {}", q.data, user_id(&q));
    bot.answer_callback_query(&q.id).await?;
    Ok(())
}

async fn ask_next(
    bot: &Bot,
    q: &CallbackQuery,
    dialogue: &UserDialogue,
    run: Run,
    quiz: &QuizService,
    config: &Config,
) -> HandlerResult {
    let step = match advance(quiz, user_id(q), &run, config.max_questions_per_quiz).await {
        Ok(step) => step,
        Err(e) => {
            dialogue.update(QuizState::Idle).await?;
            bot.send_message(
                chat_id(q),
                "Could not load your progress. Please try again with /start.",
            )
            .await?;
            return Err(e.into());
        }
    };

    match (&step, summary(&step, &run)) {
        (Step::Ask(presented), _) => {
            log::info!(
                "{}: asking question #{} of '{}/{}'",
                user_id(q),
                presented.number,
                run.subject,
                run.topic
            );
            bot.send_message(
                chat_id(q),
                format!(
                    "Question {}/{}\n\n{}",
                    presented.number, presented.total, presented.prompt
                ),
            )
            .reply_markup(choices_keyboard(presented.question_id, &presented.choices))
            .await?;
        }
        (_, text) => {
            if run.asked > 0 {
                quiz.progress()
                    .save_result(QuizResult {
                        user_id: user_id(q),
                        subject: run.subject.clone(),
                        topic: run.topic.clone(),
                        score: run.score,
                        total_questions: run.asked,
                    })
                    .await?;
            }
            log::info!(
                "{} finished a run of '{}/{}' with {}/{}",
                user_id(q),
                run.subject,
                run.topic,
                run.score,
                run.asked
            );

            let position = quiz.questions().position_of(&run.subject, &run.topic);
            bot.send_message(chat_id(q), text.unwrap_or_default())
                .reply_markup(finished_keyboard(position))
                .await?;
        }
    }

    dialogue.update(state_after(&step, run)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::CounterPolicy,
        database::{connection::Connection, progress::ProgressDb},
        loader::QuestionStore,
        session::SessionManager,
    };

    const USER: i64 = 77;

    const CELLS: &str = "subject,topic,prompt,choice_1,choice_2,correct\n\
                         Biology,Cells,Powerhouse?,Nucleus,Mitochondria,1\n\
                         Biology,Cells,Protein factory?,Ribosome,Vacuole,0\n\
                         Biology,Cells,Genetic material?,Golgi,Nucleus,1\n";

    async fn service() -> QuizService {
        let questions = QuestionStore::from_reader(CELLS.as_bytes()).unwrap();
        let connection = Connection::connect("sqlite::memory:", 1).await.unwrap();
        connection.run_migrations().await.unwrap();
        SessionManager::new(
            Arc::new(questions),
            Arc::new(ProgressDb::new(connection, CounterPolicy::FirstAttempt)),
        )
    }

    async fn answer(quiz: &QuizService, presented: &PresentedQuestion) -> AnswerOutcome {
        quiz.submit_answer(USER, presented.question_id, 0).await.unwrap()
    }

    #[tokio::test]
    async fn run_ends_finished_when_topic_is_exhausted() {
        let quiz = service().await;
        let mut run = Run::new("Biology", "Cells");

        loop {
            let step = advance(&quiz, USER, &run, 100).await.unwrap();
            let Step::Ask(presented) = &step else {
                assert!(matches!(step, Step::Complete));
                assert_eq!(
                    state_after(&step, run.clone()),
                    QuizState::Finished {
                        subject: "Biology".into(),
                        topic: "Cells".into(),
                    }
                );
                assert!(summary(&step, &run).unwrap().contains("Quiz completed!"));
                break;
            };
            assert_eq!(
                state_after(&step, run.clone()),
                QuizState::QuestionSent(run.clone())
            );
            assert!(summary(&step, &run).is_none());
            let outcome = answer(&quiz, presented).await;
            run = run.answered(outcome.correct);
        }
        assert_eq!(run.asked, 3);
    }

    #[tokio::test]
    async fn capped_run_goes_idle_and_keeps_progress() {
        let quiz = service().await;
        let run = Run::new("Biology", "Cells");

        let Step::Ask(presented) = advance(&quiz, USER, &run, 1).await.unwrap() else {
            panic!("expected a question");
        };
        let run = run.answered(answer(&quiz, &presented).await.correct);

        let step = advance(&quiz, USER, &run, 1).await.unwrap();
        assert!(matches!(step, Step::Capped));
        assert_eq!(state_after(&step, run.clone()), QuizState::Idle);
        assert!(summary(&step, &run).unwrap().contains("That's all for this run!"));
        assert_eq!(quiz.pending_question(USER), None);

        assert_eq!(
            quiz.topic_progress(USER, "Biology", "Cells").await.unwrap(),
            (1, 3)
        );
        let Step::Ask(next) = advance(&quiz, USER, &Run::new("Biology", "Cells"), 1)
            .await
            .unwrap()
        else {
            panic!("expected the next run to continue");
        };
        assert_eq!(next.number, 2);
    }

    #[tokio::test]
    async fn starting_a_completed_topic_says_so() {
        let quiz = service().await;
        let mut run = Run::new("Biology", "Cells");
        while let Step::Ask(presented) = advance(&quiz, USER, &run, 100).await.unwrap() {
            run = run.answered(answer(&quiz, &presented).await.correct);
        }

        let fresh = Run::new("Biology", "Cells");
        let step = advance(&quiz, USER, &fresh, 100).await.unwrap();
        assert!(matches!(step, Step::Complete));
        assert!(summary(&step, &fresh)
            .unwrap()
            .starts_with("You have already answered every question in Cells."));
    }

    #[test]
    fn wrong_answer_notice_stays_short() {
        let outcome = AnswerOutcome {
            question_id: Uuid::new_v4(),
            correct: false,
            correct_choice: "Derivatives of the endoderm lining ".repeat(10),
            first_attempt: true,
        };
        let (notice, verdict) = feedback(&outcome);
        assert!(notice.chars().count() <= 200);
        assert!(verdict.ends_with(&outcome.correct_choice));
    }

    #[test]
    fn performance_tiers() {
        assert!(performance(100.0).contains("Outstanding"));
        assert!(performance(90.0).contains("Outstanding"));
        assert!(performance(89.9).contains("Great job"));
        assert!(performance(60.0).contains("Good work"));
        assert!(performance(0.0).contains("Keep studying"));
    }
}
