use std::sync::Arc;

use teloxide::{
    payloads::SendMessageSetters, prelude::Requester, types::Message, utils::command::BotCommands,
    Bot,
};
use tracing::instrument;

use crate::{
    database::progress::{ProgressStore, UserProfile},
    keyboard::subjects_keyboard,
    state::QuizState,
    HandlerResult, QuizService, UserDialogue,
};

#[derive(Debug, Clone, BotCommands)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "display this text.")]
    Help,
    #[command(description = "choose a subject and start a quiz.")]
    Start,
    #[command(description = "show your quiz statistics.")]
    Stats,
    #[command(description = "cancel the current quiz.")]
    Cancel,
}

pub(crate) async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

#[instrument(level = "info", skip_all, fields(user = msg.chat.id.0))]
pub(crate) async fn start(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    quiz: Arc<QuizService>,
) -> HandlerResult {
    let user_id = msg.chat.id.0;
    quiz.progress()
        .touch_user(UserProfile {
            user_id,
            username: msg.chat.username().map(str::to_owned),
            first_name: msg.chat.first_name().map(str::to_owned),
            last_name: msg.chat.last_name().map(str::to_owned),
        })
        .await?;
    quiz.discard(user_id);
    dialogue.update(QuizState::Idle).await?;

    let subjects = quiz.questions().subjects();
    if subjects.is_empty() {
        bot.send_message(msg.chat.id, "No quiz topics are available right now.")
            .await?;
        return Ok(());
    }

    log::info!("{} opened the subject menu", user_id);
    bot.send_message(
        msg.chat.id,
        format!(
            "Welcome, {}! Choose a subject:",
            msg.chat.first_name().unwrap_or("there")
        ),
    )
    .reply_markup(subjects_keyboard(&subjects))
    .await?;
    Ok(())
}

#[instrument(level = "info", skip_all, fields(user = msg.chat.id.0))]
pub(crate) async fn stats(bot: Bot, msg: Message, quiz: Arc<QuizService>) -> HandlerResult {
    let stats = quiz.progress().stats(msg.chat.id.0).await?;

    let text = if stats.total_quizzes == 0 && stats.answered == 0 {
        "You haven't completed any quizzes yet. Send /start to begin!".to_owned()
    } else {
        format!(
            "Your statistics:\n\n\
             Quizzes completed: {}\n\
             Average score: {:.1}%\n\
             Questions answered: {}\n\
             Correct answers: {}/{}",
            stats.total_quizzes, stats.average_score, stats.answered, stats.correct, stats.total
        )
    };

    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub(crate) async fn cancel(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    quiz: Arc<QuizService>,
) -> HandlerResult {
    let had_session = quiz.discard(msg.chat.id.0);
    let was_running = matches!(
        dialogue.get().await?,
        Some(QuizState::QuestionSent(_))
    );
    dialogue.update(QuizState::Idle).await?;

    let text = if had_session || was_running {
        "Quiz cancelled. Your answers so far are saved. Send /start to pick a topic."
    } else {
        "There is no active quiz to cancel."
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}
