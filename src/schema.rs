use std::error::Error;

use teloxide::{
    dispatching::{
        dialogue::{self, InMemStorage},
        DpHandlerDescription, UpdateFilterExt, UpdateHandler,
    },
    dptree::{self, Handler},
    prelude::{DependencyMap, Requester},
    types::{CallbackQuery, Message, Update},
    Bot,
};
use tracing::instrument;

use crate::{
    callback::CallbackData,
    commands::{cancel, help, start, stats, Command},
    runner,
    state::QuizState,
    HandlerResult,
};

pub fn schema() -> UpdateHandler<Box<dyn Error + Send + Sync + 'static>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Help].endpoint(help))
        .branch(case![Command::Start].endpoint(start))
        .branch(case![Command::Stats].endpoint(stats))
        .branch(case![Command::Cancel].endpoint(cancel));

    // Progress is keyed by the chat, so only private chats are served.
    let message_handler = Update::filter_message()
        .filter(|msg: Message| msg.chat.is_private())
        .branch(command_handler)
        .endpoint(invalid_input);

    dialogue::enter::<Update, InMemStorage<QuizState>, QuizState, _>()
        .branch(message_handler)
        .branch(callback_query_scheme())
}

#[instrument(level = "debug")]
fn callback_query_scheme() -> Handler<
    'static,
    DependencyMap,
    Result<(), Box<dyn Error + Send + Sync + 'static>>,
    DpHandlerDescription,
> {
    use dptree::case;

    let answer_handler = case![CallbackData::Answer {
        question_id,
        choice
    }]
    .branch(
        dptree::filter_map(|state: QuizState| state.pending_run()).endpoint(runner::take_answer),
    )
    .endpoint(runner::stale_answer);

    let navigation_handler = dptree::filter_map(|q: CallbackQuery| {
        q.data.as_deref().and_then(CallbackData::parse)
    })
    .branch(case![CallbackData::Menu].endpoint(runner::show_menu))
    .branch(case![CallbackData::Subject(subject)].endpoint(runner::select_subject))
    .branch(case![CallbackData::Topic { subject, topic }].endpoint(runner::start_topic))
    .branch(case![CallbackData::Restart { subject, topic }].endpoint(runner::restart_topic))
    .branch(answer_handler);

    Update::filter_callback_query()
        .branch(navigation_handler)
        .endpoint(runner::unknown_callback)
}

#[instrument(level = "info", skip(bot))]
async fn invalid_input(bot: Bot, msg: Message) -> HandlerResult {
    log::info!("{}: invalid input '{:?}'", msg.chat.id, msg.text());
    bot.send_message(
        msg.chat.id,
        "Unable to handle the message. Enter /help to see usages.",
    )
    .await?;
    Ok(())
}
