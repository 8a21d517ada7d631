use std::error::Error;
use std::sync::Arc;

use quizbot::commands::Command;
use quizbot::config::{Config, LogFormat};
use quizbot::database::connection::Connection;
use quizbot::database::progress::ProgressDb;
use quizbot::loader::QuestionStore;
use quizbot::schema::schema;
use quizbot::session::SessionManager;
use quizbot::state::QuizState;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) -> Result<(), Box<dyn Error + Send + Sync>> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .log_internal_errors(true)
        .with_line_number(true)
        .with_target(false);

    match config.log_format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }
    tracing_log::LogTracer::init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = Config::from_env()?;
    init_tracing(&config)?;
    log::info!("Starting with {:?}", config);

    let questions = QuestionStore::load(&config.data_dir).inspect_err(|e| {
        log::error!("Failed to load questions: {}", e);
    })?;
    log::info!(
        "{} questions in {} subjects",
        questions.len(),
        questions.subjects().len()
    );

    let connection =
        Connection::connect(&config.database_url, config.database_max_connections).await?;
    connection.run_migrations().await?;

    let progress = ProgressDb::new(connection, config.counter_policy);
    let quiz = Arc::new(
        SessionManager::new(Arc::new(questions), Arc::new(progress))
            .with_session_ttl(config.session_ttl),
    );

    let bot = Bot::new(config.token.clone());
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        log::warn!("Failed to register bot commands: {}", e);
    }
    log::info!("Starting bot...");

    let config = Arc::new(config);
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![InMemStorage::<QuizState>::new(), quiz, config])
        .default_handler(|update| async move {
            log::debug!("Unhandled update: {:?}", update.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("Bot stopped");
    Ok(())
}
