use database::progress::ProgressDb;
use session::SessionManager;
use state::QuizState;
use teloxide::{dispatching::dialogue::InMemStorage, prelude::Dialogue};

pub mod callback;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod keyboard;
pub mod loader;
pub mod runner;
pub mod schema;
pub mod session;
pub mod state;

pub type QuizService = SessionManager<ProgressDb>;

type UserDialogue = Dialogue<QuizState, InMemStorage<QuizState>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;
