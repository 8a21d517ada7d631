use std::{path::PathBuf, str::FromStr, time::Duration};

use dotenvy::dotenv;
use tracing::Level;

use crate::error::ConfigError;

/// How the lifetime counters react when an already answered question is answered again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CounterPolicy {
    /// Counters only move when the answered set grows.
    #[default]
    FirstAttempt,
    /// Every recorded answer is counted.
    EveryAttempt,
}

impl FromStr for CounterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(Self::FirstAttempt),
            "every" => Ok(Self::EveryAttempt),
            other => Err(format!("expected `first` or `every`, got `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(format!("expected `json` or `pretty`, got `{other}`")),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub token: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub data_dir: PathBuf,
    pub log_level: Level,
    pub log_format: LogFormat,
    pub max_questions_per_quiz: u32,
    pub question_delay: Duration,
    pub session_ttl: Option<Duration>,
    pub counter_policy: CounterPolicy,
}

// The token stays out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("database_max_connections", &self.database_max_connections)
            .field("data_dir", &self.data_dir)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("max_questions_per_quiz", &self.max_questions_per_quiz)
            .field("question_delay", &self.question_delay)
            .field("session_ttl", &self.session_ttl)
            .field("counter_policy", &self.counter_policy)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Reads the configuration from the process environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let token = var("TELOXIDE_TOKEN")
            .or_else(|| var("TELEGRAM_BOT_TOKEN"))
            .ok_or(ConfigError::Missing("TELOXIDE_TOKEN"))?;

        let session_ttl = match var("SESSION_TTL_SECS") {
            Some(value) => Some(Duration::from_secs(parse("SESSION_TTL_SECS", value)?)),
            None => None,
        };

        let max_questions_per_quiz = parse_or(
            "MAX_QUESTIONS_PER_QUIZ",
            var("MAX_QUESTIONS_PER_QUIZ"),
            100u32,
        )?;
        if max_questions_per_quiz == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_QUESTIONS_PER_QUIZ",
                value: max_questions_per_quiz.to_string(),
                reason: "a run needs at least one question".into(),
            });
        }

        Ok(Self {
            token,
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite://quiz_bot.db".into()),
            database_max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                var("DATABASE_MAX_CONNECTIONS"),
                5,
            )?,
            data_dir: var("DATA_DIR").unwrap_or_else(|| "data".into()).into(),
            log_level: parse_or("LOG_LEVEL", var("LOG_LEVEL"), Level::INFO)?,
            log_format: parse_or("LOG_FORMAT", var("LOG_FORMAT"), LogFormat::Json)?,
            max_questions_per_quiz,
            question_delay: Duration::from_millis(parse_or(
                "QUESTION_DELAY_MS",
                var("QUESTION_DELAY_MS"),
                1000,
            )?),
            session_ttl,
            counter_policy: parse_or(
                "COUNTER_POLICY",
                var("COUNTER_POLICY"),
                CounterPolicy::default(),
            )?,
        })
    }
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.map_or(Ok(default), |value| parse(key, value))
}
