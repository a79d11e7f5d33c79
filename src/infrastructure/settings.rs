//! Environment-driven settings

use crate::core::services::MAX_PAUSE_HOURS;
use anyhow::{Context, anyhow};
use chrono::{Duration, FixedOffset};
use di::inject;
use di::injectable;
use std::env;
use std::str::FromStr;

const DEFAULT_DATABASE_URL: &str = "sqlite:scheduling.db?mode=rwc";
const DEFAULT_STORE_ADDRESS: &str = "Av. Almirante Barroso, 389, Centro – João Pessoa – PB";
const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CALENDAR_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub bind_address: String,
    pub business_offset: FixedOffset,
    pub appointment_duration: Duration,
    pub history_window: usize,
    pub human_pause_hours: i64,
    pub store_address: String,
    pub llm: LlmSettings,
    pub calendar: CalendarSettings,
    pub telegram: TelegramSettings,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: std::time::Duration,
}

#[derive(Debug, Clone)]
pub struct CalendarSettings {
    pub base_url: String,
    pub access_token: Option<String>,
    pub calendar_id: String,
    pub timeout: std::time::Duration,
}

#[derive(Debug, Clone, Default)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    pub operator_chat_ids: Vec<i64>,
}

#[injectable]
impl Settings {
    #[inject]
    pub fn create() -> Settings {
        Settings::from_env().expect("invalid configuration")
    }
}

impl Settings {
    /// Reads `.env` and the process environment.
    ///
    /// Every variable has a default; only malformed values are errors.
    pub fn from_env() -> anyhow::Result<Settings> {
        dotenvy::dotenv().ok();

        let offset_hours: i32 = parse_var("BUSINESS_UTC_OFFSET_HOURS", -3)?;
        let business_offset = FixedOffset::east_opt(offset_hours * 3600)
            .ok_or_else(|| anyhow!("BUSINESS_UTC_OFFSET_HOURS out of range: {offset_hours}"))?;

        let duration_minutes: i64 = parse_var("APPOINTMENT_DURATION_MINUTES", 60)?;
        if duration_minutes <= 0 {
            return Err(anyhow!("APPOINTMENT_DURATION_MINUTES must be positive"));
        }

        let operator_chat_ids = match optional_var("TELEGRAM_OPERATOR_CHAT_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<i64>()
                        .with_context(|| format!("invalid operator chat id `{s}`"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Settings {
            database_url: env::var("DATABASE_URL").unwrap_or(DEFAULT_DATABASE_URL.to_owned()),
            bind_address: env::var("BIND_ADDRESS").unwrap_or("0.0.0.0:3000".to_owned()),
            business_offset,
            appointment_duration: Duration::minutes(duration_minutes),
            history_window: parse_var("HISTORY_WINDOW", 20)?,
            human_pause_hours: human_pause_hours(parse_var("HUMAN_PAUSE_HOURS", 2)?)?,
            store_address: env::var("STORE_ADDRESS").unwrap_or(DEFAULT_STORE_ADDRESS.to_owned()),
            llm: LlmSettings {
                base_url: env::var("LLM_BASE_URL").unwrap_or(DEFAULT_LLM_BASE_URL.to_owned()),
                api_key: optional_var("LLM_API_KEY"),
                model: env::var("LLM_MODEL").unwrap_or("gpt-4o-mini".to_owned()),
                timeout: std::time::Duration::from_secs(parse_var("LLM_TIMEOUT_SECS", 20)?),
            },
            calendar: CalendarSettings {
                base_url: env::var("CALENDAR_BASE_URL")
                    .unwrap_or(DEFAULT_CALENDAR_BASE_URL.to_owned()),
                access_token: optional_var("CALENDAR_ACCESS_TOKEN"),
                calendar_id: env::var("CALENDAR_ID").unwrap_or("primary".to_owned()),
                timeout: std::time::Duration::from_secs(parse_var("CALENDAR_TIMEOUT_SECS", 10)?),
            },
            telegram: TelegramSettings {
                bot_token: optional_var("TELEGRAM_BOT_TOKEN"),
                operator_chat_ids,
            },
        })
    }

    /// Settings with every default applied and no external service configured.
    pub fn defaults() -> Settings {
        Settings {
            database_url: DEFAULT_DATABASE_URL.to_owned(),
            bind_address: "127.0.0.1:0".to_owned(),
            business_offset: FixedOffset::west_opt(3 * 3600).expect("valid offset"),
            appointment_duration: Duration::hours(1),
            history_window: 20,
            human_pause_hours: 2,
            store_address: DEFAULT_STORE_ADDRESS.to_owned(),
            llm: LlmSettings {
                base_url: DEFAULT_LLM_BASE_URL.to_owned(),
                api_key: None,
                model: "gpt-4o-mini".to_owned(),
                timeout: std::time::Duration::from_secs(20),
            },
            calendar: CalendarSettings {
                base_url: DEFAULT_CALENDAR_BASE_URL.to_owned(),
                access_token: None,
                calendar_id: "primary".to_owned(),
                timeout: std::time::Duration::from_secs(10),
            },
            telegram: TelegramSettings::default(),
        }
    }
}

fn human_pause_hours(hours: i64) -> anyhow::Result<i64> {
    if hours <= 0 || hours as f64 > MAX_PAUSE_HOURS {
        return Err(anyhow!(
            "HUMAN_PAUSE_HOURS must be between 1 and {MAX_PAUSE_HOURS}, got {hours}"
        ));
    }
    Ok(hours)
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {name}: `{raw}`")),
        None => Ok(default),
    }
}
