use std::path::PathBuf;

use chrono::{Datelike, Days, Local, NaiveDate};
use tracing::info;

use crate::{error::ConfigError, helpers::template::TableNameTemplate};

pub const DEFAULT_INVOICE_URL: &str = "http://127.0.0.1:8000/reviewer/invoice/";
pub const DEFAULT_AUTHORIZED_USER_FILE: &str = "authorized_user.json";
pub const DEFAULT_SESSION_NAME: &str = "session";
pub const DEFAULT_REVIEWER_COLUMN: &str = "Ревьюер";

/// Telegram user-session credentials.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub session_name: String,
    pub phone: Option<String>,
}

/// Run parameters, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub google_credentials_file_path: PathBuf,
    pub google_authorized_user_file_path: PathBuf,
    pub devman_token: String,
    pub devman_invoice_url: String,
    pub month: u32,
    pub year: i32,
    pub google_table_name: TableNameTemplate,
    pub telegram: TelegramConfig,
    pub confirm_every_reviewer: bool,
    pub message_template_filename: PathBuf,
    pub reviewer_column: String,
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), Local::now().date_naive())
    }

    /// Build the configuration from an arbitrary variable source. `today`
    /// anchors the default reporting period.
    pub fn from_lookup<F>(lookup: F, today: NaiveDate) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let (default_month, default_year) = previous_month(today).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "MONTH".into(),
                message: format!("no previous month found for {today}"),
            }
        })?;

        let month = env.parsed("MONTH")?.unwrap_or(default_month);
        if !(1..=12).contains(&month) {
            return Err(ConfigError::InvalidValue {
                key: "MONTH".into(),
                message: format!("{month} is not within 1-12"),
            });
        }
        let year = env.parsed("YEAR")?.unwrap_or(default_year);

        let google_table_name = TableNameTemplate::parse(&env.required("GOOGLE_TABLE_NAME")?)
            .map_err(|e| ConfigError::InvalidValue {
                key: "GOOGLE_TABLE_NAME".into(),
                message: e.to_string(),
            })?;

        let telegram = TelegramConfig {
            api_id: env.parsed("TELEGRAM_API_ID")?.ok_or_else(|| {
                ConfigError::MissingEnvVar("TELEGRAM_API_ID".into())
            })?,
            api_hash: env.required("TELEGRAM_API_HASH")?,
            session_name: env
                .optional("TELEGRAM_SESSION_NAME")
                .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
            phone: env.optional("TELEGRAM_PHONE"),
        };

        let config = Self {
            google_credentials_file_path: env.required("GOOGLE_CREDENTIALS_FILE_PATH")?.into(),
            google_authorized_user_file_path: env
                .optional("GOOGLE_AUTHORIZED_USER_FILE_PATH")
                .unwrap_or_else(|| DEFAULT_AUTHORIZED_USER_FILE.to_string())
                .into(),
            devman_token: env.required("DEVMAN_TOKEN")?,
            devman_invoice_url: env
                .optional("DEVMAN_INVOICE_URL")
                .unwrap_or_else(|| DEFAULT_INVOICE_URL.to_string()),
            month,
            year,
            google_table_name,
            telegram,
            confirm_every_reviewer: env.flag("CONFIRM_EVERY_REVIEWER")?.unwrap_or(false),
            message_template_filename: env.required("MESSAGE_TEMPLATE_FILENAME")?.into(),
            reviewer_column: env
                .optional("REVIEWER_COLUMN")
                .unwrap_or_else(|| DEFAULT_REVIEWER_COLUMN.to_string()),
        };

        info!(
            "Configuration loaded for {:02}.{}, confirm every reviewer: {}",
            config.month, config.year, config.confirm_every_reviewer
        );
        Ok(config)
    }
}

/// The most recent calendar month strictly before `today`, as `(month, year)`.
///
/// Walks back one day at a time until the month changes; a month boundary is
/// always crossed within 31 days.
pub fn previous_month(today: NaiveDate) -> Option<(u32, i32)> {
    const MAX_DAYS_IN_MONTH: u64 = 31;

    (1..=MAX_DAYS_IN_MONTH)
        .filter_map(|offset| today.checked_sub_days(Days::new(offset)))
        .find(|date| date.month() != today.month())
        .map(|date| (date.month(), date.year()))
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank variables are treated the same.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("{raw:?}: {e}"),
                })
            })
            .transpose()
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.optional(key)
            .map(|raw| match raw.to_lowercase().as_str() {
                "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
                "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("{raw:?} is not a boolean"),
                }),
            })
            .transpose()
    }
}
