// src/config.rs
use anyhow::Result;
use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use config::{Config as Loader, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    // Telegram
    pub telegram_token: String,
    /// Кому разрешён доступ к боту. Пустой список = доступ запрещён всем
    #[serde(default)]
    pub allowed_user_ids: Vec<i64>,

    // SQLite
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    // ЦБ
    #[serde(default = "default_cbr_base_url")]
    pub cbr_base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_tracked_currencies")]
    pub tracked_currencies: Vec<String>,
    /// Часовой пояс ЦБ, от него считаем "сегодня" и "завтра"
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    // Кэш и отложенные расчёты
    #[serde(default = "default_rates_ttl_secs")]
    pub rates_ttl_secs: u64,
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,

    // Ожидание публикации курса
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_max_hours")]
    pub poll_max_hours: u64,
}

fn default_sqlite_path() -> String { "data/cbrbot.db".into() }
fn default_cbr_base_url() -> String { "https://www.cbr.ru".into() }
fn default_http_timeout_secs() -> u64 { 10 }
fn default_tracked_currencies() -> Vec<String> {
    ["USD", "EUR", "CNY", "AED", "TRY"].iter().map(|s| s.to_string()).collect()
}
fn default_utc_offset_hours() -> i32 { 3 }
fn default_rates_ttl_secs() -> u64 { 60 * 60 * 12 }
fn default_pending_ttl_secs() -> u64 { 60 * 60 * 24 }
fn default_poll_interval_secs() -> u64 { 180 }
fn default_poll_max_hours() -> u64 { 15 }

impl Config {
    pub fn load() -> Result<Self> {
        let file = env::var("CBRBOT_CONFIG").unwrap_or_else(|_| "Config.toml".into());
        Self::load_from(&file)
    }

    pub fn load_from(file: &str) -> Result<Self> {
        let loader = Loader::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("CBRBOT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("allowed_user_ids")
                    .with_list_parse_key("tracked_currencies")
                    .try_parsing(true),
            )
            .build()?;
        let mut cfg: Config = loader.try_deserialize()?;
        cfg.tracked_currencies = cfg
            .tracked_currencies
            .iter()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        Ok(cfg)
    }

    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        if self.allowed_user_ids.is_empty() {
            tracing::warn!("allowed_user_ids is empty, access denied for user {}", user_id);
            return false;
        }
        self.allowed_user_ids.contains(&user_id)
    }

    pub fn bank_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Текущая дата по часам ЦБ
    pub fn bank_today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.bank_offset()).date_naive()
    }

    pub fn http_timeout(&self) -> Duration { Duration::from_secs(self.http_timeout_secs) }
    pub fn rates_ttl(&self) -> Duration { Duration::from_secs(self.rates_ttl_secs) }
    pub fn pending_ttl(&self) -> Duration { Duration::from_secs(self.pending_ttl_secs) }
    pub fn poll_interval(&self) -> Duration { Duration::from_secs(self.poll_interval_secs.max(1)) }

    /// Сколько проверок успеет сделать задача ожидания
    pub fn poll_max_checks(&self) -> u32 {
        let total = self.poll_max_hours.saturating_mul(60 * 60);
        u32::try_from(total / self.poll_interval_secs.max(1)).unwrap_or(u32::MAX).max(1)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        telegram_token: "test-token".into(),
        allowed_user_ids: vec![42],
        sqlite_path: ":memory:".into(),
        cbr_base_url: "http://localhost".into(),
        http_timeout_secs: default_http_timeout_secs(),
        tracked_currencies: default_tracked_currencies(),
        utc_offset_hours: default_utc_offset_hours(),
        rates_ttl_secs: default_rates_ttl_secs(),
        pending_ttl_secs: default_pending_ttl_secs(),
        poll_interval_secs: default_poll_interval_secs(),
        poll_max_hours: default_poll_max_hours(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "telegram_token = \"abc\"\nallowed_user_ids = [1, 2]\ntracked_currencies = [\"usd\", \"eur\"]"
        )
        .unwrap();

        let cfg = Config::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.telegram_token, "abc");
        assert_eq!(cfg.allowed_user_ids, vec![1, 2]);
        assert_eq!(cfg.tracked_currencies, vec!["USD".to_string(), "EUR".to_string()]);
        assert_eq!(cfg.rates_ttl_secs, 43_200);
        assert_eq!(cfg.poll_interval_secs, 180);
    }

    #[test]
    fn test_poll_max_checks() {
        let cfg = test_config();
        // 15 часов по 3 минуты
        assert_eq!(cfg.poll_max_checks(), 300);
    }

    #[test]
    fn test_poll_max_checks_saturates() {
        let mut cfg = test_config();
        cfg.poll_interval_secs = 1;
        cfg.poll_max_hours = u64::MAX / 1_000;
        assert_eq!(cfg.poll_max_checks(), u32::MAX);

        cfg.poll_max_hours = 0;
        assert_eq!(cfg.poll_max_checks(), 1);
    }

    #[test]
    fn test_access_check() {
        let mut cfg = test_config();
        assert!(cfg.is_user_allowed(42));
        assert!(!cfg.is_user_allowed(7));
        cfg.allowed_user_ids.clear();
        assert!(!cfg.is_user_allowed(42));
    }
}
