// src/rates/desk.rs

use anyhow::{ensure, Result};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::calculator::{CalculationResult, MAX_AMOUNT, MAX_COMMISSION_PERCENT};
use super::monitor::{Monitor, WatchKey};
use super::service::{RateLookup, RateService};
use super::subscribers::Subscribers;
use crate::models::{Day, PendingCalculation};
use crate::storage::{self, Db};
use crate::utils::{format_date, format_rate};

/// Ответ на запрос курса
#[derive(Debug, Clone, PartialEq)]
pub struct RateReply {
    pub success: bool,
    pub rate: Option<Decimal>,
    pub date: NaiveDate,
    pub currency: String,
    pub message: String,
    /// Для пользователя идёт ожидание публикации
    pub watch_started: bool,
}

/// Ответ на запрос расчёта
#[derive(Debug, Clone, PartialEq)]
pub struct CalcReply {
    pub message: String,
    pub result: Option<CalculationResult>,
    /// Расчёт отложен до публикации курса
    pub pending: bool,
    pub date: NaiveDate,
}

/// Сценарии бота поверх сервиса курсов: ответы, расчёты, подписки
pub struct RateDesk {
    service: Arc<RateService>,
    monitor: Monitor,
    subscribers: Arc<Subscribers>,
    db: Db,
    pending_ttl: Duration,
    tracked: Vec<String>,
}

impl RateDesk {
    pub fn new(
        service: Arc<RateService>,
        monitor: Monitor,
        subscribers: Arc<Subscribers>,
        db: Db,
        pending_ttl: Duration,
        tracked: Vec<String>,
    ) -> Self {
        Self { service, monitor, subscribers, db, pending_ttl, tracked }
    }

    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn date_for(&self, day: Day) -> NaiveDate {
        match day {
            Day::Today => self.service.today(),
            Day::Tomorrow => self.service.tomorrow(),
        }
    }

    pub async fn process_day_rate(&self, user_id: i64, day: Day, currency: &str) -> RateReply {
        match day {
            Day::Today => self.process_today_rate(user_id, currency).await,
            Day::Tomorrow => self.process_tomorrow_rate(user_id, currency).await,
        }
    }

    pub async fn process_today_rate(&self, user_id: i64, currency: &str) -> RateReply {
        let currency = currency.to_uppercase();
        let today = self.service.today();
        info!("User {} asked today's {} rate", user_id, currency);

        let message = match self.service.get_rate(today, &currency, false).await {
            Ok(RateLookup::Found { rate, effective_date }) => {
                return found_reply(Day::Today, &currency, rate, effective_date);
            }
            Ok(RateLookup::NotPublished { .. }) => "⏳ <b>Курс ЦБ на сегодня ещё не опубликован.</b>\n\n\
                 📅 <b>Обычно курс появляется после 11:30.</b>\n\
                 🔄 <b>Попробуйте позже или запросите курс на завтра.</b>"
                .to_string(),
            Ok(RateLookup::UnknownCurrency { effective_date }) => unknown_currency_text(&currency, effective_date),
            Err(e) => {
                error!("Today's rate lookup failed for {}: {:#}", currency, e);
                try_later_text()
            }
        };
        RateReply { success: false, rate: None, date: today, currency, message, watch_started: false }
    }

    /// Курс на завтра. Если его ещё нет, запускаем ожидание.
    pub async fn process_tomorrow_rate(&self, user_id: i64, currency: &str) -> RateReply {
        let currency = currency.to_uppercase();
        let tomorrow = self.service.tomorrow();
        info!("User {} asked tomorrow's {} rate", user_id, currency);

        match self.service.get_rate(tomorrow, &currency, false).await {
            Ok(RateLookup::Found { rate, effective_date }) => {
                return found_reply(Day::Tomorrow, &currency, rate, effective_date);
            }
            Ok(RateLookup::UnknownCurrency { effective_date }) => {
                return RateReply {
                    success: false,
                    rate: None,
                    date: tomorrow,
                    message: unknown_currency_text(&currency, effective_date),
                    currency,
                    watch_started: false,
                };
            }
            Ok(RateLookup::NotPublished { .. }) => {}
            // ошибку сети тоже переживёт ожидание
            Err(e) => error!("Tomorrow's rate lookup failed for {}: {:#}", currency, e),
        }

        self.monitor.watch(WatchKey::new(user_id, &currency, tomorrow)).await;
        let message = "⏳ <b>Курс ЦБ на завтра ещё не опубликован.</b>\n\n\
             📅 <b>Обычно он появляется после 17:00.</b>\n\
             🔔 <b>Я пришлю вам уведомление, как только курс появится!</b>"
            .to_string();
        RateReply { success: false, rate: None, date: tomorrow, currency, message, watch_started: true }
    }

    /// Расчёт суммы в рублях. Завтрашний расчёт без курса откладывается.
    pub async fn calculate(
        &self,
        user_id: i64,
        day: Day,
        currency: &str,
        amount: Decimal,
        commission_percent: Decimal,
    ) -> Result<CalcReply> {
        ensure!(amount > Decimal::ZERO, "amount must be positive, got {}", amount);
        ensure!(amount <= MAX_AMOUNT, "amount {} exceeds {}", amount, MAX_AMOUNT);
        ensure!(commission_percent >= Decimal::ZERO, "commission must not be negative, got {}", commission_percent);
        ensure!(
            commission_percent <= MAX_COMMISSION_PERCENT,
            "commission {}% exceeds {}%",
            commission_percent,
            MAX_COMMISSION_PERCENT
        );

        let currency = currency.to_uppercase();
        let date = self.date_for(day);
        info!("User {} calculation: {} {} for {} at {}%", user_id, amount, currency, date, commission_percent);

        let lookup = self.service.get_rate(date, &currency, false).await;
        let not_ready = match lookup {
            Ok(RateLookup::Found { rate, effective_date }) => {
                let result = CalculationResult::compute(&currency, amount, rate, commission_percent, effective_date)?;
                return Ok(CalcReply { message: result.to_message(), result: Some(result), pending: false, date });
            }
            Ok(RateLookup::UnknownCurrency { effective_date }) => {
                return Ok(CalcReply {
                    message: unknown_currency_text(&currency, effective_date),
                    result: None,
                    pending: false,
                    date,
                });
            }
            Ok(RateLookup::NotPublished { .. }) => None,
            Err(e) => Some(e),
        };

        if day == Day::Today {
            let message = match not_ready {
                Some(e) => {
                    error!("Calculation rate lookup failed for {}: {:#}", currency, e);
                    try_later_text()
                }
                None => "⏳ <b>Курс ЦБ на сегодня ещё не опубликован.</b>\n\n\
                         🔄 <b>Попробуйте позже или сделайте расчёт на завтра.</b>"
                    .to_string(),
            };
            return Ok(CalcReply { message, result: None, pending: false, date });
        }
        if let Some(e) = not_ready {
            error!("Calculation rate lookup failed for {}, deferring: {:#}", currency, e);
        }

        let calc = PendingCalculation {
            user_id,
            date,
            currency: currency.clone(),
            amount,
            commission_percent,
            created_at: Utc::now().timestamp(),
        };
        storage::upsert_pending(&self.db, &calc, self.pending_ttl.as_secs() as i64).await?;
        self.monitor.watch(WatchKey::new(user_id, &currency, date)).await;
        info!("Pending calculation saved for {} on {}", user_id, date);

        let message = format!(
            "⏳ <b>Курс ЦБ на завтра ({}) ещё не опубликован.</b>\n\n\
             📝 Расчёт на {} {} с вознаграждением {}% сохранён.\n\
             🔔 <b>Пришлю результат, как только курс появится!</b>",
            format_date(date),
            amount.normalize(),
            currency,
            commission_percent.normalize()
        );
        Ok(CalcReply { message, result: None, pending: true, date })
    }

    pub async fn toggle_subscription(&self, user_id: i64) -> Result<bool> {
        self.subscribers.toggle(user_id).await
    }

    pub async fn is_subscriber(&self, user_id: i64) -> bool {
        self.subscribers.is_subscriber(user_id).await
    }

    pub async fn cancel_watch(&self, user_id: i64, currency: &str, date: NaiveDate) -> Result<bool> {
        self.monitor.cancel(user_id, currency, date).await
    }

    /// Отменяет все ожидания пользователя, возвращает их число
    pub async fn cancel_all(&self, user_id: i64) -> Result<usize> {
        let keys = self.monitor.active_for(user_id).await;
        for key in &keys {
            self.monitor.cancel(user_id, &key.currency, key.date).await?;
        }
        Ok(keys.len())
    }

    /// Текст для /status
    pub async fn status(&self, user_id: i64) -> String {
        let mut text = if self.subscribers.is_subscriber(user_id).await {
            "🔔 <b>Подписка на публикацию курсов ЦБ включена.</b>\n".to_string()
        } else {
            "🔕 <b>Подписка на публикацию курсов ЦБ выключена.</b>\n".to_string()
        };
        let watches = self.monitor.active_for(user_id).await;
        if watches.is_empty() {
            text.push_str("\nАктивных ожиданий курса нет.");
        } else {
            text.push_str("\n⏳ <b>Жду курс:</b>\n");
            for key in watches {
                text.push_str(&format!("• {} на {}\n", key.currency, format_date(key.date)));
            }
        }
        text
    }
}

fn found_reply(day: Day, currency: &str, rate: Decimal, effective_date: NaiveDate) -> RateReply {
    let message = format!(
        "✅ <b>Курс ЦБ на {} ({}):</b>\n💱 <b>{}:</b> {} ₽",
        day.label(),
        format_date(effective_date),
        currency,
        format_rate(rate)
    );
    RateReply {
        success: true,
        rate: Some(rate),
        date: effective_date,
        currency: currency.to_string(),
        message,
        watch_started: false,
    }
}

fn unknown_currency_text(currency: &str, effective_date: NaiveDate) -> String {
    format!(
        "❌ <b>Валюта {} не найдена в курсах ЦБ на {}.</b>",
        currency,
        format_date(effective_date)
    )
}

fn try_later_text() -> String {
    "⚠️ <b>Не удалось получить курс ЦБ.</b>\n\n🔄 <b>Попробуйте позже.</b>".to_string()
}
