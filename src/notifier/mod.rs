// src/notifier/mod.rs

pub mod callbacks;
pub mod commands;
pub mod messages;
pub mod navigation;

pub use self::callbacks::handle_callback;
pub use self::commands::handle_command;
pub use self::messages::handle_message;

use crate::models::Day;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use teloxide::types::ChatId;
use teloxide::utils::command::BotCommands;
use tokio::sync::RwLock;

/// Состояние диалога пользователя
#[derive(Debug, Clone, PartialEq)]
pub enum UserState {
    AwaitingRateCurrency { day: Day, last_bot_message_id: Option<i32> },
    AwaitingCalcAmount { day: Day, last_bot_message_id: Option<i32> },
    AwaitingCalcCurrency { day: Day, amount: Decimal, last_bot_message_id: Option<i32> },
    AwaitingCalcCommission { day: Day, amount: Decimal, currency: String, last_bot_message_id: Option<i32> },
    None,
}

impl UserState {
    pub fn last_bot_message_id(&self) -> Option<i32> {
        match self {
            UserState::AwaitingRateCurrency { last_bot_message_id, .. }
            | UserState::AwaitingCalcAmount { last_bot_message_id, .. }
            | UserState::AwaitingCalcCurrency { last_bot_message_id, .. }
            | UserState::AwaitingCalcCommission { last_bot_message_id, .. } => *last_bot_message_id,
            UserState::None => None,
        }
    }
}

/// Состояния пользователей по чатам
pub type StateStorage = Arc<RwLock<HashMap<ChatId, UserState>>>;

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Доступные команды:")]
pub enum Command {
    #[command(description = "главное меню")]
    Start,
    #[command(description = "показать это сообщение", aliases = ["?"])]
    Help,
    #[command(description = "курс ЦБ на сегодня или завтра")]
    Rate,
    #[command(description = "расчёт суммы для клиента")]
    Calc,
    #[command(description = "включить/выключить уведомления о публикации курсов")]
    Subscribe,
    #[command(description = "подписка и активные ожидания")]
    Status,
    #[command(description = "отменить все ожидания курса")]
    Cancel,
}

pub mod callback_data {
    pub const MENU_RATES: &str = "menu_rates";
    pub const MENU_CALC: &str = "menu_calc";
    pub const MENU_SUBSCRIBE: &str = "menu_subscribe";
    pub const MENU_STATUS: &str = "menu_status";
    pub const BACK_TO_MAIN: &str = "back_to_main";
    pub const CANCEL_DIALOG: &str = "cancel_dialog";

    /// rate_day_{day}
    pub const PREFIX_RATE_DAY: &str = "rate_day_";
    /// rate_cur_{day}_{currency}
    pub const PREFIX_RATE_CURRENCY: &str = "rate_cur_";
    /// calc_day_{day}
    pub const PREFIX_CALC_DAY: &str = "calc_day_";
    /// calc_cur_{currency}
    pub const PREFIX_CALC_CURRENCY: &str = "calc_cur_";
    /// cancel_watch_{currency}_{yyyy-mm-dd}
    pub const PREFIX_CANCEL_WATCH: &str = "cancel_watch_";
}

const RATES_KEYWORDS: [&str; 4] = ["курс", "курсы", "цб", "cbr"];

/// Слова, открывающие диалог курса
pub fn is_rates_keyword(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    RATES_KEYWORDS.contains(&lowered.as_str())
}

/// Код валюты, введённый руками: три латинские буквы
pub fn parse_currency_input(text: &str) -> Option<String> {
    let code = text.trim().to_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code)
    } else {
        None
    }
}

pub fn rate_currency_data(day: Day, currency: &str) -> String {
    format!("{}{}_{}", callback_data::PREFIX_RATE_CURRENCY, day.as_str(), currency)
}

/// Разбор "{day}_{currency}" после префикса
pub fn parse_day_currency(rest: &str) -> Option<(Day, String)> {
    let (day, currency) = rest.split_once('_')?;
    Some((Day::parse(day)?, parse_currency_input(currency)?))
}

pub fn cancel_watch_data(currency: &str, date: NaiveDate) -> String {
    format!("{}{}_{}", callback_data::PREFIX_CANCEL_WATCH, currency, date.format("%Y-%m-%d"))
}

/// Разбор "{currency}_{yyyy-mm-dd}" после префикса
pub fn parse_cancel_watch(rest: &str) -> Option<(String, NaiveDate)> {
    let (currency, date) = rest.split_once('_')?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some((parse_currency_input(currency)?, date))
}
