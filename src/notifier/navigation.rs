// src/notifier/navigation.rs

use super::{callback_data, cancel_watch_data, rate_currency_data, StateStorage, UserState};
use crate::models::Day;
use crate::rates::RateReply;
use chrono::NaiveDate;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode};
use tracing::{info, warn};

pub const WELCOME_MESSAGE: &str = "Добро пожаловать! Я показываю официальные курсы ЦБ РФ \
     и считаю суммы для клиентов. Выберите действие:";

const CURRENCIES_PER_ROW: usize = 3;

/// Клавиатура главного меню
pub fn make_main_menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("💱 Курсы ЦБ", callback_data::MENU_RATES),
            InlineKeyboardButton::callback("🧮 Расчёт для клиента", callback_data::MENU_CALC),
        ],
        vec![
            InlineKeyboardButton::callback("🔔 Подписка", callback_data::MENU_SUBSCRIBE),
            InlineKeyboardButton::callback("ℹ️ Статус", callback_data::MENU_STATUS),
        ],
    ])
}

pub fn make_dialog_cancel_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "❌ Отмена",
        callback_data::CANCEL_DIALOG,
    )]])
}

/// Выбор дня: сегодня / завтра
pub fn make_day_keyboard(prefix: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("📅 Сегодня", format!("{}{}", prefix, Day::Today.as_str())),
            InlineKeyboardButton::callback("📆 Завтра", format!("{}{}", prefix, Day::Tomorrow.as_str())),
        ],
        vec![InlineKeyboardButton::callback("⬅️ Назад", callback_data::BACK_TO_MAIN)],
    ])
}

fn currency_rows(currencies: &[String], data: impl Fn(&str) -> String) -> Vec<Vec<InlineKeyboardButton>> {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = currencies
        .chunks(CURRENCIES_PER_ROW)
        .map(|chunk| {
            chunk
                .iter()
                .map(|c| InlineKeyboardButton::callback(c.clone(), data(c)))
                .collect()
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback("❌ Отмена", callback_data::CANCEL_DIALOG)]);
    rows
}

/// Валюты для диалога курса
pub fn make_rate_currency_keyboard(day: Day, currencies: &[String]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(currency_rows(currencies, |c| rate_currency_data(day, c)))
}

/// Валюты для диалога расчёта
pub fn make_calc_currency_keyboard(currencies: &[String]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(currency_rows(currencies, |c| {
        format!("{}{}", callback_data::PREFIX_CALC_CURRENCY, c)
    }))
}

pub fn make_cancel_watch_keyboard(currency: &str, date: NaiveDate) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            "🚫 Не ждать курс",
            cancel_watch_data(currency, date),
        )],
        vec![InlineKeyboardButton::callback("⬅️ В меню", callback_data::BACK_TO_MAIN)],
    ])
}

/// Клавиатура под ответом с курсом
pub fn rate_reply_keyboard(reply: &RateReply) -> InlineKeyboardMarkup {
    if reply.watch_started {
        make_cancel_watch_keyboard(&reply.currency, reply.date)
    } else {
        make_main_menu_keyboard()
    }
}

/// Показывает или редактирует сообщение с главным меню
pub async fn show_main_menu(
    bot: &Bot,
    chat_id: ChatId,
    message_to_edit: Option<MessageId>,
) -> Result<(), teloxide::RequestError> {
    let kb = make_main_menu_keyboard();
    if let Some(message_id) = message_to_edit {
        match bot.edit_message_text(chat_id, message_id, WELCOME_MESSAGE).reply_markup(kb.clone()).await {
            Ok(_) => return Ok(()),
            Err(e) => warn!("Failed to edit message {} to main menu: {}. Sending new one.", message_id, e),
        }
    }
    bot.send_message(chat_id, WELCOME_MESSAGE).reply_markup(kb).await?;
    Ok(())
}

/// Отправляет или редактирует HTML-сообщение с клавиатурой
pub async fn show_html(
    bot: &Bot,
    chat_id: ChatId,
    message_to_edit: Option<MessageId>,
    text: &str,
    kb: InlineKeyboardMarkup,
) -> Result<(), teloxide::RequestError> {
    if let Some(message_id) = message_to_edit {
        match bot
            .edit_message_text(chat_id, message_id, text)
            .parse_mode(ParseMode::Html)
            .reply_markup(kb.clone())
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) => warn!("Failed to edit message {}: {}. Sending new one.", message_id, e),
        }
    }
    bot.send_message(chat_id, text).parse_mode(ParseMode::Html).reply_markup(kb).await?;
    Ok(())
}

/// /start
pub async fn handle_start(bot: Bot, msg: Message, state_storage: StateStorage) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    info!("Processing /start command for chat_id: {}", chat_id);

    state_storage.write().await.insert(chat_id, UserState::None);

    if let Err(e) = bot.delete_message(chat_id, msg.id).await {
        warn!("Failed to delete /start command message: {}", e);
    }
    show_main_menu(&bot, chat_id, None).await?;
    Ok(())
}

/// Кнопка "Назад"
pub async fn handle_back_to_main(bot: Bot, q: CallbackQuery, state_storage: StateStorage) -> anyhow::Result<()> {
    if let Some(msg) = q.message.as_ref() {
        let chat_id = msg.chat().id;
        info!("Processing '{}' callback for chat_id: {}", callback_data::BACK_TO_MAIN, chat_id);
        state_storage.write().await.insert(chat_id, UserState::None);
        show_main_menu(&bot, chat_id, Some(msg.id())).await?;
    } else {
        warn!("CallbackQuery missing message in handle_back_to_main");
    }
    Ok(())
}

/// Кнопка "Отмена" в диалоге
pub async fn handle_cancel_dialog(
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
    state_storage: StateStorage,
) -> anyhow::Result<()> {
    info!("Processing cancel dialog for chat_id: {}", chat_id);
    state_storage.write().await.insert(chat_id, UserState::None);
    show_main_menu(&bot, chat_id, Some(message_id)).await?;
    Ok(())
}
