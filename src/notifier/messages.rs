// src/notifier/messages.rs

use super::callbacks::answer_rate;
use super::navigation::{
    make_calc_currency_keyboard, make_cancel_watch_keyboard, make_day_keyboard, make_dialog_cancel_keyboard,
    make_main_menu_keyboard, show_html,
};
use super::{callback_data, is_rates_keyword, parse_currency_input, StateStorage, UserState};
use crate::rates::{RateDesk, MAX_AMOUNT, MAX_COMMISSION_PERCENT};
use crate::utils::parse_decimal_input;
use rust_decimal::Decimal;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message, MessageId};
use tracing::{error, info, warn};

const BAD_CURRENCY: &str = "Введите код валюты из трёх латинских букв, например USD.";

pub async fn handle_message(
    bot: Bot,
    msg: Message,
    desk: Arc<RateDesk>,
    state_storage: StateStorage,
) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    let message_id = msg.id;
    let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(chat_id.0);
    let text = msg.text().unwrap_or("").trim();

    let state = state_storage.read().await.get(&chat_id).cloned().unwrap_or(UserState::None);

    match state {
        UserState::AwaitingRateCurrency { day, last_bot_message_id } => {
            let Some(currency) = parse_currency_input(text) else {
                bot.send_message(chat_id, BAD_CURRENCY).await?;
                return Ok(());
            };
            state_storage.write().await.insert(chat_id, UserState::None);
            delete_user_message(&bot, chat_id, message_id).await;
            answer_rate(&bot, chat_id, last_bot_message_id.map(MessageId), &desk, user_id, day, &currency).await?;
        }
        UserState::AwaitingCalcAmount { day, last_bot_message_id } => {
            let Some(amount) = parse_decimal_input(text).filter(|a| *a > Decimal::ZERO && *a <= MAX_AMOUNT) else {
                bot.send_message(
                    chat_id,
                    format!(
                        "Неверный формат суммы. Введите положительное число до {}, например 1500 или 99,90.",
                        MAX_AMOUNT
                    ),
                )
                .await?;
                return Ok(());
            };
            delete_user_message(&bot, chat_id, message_id).await;
            let prompt = format!(
                "Сумма: {}.\nВыберите валюту или введите её код, например <code>USD</code>:",
                amount.normalize()
            );
            state_storage.write().await.insert(
                chat_id,
                UserState::AwaitingCalcCurrency { day, amount, last_bot_message_id },
            );
            show_html(
                &bot,
                chat_id,
                last_bot_message_id.map(MessageId),
                &prompt,
                make_calc_currency_keyboard(desk.tracked()),
            )
            .await?;
        }
        UserState::AwaitingCalcCurrency { day, amount, last_bot_message_id } => {
            let Some(currency) = parse_currency_input(text) else {
                bot.send_message(chat_id, BAD_CURRENCY).await?;
                return Ok(());
            };
            delete_user_message(&bot, chat_id, message_id).await;
            let prompt = format!(
                "Сумма: {} {}.\nВведите вознаграждение агента в процентах (0, если без вознаграждения):",
                amount.normalize(),
                currency
            );
            state_storage.write().await.insert(
                chat_id,
                UserState::AwaitingCalcCommission { day, amount, currency, last_bot_message_id },
            );
            show_html(&bot, chat_id, last_bot_message_id.map(MessageId), &prompt, make_dialog_cancel_keyboard())
                .await?;
        }
        UserState::AwaitingCalcCommission { day, amount, currency, last_bot_message_id } => {
            let Some(commission) = parse_decimal_input(text.trim_end_matches('%'))
                .filter(|c| *c >= Decimal::ZERO && *c <= MAX_COMMISSION_PERCENT)
            else {
                bot.send_message(chat_id, "Неверный формат процента. Введите число от 0 до 100, например 1,5.").await?;
                return Ok(());
            };
            state_storage.write().await.insert(chat_id, UserState::None);
            delete_user_message(&bot, chat_id, message_id).await;

            let (reply_text, kb) = match desk.calculate(user_id, day, &currency, amount, commission).await {
                Ok(reply) if reply.pending => (reply.message, make_cancel_watch_keyboard(&currency, reply.date)),
                Ok(reply) => (reply.message, make_main_menu_keyboard()),
                Err(e) => {
                    error!("Calculation failed for {}: {:#}", user_id, e);
                    (
                        "❌ Не удалось выполнить расчёт. Попробуйте позже.".to_string(),
                        make_main_menu_keyboard(),
                    )
                }
            };
            show_html(&bot, chat_id, last_bot_message_id.map(MessageId), &reply_text, kb).await?;
        }
        UserState::None => {
            if is_rates_keyword(text) {
                info!("Rates keyword from chat_id: {}", chat_id);
                show_html(
                    &bot,
                    chat_id,
                    None,
                    "💱 <b>Курс ЦБ на какой день?</b>",
                    make_day_keyboard(callback_data::PREFIX_RATE_DAY),
                )
                .await?;
            } else {
                bot.send_message(chat_id, "Сейчас нет активного диалога. Используйте меню или /help.")
                    .reply_markup(make_main_menu_keyboard())
                    .await?;
            }
        }
    }
    Ok(())
}

async fn delete_user_message(bot: &Bot, chat_id: ChatId, message_id: MessageId) {
    if let Err(e) = bot.delete_message(chat_id, message_id).await {
        warn!("Failed to delete user message {}: {}", message_id, e);
    }
}
