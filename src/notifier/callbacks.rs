// src/notifier/callbacks.rs

use super::navigation::{
    self, make_day_keyboard, make_dialog_cancel_keyboard, make_main_menu_keyboard, make_rate_currency_keyboard,
    rate_reply_keyboard, show_html,
};
use super::{callback_data, parse_cancel_watch, parse_day_currency, StateStorage, UserState};
use crate::models::Day;
use crate::rates::RateDesk;
use crate::utils::format_date;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatId, MessageId};
use tracing::{error, info, warn};

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    desk: Arc<RateDesk>,
    state_storage: StateStorage,
) -> anyhow::Result<()> {
    let Some(data) = q.data.clone() else {
        warn!("Callback without data from {}", q.from.id);
        return Ok(());
    };
    let Some(message) = q.message.as_ref() else {
        warn!("Callback '{}' without message", data);
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let chat_id = message.chat().id;
    let message_id = message.id();
    let user_id = q.from.id.0 as i64;

    // Снимаем "часики" с кнопки сразу
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!("Failed to answer callback '{}': {}", data, e);
    }
    info!("Callback '{}' from chat_id: {}", data, chat_id);

    match data.as_str() {
        callback_data::MENU_RATES => {
            state_storage.write().await.insert(chat_id, UserState::None);
            show_html(
                &bot,
                chat_id,
                Some(message_id),
                "💱 <b>Курс ЦБ на какой день?</b>",
                make_day_keyboard(callback_data::PREFIX_RATE_DAY),
            )
            .await?;
        }
        callback_data::MENU_CALC => {
            state_storage.write().await.insert(chat_id, UserState::None);
            show_html(
                &bot,
                chat_id,
                Some(message_id),
                "🧮 <b>Расчёт по курсу ЦБ на какой день?</b>",
                make_day_keyboard(callback_data::PREFIX_CALC_DAY),
            )
            .await?;
        }
        callback_data::MENU_SUBSCRIBE => {
            let text = match desk.toggle_subscription(user_id).await {
                Ok(true) => "🔔 <b>Подписка включена.</b> Пришлю курсы ЦБ, как только они будут опубликованы.",
                Ok(false) => "🔕 <b>Подписка выключена.</b>",
                Err(e) => {
                    error!("Subscription toggle failed for {}: {:#}", user_id, e);
                    "❌ Не удалось изменить подписку. Попробуйте позже."
                }
            };
            show_html(&bot, chat_id, Some(message_id), text, make_main_menu_keyboard()).await?;
        }
        callback_data::MENU_STATUS => {
            let text = desk.status(user_id).await;
            show_html(&bot, chat_id, Some(message_id), &text, make_main_menu_keyboard()).await?;
        }
        callback_data::BACK_TO_MAIN => {
            navigation::handle_back_to_main(bot, q, state_storage).await?;
        }
        callback_data::CANCEL_DIALOG => {
            navigation::handle_cancel_dialog(bot, chat_id, message_id, state_storage).await?;
        }
        d if d.starts_with(callback_data::PREFIX_RATE_DAY) => {
            let Some(day) = Day::parse(&d[callback_data::PREFIX_RATE_DAY.len()..]) else {
                warn!("Bad rate day callback: {}", d);
                return Ok(());
            };
            state_storage.write().await.insert(
                chat_id,
                UserState::AwaitingRateCurrency { day, last_bot_message_id: Some(message_id.0) },
            );
            let text = format!(
                "💱 Курс ЦБ на {} ({}).\nВыберите валюту или введите её код, например <code>USD</code>:",
                day.label(),
                format_date(desk.date_for(day))
            );
            show_html(&bot, chat_id, Some(message_id), &text, make_rate_currency_keyboard(day, desk.tracked()))
                .await?;
        }
        d if d.starts_with(callback_data::PREFIX_RATE_CURRENCY) => {
            let Some((day, currency)) = parse_day_currency(&d[callback_data::PREFIX_RATE_CURRENCY.len()..]) else {
                warn!("Bad rate currency callback: {}", d);
                return Ok(());
            };
            state_storage.write().await.insert(chat_id, UserState::None);
            answer_rate(&bot, chat_id, Some(message_id), &desk, user_id, day, &currency).await?;
        }
        d if d.starts_with(callback_data::PREFIX_CALC_DAY) => {
            let Some(day) = Day::parse(&d[callback_data::PREFIX_CALC_DAY.len()..]) else {
                warn!("Bad calc day callback: {}", d);
                return Ok(());
            };
            state_storage.write().await.insert(
                chat_id,
                UserState::AwaitingCalcAmount { day, last_bot_message_id: Some(message_id.0) },
            );
            let text = format!(
                "🧮 Расчёт по курсу ЦБ на {} ({}).\nВведите сумму в валюте:",
                day.label(),
                format_date(desk.date_for(day))
            );
            show_html(&bot, chat_id, Some(message_id), &text, make_dialog_cancel_keyboard()).await?;
        }
        d if d.starts_with(callback_data::PREFIX_CALC_CURRENCY) => {
            let currency = d[callback_data::PREFIX_CALC_CURRENCY.len()..].to_string();
            let current = state_storage.read().await.get(&chat_id).cloned();
            let Some(UserState::AwaitingCalcCurrency { day, amount, .. }) = current else {
                warn!("Calc currency callback without active dialog for chat_id: {}", chat_id);
                navigation::show_main_menu(&bot, chat_id, Some(message_id)).await?;
                return Ok(());
            };
            state_storage.write().await.insert(
                chat_id,
                UserState::AwaitingCalcCommission {
                    day,
                    amount,
                    currency: currency.clone(),
                    last_bot_message_id: Some(message_id.0),
                },
            );
            let text = format!(
                "Сумма: {} {}.\nВведите вознаграждение агента в процентах (0, если без вознаграждения):",
                amount.normalize(),
                currency
            );
            show_html(&bot, chat_id, Some(message_id), &text, make_dialog_cancel_keyboard()).await?;
        }
        d if d.starts_with(callback_data::PREFIX_CANCEL_WATCH) => {
            let Some((currency, date)) = parse_cancel_watch(&d[callback_data::PREFIX_CANCEL_WATCH.len()..]) else {
                warn!("Bad cancel watch callback: {}", d);
                return Ok(());
            };
            let text = match desk.cancel_watch(user_id, &currency, date).await {
                Ok(true) => format!("🚫 Больше не жду курс {} на {}.", currency, format_date(date)),
                Ok(false) => format!("ℹ️ Ожидание курса {} на {} уже не активно.", currency, format_date(date)),
                Err(e) => {
                    error!("Cancel watch failed for {}: {:#}", user_id, e);
                    "❌ Не удалось отменить ожидание. Попробуйте позже.".to_string()
                }
            };
            show_html(&bot, chat_id, Some(message_id), &text, make_main_menu_keyboard()).await?;
        }
        other => {
            warn!("Unknown callback data: {}", other);
        }
    }
    Ok(())
}

/// Запрашивает курс и показывает ответ
pub async fn answer_rate(
    bot: &Bot,
    chat_id: ChatId,
    message_to_edit: Option<MessageId>,
    desk: &RateDesk,
    user_id: i64,
    day: Day,
    currency: &str,
) -> anyhow::Result<()> {
    let reply = desk.process_day_rate(user_id, day, currency).await;
    show_html(bot, chat_id, message_to_edit, &reply.message, rate_reply_keyboard(&reply)).await?;
    Ok(())
}
