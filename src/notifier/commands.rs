// src/notifier/commands.rs

use super::navigation::{self, make_day_keyboard, make_main_menu_keyboard, show_html};
use super::{callback_data, Command, StateStorage, UserState};
use crate::rates::RateDesk;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId};
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

// Вспомогательная функция для "чистки" чата
async fn cleanup_chat(bot: &Bot, chat_id: ChatId, user_msg_id: MessageId, bot_msg_id: Option<i32>) {
    if let Some(id_int) = bot_msg_id {
        if let Err(e) = bot.delete_message(chat_id, MessageId(id_int)).await {
            warn!("Failed to delete previous bot message {}: {}", id_int, e);
        }
    }
    if let Err(e) = bot.delete_message(chat_id, user_msg_id).await {
        warn!("Failed to delete user command message {}: {}", user_msg_id, e);
    }
}

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    desk: Arc<RateDesk>,
    state_storage: StateStorage,
) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(chat_id.0);

    if let Command::Start = cmd {
        return navigation::handle_start(bot, msg, state_storage).await;
    }

    // Новая команда обрывает текущий диалог
    let previous_bot_message_id = {
        let mut state_guard = state_storage.write().await;
        let previous = state_guard.get(&chat_id).and_then(UserState::last_bot_message_id);
        if !matches!(state_guard.get(&chat_id), Some(UserState::None) | None) {
            info!("Resetting user state for {} due to new command: {:?}", chat_id, cmd);
            state_guard.insert(chat_id, UserState::None);
        }
        previous
    };
    cleanup_chat(&bot, chat_id, msg.id, previous_bot_message_id).await;

    match cmd {
        Command::Start => {}
        Command::Help => {
            bot.send_message(chat_id, Command::descriptions().to_string())
                .reply_markup(make_main_menu_keyboard())
                .await?;
        }
        Command::Rate => {
            show_html(
                &bot,
                chat_id,
                None,
                "💱 <b>Курс ЦБ на какой день?</b>",
                make_day_keyboard(callback_data::PREFIX_RATE_DAY),
            )
            .await?;
        }
        Command::Calc => {
            show_html(
                &bot,
                chat_id,
                None,
                "🧮 <b>Расчёт по курсу ЦБ на какой день?</b>",
                make_day_keyboard(callback_data::PREFIX_CALC_DAY),
            )
            .await?;
        }
        Command::Subscribe => {
            let text = match desk.toggle_subscription(user_id).await {
                Ok(true) => "🔔 <b>Подписка включена.</b> Пришлю курсы ЦБ, как только они будут опубликованы.",
                Ok(false) => "🔕 <b>Подписка выключена.</b>",
                Err(e) => {
                    error!("Subscription toggle failed for {}: {:#}", user_id, e);
                    "❌ Не удалось изменить подписку. Попробуйте позже."
                }
            };
            show_html(&bot, chat_id, None, text, make_main_menu_keyboard()).await?;
        }
        Command::Status => {
            let text = desk.status(user_id).await;
            show_html(&bot, chat_id, None, &text, make_main_menu_keyboard()).await?;
        }
        Command::Cancel => {
            let text = match desk.cancel_all(user_id).await {
                Ok(0) => "ℹ️ Активных ожиданий курса нет.".to_string(),
                Ok(n) => format!("🚫 Отменено ожиданий: {}.", n),
                Err(e) => {
                    error!("Cancel all watches failed for {}: {:#}", user_id, e);
                    "❌ Не удалось отменить ожидания. Попробуйте позже.".to_string()
                }
            };
            show_html(&bot, chat_id, None, &text, make_main_menu_keyboard()).await?;
        }
    }
    Ok(())
}
