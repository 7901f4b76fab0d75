// src/telegram.rs

use crate::config::Config;
use crate::notifier::{handle_callback, handle_command, handle_message, Command, StateStorage};
use crate::rates::{Monitor, RateDesk};
use std::collections::HashMap;
use std::sync::Arc;
use teloxide::{
    dptree,
    prelude::*,
    types::{CallbackQuery, Message, UpdateKind},
};
use tokio::sync::RwLock;
use tracing::{info, warn};

const ACCESS_DENIED: &str = "⛔ Доступ запрещён.";

pub async fn run(bot: Bot, cfg: Arc<Config>, desk: Arc<RateDesk>, monitor: Monitor) {
    let state_storage: StateStorage = Arc::new(RwLock::new(HashMap::new()));

    // 0) Чужие пользователи
    let denied_branch = dptree::filter({
        let cfg = cfg.clone();
        move |upd: Update| {
            let user_id = upd.from().map(|u| u.id.0 as i64);
            !user_id.is_some_and(|id| cfg.is_user_allowed(id))
        }
    })
    .endpoint(|bot: Bot, upd: Update| async move {
        warn!("Access denied for user {:?}", upd.from().map(|u| u.id));
        if let UpdateKind::CallbackQuery(q) = &upd.kind {
            if let Err(e) = bot.answer_callback_query(q.id.clone()).text(ACCESS_DENIED).await {
                warn!("Failed to answer denied callback {:?}: {}", q.id, e);
            }
        } else if let Some(chat) = upd.chat() {
            if let Err(e) = bot.send_message(chat.id, ACCESS_DENIED).await {
                warn!("Failed to send access denied to chat {}: {}", chat.id, e);
            }
        }
        respond(())
    });

    // 1) Текстовые команды
    let commands_branch = Update::filter_message()
        .filter_command::<Command>()
        .endpoint({
            let desk = desk.clone();
            let state_storage = state_storage.clone();
            move |bot: Bot, msg: Message, cmd: Command| {
                let desk = desk.clone();
                let state_storage = state_storage.clone();
                async move {
                    if let Err(err) = handle_command(bot, msg, cmd, desk, state_storage).await {
                        tracing::error!("command handler error: {:?}", err);
                    }
                    respond(())
                }
            }
        });

    // 2) Inline‑callbacks
    let callback_branch = Update::filter_callback_query()
        .endpoint({
            let desk = desk.clone();
            let state_storage = state_storage.clone();
            move |bot: Bot, q: CallbackQuery| {
                let desk = desk.clone();
                let state_storage = state_storage.clone();
                async move {
                    if let Err(err) = handle_callback(bot, q, desk, state_storage).await {
                        tracing::error!("callback handler error: {:?}", err);
                    }
                    respond(())
                }
            }
        });

    // 3) Текстовые сообщения
    let message_branch = Update::filter_message()
        .endpoint({
            let desk = desk.clone();
            let state_storage = state_storage.clone();
            move |bot: Bot, msg: Message| {
                let desk = desk.clone();
                let state_storage = state_storage.clone();
                async move {
                    if let Err(err) = handle_message(bot, msg, desk, state_storage).await {
                        tracing::error!("message handler error: {:?}", err);
                    }
                    respond(())
                }
            }
        });

    info!("Starting Telegram dispatcher");
    Dispatcher::builder(bot, dptree::entry()
        .branch(denied_branch)
        .branch(commands_branch)
        .branch(callback_branch)
        .branch(message_branch))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped, shutting down rate monitor");
    monitor.shutdown().await;
}
