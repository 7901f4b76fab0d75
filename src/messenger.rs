// src/messenger.rs

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;

/// Отправка сообщений пользователям из фоновых задач
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_html(&self, chat_id: i64, text: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl Messenger for Bot {
    async fn send_html(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        self.send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}
