// src/rates/subscribers.rs

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashSet;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::messenger::Messenger;
use crate::models::RateSnapshot;
use crate::storage::{self, Db};
use crate::utils::{format_date, format_rate};

/// Итог рассылки
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnnounceOutcome {
    pub sent: usize,
    pub failed: usize,
    /// Дата уже была разослана раньше или подписчиков нет
    pub skipped: bool,
}

/// Подписчики на уведомления о публикации курсов.
/// Набор хранится в SQLite и дублируется в памяти.
pub struct Subscribers {
    db: Db,
    members: RwLock<HashSet<i64>>,
    announcing: Mutex<()>,
}

impl Subscribers {
    pub async fn load(db: Db) -> Result<Self> {
        let ids = storage::list_subscribers(&db).await?;
        info!("Loaded {} CBR subscribers", ids.len());
        Ok(Self {
            db,
            members: RwLock::new(ids.into_iter().collect()),
            announcing: Mutex::new(()),
        })
    }

    pub async fn subscribe(&self, user_id: i64) -> Result<()> {
        storage::insert_subscriber(&self.db, user_id, Utc::now().timestamp()).await?;
        let mut members = self.members.write().await;
        members.insert(user_id);
        info!("User {} subscribed, total {}", user_id, members.len());
        Ok(())
    }

    pub async fn unsubscribe(&self, user_id: i64) -> Result<()> {
        storage::delete_subscriber(&self.db, user_id).await?;
        let mut members = self.members.write().await;
        members.remove(&user_id);
        info!("User {} unsubscribed, total {}", user_id, members.len());
        Ok(())
    }

    /// Переключает подписку, возвращает новое состояние
    pub async fn toggle(&self, user_id: i64) -> Result<bool> {
        if self.is_subscriber(user_id).await {
            self.unsubscribe(user_id).await?;
            Ok(false)
        } else {
            self.subscribe(user_id).await?;
            Ok(true)
        }
    }

    pub async fn is_subscriber(&self, user_id: i64) -> bool {
        self.members.read().await.contains(&user_id)
    }

    pub async fn list(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.members.read().await.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Рассылает новый снимок всем подписчикам, не чаще раза на дату.
    ///
    /// Дата считается разосланной после первой успешной доставки. Тех, кому
    /// доставить не удалось, отписываем. Если не дошло ни одно сообщение,
    /// это сбой связи: никого не трогаем, рассылка повторится позже.
    pub async fn announce(
        &self,
        messenger: &dyn Messenger,
        snapshot: &RateSnapshot,
        previous: Option<&RateSnapshot>,
        tracked: &[String],
    ) -> Result<AnnounceOutcome> {
        let date = snapshot.effective_date;
        let recipients = self.list().await;
        if recipients.is_empty() {
            return Ok(AnnounceOutcome { skipped: true, ..Default::default() });
        }
        // две рассылки одной даты не должны идти параллельно
        let _guard = self.announcing.lock().await;
        if storage::is_announced(&self.db, date).await? {
            info!("Rates for {} already announced", date);
            return Ok(AnnounceOutcome { skipped: true, ..Default::default() });
        }

        let published_at = Utc::now().format("%H:%M UTC").to_string();
        let text = format_announcement(snapshot, previous, tracked, &published_at);
        info!("Announcing rates for {} to {} subscribers", date, recipients.len());

        let results = join_all(recipients.iter().map(|&user_id| {
            let text = text.as_str();
            async move { (user_id, messenger.send_html(user_id, text).await) }
        }))
        .await;

        let mut outcome = AnnounceOutcome::default();
        let mut unreachable = Vec::new();
        for (user_id, res) in results {
            match res {
                Ok(()) => outcome.sent += 1,
                Err(e) => {
                    warn!("Failed to notify subscriber {}: {:#}", user_id, e);
                    outcome.failed += 1;
                    unreachable.push(user_id);
                }
            }
        }

        if outcome.sent == 0 {
            warn!("Announcement for {} reached nobody, will retry", date);
            return Ok(outcome);
        }
        storage::mark_announced(&self.db, date, Utc::now().timestamp()).await?;
        for user_id in unreachable {
            if let Err(e) = self.unsubscribe(user_id).await {
                warn!("Failed to drop subscriber {}: {:#}", user_id, e);
            }
        }
        info!("Announcement done: sent {}, failed {}", outcome.sent, outcome.failed);
        Ok(outcome)
    }
}

/// Текст рассылки: отслеживаемые валюты со сравнением с прошлым снимком
pub fn format_announcement(
    snapshot: &RateSnapshot,
    previous: Option<&RateSnapshot>,
    tracked: &[String],
    published_at: &str,
) -> String {
    let mut text = format!(
        "🚨 <b>Курсы ЦБ на {} опубликованы!</b> {}\n\n",
        format_date(snapshot.effective_date),
        published_at
    );
    for currency in tracked {
        let Some(new_rate) = snapshot.rate(currency) else {
            continue;
        };
        match previous.and_then(|p| p.rate(currency)) {
            Some(old_rate) => {
                let diff = new_rate - old_rate;
                let trend = if diff > Decimal::ZERO {
                    "📈"
                } else if diff < Decimal::ZERO {
                    "📉"
                } else {
                    "➖"
                };
                let sign = if diff > Decimal::ZERO { "+" } else { "" };
                text.push_str(&format!(
                    "{} <b>{}</b>: {} → <b>{}</b> ({}{})\n",
                    trend,
                    currency,
                    format_rate(old_rate),
                    format_rate(new_rate),
                    sign,
                    format_rate(diff)
                ));
            }
            None => {
                text.push_str(&format!("🆕 <b>{}</b>: <b>{}</b>\n", currency, format_rate(new_rate)));
            }
        }
    }
    text
}
