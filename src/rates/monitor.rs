// src/rates/monitor.rs

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::calculator::CalculationResult;
use super::service::{RateLookup, RateService, SnapshotLookup};
use super::subscribers::Subscribers;
use crate::messenger::Messenger;
use crate::models::RateSnapshot;
use crate::storage::{self, Db};
use crate::utils::{format_date, format_rate};

/// Ключ ожидания: пользователь + валюта + дата
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub user_id: i64,
    pub currency: String,
    pub date: NaiveDate,
}

impl WatchKey {
    pub fn new(user_id: i64, currency: &str, date: NaiveDate) -> Self {
        Self { user_id, currency: currency.to_uppercase(), date }
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.user_id, self.currency, self.date)
    }
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub max_checks: u32,
    /// Сколько часов ждём, только для текста сообщения
    pub max_hours: u64,
    pub tracked: Vec<String>,
}

struct MonitorInner {
    service: Arc<RateService>,
    subscribers: Arc<Subscribers>,
    db: Db,
    messenger: Arc<dyn Messenger>,
    settings: MonitorSettings,
    watches: Mutex<HashMap<WatchKey, AbortHandle>>,
    background: Mutex<Vec<AbortHandle>>,
}

/// Фоновое ожидание публикации курсов
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Monitor {
    pub fn new(
        service: Arc<RateService>,
        subscribers: Arc<Subscribers>,
        db: Db,
        messenger: Arc<dyn Messenger>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                service,
                subscribers,
                db,
                messenger,
                settings,
                watches: Mutex::new(HashMap::new()),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Запускает ожидание. false, если такое ожидание уже идёт.
    pub async fn watch(&self, key: WatchKey) -> bool {
        // лок держим до вставки хэндла, иначе задача может не найти себя при выходе
        let mut watches = self.inner.watches.lock().await;
        if watches.get(&key).is_some_and(|h| !h.is_finished()) {
            debug!("Watch {} already running", key);
            return false;
        }
        let inner = self.inner.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            run_watch(inner.clone(), task_key.clone()).await;
            inner.watches.lock().await.remove(&task_key);
        });
        info!(
            "Watch {} started: every {:?}, up to {} checks",
            key, self.inner.settings.interval, self.inner.settings.max_checks
        );
        watches.insert(key, task.abort_handle());
        true
    }

    pub async fn is_watching(&self, key: &WatchKey) -> bool {
        self.inner.watches.lock().await.get(key).is_some_and(|h| !h.is_finished())
    }

    /// Активные ожидания пользователя
    pub async fn active_for(&self, user_id: i64) -> Vec<WatchKey> {
        let watches = self.inner.watches.lock().await;
        let mut keys: Vec<WatchKey> = watches
            .iter()
            .filter(|(k, h)| k.user_id == user_id && !h.is_finished())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort_by(|a, b| (a.date, &a.currency).cmp(&(b.date, &b.currency)));
        keys
    }

    /// Отменяет ожидание и отложенный расчёт в этой валюте на эту дату
    pub async fn cancel(&self, user_id: i64, currency: &str, date: NaiveDate) -> Result<bool> {
        let key = WatchKey::new(user_id, currency, date);
        let handle = self.inner.watches.lock().await.remove(&key);
        let was_running = match handle {
            Some(h) => {
                h.abort();
                info!("Watch {} cancelled", key);
                true
            }
            None => false,
        };
        delete_pending_for(&self.inner.db, &key).await?;
        Ok(was_running)
    }

    /// Останавливает все фоновые задачи
    pub async fn shutdown(&self) {
        let mut watches = self.inner.watches.lock().await;
        for (key, handle) in watches.drain() {
            debug!("Aborting watch {}", key);
            handle.abort();
        }
        for handle in self.inner.background.lock().await.drain(..) {
            handle.abort();
        }
        info!("Rate monitor stopped");
    }

    /// Перезапускает ожидания по отложенным расчётам после рестарта
    pub async fn resume_pending(&self) -> Result<usize> {
        let today = self.inner.service.today();
        let pending = storage::get_all_pending(&self.inner.db, Utc::now().timestamp()).await?;
        let mut resumed = 0;
        for calc in pending {
            if calc.date < today {
                info!("Dropping outdated pending calculation {}:{}", calc.user_id, calc.date);
                storage::delete_pending(&self.inner.db, calc.user_id, calc.date).await?;
                continue;
            }
            if self.watch(WatchKey::new(calc.user_id, &calc.currency, calc.date)).await {
                resumed += 1;
            }
        }
        info!("Resumed {} watches for pending calculations", resumed);
        Ok(resumed)
    }

    /// Цикл, который ждёт курс на завтра для рассылки подписчикам
    pub async fn start_publication_watcher(&self) {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            loop {
                if !inner.subscribers.is_empty().await {
                    let tomorrow = inner.service.tomorrow();
                    if let Err(e) = watch_publication_once(&inner, tomorrow).await {
                        warn!("Publication check for {} failed: {:#}", tomorrow, e);
                    }
                }
                tokio::time::sleep(inner.settings.interval).await;
            }
        });
        self.inner.background.lock().await.push(task.abort_handle());
        info!("Publication watcher started");
    }
}

async fn watch_publication_once(inner: &MonitorInner, date: NaiveDate) -> Result<()> {
    if storage::is_announced(&inner.db, date).await? {
        return Ok(());
    }
    if let SnapshotLookup::Found(snapshot) = inner.service.snapshot_for(date, false).await? {
        announce(inner, &snapshot).await;
    }
    Ok(())
}

async fn announce(inner: &MonitorInner, snapshot: &RateSnapshot) {
    let previous = match inner.service.previous_snapshot(snapshot.effective_date).await {
        Ok(p) => p,
        Err(e) => {
            warn!("No previous snapshot for {}: {:#}", snapshot.effective_date, e);
            None
        }
    };
    if let Err(e) = inner
        .subscribers
        .announce(inner.messenger.as_ref(), snapshot, previous.as_ref(), &inner.settings.tracked)
        .await
    {
        error!("Announcement for {} failed: {:#}", snapshot.effective_date, e);
    }
}

async fn run_watch(inner: Arc<MonitorInner>, key: WatchKey) {
    let max_checks = inner.settings.max_checks.max(1);
    for check in 1..=max_checks {
        match inner.service.get_rate(key.date, &key.currency, false).await {
            Ok(RateLookup::Found { rate, effective_date }) => {
                info!("Watch {}: rate {} found on check {}", key, rate, check);
                on_published(&inner, &key, rate, effective_date).await;
                return;
            }
            Ok(RateLookup::UnknownCurrency { effective_date }) => {
                warn!("Watch {}: no such currency in snapshot {}", key, effective_date);
                let text = format!(
                    "❌ <b>Валюта {} не найдена в курсах ЦБ на {}.</b>",
                    key.currency,
                    format_date(effective_date)
                );
                send(&inner, key.user_id, &text).await;
                drop_pending(&inner, &key).await;
                return;
            }
            Ok(RateLookup::NotPublished { .. }) => {
                debug!("Watch {}: check {}/{} not published", key, check, max_checks);
            }
            Err(e) => {
                error!("Watch {}: check {}/{} failed: {:#}", key, check, max_checks, e);
            }
        }
        if check < max_checks {
            tokio::time::sleep(inner.settings.interval).await;
        }
    }

    info!("Watch {} expired after {} checks", key, max_checks);
    let text = format!(
        "⚠️ <b>Курс ЦБ на {} не появился за {} часов.</b>\n\n\
         🔄 <b>Попробуйте запросить курс позже или обратитесь к официальному сайту ЦБ.</b>",
        format_date(key.date),
        inner.settings.max_hours
    );
    send(&inner, key.user_id, &text).await;
    drop_pending(&inner, &key).await;
}

async fn on_published(inner: &MonitorInner, key: &WatchKey, rate: Decimal, effective_date: NaiveDate) {
    let text = format!(
        "✅ <b>Курс ЦБ на {} опубликован:</b>\n💱 <b>{}:</b> {} ₽",
        format_date(effective_date),
        key.currency,
        format_rate(rate)
    );
    send(inner, key.user_id, &text).await;

    if let Err(e) = resolve_pending(inner, key, effective_date).await {
        error!("Watch {}: pending calculation failed: {:#}", key, e);
    }

    match inner.service.snapshot_for(key.date, true).await {
        Ok(SnapshotLookup::Found(snapshot)) => announce(inner, &snapshot).await,
        Ok(SnapshotLookup::NotPublished { .. }) => debug!("Watch {}: snapshot not in cache", key),
        Err(e) => warn!("Watch {}: snapshot lookup failed: {:#}", key, e),
    }
}

/// Досчитывает отложенный расчёт пользователя на эту дату
async fn resolve_pending(inner: &MonitorInner, key: &WatchKey, effective_date: NaiveDate) -> Result<()> {
    let Some(calc) = storage::get_pending(&inner.db, key.user_id, key.date, Utc::now().timestamp()).await? else {
        return Ok(());
    };
    // расчёт мог быть в другой валюте, чем ожидание
    let rate = if calc.currency == key.currency {
        inner.service.get_rate(key.date, &key.currency, true).await?
    } else {
        inner.service.get_rate(key.date, &calc.currency, false).await?
    };
    let RateLookup::Found { rate, .. } = rate else {
        warn!("Watch {}: no {} rate for pending calculation", key, calc.currency);
        return Ok(());
    };
    match CalculationResult::compute(&calc.currency, calc.amount, rate, calc.commission_percent, effective_date) {
        Ok(result) => {
            send(inner, key.user_id, &result.to_message()).await;
            info!("Watch {}: pending calculation resolved, total {}", key, result.total_amount);
        }
        Err(e) => {
            error!("Watch {}: pending calculation rejected: {:#}", key, e);
            send(inner, key.user_id, "❌ <b>Не удалось выполнить отложенный расчёт: сумма слишком велика.</b>").await;
        }
    }
    storage::delete_pending(&inner.db, key.user_id, key.date).await?;
    Ok(())
}

/// Удаляет отложенный расчёт, только если он в валюте этого ожидания
async fn delete_pending_for(db: &Db, key: &WatchKey) -> Result<bool> {
    match storage::get_pending(db, key.user_id, key.date, Utc::now().timestamp()).await? {
        Some(calc) if calc.currency == key.currency => storage::delete_pending(db, key.user_id, key.date).await,
        Some(calc) => {
            debug!("Watch {}: keeping pending calculation in {}", key, calc.currency);
            Ok(false)
        }
        None => Ok(false),
    }
}

async fn drop_pending(inner: &MonitorInner, key: &WatchKey) {
    if let Err(e) = delete_pending_for(&inner.db, key).await {
        warn!("Watch {}: failed to drop pending calculation: {:#}", key, e);
    }
}

async fn send(inner: &MonitorInner, user_id: i64, text: &str) {
    if let Err(e) = inner.messenger.send_html(user_id, text).await {
        error!("Failed to send message to {}: {:#}", user_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PendingCalculation;
    use crate::rates::cache::RatesCache;
    use crate::rates::testing::{d, snapshot, FakeSource, RecordingMessenger};
    use rust_decimal_macros::dec;

    const TODAY: (i32, u32, u32) = (2025, 7, 24);

    struct Harness {
        monitor: Monitor,
        source: Arc<FakeSource>,
        messenger: Arc<RecordingMessenger>,
        subscribers: Arc<Subscribers>,
        db: Db,
    }

    async fn harness(max_checks: u32) -> Harness {
        let db = Db::in_memory().await.unwrap();
        let source = Arc::new(FakeSource::default());
        let today = d(TODAY.0, TODAY.1, TODAY.2);
        let cache = RatesCache::new(db.clone(), Duration::from_secs(3600));
        let service = Arc::new(RateService::new(source.clone(), cache, Arc::new(move || today)));
        let subscribers = Arc::new(Subscribers::load(db.clone()).await.unwrap());
        let messenger = Arc::new(RecordingMessenger::default());
        let settings = MonitorSettings {
            interval: Duration::from_millis(20),
            max_checks,
            max_hours: 15,
            tracked: vec!["USD".into(), "EUR".into()],
        };
        let monitor = Monitor::new(service, subscribers.clone(), db.clone(), messenger.clone(), settings);
        Harness { monitor, source, messenger, subscribers, db }
    }

    async fn wait_until_idle(monitor: &Monitor, key: &WatchKey) {
        for _ in 0..200 {
            if !monitor.is_watching(key).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("watch {} did not finish", key);
    }

    #[test]
    fn test_watch_key_display() {
        let key = WatchKey::new(42, "usd", d(2025, 7, 25));
        assert_eq!(key.to_string(), "42:USD:2025-07-25");
    }

    #[tokio::test]
    async fn test_published_resolves_pending_and_announces() {
        let h = harness(50).await;
        let today = d(TODAY.0, TODAY.1, TODAY.2);
        let tomorrow = d(2025, 7, 25);
        h.source.set_fallback(snapshot(today, &[("USD", dec!(78.5))]));
        h.subscribers.subscribe(7).await.unwrap();
        storage::upsert_pending(
            &h.db,
            &PendingCalculation {
                user_id: 1,
                date: tomorrow,
                currency: "USD".into(),
                amount: dec!(100),
                commission_percent: dec!(2),
                created_at: Utc::now().timestamp(),
            },
            3600,
        )
        .await
        .unwrap();

        let key = WatchKey::new(1, "USD", tomorrow);
        assert!(h.monitor.watch(key.clone()).await);
        // повторный запуск того же ключа ничего не делает
        assert!(!h.monitor.watch(key.clone()).await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.messenger.messages_for(1).is_empty());

        h.source.respond(tomorrow, snapshot(tomorrow, &[("USD", dec!(79)), ("EUR", dec!(92))]));
        wait_until_idle(&h.monitor, &key).await;

        let user_msgs = h.messenger.messages_for(1);
        assert_eq!(user_msgs.len(), 2);
        assert!(user_msgs[0].contains("79.0000"));
        // 100 * 79 = 7900, 2% = 158
        assert!(user_msgs[1].contains("8058.00"));
        assert!(storage::get_pending(&h.db, 1, tomorrow, Utc::now().timestamp()).await.unwrap().is_none());

        let broadcast = h.messenger.messages_for(7);
        assert_eq!(broadcast.len(), 1);
        assert!(broadcast[0].contains("📈 <b>USD</b>"));
    }

    #[tokio::test]
    async fn test_timeout_drops_pending() {
        let h = harness(3).await;
        let today = d(TODAY.0, TODAY.1, TODAY.2);
        let tomorrow = d(2025, 7, 25);
        h.source.set_fallback(snapshot(today, &[("USD", dec!(78.5))]));
        storage::upsert_pending(
            &h.db,
            &PendingCalculation {
                user_id: 5,
                date: tomorrow,
                currency: "USD".into(),
                amount: dec!(10),
                commission_percent: dec!(1),
                created_at: Utc::now().timestamp(),
            },
            3600,
        )
        .await
        .unwrap();

        let key = WatchKey::new(5, "USD", tomorrow);
        h.monitor.watch(key.clone()).await;
        wait_until_idle(&h.monitor, &key).await;

        let msgs = h.messenger.messages_for(5);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("не появился за 15 часов"));
        assert_eq!(h.source.calls(), 3);
        assert!(storage::get_all_pending(&h.db, Utc::now().timestamp()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_errors_do_not_stop_watch_and_cancel() {
        // источник всё время падает
        let h = harness(1000).await;
        let tomorrow = d(2025, 7, 25);
        let key = WatchKey::new(3, "EUR", tomorrow);
        h.monitor.watch(key.clone()).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(h.source.calls() >= 2);
        assert!(h.monitor.is_watching(&key).await);
        assert_eq!(h.monitor.active_for(3).await, vec![key.clone()]);

        assert!(h.monitor.cancel(3, "eur", tomorrow).await.unwrap());
        assert!(!h.monitor.is_watching(&key).await);
        assert!(h.messenger.messages_for(3).is_empty());
    }

    #[tokio::test]
    async fn test_resume_pending() {
        let h = harness(1000).await;
        let now = Utc::now().timestamp();
        for (user_id, date) in [(1, d(2025, 7, 25)), (2, d(2025, 7, 20))] {
            storage::upsert_pending(
                &h.db,
                &PendingCalculation {
                    user_id,
                    date,
                    currency: "USD".into(),
                    amount: dec!(1),
                    commission_percent: dec!(0),
                    created_at: now,
                },
                3600,
            )
            .await
            .unwrap();
        }

        assert_eq!(h.monitor.resume_pending().await.unwrap(), 1);
        assert!(h.monitor.is_watching(&WatchKey::new(1, "USD", d(2025, 7, 25))).await);
        // устаревший расчёт удалён
        assert!(storage::get_pending(&h.db, 2, d(2025, 7, 20), now).await.unwrap().is_none());
        h.monitor.shutdown().await;
        assert!(h.monitor.active_for(1).await.is_empty());
    }

    fn pending(user_id: i64, date: NaiveDate, currency: &str, amount: Decimal) -> PendingCalculation {
        PendingCalculation {
            user_id,
            date,
            currency: currency.into(),
            amount,
            commission_percent: dec!(1),
            created_at: Utc::now().timestamp(),
        }
    }

    async fn wait_for_messages(messenger: &RecordingMessenger, chat_id: i64, count: usize) {
        for _ in 0..200 {
            if messenger.messages_for(chat_id).len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("chat {} got {} messages, expected {}", chat_id, messenger.messages_for(chat_id).len(), count);
    }

    #[tokio::test]
    async fn test_oversized_pending_is_dropped_without_panic() {
        let h = harness(50).await;
        let tomorrow = d(2025, 7, 25);
        h.source.respond(tomorrow, snapshot(tomorrow, &[("USD", dec!(79.5527))]));
        let huge = crate::utils::parse_decimal_input("79228162514264337593543950335").unwrap();
        storage::upsert_pending(&h.db, &pending(6, tomorrow, "USD", huge), 3600).await.unwrap();

        let key = WatchKey::new(6, "USD", tomorrow);
        h.monitor.watch(key.clone()).await;
        wait_until_idle(&h.monitor, &key).await;

        let msgs = h.messenger.messages_for(6);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[1].contains("Не удалось выполнить отложенный расчёт"));
        assert!(storage::get_pending(&h.db, 6, tomorrow, Utc::now().timestamp()).await.unwrap().is_none());
        // после рестарта поднимать нечего
        assert_eq!(h.monitor.resume_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_keeps_pending_in_other_currency() {
        let h = harness(1000).await;
        let today = d(TODAY.0, TODAY.1, TODAY.2);
        let tomorrow = d(2025, 7, 25);
        h.source.set_fallback(snapshot(today, &[("USD", dec!(78.5)), ("EUR", dec!(91.2))]));
        storage::upsert_pending(&h.db, &pending(8, tomorrow, "EUR", dec!(50)), 3600).await.unwrap();

        h.monitor.watch(WatchKey::new(8, "USD", tomorrow)).await;
        h.monitor.watch(WatchKey::new(8, "EUR", tomorrow)).await;

        assert!(h.monitor.cancel(8, "USD", tomorrow).await.unwrap());
        let kept = storage::get_pending(&h.db, 8, tomorrow, Utc::now().timestamp()).await.unwrap().unwrap();
        assert_eq!(kept.currency, "EUR");
        assert!(h.monitor.is_watching(&WatchKey::new(8, "EUR", tomorrow)).await);

        assert!(h.monitor.cancel(8, "EUR", tomorrow).await.unwrap());
        assert!(storage::get_pending(&h.db, 8, tomorrow, Utc::now().timestamp()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_timeout_keeps_pending_in_other_currency() {
        let h = harness(2).await;
        let today = d(TODAY.0, TODAY.1, TODAY.2);
        let tomorrow = d(2025, 7, 25);
        h.source.set_fallback(snapshot(today, &[("USD", dec!(78.5))]));
        storage::upsert_pending(&h.db, &pending(9, tomorrow, "EUR", dec!(50)), 3600).await.unwrap();

        let key = WatchKey::new(9, "USD", tomorrow);
        h.monitor.watch(key.clone()).await;
        wait_until_idle(&h.monitor, &key).await;

        assert!(h.messenger.messages_for(9)[0].contains("не появился"));
        assert!(storage::get_pending(&h.db, 9, tomorrow, Utc::now().timestamp()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_publication_watcher_waits_for_subscribers() {
        let h = harness(1).await;
        let tomorrow = d(2025, 7, 25);
        h.source.respond(tomorrow, snapshot(tomorrow, &[("USD", dec!(79))]));

        h.monitor.start_publication_watcher().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        // без подписчиков источник не опрашивается
        assert_eq!(h.source.calls(), 0);
        h.monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_publication_watcher_announces_once() {
        let h = harness(1).await;
        let today = d(TODAY.0, TODAY.1, TODAY.2);
        let tomorrow = d(2025, 7, 25);
        h.source.set_fallback(snapshot(today, &[("USD", dec!(78.5))]));
        h.subscribers.subscribe(7).await.unwrap();

        h.monitor.start_publication_watcher().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(h.messenger.messages_for(7).is_empty());

        h.source.respond(tomorrow, snapshot(tomorrow, &[("USD", dec!(79))]));
        wait_for_messages(&h.messenger, 7, 1).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let msgs = h.messenger.messages_for(7);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("📈 <b>USD</b>: 78.5000 → <b>79.0000</b>"));
        assert!(storage::is_announced(&h.db, tomorrow).await.unwrap());
        h.monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_publication_watcher_skips_announced_date() {
        let h = harness(1).await;
        let tomorrow = d(2025, 7, 25);
        h.source.respond(tomorrow, snapshot(tomorrow, &[("USD", dec!(79))]));
        h.subscribers.subscribe(7).await.unwrap();
        storage::mark_announced(&h.db, tomorrow, Utc::now().timestamp()).await.unwrap();

        h.monitor.start_publication_watcher().await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(h.messenger.messages_for(7).is_empty());
        assert_eq!(h.source.calls(), 0);
        h.monitor.shutdown().await;
    }
}
