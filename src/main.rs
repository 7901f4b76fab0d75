use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::Bot;
use tracing::warn;

use cbrbot::cbr::CbrClient;
use cbrbot::config::Config;
use cbrbot::messenger::Messenger;
use cbrbot::rates::{Monitor, MonitorSettings, RateDesk, RateService, RatesCache, Subscribers};
use cbrbot::{logger, storage, telegram};

#[tokio::main]
async fn main() -> Result<()> {
    // 1) .env, конфиг и логгер
    dotenv::dotenv().ok();
    let cfg = Arc::new(Config::load().context("Failed to load config")?);
    logger::init(&cfg);

    // 2) SQLite
    let db = storage::Db::connect(&cfg.sqlite_path).await?;
    let cache = RatesCache::new(db.clone(), cfg.rates_ttl());
    if let Err(e) = cache.purge_expired().await {
        warn!("Startup purge failed: {:#}", e);
    }

    // 3) Telegram‑бот
    let bot = Bot::new(&cfg.telegram_token);
    let messenger: Arc<dyn Messenger> = Arc::new(bot.clone());

    // 4) курсы ЦБ
    let client = CbrClient::new(&cfg.cbr_base_url, cfg.http_timeout())?;
    let today_cfg = cfg.clone();
    let service = Arc::new(RateService::new(
        Arc::new(client),
        cache,
        Arc::new(move || today_cfg.bank_today()),
    ));
    let subscribers = Arc::new(Subscribers::load(db.clone()).await?);

    let monitor = Monitor::new(
        service.clone(),
        subscribers.clone(),
        db.clone(),
        messenger,
        MonitorSettings {
            interval: cfg.poll_interval(),
            max_checks: cfg.poll_max_checks(),
            max_hours: cfg.poll_max_hours,
            tracked: cfg.tracked_currencies.clone(),
        },
    );
    let desk = Arc::new(RateDesk::new(
        service,
        monitor.clone(),
        subscribers,
        db,
        cfg.pending_ttl(),
        cfg.tracked_currencies.clone(),
    ));

    // 5) фоновые задачи
    if let Err(e) = monitor.resume_pending().await {
        warn!("Failed to resume pending calculations: {:#}", e);
    }
    monitor.start_publication_watcher().await;

    // 6) запускаем диспетчер
    telegram::run(bot, cfg, desk, monitor).await;
    Ok(())
}
