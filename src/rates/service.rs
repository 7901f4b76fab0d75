// src/rates/service.rs

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::cache::RatesCache;
use crate::cbr::RateSource;
use crate::models::RateSnapshot;

/// Текущая дата по часам ЦБ
pub type Today = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Результат поиска снимка на дату
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotLookup {
    Found(RateSnapshot),
    /// Снимка с нужной датой нет. `latest` - что вернул источник вместо него
    NotPublished { target: NaiveDate, latest: Option<NaiveDate> },
}

/// Результат поиска курса валюты на дату
#[derive(Debug, Clone, PartialEq)]
pub enum RateLookup {
    Found { rate: Decimal, effective_date: NaiveDate },
    NotPublished { target: NaiveDate, latest: Option<NaiveDate> },
    /// Снимок есть, но такой валюты в нём нет
    UnknownCurrency { effective_date: NaiveDate },
}

/// Действует ли снимок с датой `effective` на дату `requested`.
///
/// ЦБ устанавливает курс в рабочий день на следующую календарную дату,
/// пятничный курс датирован субботой. Поэтому свежих снимков с датой
/// на воскресенье или понедельник не бывает, и субботний снимок действует
/// по понедельник включительно. Праздники здесь не учитываются.
pub fn snapshot_covers(effective: NaiveDate, requested: NaiveDate) -> bool {
    effective <= requested
        && effective
            .iter_days()
            .skip(1)
            .take_while(|day| *day <= requested)
            .all(|day| matches!(day.weekday(), Weekday::Sun | Weekday::Mon))
}

pub struct RateService {
    source: Arc<dyn RateSource>,
    cache: RatesCache,
    today: Today,
}

impl RateService {
    pub fn new(source: Arc<dyn RateSource>, cache: RatesCache, today: Today) -> Self {
        Self { source, cache, today }
    }

    pub fn today(&self) -> NaiveDate {
        (self.today)()
    }

    pub fn tomorrow(&self) -> NaiveDate {
        let today = self.today();
        today.succ_opt().unwrap_or(today)
    }

    pub fn cache(&self) -> &RatesCache {
        &self.cache
    }

    /// Снимок, действующий на запрошенную дату.
    ///
    /// На прошедшую дату и сегодня ответу ЦБ верим, если он не из будущего:
    /// после выходных и праздников он отдаёт последний установленный курс.
    /// Будущую дату закрывает только снимок, после которого новых публикаций
    /// до неё быть не может, иначе это устаревший курс.
    pub async fn snapshot_for(&self, requested: NaiveDate, cache_only: bool) -> Result<SnapshotLookup> {
        let today = self.today();

        let cached = match self.cache.get(requested).await {
            Ok(None) => self.cache.latest_on_or_before(requested).await,
            other => other,
        };
        match cached {
            Ok(Some(snapshot)) if !snapshot.is_empty() && snapshot_covers(snapshot.effective_date, requested) => {
                return Ok(SnapshotLookup::Found(snapshot));
            }
            Ok(_) => {}
            Err(e) => warn!("Rates cache read failed for {}: {:#}", requested, e),
        }

        if cache_only {
            return Ok(SnapshotLookup::NotPublished { target: requested, latest: None });
        }

        let fetched = self.source.fetch_daily(requested).await?;
        if !fetched.is_empty() {
            if let Err(e) = self.cache.put(&fetched).await {
                warn!("Rates cache write failed for {}: {:#}", fetched.effective_date, e);
            }
        }

        let in_force = if requested <= today {
            fetched.effective_date <= requested
        } else {
            snapshot_covers(fetched.effective_date, requested)
        };
        if in_force && !fetched.is_empty() {
            if fetched.effective_date != requested {
                info!("Rates for {} are in force since {}", requested, fetched.effective_date);
            }
            Ok(SnapshotLookup::Found(fetched))
        } else {
            info!(
                "Rates for {} not published yet (source returned {})",
                requested, fetched.effective_date
            );
            Ok(SnapshotLookup::NotPublished { target: requested, latest: Some(fetched.effective_date) })
        }
    }

    pub async fn get_rate(&self, requested: NaiveDate, currency: &str, cache_only: bool) -> Result<RateLookup> {
        let lookup = match self.snapshot_for(requested, cache_only).await? {
            SnapshotLookup::Found(snapshot) => match snapshot.rate(currency) {
                Some(rate) => RateLookup::Found { rate, effective_date: snapshot.effective_date },
                None => {
                    warn!(
                        "Currency {} missing in snapshot {} (available: {:?})",
                        currency,
                        snapshot.effective_date,
                        snapshot.rates.keys().collect::<Vec<_>>()
                    );
                    RateLookup::UnknownCurrency { effective_date: snapshot.effective_date }
                }
            },
            SnapshotLookup::NotPublished { target, latest } => RateLookup::NotPublished { target, latest },
        };
        Ok(lookup)
    }

    /// Официальный курс на дату, только если он действительно опубликован
    pub async fn get_cbr_rate(&self, requested: NaiveDate, currency: &str) -> Option<Decimal> {
        match self.get_rate(requested, currency, false).await {
            Ok(RateLookup::Found { rate, effective_date }) => {
                info!("CBR rate {} for {} found ({}): {}", currency, requested, effective_date, rate);
                Some(rate)
            }
            Ok(_) => {
                info!("CBR rate {} for {} not found", currency, requested);
                None
            }
            Err(e) => {
                error!("CBR rate lookup failed for {} {}: {:#}", currency, requested, e);
                None
            }
        }
    }

    /// Предыдущий снимок, для сравнения при рассылке
    pub async fn previous_snapshot(&self, date: NaiveDate) -> Result<Option<RateSnapshot>> {
        let Some(day_before) = date.pred_opt() else {
            return Ok(None);
        };
        if let Ok(Some(snapshot)) = self.cache.latest_on_or_before(day_before).await {
            if snapshot_covers(snapshot.effective_date, day_before) {
                return Ok(Some(snapshot));
            }
        }
        let fetched = self.source.fetch_daily(day_before).await?;
        if fetched.is_empty() || fetched.effective_date >= date {
            return Ok(None);
        }
        if let Err(e) = self.cache.put(&fetched).await {
            warn!("Rates cache write failed for {}: {:#}", fetched.effective_date, e);
        }
        Ok(Some(fetched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::testing::{d, snapshot, FakeSource};
    use crate::storage::Db;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    async fn service_with(source: Arc<FakeSource>, today: NaiveDate) -> RateService {
        let db = Db::in_memory().await.unwrap();
        let cache = RatesCache::new(db, Duration::from_secs(3600));
        RateService::new(source, cache, Arc::new(move || today))
    }

    #[test]
    fn test_snapshot_covers() {
        let friday = d(2025, 7, 25);
        let saturday = d(2025, 7, 26);
        // субботний снимок действует по понедельник
        assert!(snapshot_covers(saturday, saturday));
        assert!(snapshot_covers(saturday, d(2025, 7, 27)));
        assert!(snapshot_covers(saturday, d(2025, 7, 28)));
        assert!(!snapshot_covers(saturday, d(2025, 7, 29)));
        // пятничный на субботу уже не годится: её курс ставят в пятницу
        assert!(!snapshot_covers(friday, saturday));
        assert!(!snapshot_covers(saturday, friday));
    }

    #[tokio::test]
    async fn test_found_and_cached() {
        let today = d(2025, 7, 24);
        let source = Arc::new(FakeSource::default());
        source.respond(today, snapshot(today, &[("USD", dec!(78.5))]));
        let service = service_with(source.clone(), today).await;

        let first = service.get_rate(today, "usd", false).await.unwrap();
        assert_eq!(first, RateLookup::Found { rate: dec!(78.5), effective_date: today });

        // второй раз из кэша, без сети
        let second = service.get_rate(today, "USD", false).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_future_date_never_gets_stale_snapshot() {
        let today = d(2025, 7, 24);
        let tomorrow = d(2025, 7, 25);
        let source = Arc::new(FakeSource::default());
        // ЦБ на завтра отвечает сегодняшним курсом
        source.set_fallback(snapshot(today, &[("USD", dec!(78.5))]));
        let service = service_with(source.clone(), today).await;

        let lookup = service.get_rate(tomorrow, "USD", false).await.unwrap();
        assert_eq!(lookup, RateLookup::NotPublished { target: tomorrow, latest: Some(today) });
        assert_eq!(service.get_cbr_rate(tomorrow, "USD").await, None);

        // при этом сегодняшний снимок попал в кэш под своей датой
        let cached = service.cache().get(today).await.unwrap().unwrap();
        assert_eq!(cached.rate("USD"), Some(dec!(78.5)));
    }

    #[tokio::test]
    async fn test_same_value_on_new_date_is_published() {
        // курс совпал со вчерашним, но дата новая: это публикация
        let today = d(2025, 7, 24);
        let tomorrow = d(2025, 7, 25);
        let source = Arc::new(FakeSource::default());
        source.respond(tomorrow, snapshot(tomorrow, &[("USD", dec!(78.5))]));
        source.set_fallback(snapshot(today, &[("USD", dec!(78.5))]));
        let service = service_with(source, today).await;

        let lookup = service.get_rate(tomorrow, "USD", false).await.unwrap();
        assert_eq!(lookup, RateLookup::Found { rate: dec!(78.5), effective_date: tomorrow });
    }

    #[tokio::test]
    async fn test_cache_only_does_not_touch_network() {
        let today = d(2025, 7, 24);
        let source = Arc::new(FakeSource::default());
        let service = service_with(source.clone(), today).await;

        let lookup = service.get_rate(today, "USD", true).await.unwrap();
        assert_eq!(lookup, RateLookup::NotPublished { target: today, latest: None });
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_currency_and_source_error() {
        let today = d(2025, 7, 24);
        let source = Arc::new(FakeSource::default());
        source.respond(today, snapshot(today, &[("USD", dec!(78.5))]));
        let service = service_with(source, today).await;

        let lookup = service.get_rate(today, "XYZ", false).await.unwrap();
        assert_eq!(lookup, RateLookup::UnknownCurrency { effective_date: today });

        // на дату без ответа источник падает: это ошибка, а не "нет курса"
        assert!(service.get_rate(d(2025, 7, 23), "USD", false).await.is_err());
    }

    #[tokio::test]
    async fn test_monday_uses_saturday_snapshot() {
        let saturday = d(2025, 7, 26);
        let monday = d(2025, 7, 28);
        let source = Arc::new(FakeSource::default());
        // на понедельник ЦБ отдаёт снимок, датированный субботой
        source.respond(monday, snapshot(saturday, &[("USD", dec!(79.5527))]));
        let service = service_with(source.clone(), monday).await;

        let lookup = service.get_rate(monday, "USD", false).await.unwrap();
        assert_eq!(lookup, RateLookup::Found { rate: dec!(79.5527), effective_date: saturday });

        // повторный запрос закрывается кэшем
        let again = service.get_rate(monday, "USD", true).await.unwrap();
        assert_eq!(again, lookup);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_sunday_today_and_monday_tomorrow() {
        let saturday = d(2025, 7, 26);
        let sunday = d(2025, 7, 27);
        let monday = d(2025, 7, 28);
        let source = Arc::new(FakeSource::default());
        source.set_fallback(snapshot(saturday, &[("EUR", dec!(92.1))]));
        let service = service_with(source, sunday).await;

        let today = service.get_rate(sunday, "EUR", false).await.unwrap();
        assert_eq!(today, RateLookup::Found { rate: dec!(92.1), effective_date: saturday });
        // в воскресенье курс на понедельник уже известен
        let tomorrow = service.get_rate(monday, "EUR", false).await.unwrap();
        assert_eq!(tomorrow, RateLookup::Found { rate: dec!(92.1), effective_date: saturday });
    }

    #[tokio::test]
    async fn test_saturday_asks_for_sunday() {
        let saturday = d(2025, 7, 26);
        let source = Arc::new(FakeSource::default());
        source.set_fallback(snapshot(saturday, &[("USD", dec!(79.5527))]));
        let service = service_with(source, saturday).await;

        let lookup = service.get_rate(d(2025, 7, 27), "USD", false).await.unwrap();
        assert_eq!(lookup, RateLookup::Found { rate: dec!(79.5527), effective_date: saturday });
    }

    #[tokio::test]
    async fn test_after_holidays_uses_last_set_rate() {
        // после новогодних каникул действует курс от 28.12
        let last_set = d(2024, 12, 28);
        let first_workday = d(2025, 1, 9);
        let source = Arc::new(FakeSource::default());
        source.respond(first_workday, snapshot(last_set, &[("CNY", dec!(13.9719))]));
        let service = service_with(source.clone(), first_workday).await;

        let lookup = service.get_rate(first_workday, "CNY", false).await.unwrap();
        assert_eq!(lookup, RateLookup::Found { rate: dec!(13.9719), effective_date: last_set });
    }

    #[tokio::test]
    async fn test_friday_before_publication_of_saturday() {
        let friday = d(2025, 7, 25);
        let saturday = d(2025, 7, 26);
        let source = Arc::new(FakeSource::default());
        source.set_fallback(snapshot(friday, &[("USD", dec!(79.1))]));
        let service = service_with(source.clone(), friday).await;

        let lookup = service.get_rate(saturday, "USD", false).await.unwrap();
        assert_eq!(lookup, RateLookup::NotPublished { target: saturday, latest: Some(friday) });

        source.respond(saturday, snapshot(saturday, &[("USD", dec!(79.5527))]));
        let lookup = service.get_rate(saturday, "USD", false).await.unwrap();
        assert_eq!(lookup, RateLookup::Found { rate: dec!(79.5527), effective_date: saturday });
    }

    #[tokio::test]
    async fn test_previous_snapshot() {
        let today = d(2025, 7, 24);
        let tomorrow = d(2025, 7, 25);
        let source = Arc::new(FakeSource::default());
        source.respond(today, snapshot(today, &[("USD", dec!(78.5))]));
        let service = service_with(source, today).await;

        let prev = service.previous_snapshot(tomorrow).await.unwrap().unwrap();
        assert_eq!(prev.effective_date, today);
    }
}
