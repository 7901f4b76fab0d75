// src/rates/mod.rs

//! Курсы ЦБ: кэш, проверка даты публикации, ожидание курса на завтра,
//! подписчики и отложенные расчёты.

pub mod cache;
pub mod calculator;
pub mod desk;
pub mod monitor;
pub mod service;
pub mod subscribers;

pub use cache::RatesCache;
pub use calculator::{CalculationResult, MAX_AMOUNT, MAX_COMMISSION_PERCENT};
pub use desk::{CalcReply, RateDesk, RateReply};
pub use monitor::{Monitor, MonitorSettings, WatchKey};
pub use service::{snapshot_covers, RateLookup, RateService, SnapshotLookup, Today};
pub use subscribers::Subscribers;

#[cfg(test)]
pub(crate) mod testing {
    use crate::cbr::RateSource;
    use crate::messenger::Messenger;
    use crate::models::RateSnapshot;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    pub fn snapshot(date: NaiveDate, rates: &[(&str, Decimal)]) -> RateSnapshot {
        let rates: BTreeMap<String, Decimal> =
            rates.iter().map(|(c, r)| (c.to_string(), *r)).collect();
        RateSnapshot::new(date, rates)
    }

    /// Источник, который отвечает заранее заданными снимками.
    /// Для незаданной даты отдаёт `fallback` (как ЦБ отдаёт последний известный курс).
    #[derive(Default)]
    pub struct FakeSource {
        pub responses: Mutex<HashMap<NaiveDate, RateSnapshot>>,
        pub fallback: Mutex<Option<RateSnapshot>>,
        pub calls: AtomicUsize,
    }

    impl FakeSource {
        pub fn respond(&self, requested: NaiveDate, snapshot: RateSnapshot) {
            self.responses.lock().unwrap().insert(requested, snapshot);
        }

        pub fn set_fallback(&self, snapshot: RateSnapshot) {
            *self.fallback.lock().unwrap() = Some(snapshot);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateSource for FakeSource {
        async fn fetch_daily(&self, date: NaiveDate) -> anyhow::Result<RateSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(s) = self.responses.lock().unwrap().get(&date) {
                return Ok(s.clone());
            }
            self.fallback
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow!("no response configured for {}", date))
        }
    }

    /// Запоминает отправленные сообщения, может "не доставлять" выбранным пользователям
    #[derive(Default)]
    pub struct RecordingMessenger {
        pub sent: Mutex<Vec<(i64, String)>>,
        pub unreachable: Mutex<HashSet<i64>>,
    }

    impl RecordingMessenger {
        pub fn messages_for(&self, chat_id: i64) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| *id == chat_id)
                .map(|(_, text)| text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn send_html(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
            if self.unreachable.lock().unwrap().contains(&chat_id) {
                return Err(anyhow!("bot was blocked by the user"));
            }
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }
}
