// src/rates/cache.rs

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use std::time::Duration;
use tracing::{debug, info};

use crate::models::RateSnapshot;
use crate::storage::{self, Db};

/// Кэш снимков курсов с TTL, ключ = ISO-дата
#[derive(Debug, Clone)]
pub struct RatesCache {
    db: Db,
    ttl: Duration,
}

impl RatesCache {
    pub fn new(db: Db, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    pub async fn get(&self, date: NaiveDate) -> Result<Option<RateSnapshot>> {
        let found = storage::get_snapshot(&self.db, date, Utc::now().timestamp()).await?;
        debug!("Rates cache {} for {}", if found.is_some() { "HIT" } else { "MISS" }, date);
        Ok(found)
    }

    /// Последний снимок с датой не позже `date`
    pub async fn latest_on_or_before(&self, date: NaiveDate) -> Result<Option<RateSnapshot>> {
        let found = storage::get_latest_snapshot(&self.db, date, Utc::now().timestamp()).await?;
        debug!(
            "Rates cache latest for {}: {:?}",
            date,
            found.as_ref().map(|s| s.effective_date)
        );
        Ok(found)
    }

    /// Кладёт снимок под его фактической датой
    pub async fn put(&self, snapshot: &RateSnapshot) -> Result<()> {
        storage::upsert_snapshot(
            &self.db,
            snapshot,
            Utc::now().timestamp(),
            self.ttl.as_secs() as i64,
        )
        .await
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        let removed = storage::purge_expired(&self.db, Utc::now().timestamp()).await?;
        info!("Purged {} expired cache/pending rows", removed);
        Ok(removed)
    }
}
