// src/cbr/mod.rs

pub mod client;
pub mod types;

pub use client::{parse_daily_xml, CbrClient};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::RateSnapshot;

/// Источник официальных курсов
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Курсы, которые источник отдаёт на запрошенную дату.
    /// Фактическая дата снимка может отличаться от запрошенной.
    async fn fetch_daily(&self, date: NaiveDate) -> anyhow::Result<RateSnapshot>;
}
