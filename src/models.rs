// src/models.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of official rates as published by the bank.
///
/// `effective_date` is the date the upstream reports in its response,
/// not the date somebody asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub effective_date: NaiveDate,
    pub rates: BTreeMap<String, Decimal>,
}

impl RateSnapshot {
    pub fn new(effective_date: NaiveDate, rates: BTreeMap<String, Decimal>) -> Self {
        Self { effective_date, rates }
    }

    /// Rate of one unit of `currency` in roubles
    pub fn rate(&self, currency: &str) -> Option<Decimal> {
        self.rates.get(&currency.to_uppercase()).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Deferred calculation waiting for a rate that is not published yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCalculation {
    pub user_id: i64,
    pub date: NaiveDate,
    pub currency: String,
    pub amount: Decimal,
    pub commission_percent: Decimal,
    pub created_at: i64,
}

/// Which day the user asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Day {
    Today,
    Tomorrow,
}

impl Day {
    pub fn as_str(&self) -> &'static str {
        match self {
            Day::Today => "today",
            Day::Tomorrow => "tomorrow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "today" => Some(Day::Today),
            "tomorrow" => Some(Day::Tomorrow),
            _ => None,
        }
    }

    /// Родительный падеж для текстов бота
    pub fn label(&self) -> &'static str {
        match self {
            Day::Today => "сегодня",
            Day::Tomorrow => "завтра",
        }
    }
}
