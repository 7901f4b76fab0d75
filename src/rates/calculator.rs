// src/rates/calculator.rs

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::utils::{format_date, format_rate, round_money};

/// Расчёт оплаты клиента в рублях
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalculationResult {
    pub currency: String,
    pub amount: Decimal,
    pub rate: Decimal,
    pub rub_amount: Decimal,
    pub commission_percent: Decimal,
    pub commission_amount: Decimal,
    pub total_amount: Decimal,
    pub rate_date: NaiveDate,
}

/// Верхняя граница суммы в валюте
pub const MAX_AMOUNT: Decimal = dec!(1000000000000);
/// Верхняя граница вознаграждения агента, %
pub const MAX_COMMISSION_PERCENT: Decimal = dec!(100);

impl CalculationResult {
    pub fn compute(
        currency: &str,
        amount: Decimal,
        rate: Decimal,
        commission_percent: Decimal,
        rate_date: NaiveDate,
    ) -> Result<Self> {
        let rub_amount = amount
            .checked_mul(rate)
            .map(round_money)
            .ok_or_else(|| anyhow!("{} {} x {} overflows", amount, currency, rate))?;
        let commission_amount = rub_amount
            .checked_mul(commission_percent)
            .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
            .map(round_money)
            .ok_or_else(|| anyhow!("commission {}% of {} overflows", commission_percent, rub_amount))?;
        let total_amount = rub_amount
            .checked_add(commission_amount)
            .map(round_money)
            .ok_or_else(|| anyhow!("total {} + {} overflows", rub_amount, commission_amount))?;
        Ok(Self {
            currency: currency.to_uppercase(),
            amount,
            rate,
            rub_amount,
            commission_percent,
            commission_amount,
            total_amount,
            rate_date,
        })
    }

    pub fn to_message(&self) -> String {
        format!(
            "💰 <b>Расчёт для клиента</b>\n\n\
             Сумма в валюте: {} {}\n\
             Курс ЦБ на {}: {} ₽ за {}\n\
             Сумма в рублях: {:.2} ₽\n\
             Вознаграждение агента ({}%): {:.2} ₽\n\
             💵 <b>Общая сумма в рублях: {:.2} ₽</b>",
            self.amount.normalize(),
            self.currency,
            format_date(self.rate_date),
            format_rate(self.rate),
            self.currency,
            self.rub_amount,
            self.commission_percent.normalize(),
            self.commission_amount,
            self.total_amount,
        )
    }
}
