// src/utils.rs

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Округление до копеек (2 знака, половина от нуля)
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Разбор числа из сообщения пользователя: "1 000,50" -> 1000.50
pub fn parse_decimal_input(text: &str) -> Option<Decimal> {
    let normalized: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if normalized.is_empty() {
        return None;
    }
    Decimal::from_str(&normalized).ok()
}

/// Дата в формате 17.10.2026
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

/// Курс с четырьмя знаками после запятой
pub fn format_rate(rate: Decimal) -> String {
    format!("{:.4}", rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_money() {
        assert_eq!(round_money(dec!(123.455)), dec!(123.46));
        assert_eq!(round_money(dec!(-0.005)), dec!(-0.01));
        assert_eq!(round_money(dec!(10)), dec!(10));
    }

    #[test]
    fn test_parse_decimal_input() {
        assert_eq!(parse_decimal_input("1000"), Some(dec!(1000)));
        assert_eq!(parse_decimal_input(" 3,5 "), Some(dec!(3.5)));
        assert_eq!(parse_decimal_input("1 000.25"), Some(dec!(1000.25)));
        assert_eq!(parse_decimal_input("abc"), None);
        assert_eq!(parse_decimal_input("   "), None);
    }

    #[test]
    fn test_format_helpers() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 26).unwrap();
        assert_eq!(format_date(date), "26.07.2025");
        assert_eq!(format_rate(dec!(78.5)), "78.5000");
    }
}
