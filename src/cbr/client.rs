// src/cbr/client.rs

use super::types::{ValCurs, Valute};
use super::RateSource;
use crate::models::RateSnapshot;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Url};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const DAILY_PATH: &str = "scripts/XML_daily.asp";

/// Клиент XML-сервиса ЦБ РФ
#[derive(Debug, Clone)]
pub struct CbrClient {
    client: Client,
    base_url: Url,
}

impl CbrClient {
    /// `base_url` например `https://www.cbr.ru`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| anyhow!("Invalid CBR URL `{}`: {}", base_url, e))?;
        // join() отбрасывает последний сегмент без завершающего `/`
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("HTTP client build error: {}", e))?;

        Ok(Self { client, base_url })
    }

    fn daily_url(&self, date: NaiveDate) -> Result<Url> {
        let mut url = self.base_url.join(DAILY_PATH)?;
        url.query_pairs_mut()
            .append_pair("date_req", &date.format("%d/%m/%Y").to_string());
        Ok(url)
    }
}

#[async_trait]
impl RateSource for CbrClient {
    async fn fetch_daily(&self, date: NaiveDate) -> Result<RateSnapshot> {
        let url = self.daily_url(date)?;
        info!("CBR request for {}: {}", date, url);

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("CBR request failed: {}", url))?;
        let status = resp.status();
        if !status.is_success() {
            warn!("CBR responded {} for {}", status, url);
            return Err(anyhow!("CBR responded with status {}", status));
        }
        let text = resp.text().await.context("Failed to read CBR response body")?;

        let snapshot = parse_daily_xml(&text)?;
        info!(
            "CBR parsed: requested {}, effective {}, {} currencies",
            date,
            snapshot.effective_date,
            snapshot.rates.len()
        );
        Ok(snapshot)
    }
}

/// Разбор ответа `XML_daily.asp`.
///
/// Дата снимка берётся из атрибута `Date` корня. Без неё ответ
/// считается ошибкой: подставлять вместо неё сегодняшнюю дату нельзя.
pub fn parse_daily_xml(text: &str) -> Result<RateSnapshot> {
    let mut de = quick_xml::de::Deserializer::from_str(text);
    let val_curs: ValCurs = serde_path_to_error::deserialize(&mut de)
        .map_err(|e| anyhow!("CBR XML parse error at `{}`: {}", e.path(), e.inner()))?;

    let date_str = val_curs
        .date
        .as_deref()
        .ok_or_else(|| anyhow!("CBR XML has no Date attribute"))?;
    let effective_date = NaiveDate::parse_from_str(date_str.trim(), "%d.%m.%Y")
        .with_context(|| format!("CBR XML has malformed Date `{}`", date_str))?;

    let mut rates = BTreeMap::new();
    for valute in &val_curs.valute {
        match unit_rate(valute) {
            Some(rate) => {
                debug!("CBR rate {} = {}", valute.char_code, rate);
                rates.insert(valute.char_code.trim().to_uppercase(), rate);
            }
            None => warn!(
                "Skipping CBR entry {} ({:?}): value `{}`, nominal `{}`",
                valute.char_code, valute.id, valute.value, valute.nominal
            ),
        }
    }

    Ok(RateSnapshot::new(effective_date, rates))
}

fn parse_ru_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(&s.trim().replace(',', ".")).ok()
}

/// Курс за одну единицу валюты: Value / Nominal, иначе VunitRate
fn unit_rate(valute: &Valute) -> Option<Decimal> {
    let by_nominal = parse_ru_decimal(&valute.value).and_then(|value| {
        let nominal = valute.nominal.trim().parse::<u32>().ok()?;
        value.checked_div(Decimal::from(nominal))
    });
    by_nominal
        .or_else(|| valute.vunit_rate.as_deref().and_then(parse_ru_decimal))
        .filter(|rate| *rate > Decimal::ZERO)
        .map(|rate| rate.normalize())
}
