// src/cbr/types.rs
use serde::Deserialize;

/// Корень ответа `XML_daily.asp`
#[derive(Debug, Deserialize, PartialEq)]
pub struct ValCurs {
    #[serde(rename = "@Date", default)]
    pub date: Option<String>,
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(rename = "Valute", default)]
    pub valute: Vec<Valute>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Valute {
    #[serde(rename = "@ID", default)]
    pub id: Option<String>,
    #[serde(rename = "CharCode")]
    pub char_code: String,
    #[serde(rename = "Nominal")]
    pub nominal: String,
    #[serde(rename = "Value")]
    pub value: String,
    /// Курс за единицу. В старых ответах его нет
    #[serde(rename = "VunitRate", default)]
    pub vunit_rate: Option<String>,
}
