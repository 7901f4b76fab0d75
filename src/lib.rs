// src/lib.rs

pub mod cbr;
pub mod config;
pub mod logger;
pub mod messenger;
pub mod models;
pub mod notifier;
pub mod rates;
pub mod storage;
pub mod telegram;
pub mod utils;
