// src/storage/schema.rs

//! Схема SQLite: кэш курсов, подписчики, отложенные расчёты.

use sqlx::sqlite::SqlitePool;
use sqlx::{Error, FromRow};
use tracing::info;

/// Создание таблиц, если их ещё нет.
pub async fn apply_migrations(pool: &SqlitePool) -> Result<(), Error> {
    info!("Applying database migrations...");

    // Снимки курсов, ключ = фактическая дата из ответа ЦБ
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rate_snapshots (
            effective_date TEXT    PRIMARY KEY,
            rates_json     TEXT    NOT NULL,
            stored_at      INTEGER NOT NULL,
            expires_at     INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subscribers (
            user_id       INTEGER PRIMARY KEY,
            subscribed_at INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Даты, о которых подписчики уже оповещены
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS announcements (
            effective_date TEXT    PRIMARY KEY,
            announced_at   INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_calculations (
            user_id            INTEGER NOT NULL,
            date               TEXT    NOT NULL,
            currency           TEXT    NOT NULL,
            amount             TEXT    NOT NULL,
            commission_percent TEXT    NOT NULL,
            created_at         INTEGER NOT NULL,
            expires_at         INTEGER NOT NULL,
            PRIMARY KEY (user_id, date)
        );
        "#,
    )
    .execute(pool)
    .await?;

    info!("Database migrations applied successfully.");
    Ok(())
}

#[derive(Debug, FromRow, Clone)]
pub struct SnapshotRow {
    pub effective_date: String,
    pub rates_json: String,
    pub stored_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, FromRow, Clone)]
pub struct PendingRow {
    pub user_id: i64,
    pub date: String,
    pub currency: String,
    pub amount: String,
    pub commission_percent: String,
    pub created_at: i64,
    pub expires_at: i64,
}
