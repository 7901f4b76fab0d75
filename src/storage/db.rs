// src/storage/db.rs
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::{collections::BTreeMap, env, path::PathBuf, str::FromStr};
use tracing::{debug, warn};

use super::schema::{apply_migrations, PendingRow, SnapshotRow};
use crate::models::{PendingCalculation, RateSnapshot};

#[derive(Debug, Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    /// Подключается к SQLite, создаёт файл, если его нет,
    /// и применяет схему.
    pub async fn connect(path: &str) -> Result<Self> {
        // 1) абсолютный путь к файлу
        let abs_path: PathBuf = {
            let p = PathBuf::from(path);
            if p.is_absolute() {
                p
            } else {
                env::current_dir()?.join(p)
            }
        };

        // 2) создаём папку, если нужна
        if let Some(dir) = abs_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Не удалось создать директорию {:?}", dir))?;
        }

        // 3) опции: файл создаётся автоматически, журнал WAL
        let opts = SqliteConnectOptions::new()
            .filename(&abs_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts).await?;
        apply_migrations(&pool).await?;

        Ok(Db { pool })
    }

    /// База в памяти. Одно соединение, иначе у каждого будет своя пустая база.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        apply_migrations(&pool).await?;
        Ok(Db { pool })
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("bad date in db: {}", s))
}

fn snapshot_from_row(row: SnapshotRow) -> Result<RateSnapshot> {
    let rates: BTreeMap<String, Decimal> = serde_json::from_str(&row.rates_json)
        .with_context(|| format!("bad rates json for {}", row.effective_date))?;
    Ok(RateSnapshot::new(parse_date(&row.effective_date)?, rates))
}

fn pending_from_row(row: PendingRow) -> Result<PendingCalculation> {
    Ok(PendingCalculation {
        user_id: row.user_id,
        date: parse_date(&row.date)?,
        currency: row.currency,
        amount: Decimal::from_str(&row.amount).context("bad pending amount")?,
        commission_percent: Decimal::from_str(&row.commission_percent)
            .context("bad pending commission")?,
        created_at: row.created_at,
    })
}

// --- Кэш курсов ---

/// Сохраняет снимок под его фактической датой
pub async fn upsert_snapshot(db: &Db, snapshot: &RateSnapshot, now: i64, ttl_secs: i64) -> Result<()> {
    let json = serde_json::to_string(&snapshot.rates)?;
    sqlx::query(
        r#"
        INSERT INTO rate_snapshots (effective_date, rates_json, stored_at, expires_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(effective_date) DO UPDATE SET
            rates_json = excluded.rates_json,
            stored_at  = excluded.stored_at,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(snapshot.effective_date.to_string())
    .bind(json)
    .bind(now)
    .bind(now + ttl_secs)
    .execute(&db.pool)
    .await?;
    debug!("Snapshot {} stored, {} rates", snapshot.effective_date, snapshot.rates.len());
    Ok(())
}

/// Снимок за дату, если он есть и не просрочен
pub async fn get_snapshot(db: &Db, date: NaiveDate, now: i64) -> Result<Option<RateSnapshot>> {
    let row = sqlx::query_as::<_, SnapshotRow>(
        "SELECT effective_date, rates_json, stored_at, expires_at FROM rate_snapshots WHERE effective_date = ? AND expires_at > ?",
    )
    .bind(date.to_string())
    .bind(now)
    .fetch_optional(&db.pool)
    .await?;

    match row {
        Some(row) => match snapshot_from_row(row) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                // битую запись считаем промахом
                warn!("Ignoring unreadable snapshot for {}: {:#}", date, e);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Самый свежий непросроченный снимок с датой не позже `date`
pub async fn get_latest_snapshot(db: &Db, date: NaiveDate, now: i64) -> Result<Option<RateSnapshot>> {
    let row = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT effective_date, rates_json, stored_at, expires_at FROM rate_snapshots
        WHERE effective_date <= ? AND expires_at > ?
        ORDER BY effective_date DESC
        LIMIT 1
        "#,
    )
    .bind(date.to_string())
    .bind(now)
    .fetch_optional(&db.pool)
    .await?;

    match row.map(snapshot_from_row).transpose() {
        Ok(found) => Ok(found),
        Err(e) => {
            warn!("Ignoring unreadable snapshot before {}: {:#}", date, e);
            Ok(None)
        }
    }
}

/// Удаляет просроченные снимки и отложенные расчёты
pub async fn purge_expired(db: &Db, now: i64) -> Result<u64> {
    let snapshots = sqlx::query("DELETE FROM rate_snapshots WHERE expires_at <= ?")
        .bind(now)
        .execute(&db.pool)
        .await?
        .rows_affected();
    let pending = sqlx::query("DELETE FROM pending_calculations WHERE expires_at <= ?")
        .bind(now)
        .execute(&db.pool)
        .await?
        .rows_affected();
    Ok(snapshots + pending)
}

// --- Подписчики ---

/// true, если пользователь добавлен впервые
pub async fn insert_subscriber(db: &Db, user_id: i64, now: i64) -> Result<bool> {
    let res = sqlx::query("INSERT OR IGNORE INTO subscribers (user_id, subscribed_at) VALUES (?, ?)")
        .bind(user_id)
        .bind(now)
        .execute(&db.pool)
        .await?;
    Ok(res.rows_affected() == 1)
}

pub async fn delete_subscriber(db: &Db, user_id: i64) -> Result<bool> {
    let res = sqlx::query("DELETE FROM subscribers WHERE user_id = ?")
        .bind(user_id)
        .execute(&db.pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn list_subscribers(db: &Db) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT user_id FROM subscribers ORDER BY user_id")
        .fetch_all(&db.pool)
        .await?;
    Ok(ids)
}

/// Помечает дату как разосланную. false, если отметка уже была
pub async fn mark_announced(db: &Db, date: NaiveDate, now: i64) -> Result<bool> {
    let res = sqlx::query("INSERT OR IGNORE INTO announcements (effective_date, announced_at) VALUES (?, ?)")
        .bind(date.to_string())
        .bind(now)
        .execute(&db.pool)
        .await?;
    Ok(res.rows_affected() == 1)
}

pub async fn is_announced(db: &Db, date: NaiveDate) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT announced_at FROM announcements WHERE effective_date = ?")
            .bind(date.to_string())
            .fetch_optional(&db.pool)
            .await?;
    Ok(found.is_some())
}

// --- Отложенные расчёты ---

/// Новый расчёт на ту же дату заменяет старый
pub async fn upsert_pending(db: &Db, calc: &PendingCalculation, ttl_secs: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pending_calculations
            (user_id, date, currency, amount, commission_percent, created_at, expires_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, date) DO UPDATE SET
            currency           = excluded.currency,
            amount             = excluded.amount,
            commission_percent = excluded.commission_percent,
            created_at         = excluded.created_at,
            expires_at         = excluded.expires_at
        "#,
    )
    .bind(calc.user_id)
    .bind(calc.date.to_string())
    .bind(&calc.currency)
    .bind(calc.amount.to_string())
    .bind(calc.commission_percent.to_string())
    .bind(calc.created_at)
    .bind(calc.created_at + ttl_secs)
    .execute(&db.pool)
    .await?;
    Ok(())
}

pub async fn get_pending(db: &Db, user_id: i64, date: NaiveDate, now: i64) -> Result<Option<PendingCalculation>> {
    let row = sqlx::query_as::<_, PendingRow>(
        r#"
        SELECT user_id, date, currency, amount, commission_percent, created_at, expires_at
        FROM pending_calculations
        WHERE user_id = ? AND date = ? AND expires_at > ?
        "#,
    )
    .bind(user_id)
    .bind(date.to_string())
    .bind(now)
    .fetch_optional(&db.pool)
    .await?;
    row.map(pending_from_row).transpose()
}

/// Все непросроченные расчёты. Нечитаемые строки пропускаются
pub async fn get_all_pending(db: &Db, now: i64) -> Result<Vec<PendingCalculation>> {
    let rows = sqlx::query_as::<_, PendingRow>(
        r#"
        SELECT user_id, date, currency, amount, commission_percent, created_at, expires_at
        FROM pending_calculations
        WHERE expires_at > ?
        ORDER BY created_at
        "#,
    )
    .bind(now)
    .fetch_all(&db.pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let key = (row.user_id, row.date.clone());
        match pending_from_row(row) {
            Ok(calc) => out.push(calc),
            Err(e) => warn!("Skipping pending calculation {:?}: {:#}", key, e),
        }
    }
    Ok(out)
}

pub async fn delete_pending(db: &Db, user_id: i64, date: NaiveDate) -> Result<bool> {
    let res = sqlx::query("DELETE FROM pending_calculations WHERE user_id = ? AND date = ?")
        .bind(user_id)
        .bind(date.to_string())
        .execute(&db.pool)
        .await?;
    Ok(res.rows_affected() > 0)
}
