use std::collections::BTreeMap;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Property;

/// Incoming dated price for the upsert-merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideWrite {
    pub date: NaiveDate,
    pub price: f64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub is_locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub price: f64,
    pub is_locked: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub written: usize,
    pub skipped_locked: usize,
}

/// Upsert-merge over `(property_id, date)`. Locked rows are skipped entirely;
/// everything else is written with the price clamped to the property's band.
/// The WHERE guard makes concurrent merges commutative: a lock set by another
/// writer between read and write still wins.
pub async fn upsert_batch(
    pool: &PgPool,
    property: &Property,
    writes: &[OverrideWrite],
    updated_by: &str,
) -> Result<UpsertReport> {
    let mut report = UpsertReport::default();
    for write in writes {
        let clamped = property.clamp_price(write.price);
        let result = sqlx::query(
            r#"
            INSERT INTO price_overrides (property_id, date, price, is_locked, reason, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (property_id, date)
            DO UPDATE SET
                price = EXCLUDED.price,
                is_locked = EXCLUDED.is_locked,
                reason = EXCLUDED.reason,
                updated_by = EXCLUDED.updated_by,
                updated_at = NOW()
            WHERE price_overrides.is_locked = FALSE
            "#,
        )
        .bind(property.id)
        .bind(write.date)
        .bind(clamped)
        .bind(write.is_locked)
        .bind(&write.reason)
        .bind(updated_by)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            report.skipped_locked += 1;
        } else {
            report.written += 1;
        }
    }
    Ok(report)
}

/// Explicit user action: locks or unlocks one date regardless of the
/// pipeline. Locked overrides stay immutable to the pipeline only.
pub async fn set_lock(
    pool: &PgPool,
    property_id: Uuid,
    date: NaiveDate,
    locked: bool,
    updated_by: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE price_overrides
        SET is_locked = $3, updated_by = $4, updated_at = NOW()
        WHERE property_id = $1 AND date = $2
        "#,
    )
    .bind(property_id)
    .bind(date)
    .bind(locked)
    .bind(updated_by)
    .execute(pool)
    .await?;
    Ok(())
}

/// Range read returning a date-indexed map over [from, to] inclusive.
pub async fn range_map(
    pool: &PgPool,
    property_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<BTreeMap<NaiveDate, OverrideEntry>> {
    let rows: Vec<(NaiveDate, f64, bool, Option<String>)> = sqlx::query_as(
        r#"
        SELECT date, price, is_locked, reason
        FROM price_overrides
        WHERE property_id = $1 AND date >= $2 AND date <= $3
        ORDER BY date ASC
        "#,
    )
    .bind(property_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(date, price, is_locked, reason)| {
            (
                date,
                OverrideEntry {
                    price,
                    is_locked,
                    reason,
                },
            )
        })
        .collect())
}

pub async fn entry_for(
    pool: &PgPool,
    property_id: Uuid,
    date: NaiveDate,
) -> Result<Option<OverrideEntry>> {
    let row: Option<(f64, bool, Option<String>)> = sqlx::query_as(
        "SELECT price, is_locked, reason FROM price_overrides WHERE property_id = $1 AND date = $2",
    )
    .bind(property_id)
    .bind(date)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(price, is_locked, reason)| OverrideEntry {
        price,
        is_locked,
        reason,
    }))
}
