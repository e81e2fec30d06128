use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{AutoPricingState, Booking, Group, Integration, Property, User};

pub async fn get_user(pool: &PgPool, user_id: i32) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn user_by_customer(pool: &PgPool, customer_id: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE customer_id = $1")
        .bind(customer_id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn user_by_subscription(pool: &PgPool, subscription_id: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE subscription_id = $1")
        .bind(subscription_id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn list_team_properties(pool: &PgPool, team_id: i32) -> Result<Vec<Property>> {
    let rows = sqlx::query_as::<_, Property>(
        "SELECT * FROM properties WHERE team_id = $1 ORDER BY created_at ASC",
    )
    .bind(team_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_property(pool: &PgPool, property_id: Uuid) -> Result<Option<Property>> {
    let row = sqlx::query_as::<_, Property>("SELECT * FROM properties WHERE id = $1")
        .bind(property_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_user_groups(pool: &PgPool, owner_id: i32) -> Result<Vec<Group>> {
    let rows = sqlx::query_as::<_, Group>(
        "SELECT * FROM groups WHERE owner_id = $1 ORDER BY created_at ASC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Member ids in stored insertion order; the first one is the group template.
pub async fn group_member_ids(pool: &PgPool, group_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT property_id FROM group_properties WHERE group_id = $1 ORDER BY position ASC",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn group_members(pool: &PgPool, group_id: Uuid) -> Result<Vec<Property>> {
    let rows = sqlx::query_as::<_, Property>(
        r#"
        SELECT p.* FROM properties p
        JOIN group_properties gp ON gp.property_id = p.id
        WHERE gp.group_id = $1
        ORDER BY gp.position ASC
        "#,
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn add_group_member(pool: &PgPool, group_id: Uuid, property_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO group_properties (group_id, property_id, position)
        VALUES ($1, $2, COALESCE((SELECT MAX(position) + 1 FROM group_properties WHERE group_id = $1), 0))
        ON CONFLICT (group_id, property_id) DO NOTHING
        "#,
    )
    .bind(group_id)
    .bind(property_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Transition applied on `checkout.session.completed`. Re-enables sync and
/// clears any previous stop reason.
pub async fn apply_checkout_completed(
    pool: &PgPool,
    user_id: i32,
    customer_id: &str,
    subscription_id: &str,
    subscription_status: &str,
    trial_ends_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users SET
            customer_id = $2,
            subscription_id = $3,
            subscription_status = $4,
            trial_ends_at = $5,
            access_disabled = FALSE,
            payment_failed = FALSE,
            auth_banned = FALSE,
            pms_sync_enabled = TRUE,
            pms_sync_stopped_reason = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(customer_id)
    .bind(subscription_id)
    .bind(subscription_status)
    .bind(trial_ends_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_payment_failed(pool: &PgPool, user_id: i32) -> Result<()> {
    sqlx::query("UPDATE users SET payment_failed = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Kill switch on: `access_disabled` always drags `pms_sync_enabled` down.
pub async fn disable_access(pool: &PgPool, user_id: i32, reason: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users SET
            access_disabled = TRUE,
            auth_banned = TRUE,
            pms_sync_enabled = FALSE,
            pms_sync_stopped_reason = $2,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(reason)
    .execute(pool)
    .await?;
    Ok(())
}

/// Kill switch off, applied on `invoice.paid`.
pub async fn restore_access(pool: &PgPool, user_id: i32) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users SET
            access_disabled = FALSE,
            payment_failed = FALSE,
            auth_banned = FALSE,
            pms_sync_enabled = TRUE,
            pms_sync_stopped_reason = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mirror_subscription_status(
    pool: &PgPool,
    subscription_id: &str,
    status: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE users SET subscription_status = $2, updated_at = NOW() WHERE subscription_id = $1",
    )
    .bind(subscription_id)
    .bind(status)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn save_auto_pricing(
    pool: &PgPool,
    user_id: i32,
    state: &AutoPricingState,
) -> Result<()> {
    sqlx::query("UPDATE users SET auto_pricing = $2, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(serde_json::to_value(state)?)
        .execute(pool)
        .await?;
    Ok(())
}

/// Appends listing ids to the trial-abuse ledger. Re-delivery is a noop.
pub async fn record_used_listings(
    pool: &PgPool,
    user_id: i32,
    listing_ids: &[String],
    source: &str,
) -> Result<()> {
    for listing_id in listing_ids {
        sqlx::query(
            r#"
            INSERT INTO used_listing_ids (listing_id, user_id, source)
            VALUES ($1, $2, $3)
            ON CONFLICT (listing_id) DO NOTHING
            "#,
        )
        .bind(listing_id)
        .bind(user_id)
        .bind(source)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn any_listing_used(pool: &PgPool, listing_ids: &[String]) -> Result<bool> {
    if listing_ids.is_empty() {
        return Ok(false);
    }
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM used_listing_ids WHERE listing_id = ANY($1)")
            .bind(listing_ids)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

pub async fn list_integrations(pool: &PgPool) -> Result<Vec<Integration>> {
    let rows = sqlx::query_as::<_, Integration>(
        "SELECT * FROM integrations ORDER BY user_id ASC, provider ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn integration_for_user(pool: &PgPool, user_id: i32) -> Result<Option<Integration>> {
    let row = sqlx::query_as::<_, Integration>(
        "SELECT * FROM integrations WHERE user_id = $1 ORDER BY provider ASC LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn touch_integration_sync(pool: &PgPool, user_id: i32, provider: &str) -> Result<()> {
    sqlx::query(
        "UPDATE integrations SET last_sync = NOW() WHERE user_id = $1 AND provider = $2",
    )
    .bind(user_id)
    .bind(provider)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upserts a PMS reservation, deduplicating on `(property_id, pms_booking_id)`.
pub async fn upsert_booking(pool: &PgPool, booking: &Booking) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO bookings (
            id, property_id, pms_booking_id, start_date, end_date,
            price_per_night, revenue, source, status, guest_name
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (property_id, pms_booking_id) WHERE pms_booking_id IS NOT NULL
        DO UPDATE SET
            start_date = EXCLUDED.start_date,
            end_date = EXCLUDED.end_date,
            price_per_night = EXCLUDED.price_per_night,
            revenue = EXCLUDED.revenue,
            status = EXCLUDED.status,
            guest_name = EXCLUDED.guest_name
        "#,
    )
    .bind(booking.id)
    .bind(booking.property_id)
    .bind(&booking.pms_booking_id)
    .bind(booking.start_date)
    .bind(booking.end_date)
    .bind(booking.price_per_night)
    .bind(booking.revenue)
    .bind(&booking.source)
    .bind(&booking.status)
    .bind(&booking.guest_name)
    .execute(pool)
    .await?;
    Ok(())
}

/// Listing ids (`pms_id`) currently attached to the user's team portfolio.
pub async fn portfolio_listing_ids(pool: &PgPool, team_id: i32) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT pms_id FROM properties WHERE team_id = $1 AND pms_id IS NOT NULL",
    )
    .bind(team_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
