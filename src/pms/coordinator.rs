use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Extension, Path},
    Json,
};
use chrono::{Duration, Months, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::models::{Booking, Integration, Property, User};
use crate::pricing::overrides;
use crate::store;

use super::adapter::{PmsAdapter, PropertySettingsUpdate, RateUpdate};
use super::smoobu::SmoobuAdapter;

pub const SMOOBU_API_BASE: &str = "https://login.smoobu.com";

/// Rate horizon pushed to the PMS, in days.
pub const PUSH_HORIZON_DAYS: i64 = 180;

/// Selects the adapter for an integration by vendor tag.
pub fn adapter_from_integration(
    integration: &Integration,
) -> Result<Arc<dyn PmsAdapter>, AppError> {
    match integration.provider.as_str() {
        "smoobu" => {
            let api_key = integration
                .credentials
                .get("api_key")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    AppError::BadRequest("smoobu integration without api_key".to_string())
                })?;
            let base = integration
                .credentials
                .get("api_base")
                .and_then(|v| v.as_str())
                .unwrap_or(SMOOBU_API_BASE);
            Ok(Arc::new(SmoobuAdapter::new(base, api_key)))
        }
        other => Err(AppError::BadRequest(format!("unknown PMS vendor: {other}"))),
    }
}

pub async fn adapter_for_user(
    pool: &PgPool,
    user_id: i32,
) -> Result<Option<Arc<dyn PmsAdapter>>, AppError> {
    let integration = store::integration_for_user(pool, user_id)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?;
    match integration {
        Some(integration) => Ok(Some(adapter_from_integration(&integration)?)),
        None => Ok(None),
    }
}

#[derive(Debug, Default, Serialize)]
pub struct FleetSyncReport {
    pub users_skipped: usize,
    pub properties_synced: usize,
    pub properties_failed: usize,
}

/// Daily fleet-wide rate push. Users with sync disabled are skipped wholesale;
/// per-property failures are counted and logged but never abort the run.
pub async fn daily_fleet_sync(pool: &PgPool) -> Result<FleetSyncReport> {
    let mut report = FleetSyncReport::default();
    let today = Utc::now().date_naive();

    for integration in store::list_integrations(pool).await? {
        let Some(user) = store::get_user(pool, integration.user_id).await? else {
            continue;
        };
        if user.access_disabled || !user.pms_sync_enabled {
            report.users_skipped += 1;
            continue;
        }
        let adapter = match adapter_from_integration(&integration) {
            Ok(adapter) => adapter,
            Err(err) => {
                warn!(?err, user_id = user.id, "skipping unusable integration");
                report.users_skipped += 1;
                continue;
            }
        };

        let properties = store::list_team_properties(pool, user.team_id).await?;
        for property in properties.iter().filter(|p| p.pms_linked()) {
            let pms_id = property.pms_id.as_deref().unwrap_or_default();
            let price = match overrides::entry_for(pool, property.id, today).await? {
                Some(entry) => entry.price,
                None => property.base_price,
            };
            match adapter.update_rate(pms_id, today, price).await {
                Ok(()) => report.properties_synced += 1,
                Err(err) => {
                    error!(
                        %err,
                        property_id = %property.id,
                        pms_id,
                        "daily rate push failed"
                    );
                    report.properties_failed += 1;
                }
            }
        }
        store::touch_integration_sync(pool, user.id, &integration.provider).await?;
    }

    info!(
        synced = report.properties_synced,
        failed = report.properties_failed,
        skipped_users = report.users_skipped,
        "daily fleet sync finished"
    );
    Ok(report)
}

/// Fires the fleet sync once per day at the configured local hour.
pub fn spawn_fleet_sync(pool: PgPool) {
    tokio::spawn(async move {
        let tz: Tz = config::SERVER_TIMEZONE
            .parse()
            .unwrap_or(chrono_tz::Europe::Paris);
        let hour = *config::FLEET_SYNC_HOUR;
        let mut last_run_date = None;
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let local = Utc::now().with_timezone(&tz);
            if local.hour() != hour {
                continue;
            }
            let today = local.date_naive();
            if last_run_date == Some(today) {
                continue;
            }
            last_run_date = Some(today);
            if let Err(err) = daily_fleet_sync(&pool).await {
                warn!(?err, "daily fleet sync tick failed");
            }
        }
    });
}

#[derive(Debug, Serialize)]
pub struct PushReport {
    pub rates_pushed: usize,
    pub locked_dates_skipped: usize,
}

/// Pushes strategy, rules and the non-locked rate window for one property.
/// The kill switch gates the whole operation; a failed push surfaces to the
/// caller and local state stays authoritative.
pub async fn push_property(
    pool: &PgPool,
    user: &User,
    property: &Property,
) -> Result<PushReport, AppError> {
    if user.access_disabled || !user.pms_sync_enabled {
        return Err(AppError::Forbidden);
    }
    let pms_id = property
        .pms_id
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("property is not PMS-linked".to_string()))?;
    let adapter = adapter_for_user(pool, user.id)
        .await?
        .ok_or_else(|| AppError::BadRequest("user has no PMS integration".to_string()))?;

    adapter
        .update_property_settings(
            pms_id,
            &PropertySettingsUpdate {
                base_price: Some(property.base_price),
                floor_price: Some(property.floor_price),
                ceiling_price: property.ceiling_price,
                min_stay: property.min_stay,
                max_stay: property.max_stay,
                weekly_discount_percent: property.weekly_discount_percent,
                monthly_discount_percent: property.monthly_discount_percent,
                weekend_markup_percent: property.weekend_markup_percent,
            },
        )
        .await?;

    let today = Utc::now().date_naive();
    let until = today + Duration::days(PUSH_HORIZON_DAYS);
    let window = overrides::range_map(pool, property.id, today, until)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?;

    // Locked dates are owned by the user at the vendor side; they never
    // travel in a rate batch.
    let mut rates = Vec::new();
    let mut locked = 0usize;
    for (date, entry) in &window {
        if entry.is_locked {
            locked += 1;
            continue;
        }
        rates.push(RateUpdate {
            date: *date,
            price: entry.price,
        });
    }
    adapter.update_batch_rates(pms_id, &rates).await?;

    Ok(PushReport {
        rates_pushed: rates.len(),
        locked_dates_skipped: locked,
    })
}

#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub fetched: usize,
    pub upserted: usize,
    pub unmatched: usize,
}

/// Imports reservations over [-6 months, +6 months] for every PMS-linked
/// property of the user's team, deduplicating on
/// `(property_id, pms_booking_id)`.
pub async fn import_reservations(pool: &PgPool, user: &User) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    let Some(adapter) = adapter_for_user(pool, user.id)
        .await
        .map_err(|err| anyhow::anyhow!(err.to_string()))?
    else {
        return Ok(report);
    };

    let properties = store::list_team_properties(pool, user.team_id).await?;
    let by_pms_id: std::collections::HashMap<&str, &Property> = properties
        .iter()
        .filter_map(|p| p.pms_id.as_deref().map(|id| (id, p)))
        .collect();
    if by_pms_id.is_empty() {
        return Ok(report);
    }

    let now = Utc::now();
    let from = (now - Months::new(6)).date_naive();
    let to = (now + Months::new(6)).date_naive();
    let reservations = adapter.get_reservations(from, to).await?;
    report.fetched = reservations.len();

    for reservation in reservations {
        let Some(property) = by_pms_id.get(reservation.property_pms_id.as_str()) else {
            report.unmatched += 1;
            continue;
        };
        let booking = Booking {
            id: Uuid::new_v4(),
            property_id: property.id,
            pms_booking_id: Some(reservation.pms_id.clone()),
            start_date: reservation.start_date,
            end_date: reservation.end_date,
            price_per_night: reservation.price_per_night(),
            revenue: reservation.total_price,
            source: reservation
                .channel
                .clone()
                .unwrap_or_else(|| "pms".to_string()),
            status: reservation.status.clone(),
            guest_name: reservation.guest_name.clone(),
            created_at: now,
        };
        store::upsert_booking(pool, &booking).await?;
        report.upserted += 1;
    }

    info!(
        user_id = user.id,
        fetched = report.fetched,
        upserted = report.upserted,
        unmatched = report.unmatched,
        "reservation import finished"
    );
    Ok(report)
}

#[derive(Debug, Deserialize)]
pub struct UserScopedRequest {
    pub user_id: i32,
}

pub async fn push_property_handler(
    Extension(pool): Extension<PgPool>,
    Path(property_id): Path<Uuid>,
    Json(payload): Json<UserScopedRequest>,
) -> AppResult<Json<PushReport>> {
    let user = store::get_user(&pool, payload.user_id)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?
        .ok_or(AppError::NotFound)?;
    let property = store::get_property(&pool, property_id)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?
        .ok_or(AppError::NotFound)?;
    if property.team_id != user.team_id {
        return Err(AppError::Forbidden);
    }
    let report = push_property(&pool, &user, &property).await?;
    Ok(Json(report))
}

pub async fn import_reservations_handler(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<UserScopedRequest>,
) -> AppResult<Json<ImportReport>> {
    let user = store::get_user(&pool, payload.user_id)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?
        .ok_or(AppError::NotFound)?;
    let report = import_reservations(&pool, &user)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?;
    Ok(Json(report))
}
