use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::{
    extract::{Extension, Path},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Group, Property, User};
use crate::pms::adapter::{PmsAdapter, RateUpdate};
use crate::pms::coordinator;
use crate::store;

use super::oracle::{CalendarDay, PricingOracle};
use super::overrides::{self, OverrideWrite};

#[derive(Debug, Default, Serialize)]
pub struct PipelineOutcome {
    pub days_written: usize,
    pub days_skipped_locked: usize,
    pub pushed: bool,
}

/// Applies an already-generated calendar to one property: clamp-and-upsert
/// the overrides, then push the non-locked subset when the property is
/// PMS-linked and the kill switch allows it. A failed push leaves the
/// overrides in place (local state is authoritative) and surfaces as an
/// error so the run is counted as failed.
pub async fn apply_calendar(
    pool: &PgPool,
    user: &User,
    property: &Property,
    days: &[CalendarDay],
    adapter: Option<&dyn PmsAdapter>,
    updated_by: &str,
) -> Result<PipelineOutcome> {
    let writes: Vec<OverrideWrite> = days
        .iter()
        .map(|day| OverrideWrite {
            date: day.date,
            price: day.suggested_price,
            reason: day.reasoning.clone(),
            is_locked: false,
        })
        .collect();
    let report = overrides::upsert_batch(pool, property, &writes, updated_by).await?;

    let mut outcome = PipelineOutcome {
        days_written: report.written,
        days_skipped_locked: report.skipped_locked,
        pushed: false,
    };

    let sync_allowed = user.pms_sync_enabled && !user.access_disabled;
    let (Some(pms_id), Some(adapter), true) = (property.pms_id.as_deref(), adapter, sync_allowed)
    else {
        return Ok(outcome);
    };

    let Some(first) = days.first() else {
        return Ok(outcome);
    };
    let last = days.last().map(|d| d.date).unwrap_or(first.date);
    let window = overrides::range_map(pool, property.id, first.date, last).await?;
    let rates: Vec<RateUpdate> = window
        .iter()
        .filter(|(_, entry)| !entry.is_locked)
        .map(|(date, entry)| RateUpdate {
            date: *date,
            price: entry.price,
        })
        .collect();

    adapter
        .update_batch_rates(pms_id, &rates)
        .await
        .map_err(|err| anyhow!("PMS push failed for {}: {err}", property.id))?;
    outcome.pushed = true;
    Ok(outcome)
}

/// Full per-property pipeline: oracle, validation, clamping, persistence,
/// conditional PMS push.
pub async fn run_property(
    pool: &PgPool,
    oracle: &dyn PricingOracle,
    user: &User,
    property: &Property,
    adapter: Option<&dyn PmsAdapter>,
    today: NaiveDate,
) -> Result<PipelineOutcome> {
    let calendar = oracle.generate_calendar(property, today).await?;
    let outcome = apply_calendar(
        pool,
        user,
        property,
        &calendar.days,
        adapter,
        "auto_pricing",
    )
    .await?;
    info!(
        property_id = %property.id,
        days_written = outcome.days_written,
        locked = outcome.days_skipped_locked,
        pushed = outcome.pushed,
        grade = calendar.property_grade.as_deref().unwrap_or("-"),
        "pricing pipeline finished"
    );
    Ok(outcome)
}

/// Synchronized group: one oracle run on the main property, then the same
/// dated prices replayed to every other member under that member's own
/// locks and bands. Returns the number of failed members.
pub async fn run_group(
    pool: &PgPool,
    oracle: &dyn PricingOracle,
    user: &User,
    group: &Group,
    members: &[Property],
    adapter: Option<&dyn PmsAdapter>,
    today: NaiveDate,
) -> Result<usize> {
    let Some(source) = group
        .main_property_id
        .and_then(|id| members.iter().find(|m| m.id == id))
        .or_else(|| members.first())
    else {
        return Ok(0);
    };

    let calendar = oracle.generate_calendar(source, today).await?;
    let mut failures = 0usize;
    for member in members {
        match apply_calendar(
            pool,
            user,
            member,
            &calendar.days,
            adapter,
            "auto_pricing_group",
        )
        .await
        {
            Ok(outcome) => {
                info!(
                    group_id = %group.id,
                    property_id = %member.id,
                    days_written = outcome.days_written,
                    pushed = outcome.pushed,
                    "group price replay applied"
                );
            }
            Err(err) => {
                warn!(?err, group_id = %group.id, property_id = %member.id, "group member failed");
                failures += 1;
            }
        }
    }
    Ok(failures)
}

#[derive(Debug, Deserialize)]
pub struct PriceRequest {
    pub user_id: i32,
}

/// On-demand pipeline run for one property.
pub async fn price_property_handler(
    Extension(pool): Extension<PgPool>,
    Extension(oracle): Extension<Arc<dyn PricingOracle>>,
    Path(property_id): Path<Uuid>,
    Json(payload): Json<PriceRequest>,
) -> AppResult<Json<PipelineOutcome>> {
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

    let adapter = coordinator::adapter_for_user(&pool, user.id).await?;
    let outcome = run_property(
        &pool,
        oracle.as_ref(),
        &user,
        &property,
        adapter.as_deref(),
        Utc::now().date_naive(),
    )
    .await
    .map_err(|err| AppError::Message(err.to_string()))?;
    Ok(Json(outcome))
}
