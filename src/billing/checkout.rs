use std::sync::Arc;

use axum::{extract::Extension, Json};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::store;

use super::reconciler;
use super::stripe::{BillingProvider, CheckoutRequest};

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub user_id: i32,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
    pub trial_period_days: u32,
}

/// Trial length for a new checkout: zero when any listing id in the team's
/// portfolio is already in the trial ledger, the configured period otherwise.
pub async fn trial_days_for(pool: &PgPool, team_id: i32) -> anyhow::Result<u32> {
    let listing_ids = store::portfolio_listing_ids(pool, team_id).await?;
    if store::any_listing_used(pool, &listing_ids).await? {
        Ok(0)
    } else {
        Ok(*config::TRIAL_PERIOD_DAYS)
    }
}

/// Creates a checkout session for the user's current portfolio. Listing ids
/// already seen in the trial ledger cost the user their trial: the session is
/// created with `trial_period_days = 0`.
pub async fn create_checkout(
    Extension(pool): Extension<PgPool>,
    Extension(provider): Extension<Arc<dyn BillingProvider>>,
    Json(payload): Json<CreateCheckoutRequest>,
) -> AppResult<Json<CheckoutResponse>> {
    let user = store::get_user(&pool, payload.user_id)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?
        .ok_or(AppError::NotFound)?;

    let trial_period_days = trial_days_for(&pool, user.team_id)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?;
    if trial_period_days == 0 {
        info!(user_id = user.id, "listing already used a trial; granting none");
    }

    let quantities = reconciler::desired_quantities(&pool, &user)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?;

    let frontend = config::FRONTEND_URL.clone();
    let session = provider
        .create_checkout_session(&CheckoutRequest {
            user_id: user.id,
            customer_email: user.email.clone(),
            parent_qty: quantities.parent_qty,
            child_qty: quantities.child_qty,
            trial_period_days,
            success_url: format!("{frontend}/billing/success"),
            cancel_url: format!("{frontend}/billing/cancelled"),
        })
        .await?;

    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url: session.url,
        trial_period_days,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreatePortalRequest {
    pub user_id: i32,
}

#[derive(Debug, Serialize)]
pub struct PortalResponse {
    pub url: String,
}

pub async fn create_portal(
    Extension(pool): Extension<PgPool>,
    Extension(provider): Extension<Arc<dyn BillingProvider>>,
    Json(payload): Json<CreatePortalRequest>,
) -> AppResult<Json<PortalResponse>> {
    let user = store::get_user(&pool, payload.user_id)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?
        .ok_or(AppError::NotFound)?;
    let customer_id = user
        .customer_id
        .ok_or_else(|| AppError::BadRequest("user has no billing customer".to_string()))?;

    let url = provider
        .create_portal_session(&customer_id, &format!("{}/settings", *config::FRONTEND_URL))
        .await?;
    Ok(Json(PortalResponse { url }))
}
