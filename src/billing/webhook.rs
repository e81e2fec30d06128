use std::sync::Arc;

use axum::{body::Bytes, extract::Extension, http::HeaderMap, http::StatusCode};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::config;
use crate::error::{AppError, AppResult};
use crate::store;

use super::stripe::BillingProvider;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Computes the `v1` signature over `"{timestamp}.{body}"` with the shared
/// webhook secret.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can use any key length");
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a `Stripe-Signature` style header (`t=...,v1=...`) against the
/// raw request body. Any matching `v1` candidate passes.
pub fn verify_signature(secret: &str, header: &str, body: &[u8]) -> bool {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }
    let Some(timestamp) = timestamp else {
        return false;
    };
    if candidates.is_empty() {
        return false;
    }
    let expected = sign_payload(secret, timestamp, body);
    candidates.iter().any(|candidate| *candidate == expected)
}

/// Billing webhook entrypoint. Signature or parse failures are the only 4xx
/// outcomes; once an event is verified, business failures are logged and the
/// delivery is acknowledged so the provider stops retrying.
pub async fn stripe_webhook(
    Extension(pool): Extension<PgPool>,
    Extension(provider): Extension<Arc<dyn BillingProvider>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let secret = config::STRIPE_WEBHOOK_SECRET
        .clone()
        .ok_or_else(|| AppError::ConfigMissing("STRIPE_WEBHOOK_SECRET".to_string()))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("missing signature".to_string()))?;
    if !verify_signature(&secret, signature, &body) {
        return Err(AppError::BadRequest("invalid signature".to_string()));
    }

    let event: Value = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("malformed event payload".to_string()))?;
    let event_type = event
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::BadRequest("event without type".to_string()))?
        .to_string();
    let object = event
        .get("data")
        .and_then(|d| d.get("object"))
        .cloned()
        .unwrap_or(Value::Null);

    if let Err(err) = apply_event(&pool, provider.as_ref(), &event_type, &object).await {
        error!(?err, event_type, "billing event handling failed");
    }
    Ok(StatusCode::OK)
}

/// Routes a verified event onto user state. Every branch is an idempotent
/// row-level transition: repeated delivery converges to the same state.
pub async fn apply_event(
    pool: &PgPool,
    provider: &dyn BillingProvider,
    event_type: &str,
    object: &Value,
) -> anyhow::Result<()> {
    match event_type {
        "checkout.session.completed" => {
            let user_id: i32 = object
                .get("client_reference_id")
                .and_then(|v| v.as_str())
                .and_then(|raw| raw.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("checkout session without client_reference_id"))?;
            let customer_id = str_field(object, "customer")
                .ok_or_else(|| anyhow::anyhow!("checkout session without customer"))?;
            let subscription_id = str_field(object, "subscription")
                .ok_or_else(|| anyhow::anyhow!("checkout session without subscription"))?;

            let subscription = provider.subscription(&subscription_id).await?;
            store::apply_checkout_completed(
                pool,
                user_id,
                &customer_id,
                &subscription_id,
                &subscription.status,
                subscription.trial_end,
            )
            .await?;

            let Some(user) = store::get_user(pool, user_id).await? else {
                return Ok(());
            };
            let listing_ids = store::portfolio_listing_ids(pool, user.team_id).await?;
            store::record_used_listings(pool, user_id, &listing_ids, "checkout_completed").await?;
            info!(
                user_id,
                listings = listing_ids.len(),
                "checkout completed; sync enabled and trial ledger updated"
            );
        }
        "invoice.payment_failed" => {
            let customer_id = str_field(object, "customer")
                .ok_or_else(|| anyhow::anyhow!("invoice without customer"))?;
            let Some(user) = store::user_by_customer(pool, &customer_id).await? else {
                warn!(customer_id, "payment failed for unknown customer");
                return Ok(());
            };
            let trialing = user.trial_active(Utc::now())
                || user.subscription_status.as_deref() == Some("trialing");
            if trialing {
                store::set_payment_failed(pool, user.id).await?;
                info!(user_id = user.id, "payment failed during trial; access kept");
            } else {
                store::set_payment_failed(pool, user.id).await?;
                store::disable_access(pool, user.id, "payment_failed").await?;
                info!(user_id = user.id, "payment failed; access disabled");
            }
        }
        "invoice.paid" => {
            let customer_id = str_field(object, "customer")
                .ok_or_else(|| anyhow::anyhow!("invoice without customer"))?;
            if let Some(user) = store::user_by_customer(pool, &customer_id).await? {
                store::restore_access(pool, user.id).await?;
                info!(user_id = user.id, "invoice paid; access restored");
            }
        }
        "customer.subscription.updated" => {
            let subscription_id = str_field(object, "id")
                .ok_or_else(|| anyhow::anyhow!("subscription without id"))?;
            let status = str_field(object, "status")
                .ok_or_else(|| anyhow::anyhow!("subscription without status"))?;
            store::mirror_subscription_status(pool, &subscription_id, &status).await?;
        }
        "customer.subscription.deleted" => {
            let subscription_id = str_field(object, "id")
                .ok_or_else(|| anyhow::anyhow!("subscription without id"))?;
            if let Some(user) = store::user_by_subscription(pool, &subscription_id).await? {
                store::disable_access(pool, user.id, "subscription_deleted").await?;
                info!(user_id = user.id, "subscription deleted; access disabled");
            }
        }
        other => {
            // Unhandled event families are acknowledged without effect.
            tracing::debug!(event_type = other, "ignoring billing event");
        }
    }
    Ok(())
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}
