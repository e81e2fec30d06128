use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde_json::Value;

use crate::config::BillingConfig;
use crate::error::UpstreamError;

use super::calculator::TierLine;

/// Metadata tag distinguishing parent and child line items at the provider.
pub const PROPERTY_TYPE_PRINCIPAL: &str = "principal";
pub const PROPERTY_TYPE_CHILD: &str = "child";
pub const REASON_MID_MONTH: &str = "mid_month_property_addition";

#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: String,
    pub trial_end: Option<DateTime<Utc>>,
    pub customer_id: String,
    pub child_item_id: Option<String>,
    pub child_quantity: i64,
}

impl ProviderSubscription {
    pub fn is_trialing(&self) -> bool {
        self.status == "trialing"
    }
}

/// The pending invoice item that models recurring parent pricing. Its amount
/// is rewritten on every reconciliation; `quantity` lives in its metadata.
#[derive(Debug, Clone)]
pub struct RecurringParentItem {
    pub id: String,
    pub amount_cents: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: i32,
    pub customer_email: String,
    pub parent_qty: i64,
    pub child_qty: i64,
    pub trial_period_days: u32,
    pub success_url: String,
    pub cancel_url: String,
}

/// Seam over the billing provider. The engine drives it; tests substitute a
/// recording stub.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, UpstreamError>;

    /// Sets the child item quantity with `proration_behavior=none` so the new
    /// steady state only takes effect next cycle.
    async fn set_child_quantity(
        &self,
        subscription_id: &str,
        item_id: Option<&str>,
        quantity: i64,
    ) -> Result<(), UpstreamError>;

    async fn recurring_parent_item(
        &self,
        customer_id: &str,
    ) -> Result<Option<RecurringParentItem>, UpstreamError>;

    async fn upsert_recurring_parent_item(
        &self,
        customer_id: &str,
        subscription_id: &str,
        existing_item_id: Option<&str>,
        amount_cents: i64,
        quantity: i64,
        breakdown: &[TierLine],
    ) -> Result<(), UpstreamError>;

    /// One-shot invoice item covering the residual fraction of the current
    /// period after a mid-cycle portfolio growth.
    async fn create_catch_up_item(
        &self,
        customer_id: &str,
        subscription_id: &str,
        amount_cents: i64,
        quantity: i64,
        property_type: &str,
    ) -> Result<(), UpstreamError>;

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, UpstreamError>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, UpstreamError>;
}

/// Stripe-shaped client speaking the form-encoded v1 API.
pub struct StripeClient {
    base: String,
    config: BillingConfig,
    client: Client,
}

impl StripeClient {
    pub fn new(base: impl Into<String>, config: BillingConfig) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            config,
            client: Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .expect("client build"),
        }
    }

    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, UpstreamError> {
        let url = format!("{}/v1/{}", self.base, path);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .query(query)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::from_status(status, path));
        }
        Ok(resp.json().await?)
    }

    async fn post(&self, path: &str, form: &[(String, String)]) -> Result<Value, UpstreamError> {
        let url = format!("{}/v1/{}", self.base, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .form(form)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::from_status(status, path));
        }
        Ok(resp.json().await?)
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn metadata_i64(value: &Value, key: &str) -> Option<i64> {
    value
        .get("metadata")
        .and_then(|m| m.get(key))
        .and_then(|v| v.as_str())
        .and_then(|raw| raw.parse().ok())
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, UpstreamError> {
        let body = self
            .get(&format!("subscriptions/{subscription_id}"), &[])
            .await?;

        let mut child_item_id = None;
        let mut child_quantity = 0;
        if let Some(items) = body
            .get("items")
            .and_then(|i| i.get("data"))
            .and_then(|d| d.as_array())
        {
            for item in items {
                let price_id = item
                    .get("price")
                    .and_then(|p| p.get("id"))
                    .and_then(|v| v.as_str());
                if price_id == Some(self.config.price_child.as_str()) {
                    child_item_id = str_field(item, "id");
                    child_quantity = item.get("quantity").and_then(|q| q.as_i64()).unwrap_or(0);
                }
            }
        }

        Ok(ProviderSubscription {
            id: str_field(&body, "id").unwrap_or_else(|| subscription_id.to_string()),
            status: str_field(&body, "status").unwrap_or_default(),
            trial_end: body
                .get("trial_end")
                .and_then(|v| v.as_i64())
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            customer_id: str_field(&body, "customer").unwrap_or_default(),
            child_item_id,
            child_quantity,
        })
    }

    async fn set_child_quantity(
        &self,
        subscription_id: &str,
        item_id: Option<&str>,
        quantity: i64,
    ) -> Result<(), UpstreamError> {
        let mut form = vec![(
            "proration_behavior".to_string(),
            "none".to_string(),
        )];
        match item_id {
            Some(id) => {
                form.push(("items[0][id]".to_string(), id.to_string()));
                form.push(("items[0][quantity]".to_string(), quantity.to_string()));
            }
            None => {
                form.push((
                    "items[0][price]".to_string(),
                    self.config.price_child.clone(),
                ));
                form.push(("items[0][quantity]".to_string(), quantity.to_string()));
            }
        }
        self.post(&format!("subscriptions/{subscription_id}"), &form)
            .await?;
        Ok(())
    }

    async fn recurring_parent_item(
        &self,
        customer_id: &str,
    ) -> Result<Option<RecurringParentItem>, UpstreamError> {
        let body = self
            .get(
                "invoiceitems",
                &[
                    ("customer".to_string(), customer_id.to_string()),
                    ("pending".to_string(), "true".to_string()),
                    ("limit".to_string(), "100".to_string()),
                ],
            )
            .await?;

        let items = body
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();
        for item in items {
            let property_type = item
                .get("metadata")
                .and_then(|m| m.get("propertyType"))
                .and_then(|v| v.as_str());
            let recurring = item
                .get("metadata")
                .and_then(|m| m.get("recurring"))
                .and_then(|v| v.as_str());
            if property_type == Some(PROPERTY_TYPE_PRINCIPAL) && recurring == Some("true") {
                let Some(id) = str_field(&item, "id") else {
                    continue;
                };
                return Ok(Some(RecurringParentItem {
                    id,
                    amount_cents: item.get("amount").and_then(|v| v.as_i64()).unwrap_or(0),
                    quantity: metadata_i64(&item, "quantity").unwrap_or(0),
                }));
            }
        }
        Ok(None)
    }

    async fn upsert_recurring_parent_item(
        &self,
        customer_id: &str,
        subscription_id: &str,
        existing_item_id: Option<&str>,
        amount_cents: i64,
        quantity: i64,
        breakdown: &[TierLine],
    ) -> Result<(), UpstreamError> {
        let breakdown_json =
            serde_json::to_string(breakdown).unwrap_or_else(|_| "[]".to_string());
        let mut form = vec![
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), "eur".to_string()),
            (
                "description".to_string(),
                format!("Properties ({quantity} principal)"),
            ),
            (
                "metadata[propertyType]".to_string(),
                PROPERTY_TYPE_PRINCIPAL.to_string(),
            ),
            ("metadata[recurring]".to_string(), "true".to_string()),
            ("metadata[quantity]".to_string(), quantity.to_string()),
            ("metadata[breakdown]".to_string(), breakdown_json),
        ];
        match existing_item_id {
            Some(id) => {
                self.post(&format!("invoiceitems/{id}"), &form).await?;
            }
            None => {
                form.push(("customer".to_string(), customer_id.to_string()));
                form.push(("subscription".to_string(), subscription_id.to_string()));
                self.post("invoiceitems", &form).await?;
            }
        }
        Ok(())
    }

    async fn create_catch_up_item(
        &self,
        customer_id: &str,
        subscription_id: &str,
        amount_cents: i64,
        quantity: i64,
        property_type: &str,
    ) -> Result<(), UpstreamError> {
        let form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("subscription".to_string(), subscription_id.to_string()),
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), "eur".to_string()),
            (
                "description".to_string(),
                format!("Mid-period addition ({quantity} {property_type})"),
            ),
            ("metadata[reason]".to_string(), REASON_MID_MONTH.to_string()),
            (
                "metadata[propertyType]".to_string(),
                property_type.to_string(),
            ),
            ("metadata[quantity]".to_string(), quantity.to_string()),
        ];
        self.post("invoiceitems", &form).await?;
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, UpstreamError> {
        let mut form = vec![
            ("mode".to_string(), "subscription".to_string()),
            (
                "client_reference_id".to_string(),
                request.user_id.to_string(),
            ),
            (
                "customer_email".to_string(),
                request.customer_email.clone(),
            ),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            (
                "line_items[0][price]".to_string(),
                self.config.price_parent.clone(),
            ),
            (
                "line_items[0][quantity]".to_string(),
                request.parent_qty.max(1).to_string(),
            ),
        ];
        if request.child_qty > 0 {
            form.push((
                "line_items[1][price]".to_string(),
                self.config.price_child.clone(),
            ));
            form.push((
                "line_items[1][quantity]".to_string(),
                request.child_qty.to_string(),
            ));
        }
        if request.trial_period_days > 0 {
            form.push((
                "subscription_data[trial_period_days]".to_string(),
                request.trial_period_days.to_string(),
            ));
        }
        let body = self.post("checkout/sessions", &form).await?;
        Ok(CheckoutSession {
            id: str_field(&body, "id")
                .ok_or_else(|| UpstreamError::fatal("checkout session without id"))?,
            url: str_field(&body, "url")
                .ok_or_else(|| UpstreamError::fatal("checkout session without url"))?,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, UpstreamError> {
        let form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), return_url.to_string()),
        ];
        let body = self.post("billing_portal/sessions", &form).await?;
        str_field(&body, "url").ok_or_else(|| UpstreamError::fatal("portal session without url"))
    }
}
