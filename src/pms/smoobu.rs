use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::UpstreamError;
use crate::retry::{with_backoff, RetryPolicy};

use super::adapter::{
    PmsAdapter, PmsProperty, PmsReservation, PropertySettingsUpdate, RateUpdate, ReservationDraft,
};

/// Smoobu-shaped adapter. Authenticates with a per-account `Api-Key` header.
pub struct SmoobuAdapter {
    base: String,
    api_key: String,
    client: Client,
    policy: RetryPolicy,
}

impl SmoobuAdapter {
    pub fn new(base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("client build"),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value, UpstreamError> {
        with_backoff(&self.policy, path, || async {
            let url = format!("{}{}", self.base, path);
            let mut req = self
                .client
                .request(method.clone(), &url)
                .header("Api-Key", &self.api_key)
                .query(query);
            if let Some(body) = body {
                req = req.json(body);
            }
            let resp = req.send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(UpstreamError::from_status(status, path));
            }
            if resp.content_length() == Some(0) {
                return Ok(Value::Null);
            }
            resp.json().await.map_err(UpstreamError::from)
        })
        .await
    }
}

fn parse_date(value: Option<&Value>) -> Option<NaiveDate> {
    value
        .and_then(|v| v.as_str())
        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
}

/// Maps one vendor reservation object onto the normalized model. The vendor's
/// `departure` field is the checkout day, which is exactly the exclusive
/// `end_date` the engine stores.
pub fn normalize_reservation(raw: &Value) -> Option<PmsReservation> {
    let pms_id = match raw.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => return None,
    };
    let property_pms_id = match raw.get("apartment").and_then(|a| a.get("id")) {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => return None,
    };
    let start_date = parse_date(raw.get("arrival"))?;
    let end_date = parse_date(raw.get("departure"))?;
    Some(PmsReservation {
        pms_id,
        property_pms_id,
        start_date,
        end_date,
        total_price: raw.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0),
        channel: raw
            .get("channel")
            .and_then(|c| c.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        status: raw
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("confirmed")
            .to_string(),
        guest_name: raw
            .get("guest-name")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

#[async_trait]
impl PmsAdapter for SmoobuAdapter {
    async fn list_properties(&self) -> Result<Vec<PmsProperty>, UpstreamError> {
        let body = self
            .request(reqwest::Method::GET, "/api/apartments", &[], None)
            .await?;
        let apartments = body
            .get("apartments")
            .and_then(|a| a.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(apartments
            .iter()
            .filter_map(|apartment| {
                let pms_id = match apartment.get("id") {
                    Some(Value::Number(n)) => n.to_string(),
                    Some(Value::String(s)) => s.clone(),
                    _ => return None,
                };
                Some(PmsProperty {
                    pms_id,
                    name: apartment
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    latitude: apartment
                        .get("location")
                        .and_then(|l| l.get("latitude"))
                        .and_then(|v| v.as_f64()),
                    longitude: apartment
                        .get("location")
                        .and_then(|l| l.get("longitude"))
                        .and_then(|v| v.as_f64()),
                    capacity: apartment
                        .get("maxOccupancy")
                        .and_then(|v| v.as_i64())
                        .map(|v| v as i32),
                    surface: apartment.get("size").and_then(|v| v.as_f64()),
                })
            })
            .collect())
    }

    async fn test_connection(&self) -> Result<(), UpstreamError> {
        self.request(reqwest::Method::GET, "/api/me", &[], None)
            .await?;
        Ok(())
    }

    async fn get_reservations(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PmsReservation>, UpstreamError> {
        let body = self
            .request(
                reqwest::Method::GET,
                "/api/reservations",
                &[
                    ("from".to_string(), from.format("%Y-%m-%d").to_string()),
                    ("to".to_string(), to.format("%Y-%m-%d").to_string()),
                    ("pageSize".to_string(), "500".to_string()),
                ],
                None,
            )
            .await?;
        let bookings = body
            .get("bookings")
            .and_then(|b| b.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(bookings.iter().filter_map(normalize_reservation).collect())
    }

    async fn create_reservation(
        &self,
        property_pms_id: &str,
        draft: &ReservationDraft,
    ) -> Result<String, UpstreamError> {
        let body = json!({
            "apartmentId": property_pms_id,
            "arrival": draft.start_date.format("%Y-%m-%d").to_string(),
            "departure": draft.end_date.format("%Y-%m-%d").to_string(),
            "price": draft.total_price,
            "firstName": draft.guest_name,
            "channelId": draft.channel,
        });
        let resp = self
            .request(reqwest::Method::POST, "/api/reservations", &[], Some(&body))
            .await?;
        match resp.get("id") {
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::String(s)) => Ok(s.clone()),
            _ => Err(UpstreamError::fatal("reservation created without id")),
        }
    }

    async fn update_reservation(
        &self,
        reservation_pms_id: &str,
        draft: &ReservationDraft,
    ) -> Result<(), UpstreamError> {
        let body = json!({
            "arrival": draft.start_date.format("%Y-%m-%d").to_string(),
            "departure": draft.end_date.format("%Y-%m-%d").to_string(),
            "price": draft.total_price,
            "firstName": draft.guest_name,
        });
        self.request(
            reqwest::Method::PUT,
            &format!("/api/reservations/{reservation_pms_id}"),
            &[],
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn delete_reservation(&self, reservation_pms_id: &str) -> Result<(), UpstreamError> {
        self.request(
            reqwest::Method::DELETE,
            &format!("/api/reservations/{reservation_pms_id}"),
            &[],
            None,
        )
        .await?;
        Ok(())
    }

    async fn update_rate(
        &self,
        property_pms_id: &str,
        date: NaiveDate,
        price: f64,
    ) -> Result<(), UpstreamError> {
        self.update_batch_rates(property_pms_id, &[RateUpdate { date, price }])
            .await
    }

    async fn update_batch_rates(
        &self,
        property_pms_id: &str,
        rates: &[RateUpdate],
    ) -> Result<(), UpstreamError> {
        if rates.is_empty() {
            return Ok(());
        }
        let operations: Vec<Value> = rates
            .iter()
            .map(|rate| {
                json!({
                    "dates": [rate.date.format("%Y-%m-%d").to_string()],
                    "daily_price": rate.price,
                })
            })
            .collect();
        let body = json!({
            "apartments": [property_pms_id],
            "operations": operations,
        });
        self.request(reqwest::Method::POST, "/api/rates", &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn update_property_settings(
        &self,
        property_pms_id: &str,
        settings: &PropertySettingsUpdate,
    ) -> Result<(), UpstreamError> {
        let body = serde_json::to_value(settings)
            .map_err(|err| UpstreamError::fatal(err.to_string()))?;
        self.request(
            reqwest::Method::POST,
            &format!("/api/apartments/{property_pms_id}/settings"),
            &[],
            Some(&body),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_vendor_reservation() {
        let raw = json!({
            "id": 4211,
            "apartment": {"id": 87, "name": "Loft"},
            "arrival": "2026-04-01",
            "departure": "2026-04-05",
            "price": 600.0,
            "channel": {"id": 1, "name": "Airbnb"},
            "type": "reservation",
            "guest-name": "M. Martin",
        });
        let reservation = normalize_reservation(&raw).unwrap();
        assert_eq!(reservation.pms_id, "4211");
        assert_eq!(reservation.property_pms_id, "87");
        assert_eq!(reservation.nights(), 4);
        assert_eq!(reservation.price_per_night(), 150.0);
        assert_eq!(reservation.channel.as_deref(), Some("Airbnb"));
        assert_eq!(reservation.guest_name.as_deref(), Some("M. Martin"));
    }

    #[test]
    fn reservation_without_dates_is_dropped() {
        let raw = json!({"id": 1, "apartment": {"id": 2}});
        assert!(normalize_reservation(&raw).is_none());
    }
}
