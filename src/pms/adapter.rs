use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

/// Property as reported by a PMS vendor, normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmsProperty {
    pub pms_id: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub capacity: Option<i32>,
    pub surface: Option<f64>,
}

/// Reservation normalized to the engine's model: `end_date` is the checkout
/// day, exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmsReservation {
    pub pms_id: String,
    pub property_pms_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_price: f64,
    pub channel: Option<String>,
    pub status: String,
    pub guest_name: Option<String>,
}

impl PmsReservation {
    pub fn nights(&self) -> i64 {
        (self.end_date - self.start_date).num_days().max(0)
    }

    pub fn price_per_night(&self) -> f64 {
        let nights = self.nights();
        if nights > 0 {
            self.total_price / nights as f64
        } else {
            self.total_price
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationDraft {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_price: f64,
    pub guest_name: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateUpdate {
    pub date: NaiveDate,
    pub price: f64,
}

/// Partial settings push; only present fields are written at the vendor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertySettingsUpdate {
    pub base_price: Option<f64>,
    pub floor_price: Option<f64>,
    pub ceiling_price: Option<f64>,
    pub min_stay: Option<i32>,
    pub max_stay: Option<i32>,
    pub weekly_discount_percent: Option<f64>,
    pub monthly_discount_percent: Option<f64>,
    pub weekend_markup_percent: Option<f64>,
}

/// Normalized client over one PMS vendor account. Implementations classify
/// vendor failures into `UpstreamKind` and absorb vendor quirks (date
/// conventions, nested payloads) so the engine sees one model.
#[async_trait]
pub trait PmsAdapter: Send + Sync {
    async fn list_properties(&self) -> Result<Vec<PmsProperty>, UpstreamError>;

    async fn test_connection(&self) -> Result<(), UpstreamError>;

    async fn get_reservations(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PmsReservation>, UpstreamError>;

    async fn create_reservation(
        &self,
        property_pms_id: &str,
        draft: &ReservationDraft,
    ) -> Result<String, UpstreamError>;

    async fn update_reservation(
        &self,
        reservation_pms_id: &str,
        draft: &ReservationDraft,
    ) -> Result<(), UpstreamError>;

    async fn delete_reservation(&self, reservation_pms_id: &str) -> Result<(), UpstreamError>;

    async fn update_rate(
        &self,
        property_pms_id: &str,
        date: NaiveDate,
        price: f64,
    ) -> Result<(), UpstreamError>;

    /// All-or-nothing per property call: either the whole batch lands or the
    /// vendor state is unchanged and the error surfaces to the caller.
    async fn update_batch_rates(
        &self,
        property_pms_id: &str,
        rates: &[RateUpdate],
    ) -> Result<(), UpstreamError>;

    async fn update_property_settings(
        &self,
        property_pms_id: &str,
        settings: &PropertySettingsUpdate,
    ) -> Result<(), UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nightly_price_uses_exclusive_end_date() {
        let reservation = PmsReservation {
            pms_id: "r1".into(),
            property_pms_id: "p1".into(),
            start_date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            total_price: 480.0,
            channel: None,
            status: "confirmed".into(),
            guest_name: None,
        };
        assert_eq!(reservation.nights(), 4);
        assert_eq!(reservation.price_per_night(), 120.0);
    }

    #[test]
    fn zero_night_reservation_does_not_divide_by_zero() {
        let reservation = PmsReservation {
            pms_id: "r1".into(),
            property_pms_id: "p1".into(),
            start_date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            total_price: 90.0,
            channel: None,
            status: "confirmed".into(),
            guest_name: None,
        };
        assert_eq!(reservation.nights(), 0);
        assert_eq!(reservation.price_per_night(), 90.0);
    }
}
