use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Account owner. Billing fields and the kill-switch pair live here;
/// `auto_pricing` is a JSONB blob decoded on demand.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub team_id: i32,
    pub role: String,
    pub timezone: String,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub subscription_status: Option<String>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub payment_failed: bool,
    pub access_disabled: bool,
    pub auth_banned: bool,
    pub pms_sync_enabled: bool,
    pub pms_sync_stopped_reason: Option<String>,
    pub auto_pricing: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn auto_pricing_state(&self) -> AutoPricingState {
        serde_json::from_value(self.auto_pricing.clone()).unwrap_or_default()
    }

    pub fn trial_active(&self, now: DateTime<Utc>) -> bool {
        self.trial_ends_at.map(|end| end > now).unwrap_or(false)
    }
}

/// Per-user auto-pricing bookkeeping stored as `users.auto_pricing`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoPricingState {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_successful_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_attempts: i32,
}

/// Pricing strategy selected per property. Labels are the product's
/// French-facing names; storage uses the ascii tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Prudent,
    Equilibre,
    Agressif,
}

impl Strategy {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "prudent" => Strategy::Prudent,
            "agressif" => Strategy::Agressif,
            _ => Strategy::Equilibre,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Strategy::Prudent => "prudent",
            Strategy::Equilibre => "equilibre",
            Strategy::Agressif => "agressif",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Strategy::Prudent => "Prudent",
            Strategy::Equilibre => "Équilibré",
            Strategy::Agressif => "Agressif",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Property {
    pub id: Uuid,
    pub team_id: i32,
    pub name: String,
    pub pms_id: Option<String>,
    pub pms_type: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity: i32,
    pub surface: f64,
    pub property_type: String,
    pub floor_price: f64,
    pub base_price: f64,
    pub ceiling_price: Option<f64>,
    pub min_stay: Option<i32>,
    pub max_stay: Option<i32>,
    pub weekly_discount_percent: Option<f64>,
    pub monthly_discount_percent: Option<f64>,
    pub weekend_markup_percent: Option<f64>,
    pub strategy: String,
    pub amenities: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Property {
    pub fn strategy(&self) -> Strategy {
        Strategy::from_tag(&self.strategy)
    }

    /// Clamps a nightly price to the property's floor/ceiling band.
    pub fn clamp_price(&self, price: f64) -> f64 {
        let mut value = price.max(self.floor_price);
        if let Some(ceiling) = self.ceiling_price {
            value = value.min(ceiling);
        }
        value
    }

    pub fn pms_linked(&self) -> bool {
        self.pms_id.is_some()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub owner_id: i32,
    pub name: String,
    pub main_property_id: Option<Uuid>,
    pub sync_prices: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub property_id: Uuid,
    pub pms_booking_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub price_per_night: f64,
    pub revenue: f64,
    pub source: String,
    pub status: String,
    pub guest_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One PMS connection per (user, vendor). Credentials are stored opaque.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Integration {
    pub user_id: i32,
    pub provider: String,
    pub credentials: serde_json::Value,
    pub last_sync: Option<DateTime<Utc>>,
}
