use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Group, Property, User};
use crate::store;

/// Maximum great-circle distance between any two group members, in meters.
pub const GEO_FENCE_METERS: f64 = 500.0;

/// Properties a trialing user may hold before checkout.
pub const TRIAL_PROPERTY_LIMIT: i64 = 1;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two WGS84 coordinates, in meters.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_METERS * c
}

/// Checks a candidate against the group template: static features must match
/// exactly and the candidate must sit inside the geo fence.
pub fn check_member_fits(template: &Property, candidate: &Property) -> Result<(), AppError> {
    if template.capacity != candidate.capacity
        || template.surface != candidate.surface
        || template.property_type != candidate.property_type
    {
        return Err(AppError::Conflict(
            "group members must share capacity, surface and property type".to_string(),
        ));
    }
    let distance = haversine_meters(
        template.latitude,
        template.longitude,
        candidate.latitude,
        candidate.longitude,
    );
    if distance > GEO_FENCE_METERS {
        return Err(AppError::GeoFenceViolation {
            distance,
            max_distance: GEO_FENCE_METERS,
        });
    }
    Ok(())
}

/// Validates and persists a group membership addition. The template is the
/// first member in stored order; an empty group accepts any property.
pub async fn add_member(
    pool: &PgPool,
    group: &Group,
    property_id: Uuid,
) -> Result<(), AppError> {
    let candidate = store::get_property(pool, property_id)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?
        .ok_or(AppError::NotFound)?;

    let members = store::group_members(pool, group.id)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?;
    if let Some(template) = members.first() {
        if members.iter().any(|m| m.id == property_id) {
            return Ok(());
        }
        check_member_fits(template, &candidate)?;
    }

    store::add_group_member(pool, group.id, property_id)
        .await
        .map_err(|err| AppError::Message(err.to_string()))?;
    Ok(())
}

/// Trialing users are capped at one property until checkout completes.
pub fn check_trial_property_limit(user: &User, current_count: i64) -> Result<(), AppError> {
    let trialing = user.subscription_id.is_none()
        || user.subscription_status.as_deref() == Some("trialing");
    if trialing && current_count >= TRIAL_PROPERTY_LIMIT {
        return Err(AppError::TrialLimitExceeded {
            current_count,
            max_allowed: TRIAL_PROPERTY_LIMIT,
        });
    }
    Ok(())
}
