use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use sqlx::PgPool;
use tokio::time;
use tracing::{info, warn};

use crate::models::{AutoPricingState, User};
use crate::pms::coordinator;
use crate::store;

use super::oracle::PricingOracle;
use super::pipeline;

const TICK_INTERVAL_SECS: u64 = 3600;

/// Minimum gap before a failed run is retried.
const RETRY_AFTER_SECS: i64 = 3600;

pub fn spawn(pool: PgPool, oracle: Arc<dyn PricingOracle>) {
    tokio::spawn(async move {
        loop {
            // Align on the top of the hour so midnight matching works.
            let now = Utc::now();
            let into_hour = (now.minute() * 60 + now.second()) as u64;
            time::sleep(StdDuration::from_secs(TICK_INTERVAL_SECS - into_hour)).await;

            let now = Utc::now();
            let tick = now
                .date_naive()
                .and_hms_opt(now.hour(), 0, 0)
                .map(|naive| naive.and_utc())
                .unwrap_or(now);
            if let Err(err) = process_tick(&pool, oracle.as_ref(), tick).await {
                warn!(?err, "auto-pricing tick failed");
            }
        }
    });
}

/// A user is due when the tick lands inside their local midnight hour, or
/// when a previous run failed and at least an hour has passed since the
/// attempt. Matching on the hour alone keeps half-hour-offset zones
/// (Kolkata, Adelaide) eligible: their local minute is never zero on an
/// hourly UTC tick.
pub fn is_due(state: &AutoPricingState, user_timezone: &str, now: DateTime<Utc>) -> Option<bool> {
    if !state.enabled {
        return Some(false);
    }

    if state.failed_attempts > 0 {
        let retry_ready = state
            .last_attempt
            .map(|at| (now - at).num_seconds() >= RETRY_AFTER_SECS)
            .unwrap_or(true);
        if retry_ready {
            return Some(true);
        }
    }

    let tz_name = state.timezone.as_deref().unwrap_or(user_timezone);
    let tz: Tz = tz_name.parse().ok()?;
    let local = now.with_timezone(&tz);
    Some(local.hour() == 0)
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub users_run: usize,
    pub users_failed: usize,
    pub users_skipped: usize,
}

pub async fn process_tick(
    pool: &PgPool,
    oracle: &dyn PricingOracle,
    now: DateTime<Utc>,
) -> Result<TickReport> {
    let users = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE (auto_pricing->>'enabled')::boolean IS TRUE ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut report = TickReport::default();
    // Sequential on purpose: the oracle and the PMS both rate-limit, and a
    // slow user must not starve the rest via connection pressure.
    for user in users {
        let state = user.auto_pricing_state();
        match is_due(&state, &user.timezone, now) {
            Some(true) => {}
            Some(false) => {
                report.users_skipped += 1;
                continue;
            }
            None => {
                warn!(
                    user_id = user.id,
                    timezone = %state.timezone.as_deref().unwrap_or(&user.timezone),
                    "unknown timezone; skipping auto-pricing"
                );
                report.users_skipped += 1;
                continue;
            }
        }

        match run_user(pool, oracle, &user, now).await {
            Ok(0) => {
                report.users_run += 1;
                store::save_auto_pricing(
                    pool,
                    user.id,
                    &AutoPricingState {
                        last_run: Some(now),
                        last_attempt: Some(now),
                        last_successful_run: Some(now),
                        failed_attempts: 0,
                        ..state
                    },
                )
                .await?;
            }
            Ok(failures) => {
                report.users_failed += 1;
                warn!(user_id = user.id, failures, "auto-pricing run had failures");
                store::save_auto_pricing(
                    pool,
                    user.id,
                    &AutoPricingState {
                        last_run: Some(now),
                        last_attempt: Some(now),
                        failed_attempts: state.failed_attempts + 1,
                        ..state
                    },
                )
                .await?;
            }
            Err(err) => {
                report.users_failed += 1;
                warn!(?err, user_id = user.id, "auto-pricing run failed");
                store::save_auto_pricing(
                    pool,
                    user.id,
                    &AutoPricingState {
                        last_attempt: Some(now),
                        failed_attempts: state.failed_attempts + 1,
                        ..state
                    },
                )
                .await?;
            }
        }
    }

    info!(
        run = report.users_run,
        failed = report.users_failed,
        skipped = report.users_skipped,
        "auto-pricing tick finished"
    );
    Ok(report)
}

/// One user's full run: synchronized groups first, then every property that
/// is not covered by one. Returns the number of failed properties.
pub async fn run_user(
    pool: &PgPool,
    oracle: &dyn PricingOracle,
    user: &User,
    now: DateTime<Utc>,
) -> Result<usize> {
    let today = now.date_naive();
    let adapter = coordinator::adapter_for_user(pool, user.id)
        .await
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    let adapter = adapter.as_deref();

    let properties = store::list_team_properties(pool, user.team_id).await?;
    let mut covered: Vec<uuid::Uuid> = Vec::new();
    let mut failures = 0usize;

    for group in store::list_user_groups(pool, user.id).await? {
        if !group.sync_prices {
            continue;
        }
        let members = store::group_members(pool, group.id).await?;
        if members.is_empty() {
            continue;
        }
        covered.extend(members.iter().map(|m| m.id));
        match pipeline::run_group(pool, oracle, user, &group, &members, adapter, today).await {
            Ok(n) => failures += n,
            Err(err) => {
                warn!(?err, group_id = %group.id, "group pricing run failed");
                failures += members.len();
            }
        }
    }

    for property in properties.iter().filter(|p| !covered.contains(&p.id)) {
        if let Err(err) = pipeline::run_property(pool, oracle, user, property, adapter, today).await
        {
            warn!(?err, property_id = %property.id, "property pricing run failed");
            failures += 1;
        }
    }

    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn enabled_state(tz: &str) -> AutoPricingState {
        AutoPricingState {
            enabled: true,
            timezone: Some(tz.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn due_at_local_midnight() {
        // 22:00 UTC in summer is midnight in Paris (CEST, UTC+2).
        let now = Utc.with_ymd_and_hms(2024, 7, 10, 22, 0, 0).unwrap();
        let state = enabled_state("Europe/Paris");
        assert_eq!(is_due(&state, "UTC", now), Some(true));
    }

    #[test]
    fn not_due_an_hour_later() {
        let now = Utc.with_ymd_and_hms(2024, 7, 10, 23, 0, 0).unwrap();
        let state = enabled_state("Europe/Paris");
        assert_eq!(is_due(&state, "UTC", now), Some(false));
    }

    #[test]
    fn half_hour_offset_zone_is_due_exactly_once_a_day() {
        // Kolkata is UTC+5:30, so its local minute is never zero on an
        // hourly UTC tick. The midnight hour must still match once.
        let state = enabled_state("Asia/Kolkata");
        let due: Vec<u32> = (0..24)
            .filter(|&h| {
                let tick = Utc.with_ymd_and_hms(2024, 7, 10, h, 0, 0).unwrap();
                is_due(&state, "UTC", tick) == Some(true)
            })
            .collect();
        // 18:30 UTC is local midnight; the 18:00 tick is still 23:30 local.
        assert_eq!(due, vec![19]);
    }

    #[test]
    fn disabled_is_never_due() {
        let now = Utc.with_ymd_and_hms(2024, 7, 10, 22, 0, 0).unwrap();
        let state = AutoPricingState {
            timezone: Some("Europe/Paris".to_string()),
            ..Default::default()
        };
        assert_eq!(is_due(&state, "UTC", now), Some(false));
    }

    #[test]
    fn falls_back_to_user_timezone() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let state = AutoPricingState {
            enabled: true,
            ..Default::default()
        };
        assert_eq!(is_due(&state, "UTC", now), Some(true));
        assert_eq!(is_due(&state, "Europe/Paris", now), Some(false));
    }

    #[test]
    fn unknown_timezone_is_none() {
        let now = Utc.with_ymd_and_hms(2024, 7, 10, 22, 0, 0).unwrap();
        let state = enabled_state("Mars/Olympus_Mons");
        assert_eq!(is_due(&state, "UTC", now), None);
    }

    #[test]
    fn failed_run_retries_after_an_hour() {
        let attempt = Utc.with_ymd_and_hms(2024, 7, 10, 3, 0, 0).unwrap();
        let state = AutoPricingState {
            enabled: true,
            timezone: Some("Europe/Paris".to_string()),
            last_attempt: Some(attempt),
            failed_attempts: 2,
            ..Default::default()
        };
        assert_eq!(is_due(&state, "UTC", attempt + Duration::minutes(30)), Some(false));
        assert_eq!(is_due(&state, "UTC", attempt + Duration::hours(1)), Some(true));
    }
}
