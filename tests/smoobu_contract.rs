use std::time::Duration;

use chrono::NaiveDate;
use httpmock::prelude::*;
use rateframe::error::UpstreamKind;
use rateframe::pms::adapter::{PmsAdapter, RateUpdate};
use rateframe::pms::smoobu::SmoobuAdapter;
use rateframe::retry::RetryPolicy;
use serde_json::json;

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        cap: Duration::from_millis(4),
    }
}

#[tokio::test]
async fn lists_apartments_with_api_key_header() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/apartments")
            .header("Api-Key", "key-123");
        then.status(200).json_body(json!({
            "apartments": [
                {"id": 87, "name": "Loft", "location": {"latitude": 48.85, "longitude": 2.35},
                 "maxOccupancy": 4, "size": 55.0},
                {"name": "no id, dropped"},
            ]
        }));
    });

    let adapter = SmoobuAdapter::new(server.base_url(), "key-123");
    let properties = adapter.list_properties().await.unwrap();
    mock.assert();
    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0].pms_id, "87");
    assert_eq!(properties[0].capacity, Some(4));
}

#[tokio::test]
async fn fetches_reservations_with_window_query() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/reservations")
            .query_param("from", "2026-03-01")
            .query_param("to", "2026-09-01")
            .query_param("pageSize", "500");
        then.status(200).json_body(json!({
            "bookings": [
                {"id": 4211, "apartment": {"id": 87}, "arrival": "2026-04-01",
                 "departure": "2026-04-05", "price": 600.0,
                 "channel": {"name": "Airbnb"}, "type": "reservation"},
                {"id": 4212, "apartment": {"id": 87}},
            ]
        }));
    });

    let adapter = SmoobuAdapter::new(server.base_url(), "key-123");
    let reservations = adapter
        .get_reservations(
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
        )
        .await
        .unwrap();
    mock.assert();
    // The undated reservation is dropped during normalization.
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].pms_id, "4211");
}

#[tokio::test]
async fn batch_rate_push_sends_one_operation_per_date() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/api/rates").json_body(json!({
            "apartments": ["87"],
            "operations": [
                {"dates": ["2026-05-01"], "daily_price": 120.0},
                {"dates": ["2026-05-02"], "daily_price": 135.5},
            ]
        }));
        then.status(200).json_body(json!({}));
    });

    let adapter = SmoobuAdapter::new(server.base_url(), "key-123");
    adapter
        .update_batch_rates(
            "87",
            &[
                RateUpdate {
                    date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
                    price: 120.0,
                },
                RateUpdate {
                    date: NaiveDate::from_ymd_opt(2026, 5, 2).unwrap(),
                    price: 135.5,
                },
            ],
        )
        .await
        .unwrap();
    mock.assert();
}

#[tokio::test]
async fn empty_rate_batch_skips_the_network() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/api/rates");
        then.status(200).json_body(json!({}));
    });

    let adapter = SmoobuAdapter::new(server.base_url(), "key-123");
    adapter.update_batch_rates("87", &[]).await.unwrap();
    mock.assert_hits(0);
}

#[tokio::test]
async fn rate_limit_consumes_the_whole_attempt_budget() {
    let server = MockServer::start_async().await;
    let limited = server.mock(|when, then| {
        when.method(GET).path("/api/me");
        then.status(429);
    });

    let adapter =
        SmoobuAdapter::new(server.base_url(), "key-123").with_retry_policy(fast_policy(3));
    let err = adapter.test_connection().await.unwrap_err();
    assert_eq!(err.kind, UpstreamKind::RateLimit);
    // All three attempts hit the vendor before giving up.
    limited.assert_hits(3);
}

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let server = MockServer::start_async().await;
    let denied = server.mock(|when, then| {
        when.method(GET).path("/api/me");
        then.status(401);
    });

    let adapter =
        SmoobuAdapter::new(server.base_url(), "bad-key").with_retry_policy(fast_policy(5));
    let err = adapter.test_connection().await.unwrap_err();
    assert_eq!(err.kind, UpstreamKind::Auth);
    denied.assert_hits(1);
}
