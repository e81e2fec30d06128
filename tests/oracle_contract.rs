use std::time::Duration;

use chrono::{NaiveDate, Utc};
use httpmock::prelude::*;
use rateframe::error::UpstreamKind;
use rateframe::models::Property;
use rateframe::pricing::oracle::{LlmOracle, PricingOracle};
use rateframe::retry::RetryPolicy;
use serde_json::json;
use uuid::Uuid;

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        cap: Duration::from_millis(4),
    }
}

fn property() -> Property {
    Property {
        id: Uuid::new_v4(),
        team_id: 1,
        name: "Loft Bastille".into(),
        pms_id: None,
        pms_type: None,
        latitude: 48.8532,
        longitude: 2.3695,
        capacity: 2,
        surface: 38.0,
        property_type: "apartment".into(),
        floor_price: 85.0,
        base_price: 130.0,
        ceiling_price: Some(240.0),
        min_stay: None,
        max_stay: None,
        weekly_discount_percent: None,
        monthly_discount_percent: None,
        weekend_markup_percent: None,
        strategy: "equilibre".into(),
        amenities: serde_json::json!(["wifi"]),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn answer_with_calendar() -> serde_json::Value {
    let content = json!({
        "calendar": [
            {"date": "2026-05-01", "suggested_price": 139.0, "reasoning": "May day demand[1]"},
            {"date": "2026-05-02", "suggested_price": 149.0, "reasoning": "Saturday"},
        ],
        "property_grade": "B",
        "market_sentiment": "firm",
        "top_demand_drivers": ["holiday"],
        "strategy_active": "Équilibré",
    })
    .to_string();
    json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
}

#[tokio::test]
async fn perplexity_answer_is_parsed_and_cleaned() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .header("authorization", "Bearer pplx-key")
            .json_body_partial(r#"{"model": "sonar-pro", "search_recency_filter": "week"}"#);
        then.status(200).json_body(answer_with_calendar());
    });

    let oracle = LlmOracle::new(server.base_url(), Some("pplx-key".into()), "unused", None);
    let calendar = oracle
        .generate_calendar(&property(), NaiveDate::from_ymd_opt(2026, 5, 1).unwrap())
        .await
        .unwrap();
    mock.assert();
    assert_eq!(calendar.days.len(), 2);
    // Citation markers are stripped before storage.
    assert_eq!(calendar.days[0].reasoning.as_deref(), Some("May day demand"));
    assert_eq!(calendar.property_grade.as_deref(), Some("B"));
}

#[tokio::test]
async fn falls_back_to_openai_when_web_search_is_down() {
    let perplexity = MockServer::start_async().await;
    let down = perplexity.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(500);
    });

    let openai = MockServer::start_async().await;
    let fallback = openai.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .json_body_partial(r#"{"model": "gpt-4o"}"#);
        then.status(200).json_body(answer_with_calendar());
    });

    let oracle = LlmOracle::new(
        perplexity.base_url(),
        Some("pplx-key".into()),
        openai.base_url(),
        Some("oa-key".into()),
    )
    .with_retry_policy(fast_policy(2));

    let calendar = oracle
        .generate_calendar(&property(), NaiveDate::from_ymd_opt(2026, 5, 1).unwrap())
        .await
        .unwrap();
    // The transient failure burns the retry budget before the fallback fires.
    down.assert_hits(2);
    fallback.assert_hits(1);
    assert_eq!(calendar.days.len(), 2);
}

#[tokio::test]
async fn no_configured_key_is_a_fatal_error() {
    let oracle = LlmOracle::new("http://unused", None, "http://unused", None);
    let err = oracle
        .generate_calendar(&property(), NaiveDate::from_ymd_opt(2026, 5, 1).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind, UpstreamKind::Fatal);
}
