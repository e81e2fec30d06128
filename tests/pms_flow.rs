use chrono::{NaiveDate, Utc};
use httpmock::prelude::*;
use rateframe::error::AppError;
use rateframe::models::Booking;
use rateframe::pms::coordinator::{daily_fleet_sync, import_reservations, push_property};
use rateframe::pricing::overrides::{self, OverrideWrite};
use rateframe::store;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

async fn insert_user(pool: &PgPool, email: &str) -> i32 {
    sqlx::query_scalar("INSERT INTO users (email, team_id) VALUES ($1, 1) RETURNING id")
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn insert_integration(pool: &PgPool, user_id: i32, api_base: &str) {
    sqlx::query(
        "INSERT INTO integrations (user_id, provider, credentials) VALUES ($1, 'smoobu', $2)",
    )
    .bind(user_id)
    .bind(json!({"api_key": "key-123", "api_base": api_base}))
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_property(pool: &PgPool, pms_id: Option<&str>) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO properties
            (team_id, name, pms_id, latitude, longitude, capacity, surface,
             property_type, floor_price, base_price, ceiling_price)
        VALUES (1, 'Loft', $1, 48.8566, 2.3522, 4, 55.0, 'apartment', 80.0, 120.0, 250.0)
        RETURNING id
        "#,
    )
    .bind(pms_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn reimported_reservations_deduplicate_on_vendor_id(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let property_id = insert_property(&pool, Some("87")).await;
    let booking = Booking {
        id: Uuid::new_v4(),
        property_id,
        pms_booking_id: Some("4211".into()),
        start_date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 4, 5).unwrap(),
        price_per_night: 150.0,
        revenue: 600.0,
        source: "Airbnb".into(),
        status: "reservation".into(),
        guest_name: Some("M. Martin".into()),
        created_at: Utc::now(),
    };
    store::upsert_booking(&pool, &booking).await.unwrap();

    // Re-delivery with an updated price converges onto the same row.
    let mut updated = booking.clone();
    updated.id = Uuid::new_v4();
    updated.revenue = 640.0;
    updated.price_per_night = 160.0;
    store::upsert_booking(&pool, &updated).await.unwrap();

    let (count, revenue): (i64, f64) =
        sqlx::query_as("SELECT COUNT(*), MAX(revenue) FROM bookings WHERE property_id = $1")
            .bind(property_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
    assert_eq!(revenue, 640.0);

    // Manual bookings without a vendor id never collide.
    let mut manual = booking.clone();
    manual.id = Uuid::new_v4();
    manual.pms_booking_id = None;
    store::upsert_booking(&pool, &manual).await.unwrap();
    let mut manual2 = manual.clone();
    manual2.id = Uuid::new_v4();
    store::upsert_booking(&pool, &manual2).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE property_id = $1")
        .bind(property_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn import_matches_reservations_to_linked_properties(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/api/reservations");
        then.status(200).json_body(json!({
            "bookings": [
                {"id": 4211, "apartment": {"id": 87}, "arrival": "2026-04-01",
                 "departure": "2026-04-05", "price": 600.0,
                 "channel": {"name": "Airbnb"}, "type": "reservation"},
                {"id": 9999, "apartment": {"id": 404}, "arrival": "2026-04-02",
                 "departure": "2026-04-04", "price": 200.0, "type": "reservation"},
            ]
        }));
    });

    let user_id = insert_user(&pool, "import@example.com").await;
    insert_integration(&pool, user_id, &server.base_url()).await;
    let property_id = insert_property(&pool, Some("87")).await;
    let user = store::get_user(&pool, user_id).await.unwrap().unwrap();

    let report = import_reservations(&pool, &user).await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.upserted, 1);
    assert_eq!(report.unmatched, 1);

    // A second import converges instead of duplicating.
    let report = import_reservations(&pool, &user).await.unwrap();
    assert_eq!(report.upserted, 1);
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE property_id = $1")
        .bind(property_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let price_per_night: f64 =
        sqlx::query_scalar("SELECT price_per_night FROM bookings WHERE property_id = $1")
            .bind(property_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(price_per_night, 150.0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn disabled_user_cannot_push(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let user_id = insert_user(&pool, "disabled@example.com").await;
    sqlx::query("UPDATE users SET access_disabled = TRUE, pms_sync_enabled = FALSE WHERE id = $1")
        .bind(user_id)
        .execute(&pool)
        .await
        .unwrap();
    let user = store::get_user(&pool, user_id).await.unwrap().unwrap();
    let property_id = insert_property(&pool, Some("87")).await;
    let property = store::get_property(&pool, property_id).await.unwrap().unwrap();

    match push_property(&pool, &user, &property).await {
        Err(AppError::Forbidden) => {}
        other => panic!("expected forbidden, got {other:?}"),
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn fleet_sync_pushes_the_override_price_for_today(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let today = Utc::now().date_naive();
    let server = MockServer::start_async().await;
    let rates = server.mock(|when, then| {
        when.method(POST).path("/api/rates").json_body(json!({
            "apartments": ["87"],
            "operations": [
                {"dates": [today.format("%Y-%m-%d").to_string()], "daily_price": 132.0}
            ]
        }));
        then.status(200).json_body(json!({}));
    });

    let user_id = insert_user(&pool, "fleet@example.com").await;
    insert_integration(&pool, user_id, &server.base_url()).await;
    let property_id = insert_property(&pool, Some("87")).await;
    let property = store::get_property(&pool, property_id).await.unwrap().unwrap();
    overrides::upsert_batch(
        &pool,
        &property,
        &[OverrideWrite {
            date: today,
            price: 132.0,
            reason: None,
            is_locked: false,
        }],
        "user",
    )
    .await
    .unwrap();

    let report = daily_fleet_sync(&pool).await.unwrap();
    assert_eq!(report.properties_synced, 1);
    assert_eq!(report.properties_failed, 0);
    rates.assert();

    let last_sync: Option<chrono::DateTime<Utc>> =
        sqlx::query_scalar("SELECT last_sync FROM integrations WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(last_sync.is_some());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn fleet_sync_skips_users_with_sync_disabled(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let server = MockServer::start_async().await;
    let rates = server.mock(|when, then| {
        when.method(POST).path("/api/rates");
        then.status(200).json_body(json!({}));
    });

    let user_id = insert_user(&pool, "stopped@example.com").await;
    sqlx::query("UPDATE users SET pms_sync_enabled = FALSE, pms_sync_stopped_reason = 'payment_failed' WHERE id = $1")
        .bind(user_id)
        .execute(&pool)
        .await
        .unwrap();
    insert_integration(&pool, user_id, &server.base_url()).await;
    insert_property(&pool, Some("87")).await;

    let report = daily_fleet_sync(&pool).await.unwrap();
    assert_eq!(report.users_skipped, 1);
    assert_eq!(report.properties_synced, 0);
    rates.assert_hits(0);
}
