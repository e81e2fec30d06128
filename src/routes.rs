use axum::{routing::post, Router};

use crate::{billing, pms, pricing};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/billing/webhook", post(billing::webhook::stripe_webhook))
        .route("/api/billing/checkout", post(billing::checkout::create_checkout))
        .route("/api/billing/portal", post(billing::checkout::create_portal))
        .route(
            "/api/properties/:id/push",
            post(pms::coordinator::push_property_handler),
        )
        .route(
            "/api/properties/:id/price",
            post(pricing::pipeline::price_property_handler),
        )
        .route(
            "/api/pms/import",
            post(pms::coordinator::import_reservations_handler),
        )
}
