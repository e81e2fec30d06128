use once_cell::sync::Lazy;

/// Stripe API secret. Billing cannot run without it; `require_billing_config`
/// is called at startup and the process exits when it is missing.
pub static STRIPE_SECRET_KEY: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("STRIPE_SECRET_KEY"));

/// Shared secret used to verify billing webhook signatures.
pub static STRIPE_WEBHOOK_SECRET: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("STRIPE_WEBHOOK_SECRET"));

/// Price id for the per-unit parent (principal) subscription item.
pub static STRIPE_PRICE_PARENT: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("STRIPE_PRICE_PARENT"));

/// Price id for the per-unit child subscription item.
pub static STRIPE_PRICE_CHILD: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("STRIPE_PRICE_CHILD"));

/// Base URL of the billing provider API. Overridable for tests.
pub static STRIPE_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("STRIPE_API_BASE").unwrap_or_else(|| "https://api.stripe.com".to_string())
});

/// OpenAI-compatible chat completions key (fallback oracle).
pub static OPENAI_API_KEY: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("OPENAI_API_KEY"));

/// Perplexity key; when present the web-search oracle is preferred.
pub static PERPLEXITY_API_KEY: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("PERPLEXITY_API_KEY"));

pub static OPENAI_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("OPENAI_API_BASE").unwrap_or_else(|| "https://api.openai.com".to_string())
});

pub static PERPLEXITY_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("PERPLEXITY_API_BASE")
        .unwrap_or_else(|| "https://api.perplexity.ai".to_string())
});

/// Frontend origin used for checkout/portal redirect URLs.
pub static FRONTEND_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("FRONTEND_URL").unwrap_or_else(|| "http://localhost:5173".to_string())
});

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// IANA timezone the daily fleet sync runs in. Defaults to `Europe/Paris`.
pub static SERVER_TIMEZONE: Lazy<String> = Lazy::new(|| {
    read_optional_env("SERVER_TIMEZONE").unwrap_or_else(|| "Europe/Paris".to_string())
});

/// Local hour of the daily PMS fleet sync.
pub static FLEET_SYNC_HOUR: Lazy<u32> = Lazy::new(|| {
    std::env::var("FLEET_SYNC_HOUR")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value < 24)
        .unwrap_or(4)
});

/// Trial length granted to first-time portfolios, in days.
pub static TRIAL_PERIOD_DAYS: Lazy<u32> = Lazy::new(|| {
    std::env::var("TRIAL_PERIOD_DAYS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(30)
});

/// When set to a truthy value, allows the application to continue running even
/// if database migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_parent: String,
    pub price_child: String,
}

/// Returns the billing configuration or the list of missing variable names.
pub fn require_billing_config() -> Result<BillingConfig, Vec<&'static str>> {
    let mut missing = Vec::new();
    if STRIPE_SECRET_KEY.is_none() {
        missing.push("STRIPE_SECRET_KEY");
    }
    if STRIPE_WEBHOOK_SECRET.is_none() {
        missing.push("STRIPE_WEBHOOK_SECRET");
    }
    if STRIPE_PRICE_PARENT.is_none() {
        missing.push("STRIPE_PRICE_PARENT");
    }
    if STRIPE_PRICE_CHILD.is_none() {
        missing.push("STRIPE_PRICE_CHILD");
    }
    if !missing.is_empty() {
        return Err(missing);
    }
    Ok(BillingConfig {
        secret_key: STRIPE_SECRET_KEY.clone().unwrap(),
        webhook_secret: STRIPE_WEBHOOK_SECRET.clone().unwrap(),
        price_parent: STRIPE_PRICE_PARENT.clone().unwrap(),
        price_child: STRIPE_PRICE_CHILD.clone().unwrap(),
    })
}

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
