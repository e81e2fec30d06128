use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{UpstreamError, UpstreamKind};
use crate::models::{Property, Strategy};
use crate::retry::{with_backoff, RetryPolicy};

/// Length of the generated calendar, in days.
pub const CALENDAR_DAYS: usize = 180;

#[derive(Debug, Clone)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub suggested_price: f64,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PricingCalendar {
    pub days: Vec<CalendarDay>,
    pub property_grade: Option<String>,
    pub market_sentiment: Option<String>,
    pub top_demand_drivers: Vec<String>,
    pub strategy_active: Option<String>,
}

/// The external pricing brain. Injected so tests can substitute a
/// deterministic stub.
#[async_trait]
pub trait PricingOracle: Send + Sync {
    async fn generate_calendar(
        &self,
        property: &Property,
        today: NaiveDate,
    ) -> Result<PricingCalendar, UpstreamError>;
}

static CITATION_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d+\]").expect("citation regex"));

/// Web-search answers come back sprinkled with `[1]`-style citation markers;
/// they never belong in stored reasoning.
pub fn strip_citations(text: &str) -> String {
    CITATION_MARKERS.replace_all(text, "").trim().to_string()
}

fn strategy_brief(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::Prudent => {
            "Prudent: prioritize occupancy, price near the lower half of the band, \
             discount low-demand dates early"
        }
        Strategy::Equilibre => {
            "Équilibré: balance occupancy and nightly rate, track the market median"
        }
        Strategy::Agressif => {
            "Agressif: prioritize nightly rate, hold prices high into peak demand \
             and release late"
        }
    }
}

/// Builds the prompt contract: strategy semantics, hard bands, rules, the
/// eight-stage reasoning pipeline and a strict JSON-only schema.
pub fn build_prompt(property: &Property, today: NaiveDate) -> String {
    let strategy = property.strategy();
    let ceiling = property
        .ceiling_price
        .map(|c| format!("{c:.2}"))
        .unwrap_or_else(|| "none".to_string());
    let rules = format!(
        "min_stay={:?}, max_stay={:?}, weekly_discount_percent={:?}, \
         monthly_discount_percent={:?}, weekend_markup_percent={:?}",
        property.min_stay,
        property.max_stay,
        property.weekly_discount_percent,
        property.monthly_discount_percent,
        property.weekend_markup_percent,
    );
    format!(
        r#"You are a short-term-rental revenue manager. Produce a {days}-day nightly price calendar starting {today} for this property.

Property: "{name}" ({property_type}, {capacity} guests, {surface} m2) at latitude {lat}, longitude {lon}.
Amenities: {amenities}.
Strategy: {strategy_label}. {strategy_brief}.
Hard pricing band: floor {floor:.2}, base {base:.2}, ceiling {ceiling}. Every suggested price MUST stay inside the band.
Rules: {rules}.

Reason through these eight stages, in order:
1. Macro context for the destination (economy, travel trends).
2. Seasonality curve for the location.
3. Day-of-week shape (weekday vs weekend demand).
4. Local events and holidays on specific dates.
5. A simulated competitive set of comparable listings.
6. Lead-time adjustment (closer dates discount faster when unsold).
7. Orphan-day smoothing (avoid stranded single nights between bookings).
8. Charm pricing on the final figures.

Respond with a single JSON object and nothing else, following exactly this schema:
{{
  "calendar": [{{"date": "YYYY-MM-DD", "suggested_price": number, "reasoning": "short string"}}],
  "property_grade": "string",
  "market_sentiment": "string",
  "top_demand_drivers": ["string"],
  "strategy_active": "string"
}}
The calendar MUST contain exactly {days} consecutive dates starting {today}. Prices are numbers, not strings. No markdown, no commentary, no citations."#,
        days = CALENDAR_DAYS,
        today = today,
        name = property.name,
        property_type = property.property_type,
        capacity = property.capacity,
        surface = property.surface,
        lat = property.latitude,
        lon = property.longitude,
        amenities = property.amenities,
        strategy_label = strategy.label(),
        strategy_brief = strategy_brief(strategy),
        floor = property.floor_price,
        base = property.base_price,
        ceiling = ceiling,
        rules = rules,
    )
}

/// Pulls the JSON object out of a model answer that may be fenced or padded
/// with prose.
fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Parses and validates a model answer. An empty calendar, an unparseable
/// date or a non-finite price fails the pipeline step.
pub fn parse_calendar(raw: &str) -> Result<PricingCalendar, UpstreamError> {
    let json_text = extract_json(raw)
        .ok_or_else(|| UpstreamError::fatal("oracle answer contains no JSON object"))?;
    let value: Value = serde_json::from_str(json_text)
        .map_err(|err| UpstreamError::fatal(format!("oracle answer is not valid JSON: {err}")))?;

    let entries = value
        .get("calendar")
        .and_then(|c| c.as_array())
        .ok_or_else(|| UpstreamError::fatal("oracle answer has no calendar array"))?;
    if entries.is_empty() {
        return Err(UpstreamError::fatal("oracle calendar is empty"));
    }

    let mut days = Vec::with_capacity(entries.len());
    for entry in entries {
        let date_raw = entry
            .get("date")
            .and_then(|v| v.as_str())
            .ok_or_else(|| UpstreamError::fatal("calendar entry without date"))?;
        let date = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d")
            .map_err(|_| UpstreamError::fatal(format!("invalid calendar date: {date_raw}")))?;
        let price = entry
            .get("suggested_price")
            .and_then(|v| v.as_f64())
            .filter(|p| p.is_finite())
            .ok_or_else(|| {
                UpstreamError::fatal(format!("non-finite suggested price on {date_raw}"))
            })?;
        let reasoning = entry
            .get("reasoning")
            .and_then(|v| v.as_str())
            .map(strip_citations)
            .filter(|s| !s.is_empty());
        days.push(CalendarDay {
            date,
            suggested_price: price,
            reasoning,
        });
    }

    let string_list = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .map(strip_citations)
                    .collect()
            })
            .unwrap_or_default()
    };
    let string_field = |key: &str| -> Option<String> {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(strip_citations)
            .filter(|s| !s.is_empty())
    };

    Ok(PricingCalendar {
        days,
        property_grade: string_field("property_grade"),
        market_sentiment: string_field("market_sentiment"),
        top_demand_drivers: string_list("top_demand_drivers"),
        strategy_active: string_field("strategy_active"),
    })
}

/// Chat-completions oracle: Perplexity `sonar-pro` with weekly web search
/// when a key is configured, OpenAI-compatible fallback otherwise.
pub struct LlmOracle {
    client: Client,
    perplexity_base: String,
    perplexity_key: Option<String>,
    openai_base: String,
    openai_key: Option<String>,
    policy: RetryPolicy,
}

impl LlmOracle {
    pub fn new(
        perplexity_base: impl Into<String>,
        perplexity_key: Option<String>,
        openai_base: impl Into<String>,
        openai_key: Option<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("client build"),
            perplexity_base: perplexity_base.into().trim_end_matches('/').to_string(),
            perplexity_key,
            openai_base: openai_base.into().trim_end_matches('/').to_string(),
            openai_key,
            policy: RetryPolicy::default(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            crate::config::PERPLEXITY_API_BASE.clone(),
            crate::config::PERPLEXITY_API_KEY.clone(),
            crate::config::OPENAI_API_BASE.clone(),
            crate::config::OPENAI_API_KEY.clone(),
        )
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn chat(
        &self,
        base: &str,
        key: &str,
        body: &Value,
    ) -> Result<String, UpstreamError> {
        let url = format!("{base}/chat/completions");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::from_status(status, "chat/completions"));
        }
        let value: Value = resp.json().await?;
        value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(str::to_string)
            .ok_or_else(|| UpstreamError::fatal("chat answer without message content"))
    }

    async fn ask_perplexity(&self, key: &str, prompt: &str) -> Result<String, UpstreamError> {
        let body = json!({
            "model": "sonar-pro",
            "search_recency_filter": "week",
            "messages": [{"role": "user", "content": prompt}],
        });
        with_backoff(&self.policy, "perplexity", || {
            self.chat(&self.perplexity_base, key, &body)
        })
        .await
    }

    async fn ask_openai(&self, key: &str, prompt: &str) -> Result<String, UpstreamError> {
        let body = json!({
            "model": "gpt-4o",
            "response_format": {"type": "json_object"},
            "messages": [{"role": "user", "content": prompt}],
        });
        let base = format!("{}/v1", self.openai_base);
        with_backoff(&self.policy, "openai", || self.chat(&base, key, &body)).await
    }
}

#[async_trait]
impl PricingOracle for LlmOracle {
    async fn generate_calendar(
        &self,
        property: &Property,
        today: NaiveDate,
    ) -> Result<PricingCalendar, UpstreamError> {
        let prompt = build_prompt(property, today);

        let answer = match (&self.perplexity_key, &self.openai_key) {
            (Some(key), fallback) => match self.ask_perplexity(key, &prompt).await {
                Ok(answer) => answer,
                Err(err) => {
                    let Some(openai_key) = fallback else {
                        return Err(err);
                    };
                    warn!(%err, "web-search oracle failed; falling back to general LLM");
                    self.ask_openai(openai_key, &prompt).await?
                }
            },
            (None, Some(key)) => self.ask_openai(key, &prompt).await?,
            (None, None) => {
                return Err(UpstreamError::new(
                    UpstreamKind::Fatal,
                    "no LLM key configured",
                ))
            }
        };

        parse_calendar(&answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn property() -> Property {
        Property {
            id: Uuid::new_v4(),
            team_id: 1,
            name: "Appartement Canal".into(),
            pms_id: None,
            pms_type: None,
            latitude: 48.8716,
            longitude: 2.3628,
            capacity: 4,
            surface: 52.0,
            property_type: "apartment".into(),
            floor_price: 90.0,
            base_price: 140.0,
            ceiling_price: Some(260.0),
            min_stay: Some(2),
            max_stay: None,
            weekly_discount_percent: Some(8.0),
            monthly_discount_percent: None,
            weekend_markup_percent: Some(12.0),
            strategy: "agressif".into(),
            amenities: serde_json::json!(["wifi", "balcony"]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn strips_citation_markers() {
        assert_eq!(
            strip_citations("High demand from the trade fair[1][12], prices firm [3]."),
            "High demand from the trade fair, prices firm ."
        );
        assert_eq!(strip_citations("no markers"), "no markers");
    }

    #[test]
    fn prompt_carries_the_contract() {
        let today = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let prompt = build_prompt(&property(), today);
        assert!(prompt.contains("180-day"));
        assert!(prompt.contains("Agressif"));
        assert!(prompt.contains("floor 90.00, base 140.00, ceiling 260.00"));
        assert!(prompt.contains("Charm pricing"));
        assert!(prompt.contains("\"calendar\""));
        assert!(prompt.contains("2026-05-01"));
    }

    #[test]
    fn parses_a_fenced_answer() {
        let raw = r#"Here is the calendar:
```json
{"calendar": [
    {"date": "2026-05-01", "suggested_price": 149.0, "reasoning": "Holiday weekend[2]"},
    {"date": "2026-05-02", "suggested_price": 155.0, "reasoning": "Saturday"}
],
"property_grade": "B+",
"market_sentiment": "firm[1]",
"top_demand_drivers": ["trade fair[3]", "holiday"],
"strategy_active": "Agressif"}
```"#;
        let calendar = parse_calendar(raw).unwrap();
        assert_eq!(calendar.days.len(), 2);
        assert_eq!(calendar.days[0].reasoning.as_deref(), Some("Holiday weekend"));
        assert_eq!(calendar.market_sentiment.as_deref(), Some("firm"));
        assert_eq!(calendar.top_demand_drivers, vec!["trade fair", "holiday"]);
    }

    #[test]
    fn empty_calendar_fails() {
        let raw = r#"{"calendar": []}"#;
        assert!(parse_calendar(raw).is_err());
    }

    #[test]
    fn bad_date_fails() {
        let raw = r#"{"calendar": [{"date": "05/01/2026", "suggested_price": 100}]}"#;
        assert!(parse_calendar(raw).is_err());
    }

    #[test]
    fn string_price_fails() {
        let raw = r#"{"calendar": [{"date": "2026-05-01", "suggested_price": "100"}]}"#;
        assert!(parse_calendar(raw).is_err());
    }

    #[test]
    fn prose_without_json_fails() {
        assert!(parse_calendar("I could not produce a calendar today.").is_err());
    }
}
