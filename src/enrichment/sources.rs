//! HTTP-backed risk signal sources
//!
//! NewsAPI (keyed), World Bank governance indicators and GDELT doc search.
//! A 429 maps to `FetchError::RateLimited` so the enricher can back off;
//! anything else is a plain failure.

use crate::enrichment::{country_code, FetchError, RiskSignalFetcher};
use crate::error::AnalysisError;
use crate::models::{RiskSignal, Severity};
use crate::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const DESCRIPTION_LIMIT: usize = 150;

const HIGH_RISK_KEYWORDS: &[&str] = &[
    "war", "invasion", "conflict", "sanctions", "embargo", "crisis", "collapse", "ban",
    "prohibited", "severe",
];

const MED_RISK_KEYWORDS: &[&str] = &[
    "restrictions", "tensions", "dispute", "warning", "concerns", "challenges", "uncertainty",
    "volatility",
];

const LOW_RISK_KEYWORDS: &[&str] = &["monitoring", "watch", "caution", "potential", "possible"];

lazy_static! {
    static ref HIGH_RISK: Regex = Regex::new(&keyword_pattern(HIGH_RISK_KEYWORDS)).unwrap();
    static ref MED_RISK: Regex = Regex::new(&keyword_pattern(MED_RISK_KEYWORDS)).unwrap();
    static ref LOW_RISK: Regex = Regex::new(&keyword_pattern(LOW_RISK_KEYWORDS)).unwrap();
}

/// Case-insensitive whole-word alternation, so "ban" never matches "bank".
fn keyword_pattern(keywords: &[&str]) -> String {
    format!(r"(?i)\b(?:{})\b", keywords.join("|"))
}

/// (indicator code, label) from the Worldwide Governance Indicators
const GOVERNANCE_INDICATORS: &[(&str, &str)] = &[
    ("PV.EST", "Political Stability"),
    ("RQ.EST", "Regulatory Quality"),
    ("RL.EST", "Rule of Law"),
    ("CC.EST", "Control of Corruption"),
];

pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(4)
        .timeout(timeout)
        .build()
        .map_err(AnalysisError::from)
}

/// Keyword-based severity; `None` when the text carries no risk wording.
pub fn assess_severity(text: &str) -> Option<Severity> {
    if HIGH_RISK.is_match(text) {
        Some(Severity::High)
    } else if MED_RISK.is_match(text) {
        Some(Severity::Med)
    } else if LOW_RISK.is_match(text) {
        Some(Severity::Low)
    } else {
        None
    }
}

/// World Bank estimates run from -2.5 (weak) to 2.5 (strong).
pub fn governance_severity(score: f64) -> Option<Severity> {
    if score < -1.0 {
        Some(Severity::High)
    } else if score < 0.0 {
        Some(Severity::Med)
    } else {
        None
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(DESCRIPTION_LIMIT).collect()
}

async fn get_json(request: reqwest::RequestBuilder) -> std::result::Result<Value, FetchError> {
    let response = request
        .send()
        .await
        .map_err(|e| FetchError::Failed(e.to_string()))?;

    match response.status() {
        StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited),
        status if !status.is_success() => Err(FetchError::Failed(format!("HTTP {}", status))),
        _ => response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Failed(format!("invalid JSON: {}", e))),
    }
}

//
// ================= NewsAPI =================
//

pub struct NewsApiFetcher {
    client: Client,
    api_key: String,
}

impl NewsApiFetcher {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl RiskSignalFetcher for NewsApiFetcher {
    fn source(&self) -> &str {
        "NewsAPI"
    }

    async fn fetch(&self, entity: &str) -> std::result::Result<Vec<RiskSignal>, FetchError> {
        let query = format!(
            "{} AND (sanctions OR embargo OR conflict OR trade war OR regulatory OR restrictions)",
            entity
        );
        let from = (Utc::now() - ChronoDuration::days(30)).format("%Y-%m-%d").to_string();

        let body = get_json(self.client.get("https://newsapi.org/v2/everything").query(&[
            ("q", query.as_str()),
            ("apiKey", self.api_key.as_str()),
            ("language", "en"),
            ("sortBy", "publishedAt"),
            ("from", from.as_str()),
            ("pageSize", "10"),
        ]))
        .await?;

        let signals = body
            .get("articles")
            .and_then(Value::as_array)
            .map(|articles| {
                articles
                    .iter()
                    .take(5)
                    .filter_map(|article| {
                        let title = article.get("title").and_then(Value::as_str).unwrap_or("");
                        let description = article
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        let severity = assess_severity(&format!("{} {}", title, description))?;
                        let text = if description.is_empty() { title } else { description };

                        Some(RiskSignal {
                            source: self.source().to_string(),
                            description: truncate(text),
                            severity,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(signals)
    }
}

//
// ================= World Bank =================
//

pub struct WorldBankFetcher {
    client: Client,
}

impl WorldBankFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RiskSignalFetcher for WorldBankFetcher {
    fn source(&self) -> &str {
        "World Bank"
    }

    async fn fetch(&self, entity: &str) -> std::result::Result<Vec<RiskSignal>, FetchError> {
        let Some(code) = country_code(entity) else {
            debug!(entity = %entity, "No ISO code; skipping World Bank indicators");
            return Ok(Vec::new());
        };

        let mut signals = Vec::new();

        for (indicator, label) in GOVERNANCE_INDICATORS {
            let url = format!(
                "https://api.worldbank.org/v2/country/{}/indicator/{}",
                code, indicator
            );
            let request = self
                .client
                .get(url)
                .query(&[("format", "json"), ("per_page", "1"), ("date", "2022:2023")]);

            let body = match get_json(request).await {
                Ok(body) => body,
                Err(FetchError::RateLimited) => return Err(FetchError::RateLimited),
                Err(e) => {
                    debug!(indicator = %indicator, error = %e, "Indicator unavailable");
                    continue;
                }
            };

            // Response shape: [page_meta, [ { "value": f64 | null, ... } ]]
            let value = body
                .get(1)
                .and_then(|rows| rows.get(0))
                .and_then(|row| row.get("value"))
                .and_then(Value::as_f64);

            if let Some(score) = value {
                if let Some(severity) = governance_severity(score) {
                    let qualifier = if severity == Severity::High {
                        "weak governance indicator"
                    } else {
                        "moderate concerns"
                    };
                    signals.push(RiskSignal {
                        source: self.source().to_string(),
                        description: format!("{} score: {:.2} ({})", label, score, qualifier),
                        severity,
                    });
                }
            }
        }

        Ok(signals)
    }
}

//
// ================= GDELT =================
//

pub struct GdeltFetcher {
    client: Client,
}

impl GdeltFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RiskSignalFetcher for GdeltFetcher {
    fn source(&self) -> &str {
        "GDELT"
    }

    async fn fetch(&self, entity: &str) -> std::result::Result<Vec<RiskSignal>, FetchError> {
        let query = format!(
            "{} (sanctions OR embargo OR trade restrictions OR conflict)",
            entity
        );

        let body = get_json(self.client.get("https://api.gdeltproject.org/api/v2/doc/doc").query(&[
            ("query", query.as_str()),
            ("mode", "artlist"),
            ("maxrecords", "5"),
            ("format", "json"),
            ("timespan", "7d"),
        ]))
        .await?;

        let signals = body
            .get("articles")
            .and_then(Value::as_array)
            .map(|articles| {
                articles
                    .iter()
                    .take(3)
                    .filter_map(|article| {
                        let title = article.get("title").and_then(Value::as_str)?;
                        let severity = assess_severity(title)?;
                        Some(RiskSignal {
                            source: self.source().to_string(),
                            description: truncate(title),
                            severity,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(signals)
    }
}
