//! Context enricher
//!
//! Detects the country/region a document talks about and gathers external
//! risk signals for it. Sources are fetched concurrently, each with its own
//! bounded retry on rate limiting; a source that keeps failing simply
//! contributes nothing.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::models::{EnrichmentBundle, RiskSignal};
use crate::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod sources;
pub use sources::{GdeltFetcher, NewsApiFetcher, WorldBankFetcher};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("rate limited")]
    RateLimited,

    #[error("fetch failed: {0}")]
    Failed(String),
}

/// One external risk-data source
#[async_trait]
pub trait RiskSignalFetcher: Send + Sync {
    fn source(&self) -> &str;

    async fn fetch(&self, entity: &str) -> std::result::Result<Vec<RiskSignal>, FetchError>;
}

/// (alias, canonical name, ISO 3166-1 alpha-2)
const KNOWN_ENTITIES: &[(&str, &str, &str)] = &[
    ("indonesia", "Indonesia", "ID"),
    ("united states", "United States", "US"),
    ("usa", "United States", "US"),
    ("china", "China", "CN"),
    ("taiwan", "Taiwan", "TW"),
    ("japan", "Japan", "JP"),
    ("singapore", "Singapore", "SG"),
    ("malaysia", "Malaysia", "MY"),
    ("thailand", "Thailand", "TH"),
    ("vietnam", "Vietnam", "VN"),
    ("philippines", "Philippines", "PH"),
    ("india", "India", "IN"),
    ("australia", "Australia", "AU"),
    ("south korea", "South Korea", "KR"),
    ("korea", "South Korea", "KR"),
    ("united kingdom", "United Kingdom", "GB"),
    ("uk", "United Kingdom", "GB"),
    ("germany", "Germany", "DE"),
    ("france", "France", "FR"),
    ("brazil", "Brazil", "BR"),
    ("mexico", "Mexico", "MX"),
    ("canada", "Canada", "CA"),
    ("russia", "Russia", "RU"),
    ("ukraine", "Ukraine", "UA"),
    ("israel", "Israel", "IL"),
    ("iran", "Iran", "IR"),
];

/// Best-effort detection of the first country/region mentioned in `text`.
pub fn detect_entity(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();

    KNOWN_ENTITIES
        .iter()
        .filter_map(|(alias, canonical, _)| find_word(&lowered, alias).map(|pos| (pos, *canonical)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, canonical)| canonical.to_string())
}

/// ISO alpha-2 code for a canonical entity name.
pub fn country_code(entity: &str) -> Option<&'static str> {
    let lowered = entity.to_lowercase();
    KNOWN_ENTITIES
        .iter()
        .find(|(alias, canonical, _)| *alias == lowered || canonical.to_lowercase() == lowered)
        .map(|(_, _, code)| *code)
}

fn find_word(haystack: &str, needle: &str) -> Option<usize> {
    haystack.match_indices(needle).map(|(pos, _)| pos).find(|&pos| {
        let before = haystack[..pos].chars().next_back();
        let after = haystack[pos + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Per-source retry policy for rate-limited responses
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based retries): base, 2·base, 4·base, ...
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

pub struct ContextEnricher {
    fetchers: Vec<Arc<dyn RiskSignalFetcher>>,
    policy: RetryPolicy,
    fetch_timeout: Duration,
    max_signals: usize,
    enabled: bool,
}

impl ContextEnricher {
    pub fn new(fetchers: Vec<Arc<dyn RiskSignalFetcher>>) -> Self {
        Self {
            fetchers,
            policy: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(15),
            max_signals: 4,
            enabled: true,
        }
    }

    /// Enricher with no sources; detection still runs, bundles come back empty.
    pub fn disabled() -> Self {
        let mut enricher = Self::new(Vec::new());
        enricher.enabled = false;
        enricher
    }

    /// Wire the HTTP sources according to configuration.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        if !config.enable_enrichment {
            return Ok(Self::disabled());
        }

        let client = sources::http_client(config.fetch_timeout)?;
        let mut fetchers: Vec<Arc<dyn RiskSignalFetcher>> = Vec::new();

        if let Some(key) = &config.news_api_key {
            fetchers.push(Arc::new(NewsApiFetcher::new(client.clone(), key.clone())));
        }
        fetchers.push(Arc::new(WorldBankFetcher::new(client.clone())));
        fetchers.push(Arc::new(GdeltFetcher::new(client)));

        Ok(Self::new(fetchers)
            .with_policy(RetryPolicy {
                max_attempts: config.fetch_max_attempts.max(1),
                base_delay: config.fetch_backoff,
            })
            .with_fetch_timeout(config.fetch_timeout)
            .with_max_signals(config.max_risk_signals))
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_max_signals(mut self, max_signals: usize) -> Self {
        self.max_signals = max_signals;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Detect an entity in `text` and fetch its signals. `None` when nothing is detected
    /// or enrichment is switched off.
    pub async fn enrich(&self, text: &str) -> Option<EnrichmentBundle> {
        if !self.enabled {
            return None;
        }
        let entity = detect_entity(text)?;
        Some(self.fetch_risk_signals(&entity).await)
    }

    /// Aggregate signals from every source. Never fails; failed sources are omitted.
    pub async fn fetch_risk_signals(&self, entity: &str) -> EnrichmentBundle {
        let results = join_all(
            self.fetchers
                .iter()
                .map(|fetcher| self.fetch_with_retry(fetcher.as_ref(), entity)),
        )
        .await;

        let failed: Vec<&str> = self
            .fetchers
            .iter()
            .zip(&results)
            .filter(|(_, result)| result.is_none())
            .map(|(fetcher, _)| fetcher.source())
            .collect();

        if !failed.is_empty() {
            let partial = AnalysisError::EnrichmentPartial(format!(
                "{} of {} sources failed: {}",
                failed.len(),
                self.fetchers.len(),
                failed.join(", ")
            ));
            warn!(entity = %entity, error = %partial, "Enrichment degraded");
        }

        let signals = consolidate(results.into_iter().flatten().flatten(), self.max_signals);

        info!(entity = %entity, signals = signals.len(), "Enrichment complete");

        EnrichmentBundle {
            entity: entity.to_string(),
            risk_signals: signals,
        }
    }

    async fn fetch_with_retry(
        &self,
        fetcher: &dyn RiskSignalFetcher,
        entity: &str,
    ) -> Option<Vec<RiskSignal>> {
        let source = fetcher.source();

        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                let delay = self.policy.delay_before(attempt);
                info!(
                    source = %source,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited; backing off"
                );
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(self.fetch_timeout, fetcher.fetch(entity)).await {
                Ok(Ok(signals)) => {
                    debug!(source = %source, count = signals.len(), "Source fetched");
                    return Some(signals);
                }
                Ok(Err(FetchError::RateLimited)) => continue,
                Ok(Err(FetchError::Failed(reason))) => {
                    warn!(source = %source, reason = %reason, "Source failed");
                    return None;
                }
                Err(_) => {
                    warn!(source = %source, "Source timed out");
                    return None;
                }
            }
        }

        warn!(
            source = %source,
            attempts = self.policy.max_attempts,
            "Source still rate limited after retries; skipping"
        );
        None
    }
}

/// Dedupe by `(source, description)`, order by severity (stable), cap.
fn consolidate(signals: impl IntoIterator<Item = RiskSignal>, max: usize) -> Vec<RiskSignal> {
    let mut seen = HashSet::new();

    let mut unique: Vec<RiskSignal> = signals
        .into_iter()
        .filter(|s| seen.insert((s.source.clone(), s.description.clone())))
        .collect();

    unique.sort_by(|a, b| b.severity.cmp(&a.severity));
    unique.truncate(max);
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticFetcher {
        name: &'static str,
        signals: Vec<RiskSignal>,
    }

    #[async_trait]
    impl RiskSignalFetcher for StaticFetcher {
        fn source(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _entity: &str) -> std::result::Result<Vec<RiskSignal>, FetchError> {
            Ok(self.signals.clone())
        }
    }

    /// Rate-limited `failures` times, then succeeds.
    struct FlakyFetcher {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RiskSignalFetcher for FlakyFetcher {
        fn source(&self) -> &str {
            "flaky"
        }

        async fn fetch(&self, entity: &str) -> std::result::Result<Vec<RiskSignal>, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(FetchError::RateLimited)
            } else {
                Ok(vec![signal("flaky", &format!("Tariff dispute involving {}", entity), Severity::Med)])
            }
        }
    }

    struct BrokenFetcher;

    #[async_trait]
    impl RiskSignalFetcher for BrokenFetcher {
        fn source(&self) -> &str {
            "broken"
        }

        async fn fetch(&self, _entity: &str) -> std::result::Result<Vec<RiskSignal>, FetchError> {
            Err(FetchError::Failed("503".to_string()))
        }
    }

    fn signal(source: &str, description: &str, severity: Severity) -> RiskSignal {
        RiskSignal {
            source: source.to_string(),
            description: description.to_string(),
            severity,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_detect_entity_first_mention_wins() {
        assert_eq!(
            detect_entity("Loan growth in Indonesia outpaced China"),
            Some("Indonesia".to_string())
        );
        assert_eq!(detect_entity("Exposure to the UK market"), Some("United Kingdom".to_string()));
        // "uk" inside another word is not a mention
        assert_eq!(detect_entity("Revenue from Ukulele sales"), None);
        assert_eq!(detect_entity("What was total revenue in 2024?"), None);
    }

    #[test]
    fn test_country_code_lookup() {
        assert_eq!(country_code("Indonesia"), Some("ID"));
        assert_eq!(country_code("South Korea"), Some("KR"));
        assert_eq!(country_code("Atlantis"), None);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_before(1), Duration::from_millis(100));
        assert_eq!(policy.delay_before(2), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_dedupes_and_orders_by_severity() {
        let dup = signal("NewsAPI", "Sanctions on exports", Severity::High);
        let enricher = ContextEnricher::new(vec![
            Arc::new(StaticFetcher {
                name: "NewsAPI",
                signals: vec![
                    signal("NewsAPI", "Currency volatility", Severity::Low),
                    dup.clone(),
                    dup.clone(),
                ],
            }),
            Arc::new(StaticFetcher {
                name: "GDELT",
                signals: vec![signal("GDELT", "Sanctions on exports", Severity::Med)],
            }),
        ])
        .with_policy(fast_policy());

        let bundle = enricher.fetch_risk_signals("China").await;

        assert_eq!(bundle.entity, "China");
        assert_eq!(bundle.risk_signals.len(), 3);
        assert_eq!(bundle.risk_signals[0], dup);
        assert_eq!(bundle.risk_signals[2].severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_rate_limited_source_is_retried() {
        let flaky = Arc::new(FlakyFetcher {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let enricher = ContextEnricher::new(vec![flaky.clone()]).with_policy(fast_policy());

        let bundle = enricher.fetch_risk_signals("Vietnam").await;

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(bundle.risk_signals.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_and_failed_sources_are_omitted() {
        let flaky = Arc::new(FlakyFetcher {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let enricher = ContextEnricher::new(vec![flaky.clone(), Arc::new(BrokenFetcher)])
            .with_policy(fast_policy());

        let bundle = enricher.fetch_risk_signals("Brazil").await;

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert!(bundle.risk_signals.is_empty());
    }

    #[tokio::test]
    async fn test_enrich_without_entity_or_when_disabled() {
        let enricher = ContextEnricher::new(vec![Arc::new(BrokenFetcher)]);
        assert!(enricher.enrich("Total revenue was up").await.is_none());
        assert!(ContextEnricher::disabled().enrich("Exports to Japan").await.is_none());
    }
}
