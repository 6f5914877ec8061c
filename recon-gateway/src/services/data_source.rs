//! Per-source search entry point
//!
//! A [`DataSource`] wraps one [`SourceAdapter`] with its own worker pool,
//! result cache and statistics. [`DataSource::search`] runs a batch of named
//! queries:
//!
//! 1. cache hits are answered without dispatching
//! 2. misses run on the pool, one task per query, and the batch waits for all
//! 3. any throttled outcome shrinks the pool once
//! 4. every query that did not succeed is dispatched once more after the
//!    retry delay; the second outcome replaces the first
//! 5. successes are cached under `<source>|<fingerprint>`
//!
//! Throttled and failed queries come back as their [`Outcome`] and never
//! turn into a batch-wide error.

use crate::services::cache::CacheManager;
use crate::services::connection::ConnectionFactory;
use crate::services::stats::{Counter, Stats, StatsReport};
use crate::services::worker_pool::{AdaptiveWorkerPool, PoolConfig};
use crate::sources::SourceAdapter;
use crate::types::{Outcome, Query, Record};
use recon_common::config::GatewayConfig;
use recon_common::Error;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Identifier used by [`DataSource::search_single`]
pub const SINGLE_QUERY_ID: &str = "q0";

pub struct DataSource {
    adapter: Arc<dyn SourceAdapter>,
    connector: Arc<dyn ConnectionFactory>,
    pool: AdaptiveWorkerPool,
    cache: Arc<CacheManager<Vec<Record>>>,
    stats: Stats,
    retry_delay: Duration,
}

impl DataSource {
    /// Create a data source with a disabled cache using default bounds
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        connector: Arc<dyn ConnectionFactory>,
        pool_config: PoolConfig,
        retry_delay: Duration,
    ) -> Self {
        let name = adapter.name().to_string();
        let defaults = recon_common::config::CacheConfig::default();
        Self {
            pool: AdaptiveWorkerPool::new(name.clone(), pool_config),
            cache: CacheManager::new(name.clone(), defaults.lifetime_secs, defaults.max_size),
            stats: Stats::new(name),
            adapter,
            connector,
            retry_delay,
        }
    }

    /// Create a data source from the gateway configuration
    ///
    /// Pool size resolves as `[datasources.<name>] pool_size`, then the
    /// adapter's own requirement, then `[pool] initial_size`. When caching is
    /// enabled the sweep starts immediately, so this must run inside a Tokio
    /// runtime.
    pub fn from_config(
        adapter: Arc<dyn SourceAdapter>,
        connector: Arc<dyn ConnectionFactory>,
        config: &GatewayConfig,
    ) -> Self {
        let mut pool_config = PoolConfig::from(&config.pool);
        let source_config = config.datasource(adapter.name());
        if let Some(size) = source_config.pool_size.or(adapter.preferred_pool_size()) {
            pool_config.initial_size = size.max(1);
        }

        let data_source = Self::new(
            adapter,
            connector,
            pool_config,
            Duration::from_millis(config.http.retry_delay_ms),
        );

        let cache = &data_source.cache;
        cache.set_lifetime(config.cache.lifetime_secs);
        cache.set_max_size(config.cache.max_size);
        cache.set_sweep_interval(Duration::from_secs(config.cache.sweep_interval_secs.max(1)));
        cache.set_enabled(config.cache.enabled);

        info!(
            source = %data_source.name(),
            pool_size = data_source.pool.size(),
            cache_enabled = config.cache.enabled,
            "Data source initialized"
        );
        data_source
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub fn adapter(&self) -> &Arc<dyn SourceAdapter> {
        &self.adapter
    }

    pub fn cache(&self) -> &Arc<CacheManager<Vec<Record>>> {
        &self.cache
    }

    pub fn pool(&self) -> &AdaptiveWorkerPool {
        &self.pool
    }

    /// Current worker pool size
    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    pub fn stats_report(&self) -> StatsReport {
        self.stats.report()
    }

    /// Cache key: fingerprint namespaced by source
    pub fn cache_key(&self, query: &Query) -> String {
        format!("{}|{}", self.name(), query.fingerprint())
    }

    /// Run a batch of named queries; every id gets exactly one outcome
    pub async fn search(&self, queries: HashMap<String, Query>) -> HashMap<String, Outcome> {
        let mut outcomes = HashMap::with_capacity(queries.len());
        let mut misses = Vec::new();

        for (id, query) in queries {
            match self.cache.get(&self.cache_key(&query)) {
                Some(records) => {
                    debug!(source = %self.name(), query = %query.text, "Cache hit");
                    outcomes.insert(id, Outcome::Success(records));
                }
                None => misses.push((id, query)),
            }
        }

        if misses.is_empty() {
            return outcomes;
        }

        let mut first = self.dispatch(&misses).await;

        if first.values().any(|o| matches!(o, Outcome::Throttled)) {
            warn!(source = %self.name(), "Upstream throttled requests, shrinking pool");
            self.pool.shrink();
        }

        let (done, retry): (Vec<_>, Vec<_>) = misses
            .into_iter()
            .partition(|(id, _)| first.get(id).is_some_and(Outcome::is_success));

        let mut finished: Vec<(String, Query, Outcome)> = done
            .into_iter()
            .filter_map(|(id, query)| first.remove(&id).map(|outcome| (id, query, outcome)))
            .collect();

        if !retry.is_empty() {
            info!(
                source = %self.name(),
                count = retry.len(),
                delay_ms = self.retry_delay.as_millis() as u64,
                "Retrying queries that did not succeed"
            );
            tokio::time::sleep(self.retry_delay).await;

            let mut second = self.dispatch(&retry).await;
            for (id, query) in retry {
                let outcome = second.remove(&id).unwrap_or(Outcome::Failed);
                if !outcome.is_success() {
                    warn!(
                        source = %self.name(),
                        query = %query.text,
                        status = outcome.status(),
                        "Query failed after retry, returning no results"
                    );
                }
                finished.push((id, query, outcome));
            }
        }

        for (id, query, outcome) in finished {
            if let Outcome::Success(records) = &outcome {
                self.cache.put(self.cache_key(&query), records.clone());
            }
            outcomes.insert(id, outcome);
        }

        outcomes
    }

    /// One-query convenience wrapper around [`DataSource::search`]
    pub async fn search_single(&self, query: Query) -> Outcome {
        let mut batch = HashMap::with_capacity(1);
        batch.insert(SINGLE_QUERY_ID.to_string(), query);
        self.search(batch)
            .await
            .remove(SINGLE_QUERY_ID)
            .unwrap_or(Outcome::Failed)
    }

    /// Stop the cache sweep and drain the pool
    pub async fn shutdown(&self) -> bool {
        self.cache.stop();
        self.pool.shutdown().await
    }

    /// Submit one task per query and wait for all of them
    async fn dispatch(&self, batch: &[(String, Query)]) -> HashMap<String, Outcome> {
        let mut outcomes = HashMap::with_capacity(batch.len());
        let mut handles = Vec::with_capacity(batch.len());

        for (id, query) in batch {
            self.stats.record(Counter::Queries, 1);

            let adapter = Arc::clone(&self.adapter);
            let connector = Arc::clone(&self.connector);
            let query = query.clone();
            let task = async move { run_query(adapter.as_ref(), connector.as_ref(), &query).await };

            match self.pool.submit(task) {
                Ok(handle) => handles.push((id.clone(), handle)),
                Err(e) => {
                    error!(source = %self.name(), error = %e, "Could not submit query");
                    outcomes.insert(id.clone(), Outcome::Failed);
                }
            }
        }

        let ids: Vec<String> = handles.iter().map(|(id, _)| id.clone()).collect();
        let joined = futures::future::join_all(handles.into_iter().map(|(_, handle)| handle)).await;

        for (id, result) in ids.into_iter().zip(joined) {
            let outcome = result.unwrap_or_else(|e| {
                error!(source = %self.name(), error = %e, "Query task panicked or was cancelled");
                Outcome::Failed
            });
            outcomes.insert(id, outcome);
        }

        let errors = outcomes.values().filter(|o| !o.is_success()).count();
        if errors > 0 {
            self.stats.record(Counter::Errors, errors as u64);
        }

        outcomes
    }
}

/// Fetch and parse one query, classifying the failure kind
async fn run_query(
    adapter: &dyn SourceAdapter,
    connector: &dyn ConnectionFactory,
    query: &Query,
) -> Outcome {
    match adapter.fetch(query, connector).await {
        Ok(records) => {
            debug!(
                source = adapter.name(),
                query = %query.text,
                results = records.len(),
                "Query complete"
            );
            Outcome::Success(records)
        }
        Err(Error::Throttled(message)) => {
            warn!(source = adapter.name(), query = %query.text, %message, "Throttled");
            Outcome::Throttled
        }
        Err(e) => {
            warn!(
                source = adapter.name(),
                query = %query.text,
                error = %e,
                transient = e.is_transient(),
                "Query failed"
            );
            Outcome::Failed
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Data sources by name, built once at startup
#[derive(Default)]
pub struct DataSourceRegistry {
    sources: BTreeMap<String, Arc<DataSource>>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, data_source: DataSource) {
        let name = data_source.name().to_string();
        if self.sources.insert(name.clone(), Arc::new(data_source)).is_some() {
            warn!(source = %name, "Replaced previously registered data source");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<DataSource>> {
        self.sources.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DataSource>> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Shut every data source down
    pub async fn shutdown(&self) {
        for data_source in self.sources.values() {
            if !data_source.shutdown().await {
                warn!(source = %data_source.name(), "Data source did not shut down cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::connection::TransportError;
    use crate::sources::{ServiceMetadata, SourceAdapter};
    use crate::types::{RequestScope, TypeTag};
    use async_trait::async_trait;
    use recon_common::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Echo source: the body is the record id
    struct EchoAdapter;

    #[async_trait]
    impl SourceAdapter for EchoAdapter {
        fn name(&self) -> &str {
            "echo"
        }

        fn build_request(&self, query: &Query) -> Option<String> {
            if query.text.is_empty() {
                None
            } else {
                Some(format!("http://echo.test/{}", query.text))
            }
        }

        fn parse_response(&self, _query: &Query, body: &[u8]) -> Result<Vec<Record>> {
            let id = String::from_utf8_lossy(body).into_owned();
            Ok(vec![Record::new(id, "Echo", vec![TypeTag::new("/t", "T")], 1.0, true)])
        }

        fn service_metadata(&self, _scope: &RequestScope) -> ServiceMetadata {
            ServiceMetadata::new("Echo", "http://echo.test/")
        }
    }

    /// Fails the first `failures` calls for URLs containing `pattern`
    struct FlakyConnector {
        pattern: &'static str,
        status: u16,
        failures: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl FlakyConnector {
        fn new(pattern: &'static str, status: u16, failures: usize) -> Self {
            Self {
                pattern,
                status,
                failures: AtomicUsize::new(failures),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls_for(&self, fragment: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.contains(fragment))
                .count()
        }
    }

    #[async_trait]
    impl ConnectionFactory for FlakyConnector {
        async fn open(&self, url: &str) -> std::result::Result<Vec<u8>, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            if url.contains(self.pattern)
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(TransportError::from_status(self.status, url));
            }
            Ok(url.rsplit('/').next().unwrap_or_default().as_bytes().to_vec())
        }
    }

    fn data_source(connector: Arc<FlakyConnector>) -> DataSource {
        DataSource::new(
            Arc::new(EchoAdapter),
            connector,
            PoolConfig::default(),
            Duration::from_millis(10),
        )
    }

    fn batch(texts: &[&str]) -> HashMap<String, Query> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| (format!("q{}", i), Query::new(*text)))
            .collect()
    }

    #[tokio::test]
    async fn test_throttled_query_retried_once_and_pool_shrinks() {
        let connector = Arc::new(FlakyConnector::new("slow", 429, 1));
        let ds = data_source(Arc::clone(&connector));

        let outcomes = ds.search(batch(&["fast", "slow"])).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes["q0"].is_success());
        assert_eq!(outcomes["q1"].records()[0].id, "slow");
        assert_eq!(connector.calls_for("slow"), 2);
        assert_eq!(connector.calls_for("fast"), 1);
        assert_eq!(ds.pool_size(), 3);
    }

    #[tokio::test]
    async fn test_generic_failure_retried_without_shrink() {
        let connector = Arc::new(FlakyConnector::new("broken", 500, 1));
        let ds = data_source(Arc::clone(&connector));

        let outcome = ds.search_single(Query::new("broken")).await;

        assert!(outcome.is_success());
        assert_eq!(connector.calls_for("broken"), 2);
        assert_eq!(ds.pool_size(), 4);
    }

    #[tokio::test]
    async fn test_persistent_failure_degrades_to_outcome() {
        let connector = Arc::new(FlakyConnector::new("down", 429, usize::MAX));
        let ds = data_source(Arc::clone(&connector));

        let outcomes = ds.search(batch(&["down", "up"])).await;

        assert_eq!(outcomes["q0"], Outcome::Throttled);
        assert!(outcomes["q0"].records().is_empty());
        assert!(outcomes["q1"].is_success());
        assert_eq!(connector.calls_for("down"), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_dispatch() {
        let connector = Arc::new(FlakyConnector::new("none", 500, 0));
        let ds = data_source(Arc::clone(&connector));
        ds.cache().set_enabled(true);

        let first = ds.search_single(Query::new("wittgenstein")).await;
        let second = ds.search_single(Query::new("wittgenstein")).await;

        assert_eq!(first, second);
        assert_eq!(connector.calls_for("wittgenstein"), 1);
        assert!(ds.cache().get(&ds.cache_key(&Query::new("wittgenstein"))).is_some());

        // a different limit is a different fingerprint
        ds.search_single(Query::new("wittgenstein").with_limit(5)).await;
        assert_eq!(connector.calls_for("wittgenstein"), 2);

        ds.cache().stop();
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let connector = Arc::new(FlakyConnector::new("down", 500, usize::MAX));
        let ds = data_source(Arc::clone(&connector));
        ds.cache().set_enabled(true);

        assert_eq!(ds.search_single(Query::new("down")).await, Outcome::Failed);
        assert_eq!(ds.cache().len(), 0);
        ds.cache().stop();
    }

    #[tokio::test]
    async fn test_stats_count_dispatches_and_errors() {
        let connector = Arc::new(FlakyConnector::new("slow", 429, 1));
        let ds = data_source(Arc::clone(&connector));

        ds.search(batch(&["fast", "slow"])).await;

        let report = ds.stats_report();
        // 2 first-round dispatches + 1 retry, 1 throttled outcome
        assert_eq!(report.buckets[0].queries, 3);
        assert_eq!(report.buckets[0].errors, 1);
    }

    #[tokio::test]
    async fn test_unexpressible_query_is_empty_success() {
        let connector = Arc::new(FlakyConnector::new("none", 500, 0));
        let ds = data_source(Arc::clone(&connector));

        let outcome = ds.search_single(Query::new("   ")).await;
        assert_eq!(outcome, Outcome::Success(Vec::new()));
        assert!(connector.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_after_shutdown_fails_queries() {
        let connector = Arc::new(FlakyConnector::new("none", 500, 0));
        let ds = data_source(connector);
        assert!(ds.shutdown().await);

        assert_eq!(ds.search_single(Query::new("late")).await, Outcome::Failed);
    }

    #[tokio::test]
    async fn test_registry() {
        let connector = Arc::new(FlakyConnector::new("none", 500, 0));
        let mut registry = DataSourceRegistry::new();
        assert!(registry.is_empty());

        registry.register(data_source(connector));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("viaf").is_none());
        registry.shutdown().await;
    }
}
