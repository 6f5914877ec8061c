//! Shared helpers for recon-gateway integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use recon_gateway::services::{ConnectionFactory, DataSource, PoolConfig, TransportError};
use recon_gateway::sources::SourceAdapter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn fixture(name: &str) -> Vec<u8> {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("read {}: {}", path.display(), e))
}

/// Upstream double: answers every request with one body, optionally
/// rejecting the first `throttled` requests whose URL contains `throttle_on`
pub struct FixtureConnector {
    body: Vec<u8>,
    throttle_on: Option<String>,
    throttled: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

impl FixtureConnector {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            throttle_on: None,
            throttled: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn throttling(mut self, url_fragment: &str, times: usize) -> Self {
        self.throttle_on = Some(url_fragment.to_string());
        self.throttled = AtomicUsize::new(times);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_containing(&self, fragment: &str) -> usize {
        self.requests()
            .iter()
            .filter(|url| url.contains(fragment))
            .count()
    }
}

#[async_trait]
impl ConnectionFactory for FixtureConnector {
    async fn open(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        self.requests.lock().unwrap().push(url.to_string());

        if let Some(fragment) = &self.throttle_on {
            if url.contains(fragment.as_str())
                && self
                    .throttled
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(TransportError::from_status(429, url));
            }
        }
        Ok(self.body.clone())
    }
}

pub fn data_source(adapter: Arc<dyn SourceAdapter>, connector: Arc<FixtureConnector>) -> DataSource {
    DataSource::new(adapter, connector, PoolConfig::default(), Duration::from_millis(20))
}
