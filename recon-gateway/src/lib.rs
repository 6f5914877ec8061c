//! recon-gateway library interface
//!
//! Reconciliation service in front of name-authority sources (VIAF, ORCID,
//! Open Library, a configurable Solr index). Each source gets its own
//! adaptive worker pool, result cache and statistics; see
//! [`services::DataSource`].

pub mod api;
pub mod error;
pub mod parser;
pub mod services;
pub mod sources;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use recon_common::config::GatewayConfig;
use recon_common::time;
use services::{ConnectionFactory, DataSource, DataSourceRegistry};
use sources::{OpenLibraryAdapter, OrcidAdapter, SolrAdapter, SourceAdapter, ViafAdapter};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Registered data sources by name
    pub data_sources: Arc<DataSourceRegistry>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(data_sources: DataSourceRegistry) -> Self {
        Self {
            data_sources: Arc::new(data_sources),
            startup_time: time::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build every enabled data source
///
/// A source whose configuration is invalid is logged and skipped; the rest
/// still register. Must run inside a Tokio runtime when caching is enabled.
pub fn build_registry(
    config: &GatewayConfig,
    connector: Arc<dyn ConnectionFactory>,
) -> DataSourceRegistry {
    let candidates: Vec<(&str, recon_common::Result<Arc<dyn SourceAdapter>>)> = vec![
        ("viaf", Ok(Arc::new(ViafAdapter::default()) as Arc<dyn SourceAdapter>)),
        ("orcid", Ok(Arc::new(OrcidAdapter::default()) as Arc<dyn SourceAdapter>)),
        ("openlibrary", Ok(Arc::new(OpenLibraryAdapter::default()) as Arc<dyn SourceAdapter>)),
        (
            "solr",
            SolrAdapter::from_config(&config.datasource("solr"))
                .map(|adapter| Arc::new(adapter) as Arc<dyn SourceAdapter>),
        ),
    ];

    let mut registry = DataSourceRegistry::new();
    for (name, adapter) in candidates {
        if !config.datasource(name).enabled {
            info!(source = name, "Data source disabled by configuration");
            continue;
        }
        match adapter {
            Ok(adapter) => registry.register(DataSource::from_config(
                adapter,
                Arc::clone(&connector),
                config,
            )),
            Err(e) => error!(source = name, error = %e, "Data source not registered"),
        }
    }
    registry
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::reconcile_routes())
        .merge(api::health_routes())
        .merge(api::stats_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
