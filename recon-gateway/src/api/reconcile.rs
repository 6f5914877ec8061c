//! Reconciliation endpoints
//!
//! Clients send either `query` (plain text or a JSON query object) or
//! `queries` (a JSON object mapping ids to query objects), as GET query
//! parameters or a form-encoded POST body. A request with neither gets the
//! service metadata.

use axum::{
    extract::{Path, State},
    routing::get,
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::services::DataSource;
use crate::types::{NameType, Outcome, Query, RequestScope, DEFAULT_LIMIT};
use crate::AppState;

/// Raw request parameters
#[derive(Debug, Default, Deserialize)]
pub struct ReconcileParams {
    pub query: Option<String>,
    pub queries: Option<String>,
}

/// `type` may be a single id or a list of ids (first one wins)
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TypeParam {
    One(String),
    Many(Vec<String>),
}

impl TypeParam {
    fn first(&self) -> Option<&str> {
        match self {
            TypeParam::One(id) => Some(id.as_str()),
            TypeParam::Many(ids) => ids.first().map(String::as_str),
        }
    }
}

/// One query object in the client protocol
#[derive(Debug, Deserialize)]
struct QueryStruct {
    query: String,
    limit: Option<usize>,
    #[serde(rename = "type")]
    type_id: Option<TypeParam>,
    type_strict: Option<String>,
}

impl QueryStruct {
    fn into_query(self, scope: &RequestScope) -> Query {
        let type_hint = self.type_id.as_ref().and_then(TypeParam::first).and_then(|id| {
            let resolved = NameType::from_id(id);
            if resolved.is_none() {
                warn!(type_id = %id, "Unknown type id, searching without a type");
            }
            resolved
        });

        let mut query = Query::new(&self.query)
            .with_limit(self.limit.unwrap_or(DEFAULT_LIMIT))
            .with_type_hint(type_hint)
            .with_scope(scope);
        if let Some(strict) = self.type_strict {
            query = query.with_strictness(Some(strict));
        }
        query
    }
}

/// Query from the `query` parameter: JSON object if it starts with `{`
fn parse_single(raw: &str, scope: &RequestScope) -> ApiResult<Query> {
    if raw.trim_start().starts_with('{') {
        let parsed: QueryStruct = serde_json::from_str(raw)
            .map_err(|e| ApiError::BadRequest(format!("invalid query JSON: {}", e)))?;
        Ok(parsed.into_query(scope))
    } else {
        Ok(Query::new(raw).with_scope(scope))
    }
}

/// Queries from the `queries` parameter
fn parse_batch(raw: &str, scope: &RequestScope) -> ApiResult<HashMap<String, Query>> {
    let parsed: HashMap<String, QueryStruct> = serde_json::from_str(raw)
        .map_err(|e| ApiError::BadRequest(format!("invalid queries JSON: {}", e)))?;
    Ok(parsed
        .into_iter()
        .map(|(id, query)| (id, query.into_query(scope)))
        .collect())
}

fn result_body(outcome: &Outcome) -> Value {
    json!({ "result": outcome.records() })
}

/// Remember the latest degraded batch for `/health`
async fn note_failures<'a>(
    state: &AppState,
    source: &str,
    outcomes: impl Iterator<Item = &'a Outcome>,
) {
    let (failed, total) = outcomes.fold((0, 0), |(failed, total), outcome| {
        (failed + usize::from(!outcome.is_success()), total + 1)
    });
    if failed > 0 {
        *state.last_error.write().await = Some(format!(
            "{}: {} of {} queries returned no results after retry",
            source, failed, total
        ));
    }
}

fn lookup(state: &AppState, name: &str) -> ApiResult<Arc<DataSource>> {
    state
        .data_sources
        .get(name)
        .ok_or_else(|| ApiError::NotFound(format!("data source '{}'", name)))
}

/// Shared body of every reconcile route
async fn reconcile(
    state: AppState,
    source: &str,
    scope: RequestScope,
    params: ReconcileParams,
) -> ApiResult<Json<Value>> {
    let data_source = lookup(&state, source)?;

    if let Some(raw) = params.queries.as_deref() {
        let queries = parse_batch(raw, &scope)?;
        debug!(source = %source, count = queries.len(), "Batch reconcile");

        let outcomes = data_source.search(queries).await;
        note_failures(&state, source, outcomes.values()).await;

        let body: serde_json::Map<String, Value> = outcomes
            .iter()
            .map(|(id, outcome)| (id.clone(), result_body(outcome)))
            .collect();
        return Ok(Json(Value::Object(body)));
    }

    if let Some(raw) = params.query.as_deref() {
        let query = parse_single(raw, &scope)?;
        debug!(source = %source, query = %query.text, "Single reconcile");

        let outcome = data_source.search_single(query).await;
        note_failures(&state, source, std::iter::once(&outcome)).await;

        return Ok(Json(result_body(&outcome)));
    }

    let metadata = data_source.adapter().service_metadata(&scope);
    serde_json::to_value(metadata)
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// GET|POST /reconcile/:source
pub async fn reconcile_source(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Form(params): Form<ReconcileParams>,
) -> ApiResult<Json<Value>> {
    reconcile(state, &source, RequestScope::default(), params).await
}

/// GET|POST /reconcile/viaf/:code
pub async fn reconcile_viaf_source(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Form(params): Form<ReconcileParams>,
) -> ApiResult<Json<Value>> {
    let scope = RequestScope {
        source: Some(code.to_uppercase()),
        ..RequestScope::default()
    };
    reconcile(state, "viaf", scope, params).await
}

/// GET|POST /reconcile/viafproxy/:code
pub async fn reconcile_viaf_proxy(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Form(params): Form<ReconcileParams>,
) -> ApiResult<Json<Value>> {
    let scope = RequestScope {
        source: Some(code.to_uppercase()),
        proxy_mode: true,
        extra_mode: false,
    };
    reconcile(state, "viaf", scope, params).await
}

/// GET|POST /reconcile/orcid/smartnames
pub async fn reconcile_orcid_smart_names(
    State(state): State<AppState>,
    Form(params): Form<ReconcileParams>,
) -> ApiResult<Json<Value>> {
    let scope = RequestScope {
        extra_mode: true,
        ..RequestScope::default()
    };
    reconcile(state, "orcid", scope, params).await
}

/// Build reconciliation routes
pub fn reconcile_routes() -> Router<AppState> {
    Router::new()
        .route("/reconcile/:source", get(reconcile_source).post(reconcile_source))
        .route(
            "/reconcile/viaf/:code",
            get(reconcile_viaf_source).post(reconcile_viaf_source),
        )
        .route(
            "/reconcile/viafproxy/:code",
            get(reconcile_viaf_proxy).post(reconcile_viaf_proxy),
        )
        .route(
            "/reconcile/orcid/smartnames",
            get(reconcile_orcid_smart_names).post(reconcile_orcid_smart_names),
        )
}
