use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use moka::future::Cache;
use reqwest::header::ACCEPT;
use reqwest::{Response, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::errors::ApiError;
use crate::auth::TokenProvider;
use crate::config::ApiConfig;
use crate::import::ImportedCodeSet;
use crate::mapping::{
    BulkUpdate, BulkUpdateResult, Concept, ExportFormat, MapRow, MapViewFilter, Mapping,
    MappingStatus, Page, TargetRow, Task, User,
};
use crate::observability::{api_metrics, ApiEvent};

/// Operations the workflow layer needs from the mapping backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MappingApi: Send + Sync {
    async fn map_view(
        &self,
        map_id: u64,
        filter: &MapViewFilter,
    ) -> Result<Page<MapRow>, ApiError>;
    async fn task_view(
        &self,
        task_id: u64,
        filter: &MapViewFilter,
    ) -> Result<Page<MapRow>, ApiError>;
    async fn update_status(&self, row_id: u64, status: MappingStatus) -> Result<(), ApiError>;
    async fn update_no_map(&self, row_id: u64, no_map: bool) -> Result<(), ApiError>;
    async fn create_target(&self, target: &TargetRow) -> Result<TargetRow, ApiError>;
    async fn update_target(&self, target: &TargetRow) -> Result<TargetRow, ApiError>;
    async fn bulk_update(
        &self,
        map_id: u64,
        filter: &MapViewFilter,
        update: &BulkUpdate,
    ) -> Result<u64, ApiError>;
    async fn search_concepts(
        &self,
        scope: &str,
        version: &str,
        filter: &str,
        count: u32,
    ) -> Result<Vec<Concept>, ApiError>;
    async fn mapping(&self, map_id: u64) -> Result<Mapping, ApiError>;
    async fn task(&self, task_id: u64) -> Result<Task, ApiError>;
    async fn current_user(&self) -> Result<User, ApiError>;
    async fn export(&self, map_id: u64, format: ExportFormat) -> Result<Vec<u8>, ApiError>;
    async fn import_source(&self, codes: &ImportedCodeSet) -> Result<u64, ApiError>;
}

#[derive(Debug, Deserialize)]
struct ValueSet {
    expansion: Option<Expansion>,
}

#[derive(Debug, Deserialize)]
struct Expansion {
    #[serde(default)]
    contains: Vec<ExpansionContains>,
}

#[derive(Debug, Deserialize)]
struct ExpansionContains {
    system: Option<String>,
    code: String,
    display: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedId {
    id: u64,
}

/// Rate-limited, retrying client for the Snap2SNOMED REST API.
///
/// Every request carries a bearer token from the [`TokenProvider`]. A 401 or
/// 403 triggers exactly one refresh and one retry; if that also fails the
/// caller gets [`ApiError::NotAuthorized`].
///
/// Transient failures are retried for GET, PUT and PATCH only. POSTs go
/// through `http_once` so a timed-out create is never sent twice.
pub struct Snap2SnomedClient {
    http: ClientWithMiddleware,
    http_once: ClientWithMiddleware,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    cache: Cache<String, serde_json::Value>,
}

impl Snap2SnomedClient {
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, ApiError> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| ApiError::Unexpected {
            status: None,
            message: format!("api.base_url '{}': {e}", config.base_url),
        })?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.rate_limit.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.rate_limit.burst_capacity).unwrap_or(NonZeroU32::MIN));
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(config.retry_attempts);
        let http = ClientBuilder::new(inner.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        let http_once = ClientBuilder::new(inner).build();

        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(config.cache_ttl_seconds))
            .build();

        Ok(Self {
            http,
            http_once,
            base_url,
            tokens,
            rate_limiter,
            cache,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url.join(path).map_err(|e| ApiError::Unexpected {
            status: None,
            message: format!("bad API path {path}: {e}"),
        })
    }

    /// Send an idempotent request built by `build`, handling rate limiting,
    /// transient retries, auth refresh and status classification in one place.
    async fn execute<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn(&ClientWithMiddleware) -> RequestBuilder + Send + Sync,
    {
        self.execute_on(&self.http, build).await
    }

    /// Like [`Self::execute`] but without transient retries, for POSTs.
    async fn execute_no_retry<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn(&ClientWithMiddleware) -> RequestBuilder + Send + Sync,
    {
        self.execute_on(&self.http_once, build).await
    }

    async fn execute_on<F>(
        &self,
        http: &ClientWithMiddleware,
        build: F,
    ) -> Result<Response, ApiError>
    where
        F: Fn(&ClientWithMiddleware) -> RequestBuilder + Send + Sync,
    {
        let token = self.tokens.access_token().await?;
        let response = self.send_once(http, &build, &token).await?;

        let status = response.status().as_u16();
        if status != 401 && status != 403 {
            return check(response).await;
        }

        warn!(status, "Request rejected, refreshing token and retrying once");
        api_metrics().record(ApiEvent::TokenRefresh);
        let token = self.tokens.refresh(&token).await?;
        let response = self.send_once(http, &build, &token).await?;
        check(response).await
    }

    async fn send_once<F>(
        &self,
        http: &ClientWithMiddleware,
        build: &F,
        token: &str,
    ) -> Result<Response, ApiError>
    where
        F: Fn(&ClientWithMiddleware) -> RequestBuilder + Send + Sync,
    {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
            .await;
        api_metrics().record(ApiEvent::Request);
        build(http)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| failed(ApiError::from(e)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T, ApiError> {
        let url = self.url(path)?;
        debug!(%url, "GET");
        let response = self.execute(|http| http.get(url.clone()).query(query)).await?;
        decode(response).await
    }

    /// GET with the response cached under `key`.
    async fn get_cached<T>(
        &self,
        key: String,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned,
    {
        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(value) = serde_json::from_value(cached) {
                debug!("Cache hit for key: {}", key);
                api_metrics().record(ApiEvent::CacheHit);
                return Ok(value);
            }
        }
        api_metrics().record(ApiEvent::CacheMiss);

        let value: T = self.get_json(path, query).await?;
        if let Ok(serialized) = serde_json::to_value(&value) {
            self.cache.insert(key, serialized).await;
        }
        Ok(value)
    }

    async fn patch_row(&self, row_id: u64, body: serde_json::Value) -> Result<(), ApiError> {
        let url = self.url(&format!("mapRows/{row_id}"))?;
        self.execute(|http| http.patch(url.clone()).json(&body)).await?;
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(failed(ApiError::from_status(status.as_u16(), &body)))
}

/// Count a classified failure; unexpected ones are logged here since callers
/// may pass them straight up to the CLI.
fn failed(err: ApiError) -> ApiError {
    api_metrics().record_failure(&err);
    if let ApiError::Unexpected { .. } = err {
        error!(error = %err, "Unexpected mapping API error");
    }
    err
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::decode(format!("response body: {e}")))
}

#[async_trait]
impl MappingApi for Snap2SnomedClient {
    async fn map_view(
        &self,
        map_id: u64,
        filter: &MapViewFilter,
    ) -> Result<Page<MapRow>, ApiError> {
        self.get_json(&format!("mapView/{map_id}"), &filter.to_query()).await
    }

    async fn task_view(
        &self,
        task_id: u64,
        filter: &MapViewFilter,
    ) -> Result<Page<MapRow>, ApiError> {
        self.get_json(&format!("mapView/task/{task_id}"), &filter.to_query()).await
    }

    async fn update_status(&self, row_id: u64, status: MappingStatus) -> Result<(), ApiError> {
        self.patch_row(row_id, json!({ "status": status })).await
    }

    async fn update_no_map(&self, row_id: u64, no_map: bool) -> Result<(), ApiError> {
        self.patch_row(row_id, json!({ "noMap": no_map })).await
    }

    async fn create_target(&self, target: &TargetRow) -> Result<TargetRow, ApiError> {
        let url = self.url("mapRowTargets")?;
        let response = self
            .execute_no_retry(|http| http.post(url.clone()).json(target))
            .await?;
        decode(response).await
    }

    async fn update_target(&self, target: &TargetRow) -> Result<TargetRow, ApiError> {
        let id = target.id.ok_or_else(|| ApiError::Validation {
            status: 400,
            message: "Target has not been created yet".to_string(),
            field: Some("targetId".to_string()),
        })?;
        let url = self.url(&format!("mapRowTargets/{id}"))?;
        let response = self.execute(|http| http.put(url.clone()).json(target)).await?;
        decode(response).await
    }

    async fn bulk_update(
        &self,
        map_id: u64,
        filter: &MapViewFilter,
        update: &BulkUpdate,
    ) -> Result<u64, ApiError> {
        let url = self.url(&format!("mapView/{map_id}/bulk"))?;
        let query = filter.to_query();
        let response = self
            .execute(|http| http.put(url.clone()).query(&query).json(update))
            .await?;
        let result: BulkUpdateResult = decode(response).await?;
        info!(map_id, rows = result.rows_updated, "Bulk update applied");
        Ok(result.rows_updated)
    }

    async fn search_concepts(
        &self,
        scope: &str,
        version: &str,
        filter: &str,
        count: u32,
    ) -> Result<Vec<Concept>, ApiError> {
        let key = format!("concepts:{scope}|{version}|{filter}|{count}");
        let query = vec![
            ("url".to_string(), scope.to_string()),
            ("system-version".to_string(), version.to_string()),
            ("filter".to_string(), filter.to_string()),
            ("count".to_string(), count.to_string()),
        ];
        let value_set: serde_json::Value = self
            .get_cached(key, "fhir/ValueSet/$expand", &query)
            .await?;
        let value_set: ValueSet = serde_json::from_value(value_set)
            .map_err(|e| ApiError::decode(format!("ValueSet expansion: {e}")))?;

        Ok(value_set
            .expansion
            .map(|e| e.contains)
            .unwrap_or_default()
            .into_iter()
            .map(|c| Concept {
                display: c.display.unwrap_or_else(|| c.code.clone()),
                system: c.system,
                code: c.code,
            })
            .collect())
    }

    async fn mapping(&self, map_id: u64) -> Result<Mapping, ApiError> {
        self.get_cached(format!("mapping:{map_id}"), &format!("maps/{map_id}"), &[])
            .await
    }

    async fn task(&self, task_id: u64) -> Result<Task, ApiError> {
        self.get_json(&format!("tasks/{task_id}"), &[]).await
    }

    async fn current_user(&self) -> Result<User, ApiError> {
        self.get_json("users/token", &[]).await
    }

    async fn export(&self, map_id: u64, format: ExportFormat) -> Result<Vec<u8>, ApiError> {
        let url = self.url(&format!("mapView/{map_id}"))?;
        let response = self
            .execute(|http| http.get(url.clone()).header(ACCEPT, format.accept_header()))
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn import_source(&self, codes: &ImportedCodeSet) -> Result<u64, ApiError> {
        let url = self.url("importedCodeSets")?;
        let response = self
            .execute_no_retry(|http| http.post(url.clone()).json(codes))
            .await?;
        let created: CreatedId = decode(response).await?;
        info!(id = created.id, codes = codes.codes.len(), "Imported source code set");
        Ok(created.id)
    }
}
