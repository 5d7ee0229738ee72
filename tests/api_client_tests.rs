//! Mapping API client tests
//!
//! These tests use wiremock to stand in for the mapping service so the auth
//! retry, error classification and caching paths run without a network.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use snap2snomed::api::{ApiError, MappingApi, Snap2SnomedClient};
use snap2snomed::auth::{AuthError, TokenProvider};
use snap2snomed::config::ApiConfig;
use snap2snomed::observability::api_metrics;
use snap2snomed::mapping::{ExportFormat, MapViewFilter, MappingStatus, Relationship, TargetRow};

/// Hands out `token-1` until refreshed, then `token-2`.
struct FakeTokens {
    refreshes: AtomicUsize,
}

impl FakeTokens {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            refreshes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TokenProvider for FakeTokens {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(format!("token-{}", self.refreshes.load(Ordering::SeqCst) + 1))
    }

    async fn refresh(&self, _rejected_token: &str) -> Result<String, AuthError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{}", n + 1))
    }
}

/// Mapping service mock with a client pointed at it
struct MappingServiceMock {
    server: MockServer,
    tokens: Arc<FakeTokens>,
    client: Snap2SnomedClient,
}

impl MappingServiceMock {
    async fn new() -> Self {
        Self::with_retries(0, ApiConfig::default().request_timeout_seconds).await
    }

    async fn with_retries(retry_attempts: u32, request_timeout_seconds: u64) -> Self {
        let server = MockServer::start().await;
        let tokens = FakeTokens::new();
        let config = ApiConfig {
            base_url: format!("{}/api", server.uri()),
            retry_attempts,
            request_timeout_seconds,
            ..ApiConfig::default()
        };
        let client = Snap2SnomedClient::new(&config, tokens.clone()).unwrap();
        Self {
            server,
            tokens,
            client,
        }
    }
}

fn map_row_json(row_id: u64, status: &str) -> Value {
    json!({
        "rowId": row_id,
        "sourceIndex": row_id,
        "sourceCode": format!("C{row_id}"),
        "sourceDisplay": "Cholera",
        "noMap": false,
        "targetId": null,
        "targetCode": null,
        "targetDisplay": null,
        "relationship": null,
        "status": status,
        "flagged": false,
        "latestNote": null,
        "assignedAuthor": "author@example.org",
        "assignedReviewer": null,
        "lastAuthor": null,
        "lastReviewer": null
    })
}

fn mapping_json() -> Value {
    json!({
        "id": 5,
        "projectId": 2,
        "mappingVersion": "1.0",
        "toVersion": "http://snomed.info/sct/32506021000036107/version/20240131",
        "toScope": "http://snomed.info/sct?fhir_vs",
        "sourceId": 9
    })
}

#[tokio::test]
async fn test_map_view_sends_filter_and_bearer_token() {
    let mock = MappingServiceMock::new().await;
    Mock::given(method("GET"))
        .and(path("/api/mapView/1"))
        .and(query_param("page", "0"))
        .and(query_param("size", "20"))
        .and(query_param("status", "DRAFT"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [map_row_json(11, "DRAFT"), map_row_json(12, "DRAFT")],
            "page": {"size": 20, "number": 0, "totalElements": 2, "totalPages": 1}
        })))
        .expect(1)
        .mount(&mock.server)
        .await;

    let filter = MapViewFilter {
        status: vec![MappingStatus::Draft],
        ..Default::default()
    };
    let page = mock.client.map_view(1, &filter).await.unwrap();

    assert_eq!(page.content.len(), 2);
    assert_eq!(page.content[0].row_id, 11);
    assert_eq!(page.page.total_elements, 2);
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_and_retried_once() {
    let mock = MappingServiceMock::new().await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/3"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/3"))
        .and(header("authorization", "Bearer token-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 3,
            "mapId": 5,
            "type": "AUTHOR",
            "assignee": "author@example.org",
            "description": "Rows 1-100"
        })))
        .expect(1)
        .mount(&mock.server)
        .await;

    let task = mock.client.task(3).await.unwrap();
    assert_eq!(task.map_id, 5);
    assert_eq!(mock.tokens.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_rejection_is_not_authorized() {
    let mock = MappingServiceMock::new().await;
    Mock::given(method("GET"))
        .and(path("/api/users/token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "title": "Forbidden",
            "status": 403
        })))
        .expect(2)
        .mount(&mock.server)
        .await;

    let err = mock.client.current_user().await.unwrap_err();
    assert!(matches!(err, ApiError::NotAuthorized { status: 403, .. }));
    assert!(err.is_auth());
    assert_eq!(mock.tokens.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_validation_error_carries_problem_detail() {
    let mock = MappingServiceMock::new().await;
    Mock::given(method("POST"))
        .and(path("/api/mapRowTargets"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "type": "https://snap2snomed.app/problem/invalid-target",
            "title": "Invalid target",
            "detail": "Target code 123 is not in the selected edition",
            "status": 422,
            "field": "targetCode"
        })))
        .mount(&mock.server)
        .await;

    let target = TargetRow {
        id: None,
        row_id: 7,
        target_code: Some("123".to_string()),
        target_display: Some("Nothing".to_string()),
        relationship: Some(Relationship::Equivalent),
        flagged: false,
    };
    match mock.client.create_target(&target).await {
        Err(ApiError::Validation {
            status,
            message,
            field,
        }) => {
            assert_eq!(status, 422);
            assert_eq!(message, "Target code 123 is not in the selected edition");
            assert_eq!(field.as_deref(), Some("targetCode"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_gateway_errors_are_unavailable() {
    let mock = MappingServiceMock::new().await;
    Mock::given(method("GET"))
        .and(path("/api/maps/5"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&mock.server)
        .await;

    let err = mock.client.mapping(5).await.unwrap_err();
    assert!(matches!(err, ApiError::Unavailable(_)));
}

#[tokio::test]
async fn test_status_patch_body() {
    let mock = MappingServiceMock::new().await;
    Mock::given(method("PATCH"))
        .and(path("/api/mapRows/42"))
        .and(body_json(json!({"status": "INREVIEW"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock.server)
        .await;

    mock.client
        .update_status(42, MappingStatus::InReview)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concept_search_is_cached() {
    let mock = MappingServiceMock::new().await;
    Mock::given(method("GET"))
        .and(path("/api/fhir/ValueSet/$expand"))
        .and(query_param("filter", "cholera"))
        .and(query_param("count", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceType": "ValueSet",
            "expansion": {
                "contains": [
                    {"system": "http://snomed.info/sct", "code": "63650001", "display": "Cholera"}
                ]
            }
        })))
        .expect(1)
        .mount(&mock.server)
        .await;

    let mapping: snap2snomed::mapping::Mapping = serde_json::from_value(mapping_json()).unwrap();
    for _ in 0..2 {
        let concepts = mock
            .client
            .search_concepts(&mapping.to_scope, &mapping.to_version, "cholera", 1)
            .await
            .unwrap();
        assert_eq!(concepts.len(), 1);
        assert_eq!(concepts[0].code, "63650001");
    }
}

#[tokio::test]
async fn test_export_requests_format_by_accept_header() {
    let mock = MappingServiceMock::new().await;
    Mock::given(method("GET"))
        .and(path("/api/mapView/5"))
        .and(header("accept", "text/tab-separated-values"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("Source code\tTarget code\nC1\t63650001\n"),
        )
        .mount(&mock.server)
        .await;

    let bytes = mock.client.export(5, ExportFormat::Tsv).await.unwrap();
    assert!(String::from_utf8(bytes).unwrap().starts_with("Source code\t"));
}

#[tokio::test]
async fn test_bulk_update_returns_count() {
    let mock = MappingServiceMock::new().await;
    Mock::given(method("PUT"))
        .and(path("/api/mapView/5/bulk"))
        .and(query_param("noMap", "false"))
        .and(body_json(json!({"status": "MAPPED"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rowsUpdated": 17})))
        .mount(&mock.server)
        .await;

    let filter = MapViewFilter {
        no_map: Some(false),
        ..Default::default()
    };
    let update = snap2snomed::mapping::BulkUpdate {
        status: Some(MappingStatus::Mapped),
        ..Default::default()
    };
    assert_eq!(mock.client.bulk_update(5, &filter, &update).await.unwrap(), 17);
}

fn new_target(row_id: u64) -> TargetRow {
    TargetRow {
        id: None,
        row_id,
        target_code: Some("63650001".to_string()),
        target_display: Some("Cholera".to_string()),
        relationship: Some(Relationship::Equivalent),
        flagged: false,
    }
}

#[tokio::test]
async fn test_timed_out_create_is_sent_once() {
    let mock = MappingServiceMock::with_retries(3, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/mapRowTargets"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({
                    "id": 90,
                    "rowId": 7,
                    "targetCode": "63650001",
                    "targetDisplay": "Cholera",
                    "relationship": "EQUIVALENT",
                    "flagged": false
                }))
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&mock.server)
        .await;

    let err = mock.client.create_target(&new_target(7)).await.unwrap_err();
    assert!(matches!(err, ApiError::Unavailable(_)));

    let received = mock.server.received_requests().await.unwrap();
    let posts = received
        .iter()
        .filter(|r| r.method.as_str() == "POST")
        .count();
    assert_eq!(posts, 1);
}

#[tokio::test]
async fn test_failed_import_is_not_resent() {
    let mock = MappingServiceMock::with_retries(3, 5).await;
    Mock::given(method("POST"))
        .and(path("/api/importedCodeSets"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock.server)
        .await;

    let codes = snap2snomed::import::ImportedCodeSet {
        name: "ICD-10".to_string(),
        version: "2024".to_string(),
        codes: Vec::new(),
    };
    let err = mock.client.import_source(&codes).await.unwrap_err();
    assert!(matches!(err, ApiError::Unavailable(_)));
}

#[tokio::test]
async fn test_status_patch_is_retried_after_gateway_error() {
    let mock = MappingServiceMock::with_retries(1, 5).await;
    Mock::given(method("PATCH"))
        .and(path("/api/mapRows/42"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock.server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/mapRows/42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock.server)
        .await;

    mock.client
        .update_status(42, MappingStatus::Draft)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_server_error_is_classified_unexpected_and_counted() {
    let mock = MappingServiceMock::new().await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/8"))
        .respond_with(ResponseTemplate::new(500).set_body_string("NullPointerException"))
        .mount(&mock.server)
        .await;

    let before = api_metrics().snapshot().failures;
    let err = mock.client.task(8).await.unwrap_err();
    assert!(matches!(err, ApiError::Unexpected { status: Some(500), .. }));
    assert!(api_metrics().snapshot().failures > before);
}
