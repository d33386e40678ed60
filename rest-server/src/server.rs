use anyhow::{Result, anyhow};
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use axum_server::tls_rustls::RustlsConfig;
use feature_store_core::{EntityId, FeatureMap, FeatureStore, FeatureStoreError, StoredFeatures};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::sync::Arc;

#[derive(Clone)]
pub struct FeatureServer {
    feature_store: Arc<FeatureStore>,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tls_enabled: bool,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6566,
            tls_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntityFeaturesResponse {
    pub entity_id: EntityId,
    pub features: Option<StoredFeatures>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreFeaturesRequest {
    pub features: FeatureMap,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetBatchFeaturesRequest {
    pub entity_ids: Vec<EntityId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetBatchFeaturesResponse {
    pub results: HashMap<EntityId, Option<StoredFeatures>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreBatchFeaturesRequest {
    pub entities: HashMap<EntityId, FeatureMap>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreBatchFeaturesResponse {
    pub stored: Vec<EntityId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntityIdsResponse {
    pub entity_ids: Vec<EntityId>,
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<FeatureStoreError> for AppError {
    fn from(err: FeatureStoreError) -> Self {
        let status = if err.is_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::BAD_REQUEST
        };
        if err.is_unavailable() {
            tracing::warn!("Request failed: {}", err);
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (status, body).into_response()
    }
}

pub fn router(feature_store: FeatureStore) -> Router {
    let server = FeatureServer {
        feature_store: Arc::new(feature_store),
    };
    Router::new()
        .route(
            "/entities/{entity_id}/features",
            get(handle_get_features).put(handle_store_features),
        )
        .route("/get-batch-features", post(handle_get_batch_features))
        .route("/store-batch-features", post(handle_store_batch_features))
        .route("/entity-ids", get(handle_entity_ids))
        .route("/health", get(handle_health))
        .with_state(server)
}

pub async fn start_server(
    server_config: ServerConfig,
    feature_store: FeatureStore,
    metrics_enabled: bool,
    shutdown_handler: axum_server::Handle,
) -> Result<()> {
    let mut app = router(feature_store);
    let trace = tower_http::trace::TraceLayer::new_for_http();
    app = app.layer(trace);
    if metrics_enabled {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        app = app
            .route("/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer)
    }

    let addr: SocketAddr = format!("{}:{}", server_config.host, server_config.port)
        .to_socket_addrs()?
        .next()
        .ok_or(anyhow!("Cannot resolve host"))?;

    tracing::info!(
        "Server listening on {}:{}",
        server_config.host,
        server_config.port
    );
    if server_config.tls_enabled {
        let cert_path = server_config
            .tls_cert_path
            .ok_or(anyhow!("TLS is enabled but cert path is not provided"))?;
        let key_path = server_config
            .tls_key_path
            .ok_or(anyhow!("TLS is enabled but key path is not provided"))?;
        let rustls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|e| anyhow!("Failed to load TLS config: {}", e))?;
        axum_server::bind_rustls(addr, rustls_config)
            .handle(shutdown_handler)
            .serve(app.into_make_service())
            .await?;
        Ok(())
    } else {
        axum_server::bind(addr)
            .handle(shutdown_handler)
            .serve(app.into_make_service())
            .await?;
        Ok(())
    }
}

async fn handle_health(State(server): State<FeatureServer>) -> StatusCode {
    match server.feature_store.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            tracing::warn!("Health check failed: {}", err);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn handle_get_features(
    State(server): State<FeatureServer>,
    Path(entity_id): Path<String>,
) -> Result<Json<EntityFeaturesResponse>, AppError> {
    let entity_id = EntityId::from(entity_id);
    let features = server.feature_store.get_features(&entity_id).await?;
    Ok(Json(EntityFeaturesResponse {
        entity_id,
        features,
    }))
}

async fn handle_store_features(
    State(server): State<FeatureServer>,
    Path(entity_id): Path<String>,
    payload: Result<Json<StoreFeaturesRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(StoreFeaturesRequest {
        features,
        ttl_seconds,
    }) = payload?;
    match ttl_seconds {
        Some(ttl) => {
            server
                .feature_store
                .store_features_with_ttl(entity_id, &features, ttl)
                .await?
        }
        None => server.feature_store.store_features(entity_id, &features).await?,
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_get_batch_features(
    State(server): State<FeatureServer>,
    payload: Result<Json<GetBatchFeaturesRequest>, JsonRejection>,
) -> Result<Json<GetBatchFeaturesResponse>, AppError> {
    let Json(GetBatchFeaturesRequest { entity_ids }) = payload?;
    let results = server.feature_store.get_batch_features(entity_ids).await?;
    Ok(Json(GetBatchFeaturesResponse { results }))
}

async fn handle_store_batch_features(
    State(server): State<FeatureServer>,
    payload: Result<Json<StoreBatchFeaturesRequest>, JsonRejection>,
) -> Result<Json<StoreBatchFeaturesResponse>, AppError> {
    let Json(StoreBatchFeaturesRequest { entities }) = payload?;
    let report = server.feature_store.store_batch_features(entities).await?;
    Ok(Json(StoreBatchFeaturesResponse {
        stored: report.entity_ids,
    }))
}

async fn handle_entity_ids(
    State(server): State<FeatureServer>,
) -> Result<Json<EntityIdsResponse>, AppError> {
    let entity_ids = server.feature_store.collect_entity_ids().await?;
    Ok(Json(EntityIdsResponse { entity_ids }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use feature_store_core::onlinestore::InMemoryOnlineStore;
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    fn test_router() -> Router {
        router(FeatureStore::new(Arc::new(InMemoryOnlineStore::new())))
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json)?))?,
            None => builder.body(Body::empty())?,
        };
        Ok(app.clone().oneshot(request).await?)
    }

    async fn json_body<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    async fn health_is_ok_for_in_memory_store() -> Result<()> {
        let app = test_router();
        let response = send(&app, Method::GET, "/health", None).await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn put_then_get_merges_features() -> Result<()> {
        let app = test_router();
        let response = send(
            &app,
            Method::PUT,
            "/entities/332/features",
            Some(serde_json::json!({"features": {"Pclass": 3, "Sex": "male"}})),
        )
        .await?;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        send(
            &app,
            Method::PUT,
            "/entities/332/features",
            Some(serde_json::json!({"features": {"Fare": 7.25}, "ttl_seconds": 3600})),
        )
        .await?;

        let response = send(&app, Method::GET, "/entities/332/features", None).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body: EntityFeaturesResponse = json_body(response).await?;
        assert_eq!(body.entity_id, EntityId::from(332));
        let features = body.features.ok_or(anyhow!("features missing"))?;
        assert_eq!(features.get("Pclass").map(String::as_str), Some("3"));
        assert_eq!(features.get("Sex").map(String::as_str), Some("male"));
        assert_eq!(features.get("Fare").map(String::as_str), Some("7.25"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_entity_has_null_features() -> Result<()> {
        let app = test_router();
        let response = send(&app, Method::GET, "/entities/nobody/features", None).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = json_body(response).await?;
        assert_eq!(body, serde_json::json!({"entity_id": "nobody", "features": null}));
        Ok(())
    }

    #[tokio::test]
    async fn empty_features_are_bad_request() -> Result<()> {
        let app = test_router();
        let response = send(
            &app,
            Method::PUT,
            "/entities/1/features",
            Some(serde_json::json!({"features": {}})),
        )
        .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = send(
            &app,
            Method::PUT,
            "/entities/1/features",
            Some(serde_json::json!({"features": {"a": 1}, "ttl_seconds": 0})),
        )
        .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() -> Result<()> {
        let app = test_router();
        let response = send(
            &app,
            Method::POST,
            "/get-batch-features",
            Some(serde_json::json!({"ids": [1]})),
        )
        .await?;
        assert!(response.status().is_client_error());
        let body: serde_json::Value = json_body(response).await?;
        assert!(body.get("message").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn batch_store_get_and_enumerate() -> Result<()> {
        let app = test_router();
        let response = send(
            &app,
            Method::POST,
            "/store-batch-features",
            Some(serde_json::json!({"entities": {"e1": {"a": 1}, "e2": {"b": true}}})),
        )
        .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let stored: StoreBatchFeaturesResponse = json_body(response).await?;
        assert_eq!(stored.stored.len(), 2);

        let response = send(
            &app,
            Method::POST,
            "/get-batch-features",
            Some(serde_json::json!({"entity_ids": ["e1", "e2", "e3"]})),
        )
        .await?;
        let body: serde_json::Value = json_body(response).await?;
        assert_eq!(
            body,
            serde_json::json!({"results": {"e1": {"a": "1"}, "e2": {"b": "true"}, "e3": null}})
        );

        let response = send(&app, Method::GET, "/entity-ids", None).await?;
        let mut ids: EntityIdsResponse = json_body(response).await?;
        ids.entity_ids.sort();
        assert_eq!(
            ids.entity_ids,
            vec![EntityId::from("e1"), EntityId::from("e2")]
        );
        Ok(())
    }
}
