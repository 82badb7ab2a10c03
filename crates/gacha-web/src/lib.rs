//! Thin axum JSON surface over the scraping pipeline.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gacha_core::Product;
use gacha_storage::{CatalogFilter, CatalogStore, StoreError};
use gacha_sync::{PipelineError, ScrapeRunner};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "gacha-web";

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<ScrapeRunner>,
    pub catalog: Arc<dyn CatalogStore>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/scrape/{site}", post(scrape_site_handler))
        .route("/api/scrape/status", get(scrape_status_handler))
        .route("/api/scrape/logs", get(scrape_logs_handler))
        .route("/api/scrape/logs/{site}", get(scrape_logs_by_site_handler))
        .route("/api/products", get(products_handler))
        .route("/api/products/new", get(new_products_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web surface listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct LogsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ProductsQuery {
    manufacturer: Option<String>,
    keyword: Option<String>,
    page: Option<usize>,
    per_page: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ProductsPage {
    items: Vec<Product>,
    page: usize,
    total_pages: usize,
    total_items: usize,
}

async fn scrape_site_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(site): AxumPath<String>,
) -> Response {
    info!(site, "manual scraping requested");
    match state.runner.run_site(&site).await {
        Ok(outcome) => Json(json!({
            "status": "success",
            "site": site,
            "total_found": outcome.total_found,
            "new_count": outcome.new_count,
            "message": format!(
                "全取得: {}件、うち新着: {}件",
                outcome.total_found, outcome.new_count
            ),
        }))
        .into_response(),
        Err(PipelineError::UnsupportedSite(_)) => {
            error_payload(StatusCode::NOT_FOUND, &site, "unsupported site")
        }
        Err(PipelineError::RunFailed { message, .. }) => error_payload(
            StatusCode::INTERNAL_SERVER_ERROR,
            &site,
            &format!("スクレイピングに失敗しました: {message}"),
        ),
    }
}

async fn scrape_status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.runner.status().await).into_response()
}

async fn scrape_logs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(10);
    match state.runner.recent_logs(limit).await {
        Ok(logs) => Json(logs).into_response(),
        Err(err) => server_error(err),
    }
}

async fn scrape_logs_by_site_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(site): AxumPath<String>,
) -> Response {
    match state.runner.logs_for_site(&site).await {
        Ok(logs) => Json(logs).into_response(),
        Err(err) => server_error(err),
    }
}

async fn products_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProductsQuery>,
) -> Response {
    let filter = CatalogFilter {
        manufacturer: query.manufacturer,
        keyword: query.keyword,
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(20),
    };
    match state.catalog.list(filter).await {
        Ok(page) => Json(ProductsPage {
            items: page.items,
            page: page.page,
            total_pages: page.total_pages,
            total_items: page.total_items,
        })
        .into_response(),
        Err(err) => server_error(err),
    }
}

async fn new_products_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.catalog.find_new().await {
        Ok(products) => Json(products).into_response(),
        Err(err) => server_error(err),
    }
}

fn error_payload(status: StatusCode, site: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "status": "error",
            "site": site,
            "message": message,
        })),
    )
        .into_response()
}

fn server_error(err: StoreError) -> Response {
    error!(error = %err, "store query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "status": "error",
            "message": err.to_string(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use gacha_storage::{
        HttpSessionFactory, MemoryCatalogStore, MemoryRunLogStore, MemorySiteConfigStore,
    };
    use gacha_sync::{LogNotificationSink, SyncConfig};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let catalog = Arc::new(MemoryCatalogStore::new());
        let runner = ScrapeRunner::new(
            catalog.clone(),
            Arc::new(MemorySiteConfigStore::new()),
            Arc::new(MemoryRunLogStore::new()),
            Arc::new(HttpSessionFactory::default()),
            Arc::new(LogNotificationSink),
            &SyncConfig::from_env(),
        );
        AppState {
            runner: Arc::new(runner),
            catalog,
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn status_endpoint_tolerates_empty_history() {
        let (status, body) = get_json(app(test_state()), "/api/scrape/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["available"], true);
        assert_eq!(body["supported_sites"].as_array().unwrap().len(), 2);
        assert!(body["last_executed_at"].is_null());
        assert!(body["last_status"].is_null());
    }

    #[tokio::test]
    async fn unknown_site_maps_to_not_found_payload() {
        let app = app(test_state());
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/scrape/UNKNOWN_SITE")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["site"], "UNKNOWN_SITE");
    }

    #[tokio::test]
    async fn log_queries_return_empty_collections() {
        let state = test_state();
        let (status, body) = get_json(app(state.clone()), "/api/scrape/logs?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 0);

        let (status, body) = get_json(app(state), "/api/scrape/logs/BANDAI_GASHAPON").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn products_endpoint_pages_the_catalog() {
        let (status, body) = get_json(
            app(test_state()),
            "/api/products?manufacturer=BANDAI&page=1&per_page=10",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_items"], 0);
        assert_eq!(body["page"], 1);
        assert_eq!(body["items"].as_array().unwrap().len(), 0);
    }
}
