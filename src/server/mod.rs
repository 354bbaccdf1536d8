mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

/// 请求体大小上限：10M
pub const BODY_LIMIT: usize = 1024 * 1024 * 10;

#[derive(OpenApi)]
#[openapi(
    paths(api::search_handler, api::stats_handler),
    components(schemas(
        types::SearchForm,
        types::SearchResponseDoc,
        types::SearchResultDoc,
        crate::db::TenantStats
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search", post(api::search_handler))
        .route("/tenants/{tenant_id}/stats", get(api::stats_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .with_state(state)
}
