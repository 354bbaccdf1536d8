use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum_auth::AuthBearer;
use axum_typed_multipart::TypedMultipart;
use clap::ValueEnum;
use log::info;
use tokio::task::block_in_place;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::db::{TenantStats, crud};
use crate::pipeline::Pipeline;
use crate::search::SearchResponse;

/// 在租户的商品目录中搜索一张图片
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponseDoc),
        (status = 400, description = "无法解码的图片或无效的参数"),
        (status = 401, description = "token 错误"),
        (status = 422, description = "查询图片特征不足"),
        (status = 503, description = "特征提取模型暂时不可用"),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    TypedMultipart(data): TypedMultipart<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    state.check_token(&token)?;

    let top_k = data.top_k.unwrap_or(state.search.top_k);
    if !(1..=20).contains(&top_k) {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "top_k 的范围为 1 ~ 20"));
    }
    let pipeline = match &data.pipeline {
        Some(s) => Pipeline::from_str(s, true)
            .map_err(|e| AppError::new(StatusCode::BAD_REQUEST, format!("无效的管线: {e}")))?,
        None => state.search.pipeline,
    };

    info!(
        "正在搜索上传图片: 租户 {}, 管线 {pipeline}, 文件 {:?}",
        data.tenant_id, data.file.metadata.file_name
    );

    let snapshot = crud::load_snapshot(&state.db, &data.tenant_id).await?;
    let response = block_in_place(|| {
        state.searcher.search(&data.file.contents, &snapshot, top_k as usize, pipeline)
    })?;

    Ok(Json(response))
}

/// 查询租户的商品目录统计
#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}/stats",
    params(("tenant_id" = String, Path, description = "租户 ID")),
    responses(
        (status = 200, body = TenantStats),
        (status = 401, description = "token 错误"),
    )
)]
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    Path(tenant_id): Path<String>,
) -> Result<Json<TenantStats>> {
    state.check_token(&token)?;
    let stats = crud::tenant_stats(&state.db, &tenant_id).await?;
    Ok(Json(stats))
}
