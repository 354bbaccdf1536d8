use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use utoipa::ToSchema;

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub file: FieldData<Bytes>,
    pub tenant_id: String,
    pub top_k: Option<u32>,
    pub pipeline: Option<String>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的查询图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 租户 ID，只在该租户的商品目录中搜索
    pub tenant_id: String,
    /// 返回的商品数量，范围 1 ~ 20，默认为 5
    pub top_k: Option<u32>,
    /// 搜索管线：hash、embedding、keypoint 或 combined
    pub pipeline: Option<String>,
}

/// 一条搜索结果（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchResultDoc {
    pub entry_id: String,
    pub product_id: String,
    /// 图片来源
    pub image_reference: String,
    /// 添加时间，unix 秒
    pub created_at: i64,
    /// 0 ~ 100 的相似度，越大越相似
    pub score: f64,
    /// 组合管线中稠密向量的分数
    pub embedding_score: Option<f64>,
    /// 组合管线中感知哈希的分数
    pub hash_score: Option<f64>,
}

/// 搜索响应（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchResponseDoc {
    /// 按商品去重后的匹配数量
    pub total: usize,
    /// 按相似度从高到低排列的结果
    pub results: Vec<SearchResultDoc>,
    /// 目录为空时为 "no catalog to compare"
    pub message: Option<String>,
}
