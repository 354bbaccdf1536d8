use serde::Serialize;
use utoipa::ToSchema;

/// 租户目录的统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema, sqlx::FromRow)]
pub struct TenantStats {
    /// 图片总数
    pub images: i64,
    /// 商品数量
    pub products: i64,
    /// 具有感知哈希的图片数量
    pub with_phash: i64,
    /// 具有关键点描述符的图片数量
    pub with_keypoints: i64,
    /// 具有稠密向量的图片数量
    pub with_embedding: i64,
}
