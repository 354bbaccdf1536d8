use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::descriptor::{DescriptorKind, KeypointShape, PHASH_BITS, QueryDescriptors};
use crate::distance::CombinedWeights;
use crate::error::SearchError;

/// 搜索管线，决定使用哪些描述符以及如何计分
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// 仅使用感知哈希
    Hash,
    /// 仅使用模型输出的稠密向量
    Embedding,
    /// 使用 ORB 二进制关键点描述符
    Keypoint,
    /// 稠密向量与感知哈希加权组合
    Combined,
}

impl Pipeline {
    /// 管线需要的描述符
    pub fn required(&self) -> &'static [DescriptorKind] {
        match self {
            Self::Hash => &[DescriptorKind::PerceptualHash],
            Self::Embedding => &[DescriptorKind::Embedding],
            Self::Keypoint => &[DescriptorKind::KeypointSet],
            Self::Combined => &[DescriptorKind::Embedding, DescriptorKind::PerceptualHash],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Embedding => "embedding",
            Self::Keypoint => "keypoint",
            Self::Combined => "combined",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 稠密向量的比较方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMetric {
    /// 欧氏距离，按本批次最大距离归一化
    Euclidean,
    /// 余弦相似度
    Cosine,
}

/// 关键点描述符的比较方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeypointMetric {
    /// 拼接后逐位比较
    Hamming,
    /// 视为原始字节向量计算欧氏距离
    Euclidean,
}

/// 一次部署中固定的描述符维度与计分参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// 感知哈希位宽
    pub hash_bits: u32,
    /// 关键点矩阵形状
    pub keypoint_shape: KeypointShape,
    /// 稠密向量维数
    pub embedding_dim: usize,
    pub embedding_metric: EmbeddingMetric,
    pub keypoint_metric: KeypointMetric,
    /// 组合管线的权重
    pub weights: CombinedWeights,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hash_bits: PHASH_BITS,
            keypoint_shape: KeypointShape::default(),
            // EfficientNet-B0 全局池化后的维数
            embedding_dim: 1280,
            embedding_metric: EmbeddingMetric::Euclidean,
            keypoint_metric: KeypointMetric::Hamming,
            weights: CombinedWeights::default(),
        }
    }
}

impl PipelineConfig {
    /// 检查配置是否适用于指定管线，在处理任何目录条目之前调用
    pub fn validate(&self, pipeline: Pipeline) -> Result<(), SearchError> {
        for kind in pipeline.required() {
            match kind {
                DescriptorKind::PerceptualHash if self.hash_bits != PHASH_BITS => {
                    return Err(SearchError::config(format!(
                        "感知哈希位宽为 {PHASH_BITS}，但配置为 {}",
                        self.hash_bits
                    )));
                }
                DescriptorKind::KeypointSet if self.keypoint_shape.byte_len() == 0 => {
                    return Err(SearchError::config("关键点矩阵形状不能为空"));
                }
                DescriptorKind::Embedding if self.embedding_dim == 0 => {
                    return Err(SearchError::config("向量维数不能为 0"));
                }
                _ => {}
            }
        }
        if pipeline == Pipeline::Combined && !self.weights.is_valid() {
            return Err(SearchError::config(format!(
                "组合权重必须非负且和为 1: embedding={}, hash={}",
                self.weights.embedding, self.weights.hash
            )));
        }
        Ok(())
    }

    /// 检查查询描述符是否齐全，形状与维数是否与配置一致
    ///
    /// 在处理任何目录条目之前调用。
    pub fn check_query(
        &self,
        pipeline: Pipeline,
        query: &QueryDescriptors,
    ) -> Result<(), SearchError> {
        for &kind in pipeline.required() {
            if !query.contains(kind) {
                return Err(SearchError::config(format!("{pipeline} 管线需要 {kind} 描述符")));
            }
        }
        if let Some(keypoints) = &query.keypoints {
            let shape = self.keypoint_shape;
            if keypoints.dim() != (shape.rows, shape.cols) {
                return Err(SearchError::config(format!(
                    "查询关键点矩阵为 {:?}，期望 {}x{}",
                    keypoints.dim(),
                    shape.rows,
                    shape.cols
                )));
            }
        }
        if let Some(embedding) = &query.embedding {
            if embedding.len() != self.embedding_dim {
                return Err(SearchError::config(format!(
                    "查询向量维数为 {}，期望 {}",
                    embedding.len(),
                    self.embedding_dim
                )));
            }
        }
        Ok(())
    }
}
