use serde::{Deserialize, Serialize};

use crate::codec;
use crate::descriptor::{Descriptor, DescriptorKind};
use crate::error::DecodeError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// 持久层提供的目录快照中的一行，描述符以存储格式保存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CatalogRecord {
    pub entry_id: String,
    pub tenant_id: String,
    pub product_id: String,
    /// 图片的来源，例如对象存储 URL 或文件路径
    pub image_reference: String,
    /// 十六进制感知哈希
    pub phash: Option<String>,
    /// 展开的 N×D 关键点描述符
    pub keypoints: Option<Vec<u8>>,
    /// 小端序 f32 向量
    pub embedding: Option<Vec<u8>>,
    /// 创建时间，unix 秒
    pub created_at: i64,
}

impl CatalogRecord {
    /// 解码指定类型的描述符
    pub fn decode(
        &self,
        kind: DescriptorKind,
        config: &PipelineConfig,
    ) -> Result<Descriptor, DecodeError> {
        match kind {
            DescriptorKind::PerceptualHash => {
                let hex = self.phash.as_deref().ok_or(DecodeError::Missing(kind))?;
                codec::decode_hash(hex).map(Descriptor::PerceptualHash)
            }
            DescriptorKind::KeypointSet => {
                let buffer = self.keypoints.as_deref().ok_or(DecodeError::Missing(kind))?;
                let keypoints = codec::decode_keypoints(buffer, config.keypoint_shape)?;
                // 全为 0 说明没有任何真实关键点
                if keypoints.iter().all(|&b| b == 0) {
                    return Err(DecodeError::Degenerate(kind));
                }
                Ok(Descriptor::KeypointSet(keypoints))
            }
            DescriptorKind::Embedding => {
                let buffer = self.embedding.as_deref().ok_or(DecodeError::Missing(kind))?;
                let values = codec::decode_embedding(buffer, config.embedding_dim)?;
                if values.iter().all(|&v| v == 0.) {
                    return Err(DecodeError::Degenerate(kind));
                }
                Ok(Descriptor::Embedding(values))
            }
        }
    }
}

/// 一张已解码、可参与比较的目录图片
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub entry_id: String,
    pub tenant_id: String,
    pub product_id: String,
    pub image_reference: String,
    pub created_at: i64,
    /// 按 [`Pipeline::required`] 的顺序排列
    pub descriptors: Vec<Descriptor>,
}

impl CatalogEntry {
    /// 从快照记录构建条目，解码管线所需的全部描述符，任一失败则该条目不可索引
    pub fn from_record(
        record: &CatalogRecord,
        pipeline: Pipeline,
        config: &PipelineConfig,
    ) -> Result<Self, DecodeError> {
        let descriptors = pipeline
            .required()
            .iter()
            .map(|&kind| record.decode(kind, config))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            entry_id: record.entry_id.clone(),
            tenant_id: record.tenant_id.clone(),
            product_id: record.product_id.clone(),
            image_reference: record.image_reference.clone(),
            created_at: record.created_at,
            descriptors,
        })
    }

    pub fn descriptor(&self, kind: DescriptorKind) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.kind() == kind)
    }
}
