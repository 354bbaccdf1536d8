//! 图片特征提取
//!
//! 每种描述符由一个独立的 [`Extractor`] 负责，任一提取器失败不会影响其他提取器。

mod embedding;
mod orb;
mod phash;

use std::sync::Arc;

use rayon::prelude::*;

pub use self::embedding::*;
pub use self::orb::*;
pub use self::phash::*;
use crate::descriptor::{Descriptor, DescriptorKind, QueryDescriptors};
use crate::error::{ExtractionError, SearchError};
use crate::pipeline::{Pipeline, PipelineConfig};

/// 将图片字节转换为一种描述符
pub trait Extractor: Send + Sync {
    fn kind(&self) -> DescriptorKind;

    fn extract(&self, bytes: &[u8]) -> Result<Descriptor, ExtractionError>;

    /// 检查输出的形状或维数是否与管线配置一致
    fn check(&self, _config: &PipelineConfig) -> Result<(), SearchError> {
        Ok(())
    }
}

/// 每种描述符至多一个提取器
#[derive(Clone, Default)]
pub struct ExtractorSet {
    hash: Option<Arc<dyn Extractor>>,
    keypoints: Option<Arc<dyn Extractor>>,
    embedding: Option<Arc<dyn Extractor>>,
}

impl ExtractorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加提取器，同类型的旧提取器会被替换
    pub fn with(mut self, extractor: Arc<dyn Extractor>) -> Self {
        *self.slot(extractor.kind()) = Some(extractor);
        self
    }

    fn slot(&mut self, kind: DescriptorKind) -> &mut Option<Arc<dyn Extractor>> {
        match kind {
            DescriptorKind::PerceptualHash => &mut self.hash,
            DescriptorKind::KeypointSet => &mut self.keypoints,
            DescriptorKind::Embedding => &mut self.embedding,
        }
    }

    pub fn get(&self, kind: DescriptorKind) -> Option<&Arc<dyn Extractor>> {
        match kind {
            DescriptorKind::PerceptualHash => self.hash.as_ref(),
            DescriptorKind::KeypointSet => self.keypoints.as_ref(),
            DescriptorKind::Embedding => self.embedding.as_ref(),
        }
    }

    /// 已配置的描述符类型
    pub fn kinds(&self) -> Vec<DescriptorKind> {
        [DescriptorKind::PerceptualHash, DescriptorKind::KeypointSet, DescriptorKind::Embedding]
            .into_iter()
            .filter(|&kind| self.get(kind).is_some())
            .collect()
    }

    /// 检查管线需要的提取器是否齐全，且输出与配置一致
    pub fn check(&self, pipeline: Pipeline, config: &PipelineConfig) -> Result<(), SearchError> {
        for &kind in pipeline.required() {
            let extractor = self.get(kind).ok_or_else(|| {
                SearchError::config(format!("{pipeline} 管线需要 {kind} 提取器，但未配置"))
            })?;
            extractor.check(config)?;
        }
        Ok(())
    }

    /// 提取查询图片在指定管线下需要的全部描述符，任一失败则整个查询失败
    pub fn extract_query(
        &self,
        bytes: &[u8],
        pipeline: Pipeline,
    ) -> Result<QueryDescriptors, SearchError> {
        let descriptors = pipeline
            .required()
            .par_iter()
            .map(|&kind| {
                let extractor = self.get(kind).ok_or_else(|| {
                    SearchError::config(format!("{pipeline} 管线需要 {kind} 提取器，但未配置"))
                })?;
                let descriptor = extractor.extract(bytes)?;
                if descriptor.kind() != kind {
                    return Err(SearchError::config(format!(
                        "{kind} 提取器返回了 {} 描述符",
                        descriptor.kind()
                    )));
                }
                Ok(descriptor)
            })
            .collect::<Result<Vec<_>, SearchError>>()?;
        Ok(descriptors.into_iter().collect())
    }

    /// 运行全部已配置的提取器，各自的结果互不影响
    pub fn extract_all(
        &self,
        bytes: &[u8],
    ) -> Vec<(DescriptorKind, Result<Descriptor, ExtractionError>)> {
        self.kinds()
            .into_par_iter()
            .filter_map(|kind| self.get(kind).map(|e| (kind, e.extract(bytes))))
            .collect()
    }
}
