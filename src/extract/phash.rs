use opencv::core::Mat;
use opencv::prelude::*;
use opencv::{img_hash, imgproc};

use super::Extractor;
use crate::descriptor::{Descriptor, DescriptorKind};
use crate::error::ExtractionError;
use crate::utils;

/// 基于 DCT 的 64 位感知哈希
#[derive(Debug, Clone, Copy)]
pub struct PerceptualHashExtractor {
    working_size: (i32, i32),
}

impl Default for PerceptualHashExtractor {
    fn default() -> Self {
        Self { working_size: (32, 32) }
    }
}

impl PerceptualHashExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 计算已解码图片的哈希
    pub fn hash_image(&self, image: &Mat) -> Result<u64, ExtractionError> {
        let small = utils::resize_exact(image, self.working_size, imgproc::INTER_NEAREST)?;
        let mut output = Mat::default();
        img_hash::p_hash(&small, &mut output)?;
        let bytes: [u8; 8] = output.data_bytes()?.try_into().map_err(|_| {
            ExtractionError::UndecodableImage(format!("哈希长度错误: {}", output.total()))
        })?;
        Ok(u64::from_be_bytes(bytes))
    }
}

impl Extractor for PerceptualHashExtractor {
    fn kind(&self) -> DescriptorKind {
        DescriptorKind::PerceptualHash
    }

    fn extract(&self, bytes: &[u8]) -> Result<Descriptor, ExtractionError> {
        let image = utils::imdecode(bytes)?;
        self.hash_image(&image).map(Descriptor::PerceptualHash)
    }
}
