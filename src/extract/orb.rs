use std::cell::RefCell;
use std::collections::HashMap;

use ndarray::Axis;
use opencv::core::{Mat, Ptr};
use opencv::features2d::{ORB, ORB_ScoreType};
use opencv::imgproc;
use opencv::prelude::*;

use super::Extractor;
use crate::codec;
use crate::descriptor::{Descriptor, DescriptorKind, KeypointShape};
use crate::error::{ExtractionError, SearchError};
use crate::pipeline::PipelineConfig;
use crate::utils;

/// ORB 检测器参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbParams {
    /// 保留的最大特征点数量
    pub nfeatures: i32,
    pub scale_factor: f32,
    pub nlevels: i32,
    pub fast_threshold: i32,
}

impl OrbParams {
    fn key(&self) -> (i32, u32, i32, i32) {
        (self.nfeatures, self.scale_factor.to_bits(), self.nlevels, self.fast_threshold)
    }

    fn create(&self) -> opencv::Result<Ptr<ORB>> {
        ORB::create(
            self.nfeatures,
            self.scale_factor,
            self.nlevels,
            31,
            0,
            2,
            ORB_ScoreType::HARRIS_SCORE,
            31,
            self.fast_threshold,
        )
    }
}

// ORB 检测器不能跨线程共享，每个线程按参数缓存一份
thread_local! {
    static ORB_CACHE: RefCell<HashMap<(i32, u32, i32, i32), Ptr<ORB>>> =
        RefCell::new(HashMap::new());
}

/// ORB 二进制关键点描述符，输出固定 N×D 矩阵
#[derive(Debug, Clone, Copy)]
pub struct KeypointExtractor {
    shape: KeypointShape,
    min_keypoints: usize,
    working_size: (i32, i32),
    params: OrbParams,
}

impl KeypointExtractor {
    pub fn new(shape: KeypointShape, min_keypoints: usize) -> Self {
        Self {
            shape,
            min_keypoints,
            working_size: (256, 256),
            params: OrbParams {
                nfeatures: shape.rows as i32,
                scale_factor: 1.2,
                nlevels: 8,
                fast_threshold: 20,
            },
        }
    }

    pub fn with_params(mut self, scale_factor: f32, nlevels: i32, fast_threshold: i32) -> Self {
        self.params = OrbParams { scale_factor, nlevels, fast_threshold, ..self.params };
        self
    }

    pub fn shape(&self) -> KeypointShape {
        self.shape
    }

    /// 对已解码图片检测关键点，并整理为固定形状
    pub fn detect_image(&self, image: &Mat) -> Result<ndarray::Array2<u8>, ExtractionError> {
        let small = utils::resize_exact(image, self.working_size, imgproc::INTER_AREA)?;
        let gray = utils::to_grayscale(&small)?;

        let (keypoints, descriptors) = ORB_CACHE.with(|cache| -> opencv::Result<_> {
            let mut cache = cache.borrow_mut();
            let orb = match cache.entry(self.params.key()) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => e.insert(self.params.create()?),
            };
            utils::detect_and_compute(orb, &gray)
        })?;

        // 按响应强度从高到低排列，强度相同时保持检测顺序
        let descriptors = if keypoints.len() == descriptors.nrows() {
            let mut order = (0..keypoints.len()).collect::<Vec<_>>();
            order.sort_by(|&a, &b| keypoints[b].response().total_cmp(&keypoints[a].response()));
            descriptors.select(Axis(0), &order)
        } else {
            descriptors
        };

        codec::pad_keypoints(&descriptors, self.shape, self.min_keypoints)
    }
}

impl Extractor for KeypointExtractor {
    fn kind(&self) -> DescriptorKind {
        DescriptorKind::KeypointSet
    }

    fn extract(&self, bytes: &[u8]) -> Result<Descriptor, ExtractionError> {
        let image = utils::imdecode(bytes)?;
        self.detect_image(&image).map(Descriptor::KeypointSet)
    }

    fn check(&self, config: &PipelineConfig) -> Result<(), SearchError> {
        if self.shape != config.keypoint_shape {
            return Err(SearchError::config(format!(
                "关键点提取器输出 {}x{}，配置为 {}x{}",
                self.shape.rows,
                self.shape.cols,
                config.keypoint_shape.rows,
                config.keypoint_shape.cols
            )));
        }
        Ok(())
    }
}
