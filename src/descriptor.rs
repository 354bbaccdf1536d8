use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// 感知哈希的位宽
pub const PHASH_BITS: u32 = u64::BITS;

/// 描述符类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    PerceptualHash,
    KeypointSet,
    Embedding,
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PerceptualHash => "perceptual_hash",
            Self::KeypointSet => "keypoint_set",
            Self::Embedding => "embedding",
        };
        f.write_str(name)
    }
}

/// 关键点描述符矩阵的形状，`rows` 个关键点，每个 `cols` 字节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeypointShape {
    pub rows: usize,
    pub cols: usize,
}

impl KeypointShape {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// 编码后的字节数
    pub const fn byte_len(&self) -> usize {
        self.rows * self.cols
    }

    /// 逐位比较时的总位数
    pub const fn bits(&self) -> u32 {
        (self.rows * self.cols * 8) as u32
    }
}

impl Default for KeypointShape {
    fn default() -> Self {
        // ORB 描述符为 256 bit，每张图保留 32 个
        Self::new(32, 32)
    }
}

/// 一张图片的视觉描述符
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    /// 64 位感知哈希
    PerceptualHash(u64),
    /// 固定 N×D 的二进制关键点描述符，不足的行以 0 填充
    KeypointSet(Array2<u8>),
    /// 特征提取模型输出的稠密向量
    Embedding(Vec<f32>),
}

impl Descriptor {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::PerceptualHash(_) => DescriptorKind::PerceptualHash,
            Self::KeypointSet(_) => DescriptorKind::KeypointSet,
            Self::Embedding(_) => DescriptorKind::Embedding,
        }
    }

    pub fn as_hash(&self) -> Option<u64> {
        match self {
            Self::PerceptualHash(hash) => Some(*hash),
            _ => None,
        }
    }

    pub fn as_keypoints(&self) -> Option<&Array2<u8>> {
        match self {
            Self::KeypointSet(keypoints) => Some(keypoints),
            _ => None,
        }
    }

    pub fn as_embedding(&self) -> Option<&[f32]> {
        match self {
            Self::Embedding(values) => Some(values),
            _ => None,
        }
    }

    /// 描述符的维度信息，用于在比较前检查查询与目录是否一致
    pub fn dimension(&self) -> usize {
        match self {
            Self::PerceptualHash(_) => PHASH_BITS as usize,
            Self::KeypointSet(keypoints) => keypoints.len(),
            Self::Embedding(values) => values.len(),
        }
    }
}

/// 一次搜索中查询图片提取到的描述符
///
/// 组合管线需要同时携带两种描述符，其余管线只携带一种。
#[derive(Debug, Clone, Default)]
pub struct QueryDescriptors {
    pub hash: Option<u64>,
    pub keypoints: Option<Array2<u8>>,
    pub embedding: Option<Vec<f32>>,
}

impl QueryDescriptors {
    pub fn insert(&mut self, descriptor: Descriptor) {
        match descriptor {
            Descriptor::PerceptualHash(hash) => self.hash = Some(hash),
            Descriptor::KeypointSet(keypoints) => self.keypoints = Some(keypoints),
            Descriptor::Embedding(values) => self.embedding = Some(values),
        }
    }

    pub fn contains(&self, kind: DescriptorKind) -> bool {
        match kind {
            DescriptorKind::PerceptualHash => self.hash.is_some(),
            DescriptorKind::KeypointSet => self.keypoints.is_some(),
            DescriptorKind::Embedding => self.embedding.is_some(),
        }
    }
}

impl FromIterator<Descriptor> for QueryDescriptors {
    fn from_iter<T: IntoIterator<Item = Descriptor>>(iter: T) -> Self {
        let mut query = Self::default();
        for descriptor in iter {
            query.insert(descriptor);
        }
        query
    }
}
