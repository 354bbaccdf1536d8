//! 相似度计算
//!
//! 所有相似度都换算到 `[0, 100]`，越大越相似，不同度量之间的分数含义一致。

use crate::hamming::{hamming_bytes, hamming_similarity, hamming_u64};

/// 欧氏距离，以 f64 累加，数值很大的有限向量也不会溢出为无穷
#[inline]
pub fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// 将字节串视为原始数值向量计算欧氏距离
#[inline]
pub fn euclidean_bytes(a: &[u8], b: &[u8]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let sum = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x.abs_diff(y) as u64;
            d * d
        })
        .sum::<u64>();
    (sum as f64).sqrt()
}

/// 余弦相似度，范围 `[-1, 1]`；任一向量范数为 0 时返回 0
#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let (mut dot, mut na, mut nb) = (0f64, 0f64, 0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0. || nb == 0. {
        return 0.;
    }
    let cos = dot / (na.sqrt() * nb.sqrt());
    if cos.is_finite() { cos.clamp(-1., 1.) } else { 0. }
}

/// 余弦相似度换算到 `[0, 100]`
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    (50. * (cosine(a, b) + 1.)).clamp(0., 100.)
}

/// 以本批次的最大距离归一化欧氏距离
///
/// 最大距离至少取 1，避免所有距离均为 0 时除零。距离或最大距离不是有限值时得 0 分
#[inline]
pub fn euclidean_similarity(distance: f64, max_distance: f64) -> f64 {
    if !distance.is_finite() || !max_distance.is_finite() {
        return 0.;
    }
    let max_distance = max_distance.max(1.);
    (100. * (1. - distance / max_distance)).clamp(0., 100.)
}

/// 两个 64 位哈希的相似度
#[inline]
pub fn hash_similarity(a: u64, b: u64, bits: u32) -> f64 {
    hamming_similarity(hamming_u64(a, b), bits)
}

/// 两个关键点描述符集合的相似度，按拼接后的字节逐位比较
#[inline]
pub fn keypoint_similarity(a: &[u8], b: &[u8]) -> f64 {
    hamming_similarity(hamming_bytes(a, b), (a.len() * 8) as u32)
}

/// 组合分数的权重，两者之和为 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedWeights {
    pub embedding: f64,
    pub hash: f64,
}

impl Default for CombinedWeights {
    fn default() -> Self {
        Self { embedding: 0.7, hash: 0.3 }
    }
}

impl CombinedWeights {
    pub fn is_valid(&self) -> bool {
        self.embedding >= 0. && self.hash >= 0. && (self.embedding + self.hash - 1.).abs() < 1e-9
    }

    /// 组合两个已经换算到 `[0, 100]` 的相似度
    #[inline]
    pub fn combine(&self, embedding: f64, hash: f64) -> f64 {
        (self.embedding * embedding + self.hash * hash).clamp(0., 100.)
    }
}

/// 将分数保留 10 位小数
#[inline]
pub fn round_score(score: f64) -> f64 {
    (score * 1e10).round() / 1e10
}
