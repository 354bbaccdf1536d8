//! 每次搜索临时构建的目录索引
//!
//! 索引只在一次搜索调用中存在：由快照构建，线性扫描查询，然后丢弃。

use std::borrow::Cow;
use std::collections::HashSet;
use std::time::Instant;

use log::{debug, warn};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogEntry, CatalogRecord};
use crate::codec;
use crate::descriptor::{Descriptor, DescriptorKind, QueryDescriptors};
use crate::distance::{self, round_score};
use crate::error::SearchError;
use crate::metrics;
use crate::pipeline::{EmbeddingMetric, KeypointMetric, Pipeline, PipelineConfig};

/// 组合管线中各个信号的分数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalScores {
    pub embedding_score: f64,
    pub hash_score: f64,
}

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub entry_id: String,
    pub product_id: String,
    pub image_reference: String,
    pub created_at: i64,
    /// 0 ~ 100 的相似度，越大越相似
    pub score: f64,
    #[serde(flatten)]
    pub signals: Option<SignalScores>,
}

/// 去重后的排序结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedMatches {
    /// 去重后、截断前的匹配数量
    pub total: usize,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    position: usize,
    score: f64,
    signals: Option<SignalScores>,
}

pub struct CatalogIndex {
    pipeline: Pipeline,
    config: PipelineConfig,
    entries: Vec<CatalogEntry>,
    excluded: usize,
}

impl CatalogIndex {
    /// 由目录快照构建索引
    ///
    /// 缺失、无法解码或退化的描述符只会让对应条目被排除并记录日志，不会使构建失败；
    /// 全部被排除时得到一个空索引。
    pub fn build(records: &[CatalogRecord], pipeline: Pipeline, config: PipelineConfig) -> Self {
        let start = Instant::now();
        let decoded = records
            .par_iter()
            .map(|record| {
                CatalogEntry::from_record(record, pipeline, &config).map_err(|e| (record, e))
            })
            .collect::<Vec<_>>();

        let mut entries = Vec::with_capacity(decoded.len());
        let mut excluded = 0;
        for item in decoded {
            match item {
                Ok(entry) => entries.push(entry),
                Err((record, e)) => {
                    warn!("排除目录条目 {} (商品 {}): {}", record.entry_id, record.product_id, e);
                    excluded += 1;
                }
            }
        }
        if excluded > 0 {
            metrics::inc_excluded_entries(pipeline, excluded);
        }

        debug!(
            "索引构建完成: {} 条可用, {} 条排除, 耗时 {:.2}ms",
            entries.len(),
            excluded,
            start.elapsed().as_secs_f64() * 1000.
        );

        Self { pipeline, config, entries, excluded }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 构建时被排除的条目数量
    pub fn excluded(&self) -> usize {
        self.excluded
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    /// 对所有条目计分，返回顺序与条目顺序一致
    fn score(&self, query: &QueryDescriptors) -> Vec<Scored> {
        let config = &self.config;
        let scored = |position, score| Scored { position, score, signals: None };

        match self.pipeline {
            Pipeline::Hash => {
                let q = query.hash.unwrap_or_default();
                self.par_map(DescriptorKind::PerceptualHash, |position, d| {
                    let h = d.as_hash().unwrap_or_default();
                    scored(position, distance::hash_similarity(q, h, config.hash_bits))
                })
            }
            Pipeline::Keypoint => {
                let q = query.keypoints.as_ref().map(keypoint_bytes).unwrap_or_default();
                let kind = DescriptorKind::KeypointSet;
                match config.keypoint_metric {
                    KeypointMetric::Hamming => self.par_map(kind, |position, d| {
                        let e = d.as_keypoints().map(keypoint_bytes).unwrap_or_default();
                        scored(position, distance::keypoint_similarity(&q, &e))
                    }),
                    KeypointMetric::Euclidean => normalize_distances(self.par_map(
                        kind,
                        |position, d| {
                            let e = d.as_keypoints().map(keypoint_bytes).unwrap_or_default();
                            scored(position, distance::euclidean_bytes(&q, &e))
                        },
                    )),
                }
            }
            Pipeline::Embedding => {
                let q = query.embedding.as_deref().unwrap_or_default();
                let kind = DescriptorKind::Embedding;
                match config.embedding_metric {
                    EmbeddingMetric::Cosine => self.par_map(kind, |position, d| {
                        let e = d.as_embedding().unwrap_or_default();
                        scored(position, distance::cosine_similarity(q, e))
                    }),
                    EmbeddingMetric::Euclidean => {
                        normalize_distances(self.par_map(kind, |position, d| {
                            let e = d.as_embedding().unwrap_or_default();
                            scored(position, distance::euclidean(q, e))
                        }))
                    }
                }
            }
            Pipeline::Combined => {
                let qe = query.embedding.as_deref().unwrap_or_default();
                let qh = query.hash.unwrap_or_default();
                self.entries
                    .par_iter()
                    .enumerate()
                    .map(|(position, entry)| {
                        let e = entry
                            .descriptor(DescriptorKind::Embedding)
                            .and_then(Descriptor::as_embedding)
                            .unwrap_or_default();
                        let h = entry
                            .descriptor(DescriptorKind::PerceptualHash)
                            .and_then(Descriptor::as_hash)
                            .unwrap_or_default();
                        let embedding_score = distance::cosine_similarity(qe, e);
                        let hash_score = distance::hash_similarity(qh, h, config.hash_bits);
                        Scored {
                            position,
                            score: config.weights.combine(embedding_score, hash_score),
                            signals: Some(SignalScores { embedding_score, hash_score }),
                        }
                    })
                    .collect()
            }
        }
    }

    fn par_map<F>(&self, kind: DescriptorKind, f: F) -> Vec<Scored>
    where
        F: Fn(usize, &Descriptor) -> Scored + Sync + Send,
    {
        self.entries
            .par_iter()
            .enumerate()
            .filter_map(|(position, entry)| entry.descriptor(kind).map(|d| f(position, d)))
            .collect()
    }

    /// 查询最相似的 `k` 个商品
    ///
    /// 结果按相似度降序排列，同一商品只保留分数最高的一张图片；`k` 超过匹配数量时返回全部。
    pub fn query(&self, query: &QueryDescriptors, k: usize) -> Result<RankedMatches, SearchError> {
        self.config.check_query(self.pipeline, query)?;
        if self.entries.is_empty() {
            return Ok(RankedMatches::default());
        }

        let start = Instant::now();
        let mut scored = self.score(query);
        for s in &mut scored {
            if !s.score.is_finite() {
                s.score = 0.;
            }
        }
        // 稳定排序，分数相同时保持目录顺序
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut seen = HashSet::new();
        let ranked = scored
            .into_iter()
            .filter(|s| seen.insert(self.entries[s.position].product_id.as_str()))
            .collect::<Vec<_>>();

        let total = ranked.len();
        let results = ranked
            .into_iter()
            .take(k.min(total))
            .map(|s| {
                let entry = &self.entries[s.position];
                SearchResult {
                    entry_id: entry.entry_id.clone(),
                    product_id: entry.product_id.clone(),
                    image_reference: entry.image_reference.clone(),
                    created_at: entry.created_at,
                    score: round_score(s.score),
                    signals: s.signals.map(|signals| SignalScores {
                        embedding_score: round_score(signals.embedding_score),
                        hash_score: round_score(signals.hash_score),
                    }),
                }
            })
            .collect();

        debug!(
            "扫描 {} 条目录条目，{} 个商品，耗时 {:.2}ms",
            self.entries.len(),
            total,
            start.elapsed().as_secs_f64() * 1000.
        );

        Ok(RankedMatches { total, results })
    }
}

/// 将距离换算为相似度，以本批次的最大距离归一化
fn normalize_distances(mut scored: Vec<Scored>) -> Vec<Scored> {
    let max = scored.iter().map(|s| s.score).fold(0f64, f64::max);
    for s in &mut scored {
        s.score = distance::euclidean_similarity(s.score, max);
    }
    scored
}

fn keypoint_bytes(keypoints: &Array2<u8>) -> Cow<'_, [u8]> {
    match keypoints.as_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None => Cow::Owned(codec::encode_keypoints(keypoints)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_embedding, encode_hash};

    fn hash_record(entry_id: &str, product_id: &str, hash: u64) -> CatalogRecord {
        CatalogRecord {
            entry_id: entry_id.into(),
            tenant_id: "t".into(),
            product_id: product_id.into(),
            image_reference: format!("{entry_id}.jpg"),
            phash: Some(encode_hash(hash)),
            keypoints: None,
            embedding: None,
            created_at: 0,
        }
    }

    fn hash_query(hash: u64) -> QueryDescriptors {
        [Descriptor::PerceptualHash(hash)].into_iter().collect()
    }

    #[test]
    fn empty_index() {
        let index = CatalogIndex::build(&[], Pipeline::Hash, PipelineConfig::default());
        assert!(index.is_empty());
        let result = index.query(&hash_query(0), 5).unwrap();
        assert_eq!(result, RankedMatches { total: 0, results: vec![] });
    }

    #[test]
    fn all_entries_excluded() {
        let mut record = hash_record("a", "p", 0);
        record.phash = Some("not-a-hash".into());
        let index = CatalogIndex::build(&[record], Pipeline::Hash, PipelineConfig::default());
        assert_eq!(index.excluded(), 1);
        assert_eq!(index.query(&hash_query(0), 5).unwrap().total, 0);
    }

    #[test]
    fn dedup_keeps_best() {
        let records =
            [hash_record("a", "p1", 0xff), hash_record("b", "p1", 0), hash_record("c", "p2", 0xf)];
        let index = CatalogIndex::build(&records, Pipeline::Hash, PipelineConfig::default());
        let result = index.query(&hash_query(0), 10).unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.results[0].entry_id, "b");
        assert_eq!(result.results[0].score, 100.);
        assert_eq!(result.results[1].entry_id, "c");
    }

    #[test]
    fn k_is_clamped() {
        let records =
            [hash_record("a", "p1", 1), hash_record("b", "p2", 3), hash_record("c", "p3", 7)];
        let index = CatalogIndex::build(&records, Pipeline::Hash, PipelineConfig::default());
        let result = index.query(&hash_query(0), 2).unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.results.len(), 2);
        let result = index.query(&hash_query(0), 50).unwrap();
        assert_eq!(result.results.len(), 3);
    }

    #[test]
    fn missing_query_descriptor_is_config_error() {
        let index = CatalogIndex::build(&[], Pipeline::Combined, PipelineConfig::default());
        let err = index.query(&hash_query(0), 5).unwrap_err();
        assert!(matches!(err, SearchError::Configuration(_)));
    }

    #[test]
    fn euclidean_batch_normalized() {
        let config = PipelineConfig { embedding_dim: 2, ..Default::default() };
        let record = |id: &str, v: [f32; 2]| CatalogRecord {
            phash: None,
            embedding: Some(encode_embedding(&v)),
            ..hash_record(id, id, 0)
        };
        let records =
            [record("far", [10., 0.]), record("near", [1., 0.]), record("same", [0., 1.])];
        let index = CatalogIndex::build(&records, Pipeline::Embedding, config);
        let query = [Descriptor::Embedding(vec![0., 1.])].into_iter().collect();
        let result = index.query(&query, 3).unwrap();
        let ids = result.results.iter().map(|r| r.entry_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["same", "near", "far"]);
        assert_eq!(result.results[0].score, 100.);
        assert_eq!(result.results[2].score, 0.);
    }

    #[test]
    fn huge_embeddings_rank_by_distance() {
        let config = PipelineConfig { embedding_dim: 2, ..Default::default() };
        let record = |id: &str, v: [f32; 2]| CatalogRecord {
            phash: None,
            embedding: Some(encode_embedding(&v)),
            ..hash_record(id, id, 0)
        };
        let records = [record("far", [-3e38, -3e38]), record("same", [3e38, 3e38])];
        let index = CatalogIndex::build(&records, Pipeline::Embedding, config);
        let query = [Descriptor::Embedding(vec![3e38, 3e38])].into_iter().collect();
        let result = index.query(&query, 2).unwrap();
        assert_eq!(result.results[0].entry_id, "same");
        assert_eq!(result.results[0].score, 100.);
        assert_eq!(result.results[1].score, 0.);
        assert!(result.results.iter().all(|r| r.score.is_finite()));
    }
}
