//! 搜索入口：提取查询图片描述符，构建临时索引并返回排序结果

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogRecord;
use crate::error::SearchError;
use crate::extract::ExtractorSet;
use crate::index::{CatalogIndex, SearchResult};
use crate::metrics;
use crate::pipeline::{Pipeline, PipelineConfig};

/// 租户目录为空时返回的提示
pub const EMPTY_CATALOG_MESSAGE: &str = "no catalog to compare";

/// 一次搜索的返回值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// 按商品去重后的匹配数量，截断之前
    pub total: usize,
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SearchResponse {
    pub fn empty_catalog() -> Self {
        Self { total: 0, results: vec![], message: Some(EMPTY_CATALOG_MESSAGE.to_string()) }
    }
}

/// 搜索编排器
///
/// 不持有任何可变状态，可以在多个线程中同时调用。
#[derive(Clone)]
pub struct Searcher {
    extractors: Arc<ExtractorSet>,
    config: PipelineConfig,
}

impl Searcher {
    pub fn new(extractors: Arc<ExtractorSet>, config: PipelineConfig) -> Self {
        Self { extractors, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 在租户的目录快照中搜索与查询图片最相似的 `top_k` 个商品
    ///
    /// 快照需由调用方预先按租户过滤。
    pub fn search(
        &self,
        image: &[u8],
        snapshot: &[CatalogRecord],
        top_k: usize,
        pipeline: Pipeline,
    ) -> Result<SearchResponse, SearchError> {
        let start = Instant::now();
        let result = self.search_inner(image, snapshot, top_k, pipeline);
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(response) => {
                metrics::inc_search_count(pipeline);
                metrics::observe_search_duration(pipeline, elapsed);
                if let Some(best) = response.results.first() {
                    metrics::observe_max_score(pipeline, best.score);
                }
                info!(
                    "{pipeline} 搜索完成: {} 条快照, {} 个匹配, 耗时 {:.2}ms",
                    snapshot.len(),
                    response.total,
                    elapsed * 1000.
                );
            }
            Err(e) => {
                metrics::inc_search_error(pipeline, error_kind(e));
                warn!("{pipeline} 搜索失败: {e}");
            }
        }
        result
    }

    fn search_inner(
        &self,
        image: &[u8],
        snapshot: &[CatalogRecord],
        top_k: usize,
        pipeline: Pipeline,
    ) -> Result<SearchResponse, SearchError> {
        self.config.validate(pipeline)?;
        self.extractors.check(pipeline, &self.config)?;
        if top_k == 0 {
            return Err(SearchError::config("top_k 必须大于 0"));
        }

        if snapshot.is_empty() {
            debug!("目录为空，跳过特征提取");
            return Ok(SearchResponse::empty_catalog());
        }

        let start = Instant::now();
        let query = self.extractors.extract_query(image, pipeline)?;
        debug!("查询图片特征提取耗时 {:.2}ms", start.elapsed().as_secs_f64() * 1000.);
        self.config.check_query(pipeline, &query)?;

        let index = CatalogIndex::build(snapshot, pipeline, self.config);
        let ranked = index.query(&query, top_k)?;

        Ok(SearchResponse { total: ranked.total, results: ranked.results, message: None })
    }
}

/// 错误分类，用于指标标签
pub fn error_kind(err: &SearchError) -> &'static str {
    match err {
        SearchError::Extraction(e) if e.is_transient() => "backend",
        SearchError::Extraction(_) => "input",
        SearchError::InsufficientDescriptor(_) => "insufficient",
        SearchError::Configuration(_) => "configuration",
    }
}
