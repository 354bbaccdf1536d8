use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::codec::MIN_KEYPOINTS;
use crate::descriptor::{KeypointShape, PHASH_BITS};
use crate::distance::CombinedWeights;
use crate::extract::{
    BackbonePool, EmbeddingExtractor, ExtractorSet, KeypointExtractor, PerceptualHashExtractor,
};
use crate::error::ExtractionError;
use crate::fetch::Fetcher;
use crate::pipeline::{EmbeddingMetric, KeypointMetric, Pipeline, PipelineConfig};

/// ORB 描述符的字节数
const ORB_DESCRIPTOR_BYTES: usize = 32;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "catalog", "imsearch")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".imsearch"));
    ConfDir { path }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".imsearch")
}

/// 特征提取相关参数，目录与查询必须使用相同的配置
#[derive(Parser, Debug, Clone)]
pub struct ExtractOptions {
    /// 每张图片保留的关键点数量，不足时以 0 填充
    #[arg(long, value_name = "N", default_value_t = 32)]
    pub keypoints: usize,
    /// 最少关键点数量，低于该值的图片无法参与关键点比较
    #[arg(long, value_name = "N", default_value_t = MIN_KEYPOINTS)]
    pub min_keypoints: usize,
    /// ORB 特征金字塔缩放因子
    #[arg(long, value_name = "SCALE", default_value_t = 1.2)]
    pub orb_scale_factor: f32,
    /// ORB 特征金字塔层数
    #[arg(long, value_name = "N", default_value_t = 8)]
    pub orb_nlevels: i32,
    /// ORB FAST 角点检测器阈值
    #[arg(long, value_name = "THRESHOLD", default_value_t = 20)]
    pub orb_fast_threshold: i32,
    /// ONNX 特征提取模型路径，不指定时不提取稠密向量
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,
    /// 模型输出的向量维数
    #[arg(long, value_name = "DIM", default_value_t = 1280)]
    pub embedding_dim: usize,
    /// 推理线程数量
    #[arg(long, value_name = "N", default_value_t = num_cpus::get())]
    pub workers: usize,
}

impl ExtractOptions {
    pub fn keypoint_shape(&self) -> KeypointShape {
        KeypointShape::new(self.keypoints, ORB_DESCRIPTOR_BYTES)
    }

    /// 创建全部提取器，模型只在这里加载一次
    pub fn build_extractors(&self) -> anyhow::Result<ExtractorSet> {
        let keypoints = KeypointExtractor::new(self.keypoint_shape(), self.min_keypoints)
            .with_params(self.orb_scale_factor, self.orb_nlevels, self.orb_fast_threshold);
        let mut extractors = ExtractorSet::new()
            .with(Arc::new(PerceptualHashExtractor::new()))
            .with(Arc::new(keypoints));

        if let Some(model) = &self.model {
            let pool = BackbonePool::onnx(model, self.embedding_dim, self.workers)
                .with_context(|| format!("无法加载模型: {}", model.display()))?;
            extractors = extractors.with(Arc::new(EmbeddingExtractor::new(Arc::new(pool))));
        }
        Ok(extractors)
    }
}

/// 远程图片下载参数
#[derive(Parser, Debug, Clone)]
pub struct FetchOptions {
    /// 每张远程图片最多尝试下载的次数
    #[arg(long, value_name = "N", default_value_t = Fetcher::DEFAULT_ATTEMPTS)]
    pub fetch_attempts: usize,
    /// 单次下载的超时时间，单位秒
    #[arg(long, value_name = "SECS", default_value_t = Fetcher::DEFAULT_TIMEOUT.as_secs())]
    pub fetch_timeout: u64,
}

impl FetchOptions {
    pub fn fetcher(&self) -> Result<Fetcher, ExtractionError> {
        Fetcher::new(Duration::from_secs(self.fetch_timeout), self.fetch_attempts)
    }
}

/// 搜索相关参数
#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 搜索管线
    #[arg(short, long, value_enum, default_value_t = Pipeline::Hash)]
    pub pipeline: Pipeline,
    /// 返回的商品数量
    #[arg(short = 'k', long, value_name = "K", default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub top_k: u32,
    /// 感知哈希位宽
    #[arg(long, value_name = "BITS", default_value_t = PHASH_BITS)]
    pub hash_bits: u32,
    /// 稠密向量的比较方式
    #[arg(long, value_enum, default_value_t = EmbeddingMetric::Euclidean)]
    pub embedding_metric: EmbeddingMetric,
    /// 关键点描述符的比较方式
    #[arg(long, value_enum, default_value_t = KeypointMetric::Hamming)]
    pub keypoint_metric: KeypointMetric,
    /// 组合管线中稠密向量的权重
    #[arg(long, value_name = "WEIGHT", default_value_t = 0.7)]
    pub embedding_weight: f64,
    /// 组合管线中感知哈希的权重
    #[arg(long, value_name = "WEIGHT", default_value_t = 0.3)]
    pub hash_weight: f64,
}

impl SearchOptions {
    pub fn pipeline_config(&self, extract: &ExtractOptions) -> PipelineConfig {
        PipelineConfig {
            hash_bits: self.hash_bits,
            keypoint_shape: extract.keypoint_shape(),
            embedding_dim: extract.embedding_dim,
            embedding_metric: self.embedding_metric,
            keypoint_metric: self.keypoint_metric,
            weights: CombinedWeights { embedding: self.embedding_weight, hash: self.hash_weight },
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "catalog-imsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 配置文件目录，数据库保存在此目录下
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 提取目录中图片的描述符并添加到商品目录
    Extract(ExtractCommand),
    /// 在租户的商品目录中搜索图片
    Search(SearchCommand),
    /// 显示租户的商品目录统计
    Stats(StatsCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("catalog.db")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
