use std::path::PathBuf;

use thiserror::Error;

use crate::descriptor::DescriptorKind;

/// 特征提取失败的原因
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// 图片字节无法解码，属于输入问题
    #[error("无法解码图片: {0}")]
    UndecodableImage(String),
    /// 图片来源无法读取
    #[error("无法读取图片 {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 远程图片下载失败，重试后仍然失败
    #[error("无法下载图片 {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// 特征提取模型不可用，通常是暂时性故障
    #[error("特征提取模型不可用: {0}")]
    BackendUnavailable(String),
    /// 检测到的特征不足以进行比较
    #[error("{kind} 特征不足: 检测到 {found}，至少需要 {required}")]
    InsufficientDescriptor { kind: DescriptorKind, found: usize, required: usize },
    /// 提取器输出与部署配置不一致，例如模型输出维数与配置的维数不同
    #[error("特征提取配置错误: {0}")]
    Misconfigured(String),
    #[error("OpenCV 错误: {0}")]
    OpenCv(#[from] opencv::Error),
}

impl ExtractionError {
    /// 是否为后端暂时性故障，而不是输入图片本身的问题
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::Fetch { .. })
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, Self::InsufficientDescriptor { .. })
    }
}

/// 目录中存储的描述符无法解码
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("缺少 {0} 描述符")]
    Missing(DescriptorKind),
    #[error("{kind} 长度错误: 期望 {expected} 字节，实际 {actual} 字节")]
    Length { kind: DescriptorKind, expected: usize, actual: usize },
    #[error("无效的感知哈希: {0:?}")]
    InvalidHash(String),
    #[error("向量包含非有限值")]
    NonFinite,
    #[error("退化的描述符: {0}")]
    Degenerate(DescriptorKind),
}

/// 一次搜索的致命错误
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("查询图片特征提取失败: {0}")]
    Extraction(#[source] ExtractionError),
    #[error("查询图片特征不足: {0}")]
    InsufficientDescriptor(#[source] ExtractionError),
    #[error("配置错误: {0}")]
    Configuration(String),
}

impl From<ExtractionError> for SearchError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::Misconfigured(_) => Self::Configuration(err.to_string()),
            _ if err.is_insufficient() => Self::InsufficientDescriptor(err),
            _ => Self::Extraction(err),
        }
    }
}

impl SearchError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
