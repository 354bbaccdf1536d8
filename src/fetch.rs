use std::time::Duration;

use log::warn;

use crate::error::ExtractionError;

/// 下载远程商品图片，失败时按固定间隔重试
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    attempts: usize,
    backoff: Duration,
}

impl Fetcher {
    pub const DEFAULT_ATTEMPTS: usize = 3;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// `timeout` 是单次请求的超时时间，`attempts` 至少为 1
    pub fn new(timeout: Duration, attempts: usize) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|source| {
            ExtractionError::Fetch { url: String::new(), source }
        })?;
        Ok(Self { client, attempts: attempts.max(1), backoff: Duration::from_secs(1) })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, ExtractionError> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(source) if attempt >= self.attempts => {
                    return Err(ExtractionError::Fetch { url: url.to_string(), source });
                }
                Err(e) => {
                    warn!("第 {attempt} 次下载 {url} 失败: {e}");
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// 是否为 http(s) 地址
pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
