use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use log::info;
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractOptions, SearchOptions};
use crate::db::init_db;
use crate::search::Searcher;
use crate::{Opts, metrics, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub extract: ExtractOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 请求验证 token，不填则随机生成
    #[arg(long, default_value_t = String::new())]
    pub token: String,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;

        let config = self.search.pipeline_config(&self.extract);
        config.validate(self.search.pipeline)?;
        let extractors = block_in_place(|| self.extract.build_extractors())?;
        info!("启用的提取器: {:?}", extractors.kinds());
        extractors.check(self.search.pipeline, &config)?;
        let searcher = Searcher::new(Arc::new(extractors), config);

        let mut self_clone = self.clone();
        if self_clone.token.is_empty() {
            self_clone.token = Alphanumeric.sample_string(&mut rand::rng(), 32);
            info!("鉴权 token: {}", self_clone.token);
        }

        let auth = match &self.prometheus_auth {
            Some(s) => {
                let (username, password) =
                    s.split_once(':').ok_or_else(|| anyhow!("prometheus 认证信息格式错误"))?;
                Some((username.to_string(), password.to_string()))
            }
            None => None,
        };
        if let Some(url) = &self.prometheus_push {
            let instance = self.prometheus_instance.clone().unwrap_or_else(|| self.addr.clone());
            info!("推送指标到 {url}, instance = {instance}");
            metrics::spawn_push_loop(url.clone(), instance, auth);
        }

        let state = server::AppState::new(db, searcher, self_clone);
        let app = server::create_app(state);

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
