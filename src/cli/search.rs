use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::debug;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractOptions, FetchOptions, Opts, SearchOptions};
use crate::db::{crud, init_db};
use crate::error::ExtractionError;
use crate::fetch::is_remote;
use crate::search::{SearchResponse, Searcher};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub extract: ExtractOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    #[command(flatten)]
    pub fetch: FetchOptions,
    /// 被搜索的图片路径或 http(s) 地址
    pub image: String,
    /// 租户 ID
    #[arg(short, long)]
    pub tenant: String,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;
        let snapshot = crud::load_snapshot(&db, &self.tenant).await?;
        debug!("租户 {} 共 {} 张图片", self.tenant, snapshot.len());

        let image = if is_remote(&self.image) {
            self.fetch.fetcher()?.fetch(&self.image).await?
        } else {
            let path = PathBuf::from(&self.image);
            tokio::fs::read(&path).await.map_err(|source| ExtractionError::Source { path, source })?
        };

        let config = self.search.pipeline_config(&self.extract);
        let response = block_in_place(|| -> Result<_> {
            let extractors = self.extract.build_extractors()?;
            let searcher = Searcher::new(Arc::new(extractors), config);
            let response = searcher.search(
                &image,
                &snapshot,
                self.search.top_k as usize,
                self.search.pipeline,
            )?;
            Ok(response)
        })?;

        print_result(&response, self.output_format)
    }
}

fn print_result(response: &SearchResponse, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(response)?)
        }
        OutputFormat::Table => {
            if let Some(message) = &response.message {
                println!("{message}");
            }
            for result in &response.results {
                println!("{:.2}\t{}\t{}", result.score, result.product_id, result.image_reference);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}
