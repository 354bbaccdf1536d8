use anyhow::Result;
use clap::Parser;

use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::Opts;
use crate::db::{crud, init_db};

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {
    /// 租户 ID
    #[arg(short, long)]
    pub tenant: String,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;
        let stats = crud::tenant_stats(&db, &self.tenant).await?;

        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
            OutputFormat::Table => {
                println!("图片数量      : {}", stats.images);
                println!("商品数量      : {}", stats.products);
                println!("感知哈希      : {}", stats.with_phash);
                println!("关键点描述符  : {}", stats.with_keypoints);
                println!("稠密向量      : {}", stats.with_embedding);
            }
        }
        Ok(())
    }
}
