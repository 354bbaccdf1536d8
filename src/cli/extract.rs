use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressIterator};
use log::{info, warn};
use rayon::prelude::*;
use regex::Regex;
use tokio::task::{JoinSet, block_in_place};
use walkdir::WalkDir;

use crate::catalog::CatalogRecord;
use crate::cli::SubCommandExtend;
use crate::codec;
use crate::config::{ExtractOptions, FetchOptions, Opts};
use crate::db::{crud, init_db};
use crate::descriptor::{Descriptor, DescriptorKind};
use crate::error::ExtractionError;
use crate::extract::ExtractorSet;
use crate::fetch::{Fetcher, is_remote};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct ExtractCommand {
    #[command(flatten)]
    pub extract: ExtractOptions,
    #[command(flatten)]
    pub fetch: FetchOptions,
    /// 图片所在目录，图片所在的子目录名会作为商品 ID，目录下直接存放的图片以文件名作为商品 ID
    #[arg(required_unless_present = "urls")]
    pub path: Option<PathBuf>,
    /// 远程图片列表，每行一条 `商品ID,URL`，空行和 `#` 开头的行会被忽略
    #[arg(long, value_name = "FILE")]
    pub urls: Option<PathBuf>,
    /// 租户 ID
    #[arg(short, long)]
    pub tenant: String,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp")]
    pub suffix: String,
    /// 如果图片已添加，是否重新提取并覆盖旧的描述符
    #[arg(long)]
    pub overwrite: bool,
    /// 每批处理的图片数量
    #[arg(long, value_name = "N", default_value_t = num_cpus::get() * 10)]
    pub batch_size: usize,
}

/// 待添加图片的来源
#[derive(Debug, Clone, PartialEq)]
enum Source {
    File { root: PathBuf, path: PathBuf },
    Remote { product_id: String, url: String },
}

impl Source {
    /// 写入目录的图片引用
    fn reference(&self) -> String {
        match self {
            Self::File { path, .. } => path.to_string_lossy().into_owned(),
            Self::Remote { url, .. } => url.clone(),
        }
    }
}

/// 已读入内存、尚未提取特征的图片
struct LoadedImage {
    reference: String,
    entry_id: String,
    product_id: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct Summary {
    added: usize,
    skipped: usize,
    failed: usize,
}

impl SubCommandExtend for ExtractCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let re_suf = Regex::new(&format!("(?i)^({})$", self.suffix.replace(',', "|")))?;
        let db = init_db(opts.conf_dir.database()).await?;
        let extractors = block_in_place(|| self.extract.build_extractors())?;
        info!("启用的提取器: {:?}", extractors.kinds());

        let fetcher = self.fetch.fetcher()?;

        let mut sources = vec![];
        if let Some(root) = &self.path {
            let files = scan_directory(root, &re_suf);
            info!("扫描完成，共 {} 张图片", files.len());
            sources.extend(
                files.into_iter().map(|path| Source::File { root: root.clone(), path }),
            );
        }
        if let Some(urls) = &self.urls {
            let text = tokio::fs::read_to_string(urls)
                .await
                .with_context(|| format!("无法读取图片列表: {}", urls.display()))?;
            let remote = parse_url_list(&text)?;
            info!("图片列表共 {} 张远程图片", remote.len());
            sources.extend(
                remote.into_iter().map(|(product_id, url)| Source::Remote { product_id, url }),
            );
        }

        let pb = ProgressBar::new(sources.len() as u64).with_style(pb_style());
        let mut summary = Summary::default();

        for chunk in sources.chunks(self.batch_size.max(1)) {
            let loaded = load_batch(chunk, &self.tenant, &fetcher).await;

            let mut pending = Vec::with_capacity(loaded.len());
            for image in loaded {
                match image {
                    Ok(image) => {
                        if !self.overwrite && crud::entry_exists(&db, &image.entry_id).await? {
                            pb.set_message(format!("跳过已添加图片: {}", image.reference));
                            summary.skipped += 1;
                            pb.inc(1);
                        } else {
                            pending.push(image);
                        }
                    }
                    Err(e) => {
                        pb.println(format!("[ERR] {e}"));
                        summary.failed += 1;
                        pb.inc(1);
                    }
                }
            }

            let described = block_in_place(|| {
                pending
                    .into_par_iter()
                    .map(|image| describe(image, &self.tenant, &extractors))
                    .collect::<Vec<_>>()
            });

            for (reference, record, failures) in described {
                for (kind, e) in &failures {
                    pb.println(format!("[WARN] {reference}: {kind} 提取失败: {e}"));
                }
                match record {
                    Some(record) => {
                        crud::upsert_image(&db, &record).await?;
                        pb.set_message(reference);
                        summary.added += 1;
                    }
                    None => {
                        pb.println(format!("[ERR] {reference}: 所有描述符提取失败"));
                        summary.failed += 1;
                    }
                }
                pb.inc(1);
            }
        }

        pb.finish_with_message("图片添加完成");
        info!(
            "添加 {} 张, 跳过 {} 张, 失败 {} 张",
            summary.added, summary.skipped, summary.failed
        );

        Ok(())
    }
}

fn scan_directory(path: &Path, re_suf: &Regex) -> Vec<PathBuf> {
    info!("开始扫描目录: {}", path.display());
    let pb = ProgressBar::no_length().with_style(pb_style());
    let mut files = WalkDir::new(path)
        .into_iter()
        .progress_with(pb)
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.is_file()
                && path.extension().is_some_and(|ext| re_suf.is_match(&ext.to_string_lossy()))
        })
        .collect::<Vec<_>>();
    files.sort();
    files
}

/// 图片在租户内的 ID，同一租户内相同的图片只会添加一次
pub fn entry_id(tenant_id: &str, bytes: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(bytes);
    hasher.finalize().to_hex().to_string()
}

/// 以图片相对扫描目录的上一级目录名作为商品 ID，直接位于扫描目录下的图片使用文件名
fn product_id(root: &Path, path: &Path) -> String {
    let relative = match path.strip_prefix(root) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative,
        // 扫描目标本身就是文件
        _ => path.file_name().map(Path::new).unwrap_or(path),
    };
    relative
        .parent()
        .and_then(Path::file_name)
        .or_else(|| relative.file_stem())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// 解析 `商品ID,URL` 格式的远程图片列表
fn parse_url_list(text: &str) -> Result<Vec<(String, String)>> {
    let mut entries = vec![];
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((product_id, url)) = line.split_once(',') else {
            bail!("图片列表第 {} 行格式错误: {line}", lineno + 1);
        };
        let (product_id, url) = (product_id.trim(), url.trim());
        if product_id.is_empty() || !is_remote(url) {
            bail!("图片列表第 {} 行格式错误: {line}", lineno + 1);
        }
        entries.push((product_id.to_string(), url.to_string()));
    }
    Ok(entries)
}

/// 读取一批图片，本地文件并行读取，远程图片并发下载，结果保持输入顺序
async fn load_batch(
    sources: &[Source],
    tenant_id: &str,
    fetcher: &Fetcher,
) -> Vec<Result<LoadedImage, ExtractionError>> {
    let mut loaded = block_in_place(|| {
        sources
            .par_iter()
            .map(|source| match source {
                Source::File { root, path } => Some(load_file(root, path, tenant_id)),
                Source::Remote { .. } => None,
            })
            .collect::<Vec<_>>()
    });

    let mut downloads = JoinSet::new();
    for (i, source) in sources.iter().enumerate() {
        if let Source::Remote { url, .. } = source {
            let (fetcher, url) = (fetcher.clone(), url.clone());
            downloads.spawn(async move { (i, fetcher.fetch(&url).await) });
        }
    }
    while let Some(joined) = downloads.join_next().await {
        let (i, bytes) = match joined {
            Ok(result) => result,
            Err(e) => {
                warn!("下载任务异常退出: {e}");
                continue;
            }
        };
        if let Source::Remote { product_id, url } = &sources[i] {
            loaded[i] = Some(bytes.map(|bytes| LoadedImage {
                reference: url.clone(),
                entry_id: entry_id(tenant_id, &bytes),
                product_id: product_id.clone(),
                bytes,
            }));
        }
    }

    loaded
        .into_iter()
        .zip(sources)
        .map(|(image, source)| {
            image.unwrap_or_else(|| {
                Err(ExtractionError::BackendUnavailable(format!(
                    "下载任务中断: {}",
                    source.reference()
                )))
            })
        })
        .collect()
}

fn load_file(root: &Path, path: &Path, tenant_id: &str) -> Result<LoadedImage, ExtractionError> {
    let bytes = std::fs::read(path)
        .map_err(|source| ExtractionError::Source { path: path.to_path_buf(), source })?;
    Ok(LoadedImage {
        reference: path.to_string_lossy().into_owned(),
        entry_id: entry_id(tenant_id, &bytes),
        product_id: product_id(root, path),
        bytes,
    })
}

/// 运行全部提取器，只要有一个描述符成功就生成记录
fn describe(
    image: LoadedImage,
    tenant_id: &str,
    extractors: &ExtractorSet,
) -> (String, Option<CatalogRecord>, Vec<(DescriptorKind, ExtractionError)>) {
    let created_at =
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    let mut record = CatalogRecord {
        entry_id: image.entry_id,
        tenant_id: tenant_id.to_string(),
        product_id: image.product_id,
        image_reference: image.reference.clone(),
        phash: None,
        keypoints: None,
        embedding: None,
        created_at,
    };

    let mut failures = vec![];
    for (kind, result) in extractors.extract_all(&image.bytes) {
        match result {
            Ok(Descriptor::PerceptualHash(hash)) => record.phash = Some(codec::encode_hash(hash)),
            Ok(Descriptor::KeypointSet(keypoints)) => {
                record.keypoints = Some(codec::encode_keypoints(&keypoints))
            }
            Ok(Descriptor::Embedding(values)) => {
                record.embedding = Some(codec::encode_embedding(&values))
            }
            Err(e) => failures.push((kind, e)),
        }
    }

    let any = record.phash.is_some() || record.keypoints.is_some() || record.embedding.is_some();
    (image.reference, any.then_some(record), failures)
}
