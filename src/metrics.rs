use std::sync::LazyLock;
use std::time::Duration;

use log::error;
use prometheus::*;
use tokio::task::spawn_blocking;

use crate::pipeline::Pipeline;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("im_search_count", "count of the searches", &["pipeline"]).unwrap()
});

static METRIC_SEARCH_ERROR: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "im_search_error",
        "count of the failed searches",
        &["pipeline", "kind"]
    )
    .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "im_search_duration",
        "duration of the per-image search in seconds",
        &["pipeline"]
    )
    .unwrap()
});

static METRIC_SEARCH_MAX_SCORE: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "im_search_max_score",
        "max score of the per-image search",
        &["pipeline"],
        (5..=100).step_by(5).map(|x| x as f64).collect()
    )
    .unwrap()
});

static METRIC_EXCLUDED_ENTRIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "im_search_excluded_entries",
        "count of the catalog entries excluded while building the index",
        &["pipeline"]
    )
    .unwrap()
});

pub fn inc_search_count(pipeline: Pipeline) {
    METRIC_SEARCH_COUNT.with_label_values(&[pipeline.as_str()]).inc();
}

/// 记录失败的搜索，`kind` 为错误分类
pub fn inc_search_error(pipeline: Pipeline, kind: &str) {
    METRIC_SEARCH_ERROR.with_label_values(&[pipeline.as_str(), kind]).inc();
}

pub fn observe_search_duration(pipeline: Pipeline, duration: f64) {
    METRIC_SEARCH_DURATION.with_label_values(&[pipeline.as_str()]).observe(duration);
}

pub fn observe_max_score(pipeline: Pipeline, score: f64) {
    METRIC_SEARCH_MAX_SCORE.with_label_values(&[pipeline.as_str()]).observe(score);
}

pub fn inc_excluded_entries(pipeline: Pipeline, count: usize) {
    METRIC_EXCLUDED_ENTRIES.with_label_values(&[pipeline.as_str()]).inc_by(count as u64);
}

/// 定期将全部指标推送到 pushgateway，`auth` 为 (username, password)
pub fn spawn_push_loop(url: String, instance: String, auth: Option<(String, String)>) {
    tokio::spawn(async move {
        loop {
            let metric_families = gather();
            let (url, instance, auth) = (url.clone(), instance.clone(), auth.clone());
            let r = spawn_blocking(move || {
                push_metrics(
                    "catalog_imsearch",
                    labels! { "instance".to_string() => instance },
                    &url,
                    metric_families,
                    auth.map(|(username, password)| BasicAuthentication { username, password }),
                )
            })
            .await;
            match r {
                Ok(Err(e)) => error!("推送指标失败: {e}"),
                Err(e) => error!("推送指标任务异常: {e}"),
                Ok(Ok(())) => {}
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    });
}
