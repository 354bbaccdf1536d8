use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use catalog_imsearch::codec;
use catalog_imsearch::distance::CombinedWeights;
use catalog_imsearch::pipeline::EmbeddingMetric;
use catalog_imsearch::*;
use ndarray::Array2;
use rayon::prelude::*;
use rstest::*;

const EPS: f64 = 1e-4;

/// 无论输入什么都返回固定描述符，并记录调用次数
struct FakeExtractor {
    descriptor: Descriptor,
    calls: Arc<AtomicUsize>,
}

impl Extractor for FakeExtractor {
    fn kind(&self) -> DescriptorKind {
        self.descriptor.kind()
    }

    fn extract(&self, _: &[u8]) -> Result<Descriptor, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.descriptor.clone())
    }
}

struct Rejecting;

impl Extractor for Rejecting {
    fn kind(&self) -> DescriptorKind {
        DescriptorKind::KeypointSet
    }

    fn extract(&self, _: &[u8]) -> Result<Descriptor, ExtractionError> {
        Err(ExtractionError::InsufficientDescriptor {
            kind: DescriptorKind::KeypointSet,
            found: 3,
            required: codec::MIN_KEYPOINTS,
        })
    }
}

fn shape() -> KeypointShape {
    KeypointShape::new(4, 8)
}

#[fixture]
fn config() -> PipelineConfig {
    PipelineConfig { keypoint_shape: shape(), embedding_dim: 2, ..Default::default() }
}

#[fixture]
fn calls() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn searcher(
    config: PipelineConfig,
    calls: &Arc<AtomicUsize>,
    query: Vec<Descriptor>,
) -> Searcher {
    let extractors = query.into_iter().fold(ExtractorSet::new(), |set, descriptor| {
        set.with(Arc::new(FakeExtractor { descriptor, calls: calls.clone() }))
    });
    Searcher::new(Arc::new(extractors), config)
}

fn record(entry_id: &str, product_id: &str) -> CatalogRecord {
    CatalogRecord {
        entry_id: entry_id.to_string(),
        tenant_id: "acme".to_string(),
        product_id: product_id.to_string(),
        image_reference: format!("s3://acme/{entry_id}.jpg"),
        phash: None,
        keypoints: None,
        embedding: None,
        created_at: 1_700_000_000,
    }
}

fn with_hash(entry_id: &str, product_id: &str, hash: u64) -> CatalogRecord {
    CatalogRecord { phash: Some(codec::encode_hash(hash)), ..record(entry_id, product_id) }
}

fn with_embedding(entry_id: &str, product_id: &str, values: &[f32]) -> CatalogRecord {
    CatalogRecord {
        embedding: Some(codec::encode_embedding(values)),
        ..record(entry_id, product_id)
    }
}

fn scores(response: &SearchResponse) -> Vec<f64> {
    response.results.iter().map(|r| r.score).collect()
}

#[rstest]
fn hash_scores_follow_hamming_distance(config: PipelineConfig, calls: Arc<AtomicUsize>) {
    let searcher = searcher(config, &calls, vec![Descriptor::PerceptualHash(0)]);
    let snapshot = [
        with_hash("far", "p3", 0xffff_ffff),
        with_hash("exact", "p1", 0),
        with_hash("near", "p2", 0xff),
    ];

    let response = searcher.search(b"query", &snapshot, 5, Pipeline::Hash).unwrap();

    assert_eq!(response.total, 3);
    assert_eq!(scores(&response), [100.0, 87.5, 50.0]);
    let ids = response.results.iter().map(|r| r.entry_id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, ["exact", "near", "far"]);
    assert!(response.message.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[rstest]
#[case::hash(Pipeline::Hash)]
#[case::combined(Pipeline::Combined)]
fn empty_catalog_skips_extraction(
    config: PipelineConfig,
    calls: Arc<AtomicUsize>,
    #[case] pipeline: Pipeline,
) {
    let searcher = searcher(
        config,
        &calls,
        vec![Descriptor::PerceptualHash(0), Descriptor::Embedding(vec![1.0, 0.0])],
    );

    let response = searcher.search(b"query", &[], 5, pipeline).unwrap();

    assert_eq!(response, SearchResponse::empty_catalog());
    assert_eq!(response.message.as_deref(), Some("no catalog to compare"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[rstest]
fn top_k_larger_than_matches(config: PipelineConfig, calls: Arc<AtomicUsize>) {
    let searcher = searcher(config, &calls, vec![Descriptor::PerceptualHash(0)]);
    let snapshot =
        [with_hash("a", "p1", 0x1), with_hash("b", "p1", 0x3), with_hash("c", "p2", 0x7)];

    let response = searcher.search(b"query", &snapshot, 5, Pipeline::Hash).unwrap();

    assert_eq!(response.total, 2);
    assert_eq!(response.results.len(), 2);
    // 同一商品只保留分数最高的图片
    assert_eq!(response.results[0].entry_id, "a");
    assert_eq!(response.results[1].product_id, "p2");
}

#[rstest]
fn combined_weights_both_signals(config: PipelineConfig, calls: Arc<AtomicUsize>) {
    let searcher = searcher(
        config,
        &calls,
        vec![Descriptor::PerceptualHash(0), Descriptor::Embedding(vec![1.0, 0.0])],
    );
    // 余弦相似度 0.6 => 80 分，32 位不同 => 50 分
    let snapshot = [CatalogRecord {
        phash: Some(codec::encode_hash(0xffff_ffff)),
        ..with_embedding("a", "p1", &[0.6, 0.8])
    }];

    let response = searcher.search(b"query", &snapshot, 5, Pipeline::Combined).unwrap();

    let result = &response.results[0];
    let signals = result.signals.unwrap();
    assert!((signals.embedding_score - 80.).abs() < EPS);
    assert!((signals.hash_score - 50.).abs() < EPS);
    assert!((result.score - 71.).abs() < EPS);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[rstest]
fn combined_requires_both_descriptors(config: PipelineConfig, calls: Arc<AtomicUsize>) {
    let searcher = searcher(
        config,
        &calls,
        vec![Descriptor::PerceptualHash(0), Descriptor::Embedding(vec![1.0, 0.0])],
    );
    // 缺少向量的条目被排除
    let snapshot = [
        with_hash("hash-only", "p1", 0),
        CatalogRecord {
            phash: Some(codec::encode_hash(0)),
            ..with_embedding("both", "p2", &[1., 0.])
        },
    ];

    let response = searcher.search(b"query", &snapshot, 5, Pipeline::Combined).unwrap();

    assert_eq!(response.total, 1);
    assert_eq!(response.results[0].entry_id, "both");
    assert!((response.results[0].score - 100.).abs() < EPS);
}

#[rstest]
fn keypoint_entries_are_validated(config: PipelineConfig, calls: Arc<AtomicUsize>) {
    let mut query = Array2::<u8>::zeros((4, 8));
    query.row_mut(0).fill(0xff);
    let searcher = searcher(config, &calls, vec![Descriptor::KeypointSet(query.clone())]);

    let mut half = query.clone();
    half.row_mut(0).fill(0x0f);
    let snapshot = [
        CatalogRecord { keypoints: Some(codec::encode_keypoints(&query)), ..record("same", "p1") },
        CatalogRecord { keypoints: Some(codec::encode_keypoints(&half)), ..record("half", "p2") },
        // 长度错误
        CatalogRecord { keypoints: Some(vec![0xff; 31]), ..record("short", "p3") },
        // 没有任何真实关键点
        CatalogRecord { keypoints: Some(vec![0; 32]), ..record("blank", "p4") },
    ];

    let response = searcher.search(b"query", &snapshot, 5, Pipeline::Keypoint).unwrap();

    assert_eq!(response.total, 2);
    assert_eq!(response.results[0].entry_id, "same");
    assert_eq!(response.results[0].score, 100.);
    // 第一行的 8 个字节各有 4 位不同，共 256 位
    assert_eq!(response.results[1].score, 87.5);
}

#[rstest]
fn euclidean_is_normalized_per_batch(config: PipelineConfig, calls: Arc<AtomicUsize>) {
    let searcher = searcher(config, &calls, vec![Descriptor::Embedding(vec![0.0, 0.0])]);
    let snapshot = [
        with_embedding("a", "p1", &[3.0, 4.0]),
        with_embedding("b", "p2", &[6.0, 8.0]),
        with_embedding("c", "p3", &[0.0, 1.0]),
    ];

    let response = searcher.search(b"query", &snapshot, 5, Pipeline::Embedding).unwrap();

    let ids = response.results.iter().map(|r| r.entry_id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, ["c", "a", "b"]);
    assert!((response.results[0].score - 90.).abs() < EPS);
    assert!((response.results[1].score - 50.).abs() < EPS);
    assert_eq!(response.results[2].score, 0.);
}

#[rstest]
fn cosine_metric_is_selectable(calls: Arc<AtomicUsize>) {
    let config = PipelineConfig {
        embedding_dim: 2,
        embedding_metric: EmbeddingMetric::Cosine,
        ..Default::default()
    };
    let searcher = searcher(config, &calls, vec![Descriptor::Embedding(vec![1.0, 0.0])]);
    let snapshot =
        [with_embedding("opposite", "p1", &[-1.0, 0.0]), with_embedding("same", "p2", &[2.0, 0.0])];

    let response = searcher.search(b"query", &snapshot, 5, Pipeline::Embedding).unwrap();

    assert_eq!(response.results[0].entry_id, "same");
    assert!((response.results[0].score - 100.).abs() < EPS);
    assert!(response.results[1].score.abs() < EPS);
}

#[rstest]
fn invalid_configuration_fails_before_extraction(calls: Arc<AtomicUsize>) {
    let config = PipelineConfig {
        embedding_dim: 2,
        weights: CombinedWeights { embedding: 0.8, hash: 0.3 },
        ..Default::default()
    };
    let searcher = searcher(
        config,
        &calls,
        vec![Descriptor::PerceptualHash(0), Descriptor::Embedding(vec![1.0, 0.0])],
    );

    let err = searcher.search(b"query", &[], 5, Pipeline::Combined).unwrap_err();

    assert!(matches!(err, SearchError::Configuration(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[rstest]
#[case::keypoints(
    Pipeline::Keypoint,
    Descriptor::KeypointSet(Array2::from_elem((3, 8), 0xff))
)]
#[case::embedding(Pipeline::Embedding, Descriptor::Embedding(vec![1.0, 0.0, 0.0]))]
fn mismatched_query_shape_is_configuration(
    config: PipelineConfig,
    calls: Arc<AtomicUsize>,
    #[case] pipeline: Pipeline,
    #[case] query: Descriptor,
) {
    let searcher = searcher(config, &calls, vec![query]);
    // 目录本身合法，查询形状与配置不一致
    let snapshot = (0..32)
        .map(|i| CatalogRecord {
            keypoints: Some(vec![0xff; 32]),
            embedding: Some(codec::encode_embedding(&[1.0, 0.0])),
            ..record(&format!("e{i}"), "p1")
        })
        .collect::<Vec<_>>();

    let err = searcher.search(b"query", &snapshot, 5, pipeline).unwrap_err();

    assert!(matches!(err, SearchError::Configuration(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[rstest]
fn zero_top_k_is_rejected(config: PipelineConfig, calls: Arc<AtomicUsize>) {
    let searcher = searcher(config, &calls, vec![Descriptor::PerceptualHash(0)]);
    let snapshot = [with_hash("a", "p1", 0)];
    let err = searcher.search(b"query", &snapshot, 0, Pipeline::Hash).unwrap_err();
    assert!(matches!(err, SearchError::Configuration(_)));
}

#[rstest]
fn insufficient_query_is_distinct_from_no_match(config: PipelineConfig) {
    let searcher = Searcher::new(Arc::new(ExtractorSet::new().with(Arc::new(Rejecting))), config);
    let snapshot = [CatalogRecord { keypoints: Some(vec![0xff; 32]), ..record("a", "p1") }];

    let err = searcher.search(b"query", &snapshot, 5, Pipeline::Keypoint).unwrap_err();

    assert!(matches!(err, SearchError::InsufficientDescriptor(_)));
}

#[rstest]
fn concurrent_searches_agree(config: PipelineConfig, calls: Arc<AtomicUsize>) {
    let searcher = searcher(config, &calls, vec![Descriptor::PerceptualHash(0x0f)]);
    let snapshot = (0..64u64)
        .map(|i| with_hash(&format!("e{i}"), &format!("p{}", i % 16), i * 0x0101))
        .collect::<Vec<_>>();

    let expected = searcher.search(b"query", &snapshot, 10, Pipeline::Hash).unwrap();
    let responses = (0..16)
        .into_par_iter()
        .map(|_| searcher.search(b"query", &snapshot, 10, Pipeline::Hash).unwrap())
        .collect::<Vec<_>>();

    assert_eq!(expected.total, 16);
    assert!(responses.iter().all(|r| *r == expected));
}
