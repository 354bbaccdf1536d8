use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded};
use log::{debug, error, info};
use opencv::core::{CV_32F, Mat, Scalar, Size};
use opencv::prelude::*;
use opencv::{dnn, imgproc};

use super::Extractor;
use crate::descriptor::{Descriptor, DescriptorKind};
use crate::error::{ExtractionError, SearchError};
use crate::pipeline::PipelineConfig;
use crate::utils;

/// 特征提取模型，输入已缩放的 BGR 图像，输出固定维数的稠密向量
pub trait EmbeddingBackbone: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, image: Mat) -> Result<Vec<f32>, ExtractionError>;
}

/// 单个推理实例，不要求线程安全
pub trait InferenceModel: Send {
    fn infer(&mut self, image: &Mat) -> Result<Vec<f32>, ExtractionError>;
}

struct Job {
    image: Mat,
    reply: Sender<Result<Vec<f32>, ExtractionError>>,
}

/// 固定数量的推理线程，每个线程独占一个模型实例
///
/// 任务队列有界，队列满时调用方会阻塞等待。
pub struct BackbonePool {
    dimension: usize,
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl BackbonePool {
    /// 启动 `workers` 个推理线程，模型实例由 `factory` 在启动时全部创建
    pub fn new<M, F>(
        dimension: usize,
        workers: usize,
        mut factory: F,
    ) -> Result<Self, ExtractionError>
    where
        M: InferenceModel + 'static,
        F: FnMut(usize) -> Result<M, ExtractionError>,
    {
        let workers = workers.max(1);
        let (tx, rx) = bounded::<Job>(workers * 2);

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let mut model = factory(i)?;
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("backbone-{i}"))
                .spawn(move || {
                    for job in rx.iter() {
                        // 模型崩溃只让当前任务失败，线程继续处理后续任务
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            model.infer(&job.image)
                        }))
                        .unwrap_or_else(|payload| {
                            let msg = panic_message(payload.as_ref());
                            error!("推理线程 {i} 崩溃: {msg}");
                            Err(ExtractionError::BackendUnavailable(format!("推理崩溃: {msg}")))
                        });
                        // 调用方可能已经放弃等待
                        let _ = job.reply.send(result);
                    }
                    debug!("推理线程 {i} 退出");
                })
                .map_err(|e| ExtractionError::BackendUnavailable(e.to_string()))?;
            handles.push(handle);
        }
        info!("推理线程池已启动: {workers} 个线程, 输出维数 {dimension}");

        Ok(Self { dimension, jobs: Some(tx), workers: handles })
    }

    /// 使用 ONNX 模型文件创建线程池
    pub fn onnx(
        path: impl AsRef<Path>,
        dimension: usize,
        workers: usize,
    ) -> Result<Self, ExtractionError> {
        let path = path.as_ref();
        info!("加载 ONNX 模型: {}", path.display());
        Self::new(dimension, workers, |_| OnnxModel::load(path))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知错误".to_string()
    }
}

impl EmbeddingBackbone for BackbonePool {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, image: Mat) -> Result<Vec<f32>, ExtractionError> {
        let closed = || ExtractionError::BackendUnavailable("推理线程池已关闭".to_string());
        let jobs = self.jobs.as_ref().ok_or_else(closed)?;
        let (tx, rx) = bounded(1);
        jobs.send(Job { image, reply: tx }).map_err(|_| closed())?;
        rx.recv().map_err(|_| ExtractionError::BackendUnavailable("推理线程异常退出".to_string()))?
    }
}

impl Drop for BackbonePool {
    fn drop(&mut self) {
        // 关闭队列后线程会处理完剩余任务并退出
        self.jobs.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("推理线程异常退出");
            }
        }
    }
}

/// OpenCV DNN 加载的 ONNX 模型
pub struct OnnxModel {
    net: dnn::Net,
    input_size: Size,
}

impl OnnxModel {
    pub fn load(path: &Path) -> Result<Self, ExtractionError> {
        let unavailable =
            |e: String| ExtractionError::BackendUnavailable(format!("{}: {e}", path.display()));
        let name = path.to_str().ok_or_else(|| unavailable("路径不是有效的 UTF-8".to_string()))?;
        let net = dnn::read_net_from_onnx(name).map_err(|e| unavailable(e.to_string()))?;
        if net.empty().map_err(|e| unavailable(e.to_string()))? {
            return Err(unavailable("模型为空".to_string()));
        }
        Ok(Self { net, input_size: Size::new(224, 224) })
    }
}

impl InferenceModel for OnnxModel {
    fn infer(&mut self, image: &Mat) -> Result<Vec<f32>, ExtractionError> {
        // 模型输入为 RGB，像素值缩放到 [0, 1]
        let blob = dnn::blob_from_image(
            image,
            1. / 255.,
            self.input_size,
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;
        self.net.set_input_def(&blob)?;
        let output = self.net.forward_single_def()?;
        Ok(output.data_typed::<f32>()?.to_vec())
    }
}

/// 稠密向量提取器
#[derive(Clone)]
pub struct EmbeddingExtractor {
    backbone: Arc<dyn EmbeddingBackbone>,
    working_size: (i32, i32),
}

impl EmbeddingExtractor {
    pub fn new(backbone: Arc<dyn EmbeddingBackbone>) -> Self {
        Self { backbone, working_size: (224, 224) }
    }

    pub fn dimension(&self) -> usize {
        self.backbone.dimension()
    }

    pub fn embed_image(&self, image: &Mat) -> Result<Vec<f32>, ExtractionError> {
        let small = utils::resize_exact(image, self.working_size, imgproc::INTER_NEAREST)?;
        let values = self.backbone.embed(small)?;

        let dimension = self.backbone.dimension();
        if values.len() != dimension {
            return Err(ExtractionError::Misconfigured(format!(
                "模型输出 {} 维向量，配置为 {dimension} 维",
                values.len()
            )));
        }
        // 非有限值或全 0 的向量无法参与比较
        if values.iter().any(|v| !v.is_finite()) || values.iter().all(|&v| v == 0.) {
            return Err(ExtractionError::InsufficientDescriptor {
                kind: DescriptorKind::Embedding,
                found: 0,
                required: dimension,
            });
        }
        Ok(values)
    }
}

impl Extractor for EmbeddingExtractor {
    fn kind(&self) -> DescriptorKind {
        DescriptorKind::Embedding
    }

    fn extract(&self, bytes: &[u8]) -> Result<Descriptor, ExtractionError> {
        let image = utils::imdecode(bytes)?;
        self.embed_image(&image).map(Descriptor::Embedding)
    }

    fn check(&self, config: &PipelineConfig) -> Result<(), SearchError> {
        if self.dimension() != config.embedding_dim {
            return Err(SearchError::config(format!(
                "模型输出 {} 维向量，配置为 {} 维",
                self.dimension(),
                config.embedding_dim
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use opencv::core::{CV_8UC3, Vector};
    use opencv::imgcodecs;

    use super::*;

    /// 输出图像尺寸与编号的模型
    struct ShapeModel(usize);

    impl InferenceModel for ShapeModel {
        fn infer(&mut self, image: &Mat) -> Result<Vec<f32>, ExtractionError> {
            Ok(vec![image.rows() as f32, image.cols() as f32, self.0 as f32])
        }
    }

    /// 遇到空图像时崩溃的模型
    struct FragileModel;

    impl InferenceModel for FragileModel {
        fn infer(&mut self, image: &Mat) -> Result<Vec<f32>, ExtractionError> {
            if image.empty() {
                panic!("inference crashed");
            }
            Ok(vec![1.; 3])
        }
    }

    struct ZeroBackbone;

    impl EmbeddingBackbone for ZeroBackbone {
        fn dimension(&self) -> usize {
            4
        }

        fn embed(&self, _: Mat) -> Result<Vec<f32>, ExtractionError> {
            Ok(vec![0.; 4])
        }
    }

    fn png(width: i32, height: i32) -> Vec<u8> {
        let image =
            Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(90.)).unwrap();
        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode_def(".png", &image, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn pool_creates_one_model_per_worker() {
        let created = AtomicUsize::new(0);
        let pool = BackbonePool::new(3, 4, |i| {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(ShapeModel(i))
        })
        .unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 4);

        let image = Mat::new_rows_cols_with_default(5, 7, CV_8UC3, Scalar::all(0.)).unwrap();
        let values = pool.embed(image).unwrap();
        assert_eq!(&values[..2], &[5., 7.]);
    }

    #[test]
    fn extractor_resizes_before_inference() {
        let pool = BackbonePool::new(3, 2, |i| Ok(ShapeModel(i + 1))).unwrap();
        let extractor = EmbeddingExtractor::new(Arc::new(pool));
        let descriptor = extractor.extract(&png(640, 480)).unwrap();
        assert_eq!(&descriptor.as_embedding().unwrap()[..2], &[224., 224.]);
    }

    #[test]
    fn pool_survives_crashed_inference() {
        let pool = BackbonePool::new(3, 1, |_| Ok(FragileModel)).unwrap();
        for _ in 0..3 {
            let err = pool.embed(Mat::default()).unwrap_err();
            assert!(err.is_transient());
            // 唯一的线程仍然可以继续服务
            let image = Mat::new_rows_cols_with_default(5, 7, CV_8UC3, Scalar::all(0.)).unwrap();
            assert_eq!(pool.embed(image).unwrap(), vec![1.; 3]);
        }
    }

    #[test]
    fn wrong_output_dimension_is_configuration() {
        // 模型输出 3 维，但按 4 维部署
        let pool = BackbonePool::new(4, 1, |i| Ok(ShapeModel(i))).unwrap();
        let extractor = EmbeddingExtractor::new(Arc::new(pool));
        let err = extractor.extract(&png(32, 32)).unwrap_err();
        assert!(matches!(err, ExtractionError::Misconfigured(_)));
        assert!(matches!(SearchError::from(err), SearchError::Configuration(_)));

        let config = PipelineConfig { embedding_dim: 3, ..Default::default() };
        assert!(extractor.check(&config).is_err());
        let config = PipelineConfig { embedding_dim: 4, ..Default::default() };
        assert!(extractor.check(&config).is_ok());
    }

    #[test]
    fn zero_vector_is_insufficient() {
        let extractor = EmbeddingExtractor::new(Arc::new(ZeroBackbone));
        let err = extractor.extract(&png(32, 32)).unwrap_err();
        assert!(err.is_insufficient());
    }

    #[test]
    fn missing_model_is_transient() {
        let err = OnnxModel::load(Path::new("/nonexistent/model.onnx")).err().unwrap();
        assert!(err.is_transient());
    }
}
