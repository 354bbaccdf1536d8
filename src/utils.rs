use indicatif::ProgressStyle;
use ndarray::Array2;
use opencv::core::{KeyPoint, Mat, Size, Vector};
use opencv::prelude::*;
use opencv::{features2d, imgcodecs, imgproc};

use crate::error::ExtractionError;

/// 解码图片为 8 位 3 通道 BGR 图像
///
/// `IMREAD_COLOR` 会丢弃 alpha 通道并应用 EXIF 方向信息
pub fn imdecode(bytes: &[u8]) -> Result<Mat, ExtractionError> {
    if bytes.is_empty() {
        return Err(ExtractionError::UndecodableImage("空图片".to_string()));
    }
    let buf = Vector::<u8>::from_slice(bytes);
    let image = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR)?;
    if image.empty() {
        return Err(ExtractionError::UndecodableImage("无法识别的图片格式".to_string()));
    }
    Ok(image)
}

/// 不保持长宽比地缩放到固定尺寸
pub fn resize_exact(
    image: &Mat,
    (width, height): (i32, i32),
    interpolation: i32,
) -> opencv::Result<Mat> {
    let mut output = Mat::default();
    imgproc::resize(image, &mut output, Size::new(width, height), 0., 0., interpolation)?;
    Ok(output)
}

pub fn to_grayscale(image: &Mat) -> opencv::Result<Mat> {
    if image.channels() == 1 {
        return Ok(image.clone());
    }
    let mut output = Mat::default();
    imgproc::cvt_color_def(image, &mut output, imgproc::COLOR_BGR2GRAY)?;
    Ok(output)
}

/// 检测特征点并计算描述符，描述符按行转为 `Array2`
pub fn detect_and_compute(
    orb: &mut impl features2d::Feature2DTrait,
    image: &Mat,
) -> opencv::Result<(Vec<KeyPoint>, Array2<u8>)> {
    let mask = Mat::default();
    let mut keypoints = Vector::<KeyPoint>::new();
    let mut descriptors = Mat::default();
    orb.detect_and_compute(image, &mask, &mut keypoints, &mut descriptors, false)?;

    let rows = descriptors.rows() as usize;
    let cols = descriptors.cols() as usize;
    let descriptors = if rows == 0 {
        Array2::zeros((0, cols))
    } else {
        let data = descriptors.data_bytes()?.to_vec();
        Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| opencv::Error::new(opencv::core::StsUnmatchedSizes, e.to_string()))?
    };
    Ok((keypoints.to_vec(), descriptors))
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {per_sec} ETA {eta} {msg}",
    )
    .unwrap()
}
