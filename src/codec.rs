//! 描述符与存储格式之间的编解码
//!
//! - 关键点描述符：N×D 的字节矩阵按行展开为长度 N*D 的字节串
//! - 感知哈希：16 位小写十六进制字符串
//! - 稠密向量：小端序 f32 字节串

use byteorder::{ByteOrder, LittleEndian};
use ndarray::Array2;

use crate::descriptor::{DescriptorKind, KeypointShape};
use crate::error::{DecodeError, ExtractionError};

/// 默认的最少关键点数量，低于该值的图片无法参与比较
pub const MIN_KEYPOINTS: usize = 10;

/// 将关键点矩阵按行展开
pub fn encode_keypoints(keypoints: &Array2<u8>) -> Vec<u8> {
    keypoints.iter().copied().collect()
}

/// 将字节串还原为关键点矩阵，长度必须恰好为 N*D
pub fn decode_keypoints(buffer: &[u8], shape: KeypointShape) -> Result<Array2<u8>, DecodeError> {
    if buffer.len() != shape.byte_len() {
        return Err(DecodeError::Length {
            kind: DescriptorKind::KeypointSet,
            expected: shape.byte_len(),
            actual: buffer.len(),
        });
    }
    // 长度已检查，这里不会失败
    Array2::from_shape_vec((shape.rows, shape.cols), buffer.to_vec()).map_err(|_| {
        DecodeError::Length {
            kind: DescriptorKind::KeypointSet,
            expected: shape.byte_len(),
            actual: buffer.len(),
        }
    })
}

/// 将检测器输出的描述符整理为固定的 N×D 矩阵
///
/// `rows` 需按检测器给出的强度从高到低排列。多于 N 行时截断，少于 N 行时以 0 填充；
/// 少于 `min_rows` 行时返回 [`ExtractionError::InsufficientDescriptor`]。
pub fn pad_keypoints(
    rows: &Array2<u8>,
    shape: KeypointShape,
    min_rows: usize,
) -> Result<Array2<u8>, ExtractionError> {
    let found = rows.nrows();
    if found < min_rows || found == 0 {
        return Err(ExtractionError::InsufficientDescriptor {
            kind: DescriptorKind::KeypointSet,
            found,
            required: min_rows.max(1),
        });
    }
    if rows.ncols() != shape.cols {
        return Err(ExtractionError::UndecodableImage(format!(
            "描述符宽度为 {}，期望 {}",
            rows.ncols(),
            shape.cols
        )));
    }

    let mut output = Array2::zeros((shape.rows, shape.cols));
    let keep = found.min(shape.rows);
    output.slice_mut(ndarray::s![..keep, ..]).assign(&rows.slice(ndarray::s![..keep, ..]));
    Ok(output)
}

pub fn encode_hash(hash: u64) -> String {
    format!("{hash:016x}")
}

pub fn decode_hash(s: &str) -> Result<u64, DecodeError> {
    let s = s.trim();
    // from_str_radix 会接受前导 '+'
    if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidHash(s.to_owned()));
    }
    u64::from_str_radix(s, 16).map_err(|_| DecodeError::InvalidHash(s.to_owned()))
}

pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    let mut buffer = vec![0u8; values.len() * 4];
    LittleEndian::write_f32_into(values, &mut buffer);
    buffer
}

/// 解码稠密向量，长度必须为 `dim * 4` 字节，且所有值均为有限值
pub fn decode_embedding(buffer: &[u8], dim: usize) -> Result<Vec<f32>, DecodeError> {
    if buffer.len() != dim * 4 {
        return Err(DecodeError::Length {
            kind: DescriptorKind::Embedding,
            expected: dim * 4,
            actual: buffer.len(),
        });
    }
    let mut values = vec![0f32; dim];
    LittleEndian::read_f32_into(buffer, &mut values);
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DecodeError::NonFinite);
    }
    Ok(values)
}
