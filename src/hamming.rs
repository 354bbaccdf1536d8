use bytemuck::try_cast_slice;

/// 两个 64 位哈希的汉明距离
#[inline(always)]
pub fn hamming_u64(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[inline(always)]
pub fn hamming_naive(va: &[u8], vb: &[u8]) -> u32 {
    va.iter().zip(vb).map(|(a, b)| (a ^ b).count_ones()).sum()
}

/// 计算两个等长字节串的汉明距离
///
/// 两者都按 8 字节对齐时按 u64 逐块计算，否则退化为逐字节计算
#[inline]
pub fn hamming_bytes(va: &[u8], vb: &[u8]) -> u32 {
    debug_assert_eq!(va.len(), vb.len());
    match (try_cast_slice::<u8, u64>(va), try_cast_slice::<u8, u64>(vb)) {
        (Ok(a), Ok(b)) => a.iter().zip(b).map(|(x, y)| hamming_u64(*x, *y)).sum(),
        _ => hamming_naive(va, vb),
    }
}

/// 将汉明距离换算为 0 ~ 100 的相似度
///
/// `bits` 必须是哈希的真实位宽，否则所有分数都会失真
#[inline]
pub fn hamming_similarity(distance: u32, bits: u32) -> f64 {
    debug_assert!(bits > 0);
    (100. * (1. - distance as f64 / bits as f64)).clamp(0., 100.)
}
