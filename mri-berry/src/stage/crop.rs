//! 裁剪阶段.

use ndarray::s;

use super::{emit_one, Emit, Stage};
use crate::consts::CROP_BOUNDS;
use crate::{Idx2d, Labels, PrepError, PrepResult, Sample};

/// 对每个切片的高、宽两个方向同时截取 `[low, high)`.
///
/// 默认边界为 `(56, 184)`, 输出 128x128. 增强与归一化都应在裁剪之后运行.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    low: usize,
    high: usize,
}

impl Default for Crop {
    fn default() -> Self {
        let (low, high) = CROP_BOUNDS;
        Self { low, high }
    }
}

impl Crop {
    /// 构建裁剪阶段. `low >= high` 时返回 [`PrepError::InvalidConfig`].
    pub fn new(low: usize, high: usize) -> PrepResult<Self> {
        if low >= high {
            return Err(PrepError::InvalidConfig(format!(
                "裁剪边界应满足 low < high, 实际为 [{low}, {high})"
            )));
        }
        Ok(Self { low, high })
    }

    /// 下界 (含).
    #[inline]
    pub fn low(&self) -> usize {
        self.low
    }

    /// 上界 (不含).
    #[inline]
    pub fn high(&self) -> usize {
        self.high
    }

    /// 输出切片的边长.
    #[inline]
    pub fn side(&self) -> usize {
        self.high - self.low
    }

    /// 检查边界是否适用于形状为 `(H, W)` 的切片.
    ///
    /// 可在处理任何病例之前调用, 以尽早发现配置错误.
    pub fn check(&self, (h, w): Idx2d) -> PrepResult<()> {
        if self.high > h || self.high > w {
            return Err(PrepError::OutOfBounds {
                low: self.low,
                high: self.high,
                shape: (h, w),
            });
        }
        Ok(())
    }

    /// 裁剪样本的所有通道与标签.
    pub fn crop(&self, sample: Sample) -> PrepResult<Sample> {
        self.check(sample.slice_shape())?;
        let (lo, hi) = (self.low, self.high);
        let (id, features, labels) = sample.into_parts();
        let features = features.slice(s![.., .., lo..hi, lo..hi]).to_owned();
        let labels = match labels {
            Labels::Codes(a) => Labels::Codes(a.slice(s![.., lo..hi, lo..hi]).to_owned()),
            Labels::OneHot(a) => Labels::OneHot(a.slice(s![.., .., lo..hi, lo..hi]).to_owned()),
        };
        Sample::new(id, features, labels)
    }
}

impl Stage for Crop {
    fn name(&self) -> &str {
        "crop"
    }

    fn apply(&mut self, sample: Sample) -> Emit {
        emit_one(self.crop(sample))
    }
}
