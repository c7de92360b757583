//! 在管线中流动的 (特征, 标签) 对.

use std::path::{Path, PathBuf};

use either::Either;
use ndarray::{Array3, Array4, ArrayView2, ArrayView3, Axis};

use crate::{Idx2d, PrepError, PrepResult};

/// 样本标签.
#[derive(Debug, Clone, PartialEq)]
pub enum Labels {
    /// 类别编码, 形状 `(z, H, W)`.
    Codes(Array3<u8>),

    /// one-hot 编码, 类别轴在最前, 形状 `(K, z, H, W)`.
    OneHot(Array4<f32>),
}

/// 单个切片对应的标签记录.
///
/// 左侧是类别编码 `(H, W)`, 右侧是 one-hot 编码 `(K, H, W)`.
pub type LabelRecord<'a> = Either<ArrayView2<'a, u8>, ArrayView3<'a, f32>>;

impl Labels {
    /// 是否仍为类别编码?
    #[inline]
    pub fn is_codes(&self) -> bool {
        matches!(self, Self::Codes(_))
    }

    /// 获取 `(z, H, W)`.
    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            Self::Codes(a) => a.dim(),
            Self::OneHot(a) => {
                let (_, z, h, w) = a.dim();
                (z, h, w)
            }
        }
    }

    /// 单条记录 (单个切片) 的形状. 类别编码为 `[H, W]`, one-hot 为 `[K, H, W]`.
    pub fn record_shape(&self) -> Vec<usize> {
        match self {
            Self::Codes(a) => a.shape()[1..].to_vec(),
            Self::OneHot(a) => {
                let (k, _, h, w) = a.dim();
                vec![k, h, w]
            }
        }
    }

    /// 获取第 `z` 个切片的标签.
    ///
    /// 当 `z` 越界时 panic.
    pub fn record(&self, z: usize) -> LabelRecord<'_> {
        match self {
            Self::Codes(a) => Either::Left(a.index_axis(Axis(0), z)),
            Self::OneHot(a) => Either::Right(a.index_axis(Axis(1), z)),
        }
    }
}

/// 管线样本. 特征按 `(C, z, H, W)` 组织.
///
/// 每个阶段都按值消费样本并产出新的样本.
#[derive(Debug, Clone)]
pub struct Sample {
    id: PathBuf,
    features: Array4<f32>,
    labels: Labels,
}

impl Sample {
    /// 由特征与标签构造样本. 两者的 `(z, H, W)` 必须一致,
    /// 否则返回 [`PrepError::ShapeMismatch`].
    pub fn new<P: Into<PathBuf>>(id: P, features: Array4<f32>, labels: Labels) -> PrepResult<Self> {
        let (_, z, h, w) = features.dim();
        let (lz, lh, lw) = labels.dim();
        if (z, h, w) != (lz, lh, lw) {
            return Err(PrepError::shape("特征与标签", &[z, h, w], &[lz, lh, lw]));
        }
        Ok(Self::from_parts_unchecked(id.into(), features, labels))
    }

    #[inline]
    pub(crate) fn from_parts_unchecked(id: PathBuf, features: Array4<f32>, labels: Labels) -> Self {
        debug_assert_eq!(&features.shape()[1..], {
            let (z, h, w) = labels.dim();
            [z, h, w]
        });
        Self {
            id,
            features,
            labels,
        }
    }

    /// 来源病例的标识.
    #[inline]
    pub fn id(&self) -> &Path {
        &self.id
    }

    /// 特征 `(C, z, H, W)`.
    #[inline]
    pub fn features(&self) -> &Array4<f32> {
        &self.features
    }

    /// 标签.
    #[inline]
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// 通道个数.
    #[inline]
    pub fn channel_len(&self) -> usize {
        self.features.len_of(Axis(0))
    }

    /// 水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.features.len_of(Axis(1))
    }

    /// 水平切片形状 `(H, W)`.
    #[inline]
    pub fn slice_shape(&self) -> Idx2d {
        let (_, _, h, w) = self.features.dim();
        (h, w)
    }

    /// 获取第 `z` 个切片的 (特征 `(C, H, W)`, 标签) 记录.
    ///
    /// 当 `z` 越界时 panic.
    #[inline]
    pub fn record(&self, z: usize) -> (ArrayView3<'_, f32>, LabelRecord<'_>) {
        (self.features.index_axis(Axis(1), z), self.labels.record(z))
    }

    /// 获取能按升序迭代所有切片记录的迭代器.
    pub fn records(&self) -> impl ExactSizeIterator<Item = (ArrayView3<'_, f32>, LabelRecord<'_>)> {
        (0..self.len_z()).map(move |z| self.record(z))
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_parts(self) -> (PathBuf, Array4<f32>, Labels) {
        (self.id, self.features, self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_shape_check() {
        let features = Array4::<f32>::zeros((2, 3, 4, 4));
        assert!(Sample::new("a", features.clone(), Labels::Codes(Array3::zeros((3, 4, 4)))).is_ok());
        let err = Sample::new("a", features, Labels::Codes(Array3::zeros((2, 4, 4)))).unwrap_err();
        assert!(matches!(err, PrepError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_record_views() {
        let features = Array4::from_shape_fn((2, 3, 2, 2), |(c, z, _, _)| (c * 10 + z) as f32);
        let one_hot = Array4::from_shape_fn((5, 3, 2, 2), |(k, z, _, _)| (k == z) as u8 as f32);
        let sample = Sample::new("b", features, Labels::OneHot(one_hot)).unwrap();
        assert_eq!(sample.labels().record_shape(), vec![5, 2, 2]);

        let (x, y) = sample.record(2);
        assert_eq!(x.dim(), (2, 2, 2));
        assert_eq!(x[[1, 0, 0]], 12.0);
        let y = y.right().unwrap();
        assert_eq!(y[[2, 1, 1]], 1.0);
        assert_eq!(y[[0, 1, 1]], 0.0);
        assert_eq!(sample.records().len(), 3);
    }
}
