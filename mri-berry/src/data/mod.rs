use std::path::{Path, PathBuf};

use ndarray::{Array3, Array4, ArrayView2, ArrayView3, Axis};

use crate::consts::label::is_background;
use crate::{Idx2d, Idx3d, PrepError, PrepResult};

mod sample;

pub use sample::{LabelRecord, Labels, Sample};

/// 一个病例: 按顺序排列的若干通道体数据, 以及唯一的标签体数据.
///
/// 体数据均按 `(z, H, W)` 组织. 构造后不可变, 所有变换都产生新的实体.
///
/// # 不变量
///
/// 所有通道和标签的形状完全一致.
#[derive(Debug, Clone)]
pub struct Case {
    id: PathBuf,
    channels: Vec<Array3<f32>>,
    label: Array3<u8>,
}

#[inline]
fn shape_of<T>(data: &Array3<T>) -> Idx3d {
    data.dim()
}

#[inline]
fn shape_vec((z, h, w): Idx3d) -> [usize; 3] {
    [z, h, w]
}

impl Case {
    /// 由通道体数据 `channels` 和标签 `label` 构造病例. `id` 通常是病例目录.
    ///
    /// 若没有任何通道, 或任一通道形状与标签不一致, 则返回 [`PrepError::ShapeMismatch`].
    pub fn new<P: Into<PathBuf>>(
        id: P,
        channels: Vec<Array3<f32>>,
        label: Array3<u8>,
    ) -> PrepResult<Self> {
        if channels.is_empty() {
            return Err(PrepError::shape("通道个数", &[1], &[0]));
        }
        let expected = shape_of(&label);
        if let Some(bad) = channels.iter().map(shape_of).find(|s| *s != expected) {
            return Err(PrepError::shape(
                "通道与标签",
                &shape_vec(expected),
                &shape_vec(bad),
            ));
        }
        Ok(Self {
            id: id.into(),
            channels,
            label,
        })
    }

    /// 病例标识 (目录路径).
    #[inline]
    pub fn id(&self) -> &Path {
        &self.id
    }

    /// 数据形状 `(z, H, W)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        shape_of(&self.label)
    }

    /// 水平切片形状 `(H, W)`.
    #[inline]
    pub fn slice_shape(&self) -> Idx2d {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 通道个数.
    #[inline]
    pub fn channel_len(&self) -> usize {
        self.channels.len()
    }

    /// 所有通道.
    #[inline]
    pub fn channels(&self) -> &[Array3<f32>] {
        &self.channels
    }

    /// 标签体数据的不可变视图.
    #[inline]
    pub fn label(&self) -> ArrayView3<'_, u8> {
        self.label.view()
    }

    /// 仅保留满足 `pred(z, 标签切片)` 的切片索引, 返回新的病例.
    ///
    /// 同一组保留索引同时作用于每个通道和标签, 因此结果仍然逐切片对齐.
    pub fn filter_slices<F>(&self, mut pred: F) -> Case
    where
        F: FnMut(usize, ArrayView2<'_, u8>) -> bool,
    {
        let keep: Vec<usize> = self
            .label
            .axis_iter(Axis(0))
            .enumerate()
            .filter_map(|(z, s)| pred(z, s).then_some(z))
            .collect();
        self.select(&keep)
    }

    /// 丢弃标签全为背景的切片.
    #[inline]
    pub fn non_empty(&self) -> Case {
        self.filter_slices(|_, s| !s.iter().copied().all(is_background))
    }

    /// 按 `indices` 的顺序选取切片.
    ///
    /// 如果存在越界索引, 则程序 panic.
    fn select(&self, indices: &[usize]) -> Case {
        Case {
            id: self.id.clone(),
            channels: self.channels.iter().map(|c| pick(c, indices)).collect(),
            label: pick(&self.label, indices),
        }
    }

    /// 将所有通道堆叠为 `(C, z, H, W)` 特征, 得到管线样本.
    pub fn into_sample(self) -> Sample {
        let (z, h, w) = self.shape();
        let mut features = Array4::<f32>::zeros((self.channels.len(), z, h, w));
        for (mut dst, src) in features.axis_iter_mut(Axis(0)).zip(self.channels.iter()) {
            dst.assign(src);
        }
        Sample::from_parts_unchecked(self.id, features, Labels::Codes(self.label))
    }
}

/// 沿 z 轴选取切片. 空索引集合会得到 `(0, H, W)` 的数组.
fn pick<T: Copy + Default>(data: &Array3<T>, indices: &[usize]) -> Array3<T> {
    let (_, h, w) = data.dim();
    let mut ans = Array3::<T>::default((indices.len(), h, w));
    for (mut dst, &z) in ans.axis_iter_mut(Axis(0)).zip(indices) {
        dst.assign(&data.index_axis(Axis(0), z));
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// 4 通道, 第 `empty` 个切片标签为全背景.
    fn case_with_empty(len_z: usize, empty: &[usize]) -> Case {
        let label = Array3::from_shape_fn((len_z, 6, 6), |(z, h, w)| {
            if empty.contains(&z) || (h + w) % 3 != 0 {
                0
            } else {
                (z % 4 + 1) as u8
            }
        });
        let channels = (0..4)
            .map(|c| Array3::from_shape_fn((len_z, 6, 6), |(z, h, w)| (c * 1000 + z * 36 + h * 6 + w) as f32))
            .collect();
        Case::new("case-0", channels, label).unwrap()
    }

    #[test]
    fn test_shape_mismatch() {
        let label = Array3::<u8>::zeros((3, 4, 4));
        let good = Array3::<f32>::zeros((3, 4, 4));
        let bad = Array3::<f32>::zeros((3, 4, 5));
        let err = Case::new("x", vec![good, bad], label.clone()).unwrap_err();
        assert!(matches!(err, PrepError::ShapeMismatch { .. }));
        assert!(matches!(
            Case::new("x", vec![], label),
            Err(PrepError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_non_empty_keeps_alignment() {
        let case = case_with_empty(10, &[0, 3]);
        let filtered = case.non_empty();
        assert_eq!(filtered.len_z(), 8);
        assert_eq!(filtered.channel_len(), 4);
        for c in filtered.channels() {
            assert_eq!(c.dim(), filtered.shape());
        }
        for s in filtered.label().axis_iter(Axis(0)) {
            assert!(!s.iter().copied().all(is_background));
        }
        // 保留的第一个切片来自原始索引 1.
        let expected_z = [1, 2, 4, 5, 6, 7, 8, 9];
        for (new_z, &old_z) in expected_z.iter().enumerate() {
            assert_eq!(
                filtered.channels()[2].index_axis(Axis(0), new_z),
                case.channels()[2].index_axis(Axis(0), old_z)
            );
            assert_eq!(
                filtered.label().index_axis(Axis(0), new_z),
                case.label().index_axis(Axis(0), old_z)
            );
        }
    }

    #[test]
    fn test_filter_everything() {
        let case = case_with_empty(3, &[0, 1, 2]);
        let filtered = case.non_empty();
        assert_eq!(filtered.shape(), (0, 6, 6));
        let sample = filtered.into_sample();
        assert_eq!(sample.len_z(), 0);
        assert_eq!(sample.channel_len(), 4);
    }

    #[test]
    fn test_into_sample() {
        let case = case_with_empty(5, &[]);
        let expected = case.channels()[3].clone();
        let sample = case.into_sample();
        assert_eq!(sample.features().dim(), (4, 5, 6, 6));
        assert_eq!(sample.features().index_axis(Axis(0), 3), expected);
        assert!(sample.labels().is_codes());
    }
}
