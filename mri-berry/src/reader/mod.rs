//! 体数据读取器.
//!
//! 管线只通过 [`VolumeReader`] 获取裸数值数组, 不关心具体文件格式.

use std::path::Path;

use ndarray::{Array3, ArrayD, Axis, Ix3};
use ndarray_npy::read_npy;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::{PrepError, PrepResult};

/// 从文件读取 3D 体数据的能力. 返回的数组均按 `(z, H, W)` 组织.
pub trait VolumeReader {
    /// 该读取器是否能处理 `path`. 通常只看扩展名.
    fn accepts(&self, path: &Path) -> bool;

    /// 读取通道 (扫描) 体数据.
    fn read_scan(&self, path: &Path) -> PrepResult<Array3<f32>>;

    /// 读取标签体数据.
    fn read_label(&self, path: &Path) -> PrepResult<Array3<u8>>;
}

impl<R: VolumeReader + ?Sized> VolumeReader for Box<R> {
    #[inline]
    fn accepts(&self, path: &Path) -> bool {
        (**self).accepts(path)
    }

    #[inline]
    fn read_scan(&self, path: &Path) -> PrepResult<Array3<f32>> {
        (**self).read_scan(path)
    }

    #[inline]
    fn read_label(&self, path: &Path) -> PrepResult<Array3<u8>> {
        (**self).read_label(path)
    }
}

/// 文件名是否以 `exts` 之一结尾 (忽略大小写).
fn has_ext(path: &Path, exts: &[&str]) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_ascii_lowercase())
        .is_some_and(|n| exts.iter().any(|e| n.ends_with(e)))
}

/// nii 格式读取器.
#[derive(Debug, Clone, Copy, Default)]
pub struct NiftiReader;

impl NiftiReader {
    /// 打开 nii 文件, 获取底层体数据对象.
    fn open(&self, path: &Path) -> PrepResult<nifti::InMemNiftiVolume> {
        let obj = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| PrepError::decode(path, e))?;
        Ok(obj.into_volume())
    }
}

/// 将 `[W, H, z]` 转换成 `(z, H, W)`. 以后均按照该模式访问.
fn into_zhw<T: Clone>(path: &Path, data: ArrayD<T>) -> PrepResult<Array3<T>> {
    let data = squeeze_trailing(data);
    if data.ndim() != 3 {
        return Err(PrepError::decode(
            path,
            format!("期望 3D 体数据, 实际为 {}D", data.ndim()),
        ));
    }
    // hint: 原第一维向下增长, 原第二维向右增长.
    let data = data.permuted_axes([2, 1, 0].as_slice());
    data.as_standard_layout()
        .into_owned()
        .into_dimensionality::<Ix3>()
        .map_err(|e| PrepError::decode(path, e))
}

/// 去掉尾部长度为 1 的维度 (例如只有一个时间点的 4D nii).
fn squeeze_trailing<T>(mut data: ArrayD<T>) -> ArrayD<T> {
    while data.ndim() > 3 && data.shape().last() == Some(&1) {
        let last = data.ndim() - 1;
        data = data.index_axis_move(Axis(last), 0);
    }
    data
}

impl VolumeReader for NiftiReader {
    fn accepts(&self, path: &Path) -> bool {
        has_ext(path, &[".nii", ".nii.gz"])
    }

    fn read_scan(&self, path: &Path) -> PrepResult<Array3<f32>> {
        let data = self
            .open(path)?
            .into_ndarray::<f32>()
            .map_err(|e| PrepError::decode(path, e))?;
        into_zhw(path, data)
    }

    fn read_label(&self, path: &Path) -> PrepResult<Array3<u8>> {
        let data = self
            .open(path)?
            .into_ndarray::<u8>()
            .map_err(|e| PrepError::decode(path, e))?;
        into_zhw(path, data)
    }
}

/// npy 格式读取器. 数组应已按 `(z, H, W)` 存储.
///
/// 标签优先按 `u8` 读取; 若文件是浮点数组, 则要求其值均为 `0..=255` 内的整数.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpyReader;

impl VolumeReader for NpyReader {
    fn accepts(&self, path: &Path) -> bool {
        has_ext(path, &[".npy"])
    }

    fn read_scan(&self, path: &Path) -> PrepResult<Array3<f32>> {
        read_npy::<_, Array3<f32>>(path).map_err(|e| PrepError::decode(path, e))
    }

    fn read_label(&self, path: &Path) -> PrepResult<Array3<u8>> {
        match read_npy::<_, Array3<u8>>(path) {
            Ok(data) => Ok(data),
            Err(_) => {
                let data = self.read_scan(path)?;
                codes_from_f32(&data).ok_or_else(|| {
                    PrepError::decode(path, "标签不是 0..=255 内的整数")
                })
            }
        }
    }
}

/// 将浮点标签转换为类别编码. 存在非整数或越界值时返回 `None`.
fn codes_from_f32(data: &Array3<f32>) -> Option<Array3<u8>> {
    if data
        .iter()
        .all(|v| v.fract() == 0.0 && (0.0..=255.0).contains(v))
    {
        Some(data.mapv(|v| v as u8))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_npy::write_npy;

    #[test]
    fn test_accepts() {
        assert!(NiftiReader.accepts(Path::new("a/VSD.Brain.XX.O.MR_T1.nii.gz")));
        assert!(NiftiReader.accepts(Path::new("seg.NII")));
        assert!(!NiftiReader.accepts(Path::new("x.npy")));
        assert!(NpyReader.accepts(Path::new("x.npy")));
        assert!(!NpyReader.accepts(Path::new("x.npz")));
    }

    #[test]
    fn test_npy_label_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("ok.npy");
        let bad = dir.path().join("bad.npy");
        write_npy(&ok, &Array3::<f32>::from_elem((2, 2, 2), 3.0)).unwrap();
        write_npy(&bad, &Array3::<f32>::from_elem((2, 2, 2), 0.5)).unwrap();

        let codes = NpyReader.read_label(&ok).unwrap();
        assert!(codes.iter().all(|&v| v == 3));
        assert!(matches!(
            NpyReader.read_label(&bad),
            Err(PrepError::Decode { .. })
        ));
        assert!(matches!(
            NpyReader.read_scan(&dir.path().join("missing.npy")),
            Err(PrepError::Decode { .. })
        ));
    }
}
