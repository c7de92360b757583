//! 存储文件的只读访问.

use std::fs::File;
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, IxDyn};

use super::format::{read_frame, Layout, StoreHeader};
use super::{DatasetSpec, Element};
use crate::{PrepError, PrepResult};

/// 存储文件的读取端.
///
/// 打开时扫描一次文件, 只能看到打开时已提交的记录.
#[derive(Debug)]
pub struct StoreReader {
    path: PathBuf,
    file: File,
    layout: Layout,
}

impl StoreReader {
    /// 打开存储文件.
    pub fn open<P: AsRef<Path>>(path: P) -> PrepResult<Self> {
        let path = path.as_ref().to_owned();
        let layout = Layout::scan(&path)?;
        let file = File::open(&path).map_err(PrepError::io(&path))?;
        Ok(Self {
            path,
            file,
            layout,
        })
    }

    /// 块长度.
    #[inline]
    pub fn chunk_len(&self) -> usize {
        self.layout.header.chunk_len as usize
    }

    /// 所有数据集的声明.
    #[inline]
    pub fn specs(&self) -> &[DatasetSpec] {
        &self.layout.header.datasets
    }

    fn position(&self, name: &str) -> PrepResult<usize> {
        position(&self.layout.header, name)
    }

    /// 数据集 `name` 的声明.
    pub fn spec(&self, name: &str) -> PrepResult<&DatasetSpec> {
        let i = self.position(name)?;
        Ok(&self.layout.header.datasets[i])
    }

    /// 数据集 `name` 的记录数.
    pub fn len(&self, name: &str) -> PrepResult<usize> {
        let i = self.position(name)?;
        Ok(self.layout.lens[i] as usize)
    }

    /// 是否所有数据集都为空?
    pub fn is_empty(&self) -> bool {
        self.layout.lens.iter().all(|&n| n == 0)
    }

    /// 读取数据集 `name` 的第 `index` 条记录, 形状与声明一致.
    pub fn read<T: Element>(&mut self, name: &str, index: usize) -> PrepResult<ArrayD<T>> {
        let (i, spec) = self.checked::<T>(name)?;
        let mut out = Vec::with_capacity(spec.record_len());
        self.read_into(i, &spec, index, &mut out)?;
        to_array(&self.path, &spec.shape, out)
    }

    /// 读取数据集 `name` 的全部记录, 形状为 `(len, ...shape)`.
    pub fn read_all<T: Element>(&mut self, name: &str) -> PrepResult<ArrayD<T>> {
        let (i, spec) = self.checked::<T>(name)?;
        let len = self.layout.lens[i] as usize;
        let mut out = Vec::with_capacity(len * spec.record_len());
        for index in 0..len {
            self.read_into(i, &spec, index, &mut out)?;
        }
        let mut shape = Vec::with_capacity(spec.shape.len() + 1);
        shape.push(len);
        shape.extend_from_slice(&spec.shape);
        to_array(&self.path, &shape, out)
    }

    fn checked<T: Element>(&self, name: &str) -> PrepResult<(usize, DatasetSpec)> {
        let i = self.position(name)?;
        let spec = self.layout.header.datasets[i].clone();
        if spec.dtype != T::DTYPE {
            return Err(PrepError::DTypeMismatch {
                name: name.to_owned(),
                declared: spec.dtype,
                found: T::DTYPE,
            });
        }
        Ok((i, spec))
    }

    fn read_into<T: Element>(
        &mut self,
        i: usize,
        spec: &DatasetSpec,
        index: usize,
        out: &mut Vec<T>,
    ) -> PrepResult<()> {
        let len = self.layout.lens[i] as usize;
        if index >= len {
            return Err(PrepError::RecordOutOfRange {
                name: spec.name.clone(),
                index,
                len,
            });
        }
        let Some(loc) = self.layout.locate(i, index as u64).copied() else {
            return Err(PrepError::CorruptStore {
                path: self.path.clone(),
                reason: format!("缺少数据集 `{}` 的第 {index} 条记录", spec.name),
            });
        };
        let raw = read_frame(&mut self.file, &self.path, &loc)?;
        if raw.len() != spec.record_bytes() {
            return Err(PrepError::CorruptStore {
                path: self.path.clone(),
                reason: format!("数据集 `{}` 的第 {index} 条记录不完整", spec.name),
            });
        }
        out.extend(raw.chunks_exact(spec.dtype.size()).map(T::read_le));
        Ok(())
    }
}

pub(crate) fn position(header: &StoreHeader, name: &str) -> PrepResult<usize> {
    header
        .position(name)
        .ok_or_else(|| PrepError::UnknownDataset(name.to_owned()))
}

fn to_array<T>(path: &Path, shape: &[usize], data: Vec<T>) -> PrepResult<ArrayD<T>> {
    ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|e| PrepError::CorruptStore {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}
