//! 增量分块存储.
//!
//! 单文件、只追加的容器, 内含若干命名数据集 (通常为 `X` 与 `Y`). 每个数据集声明
//! 单条记录的形状和元素类型, 记录按 `chunk_len` 编入块与槽位.
//!
//! 每次 [`ChunkedStore::append`] 都把一条记录压缩为一帧并同步到磁盘后才返回;
//! 写入失败不会推进计数器, 也不会影响已提交的记录. 上次失败遗留的不完整尾部
//! 会在下一次追加时被截掉.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use ndarray::{ArrayView, Dimension};
use serde::{Deserialize, Serialize};

mod dtype;
mod format;
mod reader;

pub use dtype::{DType, Element};
pub(crate) use dtype::with_dtype;
pub use reader::StoreReader;

use format::{encode_frame, encode_preamble, Layout, StoreHeader};

use crate::consts::{FEATURES, LABELS};
use crate::{PrepError, PrepResult};

/// 数据集声明.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    /// 名称.
    pub name: String,

    /// 单条记录的形状.
    pub shape: Vec<usize>,

    /// 元素类型.
    pub dtype: DType,
}

impl DatasetSpec {
    /// 构造声明.
    pub fn new<S: Into<String>>(name: S, shape: Vec<usize>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype,
        }
    }

    /// 以 `T` 为元素类型构造声明.
    pub fn of<T: Element, S: Into<String>>(name: S, shape: Vec<usize>) -> Self {
        Self::new(name, shape, T::DTYPE)
    }

    /// 默认的特征数据集 `X`, 记录形状 `(C, H, W)`.
    pub fn features(shape: Vec<usize>, dtype: DType) -> Self {
        Self::new(FEATURES, shape, dtype)
    }

    /// 默认的标签数据集 `Y`, 记录形状 `(H, W)` 或 `(K, H, W)`.
    pub fn labels(shape: Vec<usize>, dtype: DType) -> Self {
        Self::new(LABELS, shape, dtype)
    }

    /// 单条记录的元素个数.
    #[inline]
    pub fn record_len(&self) -> usize {
        self.shape.iter().product()
    }

    /// 单条记录的字节数.
    #[inline]
    pub fn record_bytes(&self) -> usize {
        self.record_len() * self.dtype.size()
    }
}

/// 增量分块存储的写入端.
///
/// 只支持单个写入者. 每次追加时打开文件, 追加完成后关闭.
#[derive(Debug)]
pub struct ChunkedStore {
    path: PathBuf,
    header: StoreHeader,

    /// 每个数据集的记录数.
    lens: Vec<u64>,
    committed: u64,
}

impl ChunkedStore {
    /// 在 `path` 创建新的存储文件 (已存在时覆盖), 所有数据集长度为 0.
    ///
    /// 声明为空、名称重复、数据集超过 256 个或 `chunk_len == 0` 时返回
    /// [`PrepError::InvalidConfig`]; 无法写入 `path` 时返回 [`PrepError::StoreCreate`].
    pub fn create<P: AsRef<Path>>(
        path: P,
        specs: Vec<DatasetSpec>,
        chunk_len: usize,
    ) -> PrepResult<Self> {
        let path = path.as_ref().to_owned();
        validate(&specs, chunk_len)?;
        let header = StoreHeader {
            datasets: specs,
            chunk_len: chunk_len as u64,
        };
        let preamble = encode_preamble(&header)?;
        let create_err = |source| PrepError::StoreCreate {
            path: path.clone(),
            source,
        };
        let mut file = File::create(&path).map_err(create_err)?;
        file.write_all(&preamble)
            .and_then(|_| file.sync_all())
            .map_err(create_err)?;

        info!(
            "Created store {} ({})",
            path.display(),
            header
                .datasets
                .iter()
                .map(|d| format!("{}: {:?} {}", d.name, d.shape, d.dtype))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            lens: vec![0; header.datasets.len()],
            header,
            committed: preamble.len() as u64,
            path,
        })
    }

    /// 重新打开已有的存储文件以继续追加. 计数器从文件中恢复.
    pub fn open<P: AsRef<Path>>(path: P) -> PrepResult<Self> {
        let path = path.as_ref().to_owned();
        let layout = Layout::scan(&path)?;
        if layout.file_len > layout.committed {
            warn!(
                "Store {} has {} uncommitted trailing bytes; they will be trimmed on next append",
                path.display(),
                layout.file_len - layout.committed
            );
        }

        info!("Reopened store {} (lengths {:?})", path.display(), layout.lens);
        Ok(Self {
            path,
            header: layout.header,
            lens: layout.lens,
            committed: layout.committed,
        })
    }

    /// 存储文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 块长度.
    #[inline]
    pub fn chunk_len(&self) -> usize {
        self.header.chunk_len as usize
    }

    /// 所有数据集的声明.
    #[inline]
    pub fn specs(&self) -> &[DatasetSpec] {
        &self.header.datasets
    }

    /// 数据集 `name` 的声明.
    pub fn spec(&self, name: &str) -> PrepResult<&DatasetSpec> {
        let i = reader::position(&self.header, name)?;
        Ok(&self.header.datasets[i])
    }

    /// 数据集 `name` 的记录数.
    pub fn len(&self, name: &str) -> PrepResult<usize> {
        let i = reader::position(&self.header, name)?;
        Ok(self.lens[i] as usize)
    }

    /// 是否所有数据集都为空?
    pub fn is_empty(&self) -> bool {
        self.lens.iter().all(|&n| n == 0)
    }

    /// 是否所有数据集的记录数都相同?
    ///
    /// 存储本身不强制对齐, 这是调用者的责任.
    pub fn is_aligned(&self) -> bool {
        self.lens.windows(2).all(|w| w[0] == w[1])
    }

    /// 向数据集 `name` 追加一条记录.
    ///
    /// 元素类型不符时返回 [`PrepError::DTypeMismatch`], 形状不符时返回
    /// [`PrepError::ShapeMismatch`]; 两者都不改变长度. I/O 失败时返回
    /// [`PrepError::StoreWrite`], 长度不变且已提交的记录完好.
    pub fn append<T: Element, D: Dimension>(
        &mut self,
        name: &str,
        record: ArrayView<'_, T, D>,
    ) -> PrepResult<()> {
        let i = reader::position(&self.header, name)?;
        let spec = &self.header.datasets[i];
        if spec.dtype != T::DTYPE {
            return Err(PrepError::DTypeMismatch {
                name: name.to_owned(),
                declared: spec.dtype,
                found: T::DTYPE,
            });
        }
        if record.shape() != spec.shape.as_slice() {
            return Err(PrepError::shape(
                format!("数据集 `{name}` 的记录"),
                &spec.shape,
                record.shape(),
            ));
        }

        let chunk_len = self.header.chunk_len;
        let index = self.lens[i];
        let mut raw = Vec::with_capacity(spec.record_bytes());
        for v in record.iter() {
            v.write_le(&mut raw);
        }

        let written = encode_frame(i as u8, index / chunk_len, (index % chunk_len) as u32, &raw)
            .and_then(|frame| {
                let mut file = OpenOptions::new().write(true).open(&self.path)?;
                let end = file.seek(SeekFrom::End(0))?;
                if end > self.committed {
                    warn!(
                        "Trimming {} uncommitted bytes from {}",
                        end - self.committed,
                        self.path.display()
                    );
                    file.set_len(self.committed)?;
                }
                file.seek(SeekFrom::Start(self.committed))?;
                file.write_all(&frame)?;
                file.sync_data()?;
                Ok(frame.len() as u64)
            });
        match written {
            Ok(n) => {
                self.committed += n;
                self.lens[i] += 1;
                debug!("Appended record {index} to `{name}` in {}", self.path.display());
                Ok(())
            }
            Err(source) => Err(PrepError::StoreWrite {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn validate(specs: &[DatasetSpec], chunk_len: usize) -> PrepResult<()> {
    if specs.is_empty() {
        return Err(PrepError::InvalidConfig("至少需要声明一个数据集".into()));
    }
    if specs.len() > u8::MAX as usize + 1 {
        return Err(PrepError::InvalidConfig(format!("数据集过多: {}", specs.len())));
    }
    if chunk_len == 0 || chunk_len > u32::MAX as usize {
        return Err(PrepError::InvalidConfig(format!("非法块长度 {chunk_len}")));
    }
    for (i, s) in specs.iter().enumerate() {
        if specs[..i].iter().any(|t| t.name == s.name) {
            return Err(PrepError::InvalidConfig(format!("重复的数据集名称 `{}`", s.name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3, ArrayD};
    use std::fs;

    fn specs() -> Vec<DatasetSpec> {
        vec![
            DatasetSpec::of::<f32, _>("X", vec![2, 3, 3]),
            DatasetSpec::of::<u8, _>("Y", vec![3, 3]),
        ]
    }

    fn x(seed: usize) -> Array3<f32> {
        Array3::from_shape_fn((2, 3, 3), |(c, h, w)| (seed * 100 + c * 9 + h * 3 + w) as f32 * 0.5)
    }

    fn y(seed: usize) -> Array2<u8> {
        Array2::from_shape_fn((3, 3), |(h, w)| ((seed + h + w) % 5) as u8)
    }

    #[test]
    fn test_round_trip_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mrs");
        let mut store = ChunkedStore::create(&path, specs(), 2).unwrap();

        let mut weird = x(0);
        weird[(0, 0, 0)] = f32::from_bits(0x7fc0_0001);
        weird[(1, 2, 2)] = -0.0;
        store.append("X", weird.view()).unwrap();
        store.append("X", x(1).view()).unwrap();
        store.append("X", x(2).view()).unwrap();
        store.append("Y", y(0).view()).unwrap();
        assert_eq!(store.len("X").unwrap(), 3);
        assert!(!store.is_aligned());

        let mut reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.len("X").unwrap(), 3);
        assert_eq!(reader.len("Y").unwrap(), 1);
        let back: ArrayD<f32> = reader.read("X", 0).unwrap();
        let bits = |a: &ArrayD<f32>| a.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&back), bits(&weird.into_dyn()));
        assert_eq!(reader.read::<f32>("X", 2).unwrap(), x(2).into_dyn());
        assert_eq!(reader.read::<u8>("Y", 0).unwrap(), y(0).into_dyn());

        let all = reader.read_all::<f32>("X").unwrap();
        assert_eq!(all.shape(), [3, 2, 3, 3]);
        assert!(matches!(
            reader.read::<f32>("X", 3),
            Err(PrepError::RecordOutOfRange { index: 3, len: 3, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ChunkedStore::create(dir.path().join("b.mrs"), specs(), 1).unwrap();

        let err = store.append("X", Array3::<f32>::zeros((2, 3, 4)).view()).unwrap_err();
        assert!(matches!(err, PrepError::ShapeMismatch { .. }));
        let err = store.append("X", Array3::<f64>::zeros((2, 3, 3)).view()).unwrap_err();
        assert!(matches!(err, PrepError::DTypeMismatch { .. }));
        let err = store.append("Z", y(0).view()).unwrap_err();
        assert!(matches!(err, PrepError::UnknownDataset(_)));
        assert!(store.is_empty());

        let mut reader = StoreReader::open(store.path()).unwrap();
        assert!(matches!(
            reader.read::<i64>("Y", 0),
            Err(PrepError::DTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_len_for_any_chunk_len() {
        let dir = tempfile::tempdir().unwrap();
        for chunk_len in [1, 3, 4] {
            let path = dir.path().join(format!("c{chunk_len}.mrs"));
            let mut store = ChunkedStore::create(&path, specs(), chunk_len).unwrap();
            for k in 0..7 {
                store.append("X", x(k).view()).unwrap();
                store.append("Y", y(k).view()).unwrap();
            }
            assert!(store.is_aligned());
            let mut reader = StoreReader::open(&path).unwrap();
            assert_eq!(reader.len("X").unwrap(), 7);
            assert_eq!(reader.len("Y").unwrap(), 7);
            for k in 0..7 {
                assert_eq!(reader.read::<f32>("X", k).unwrap(), x(k).into_dyn());
            }
        }
    }

    #[test]
    fn test_reopen_and_continue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.mrs");
        {
            let mut store = ChunkedStore::create(&path, specs(), 3).unwrap();
            for k in 0..4 {
                store.append("X", x(k).view()).unwrap();
            }
        }
        let mut store = ChunkedStore::open(&path).unwrap();
        assert_eq!(store.len("X").unwrap(), 4);
        store.append("X", x(4).view()).unwrap();
        store.append("X", x(5).view()).unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.len("X").unwrap(), 6);
        let all = reader.read_all::<f32>("X").unwrap();
        for k in 0..6 {
            assert_eq!(all.index_axis(ndarray::Axis(0), k), x(k).into_dyn());
        }
    }

    #[test]
    fn test_torn_tail_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.mrs");
        let mut store = ChunkedStore::create(&path, specs(), 2).unwrap();
        store.append("Y", y(0).view()).unwrap();
        drop(store);
        let good = fs::metadata(&path).unwrap().len();

        // 模拟写到一半的帧.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&format::FRAME_MAGIC.to_le_bytes()).unwrap();
        f.write_all(&[1, 0, 0]).unwrap();
        drop(f);

        let reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.len("Y").unwrap(), 1);

        let mut store2 = ChunkedStore::open(&path).unwrap();
        assert_eq!(store2.len("Y").unwrap(), 1);
        store2.append("Y", y(1).view()).unwrap();
        assert!(fs::metadata(&path).unwrap().len() > good);
        let mut reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.len("Y").unwrap(), 2);
        assert_eq!(reader.read::<u8>("Y", 1).unwrap(), y(1).into_dyn());
    }

    #[test]
    fn test_bad_frame_before_committed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.mrs");
        let mut store = ChunkedStore::create(&path, specs(), 1).unwrap();
        for k in 0..5 {
            store.append("Y", y(k).view()).unwrap();
        }
        drop(store);
        let layout = Layout::scan(&path).unwrap();
        let second = *layout.locate(1, 1).unwrap();
        let last = *layout.locate(1, 4).unwrap();
        let good = fs::read(&path).unwrap();

        // 中间的帧损坏: 拒绝打开, 文件保持原样.
        let mut bytes = good.clone();
        bytes[second.offset as usize] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            ChunkedStore::open(&path),
            Err(PrepError::CorruptStore { .. })
        ));
        assert!(matches!(
            StoreReader::open(&path),
            Err(PrepError::CorruptStore { .. })
        ));
        assert_eq!(fs::read(&path).unwrap(), bytes);

        // 最后一帧损坏: 视为未提交的尾部.
        let mut bytes = good;
        bytes[(last.offset + last.len - 1) as usize] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        let mut store = ChunkedStore::open(&path).unwrap();
        assert_eq!(store.len("Y").unwrap(), 4);
        store.append("Y", y(9).view()).unwrap();
        let mut reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.len("Y").unwrap(), 5);
        assert_eq!(reader.read::<u8>("Y", 3).unwrap(), y(3).into_dyn());
        assert_eq!(reader.read::<u8>("Y", 4).unwrap(), y(9).into_dyn());
    }

    #[test]
    fn test_file_size_independent_of_chunk_len() {
        let dir = tempfile::tempdir().unwrap();
        let sizes: Vec<u64> = [1, 16]
            .into_iter()
            .map(|chunk_len| {
                let path = dir.path().join(format!("s{chunk_len}.mrs"));
                let mut store = ChunkedStore::create(&path, specs(), chunk_len).unwrap();
                for k in 0..16 {
                    store.append("X", x(k).view()).unwrap();
                }
                fs::metadata(&path).unwrap().len()
            })
            .collect();
        assert_eq!(sizes[0], sizes[1]);
    }

    #[test]
    fn test_failed_append_keeps_len() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.mrs");
        let mut store = ChunkedStore::create(&path, specs(), 2).unwrap();
        store.append("X", x(0).view()).unwrap();

        fs::remove_file(&path).unwrap();
        let err = store.append("X", x(1).view()).unwrap_err();
        assert!(matches!(err, PrepError::StoreWrite { .. }));
        assert_eq!(store.len("X").unwrap(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_create_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no").join("such").join("f.mrs");
        assert!(matches!(
            ChunkedStore::create(&missing, specs(), 1),
            Err(PrepError::StoreCreate { .. })
        ));
        let ok = dir.path().join("f.mrs");
        assert!(matches!(
            ChunkedStore::create(&ok, specs(), 0),
            Err(PrepError::InvalidConfig(_))
        ));
        let dup = vec![specs()[0].clone(), specs()[0].clone()];
        assert!(ChunkedStore::create(&ok, dup, 1).is_err());
        assert!(ChunkedStore::create(&ok, vec![], 1).is_err());

        let empty = ChunkedStore::create(&ok, specs(), 1).unwrap();
        assert!(empty.is_empty() && empty.is_aligned());
        let reader = StoreReader::open(&ok).unwrap();
        assert_eq!(reader.len("X").unwrap(), 0);
        assert_eq!(reader.spec("Y").unwrap().shape, [3, 3]);
    }
}
